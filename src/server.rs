//! The acceptor: binds the listening socket, enforces the connection cap,
//! and spawns one worker task per accepted client. Each worker owns its
//! `Session` exclusively and runs the read-parse-dispatch-reply loop.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as TokioMutex;

use crate::config::AddressFamily;
use crate::context::ServerContext;
use crate::handlers;
use crate::protocol::{format_reply, parse_command};
use crate::session::Session;

/// Binds the listening socket for the configured address family and port.
pub async fn bind(server: &ServerContext) -> std::io::Result<TcpListener> {
    let addr = match server.config.family {
        AddressFamily::Ipv6 => format!("[::]:{}", server.config.port),
        _ => format!("{}:{}", server.config.host, server.config.port),
    };
    TcpListener::bind(addr).await
}

/// Runs the accept loop until the listener is closed (dropping `listener`
/// from the caller's side, e.g. on a shutdown signal, ends the loop since
/// `accept` then errors out).
pub async fn serve(server: Arc<ServerContext>, listener: TcpListener) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        if !server.try_reserve_connection() {
            tracing::info!(%addr, "rejecting connection: at capacity");
            reject_at_capacity(stream).await;
            continue;
        }

        let server = server.clone();
        tokio::spawn(async move {
            run_session(server.clone(), stream, addr).await;
            server.release_connection();
        });
    }
}

async fn reject_at_capacity(mut stream: TcpStream) {
    let line = format_reply(421, "Service not available");
    let _ = stream.write_all(line.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn run_session(server: Arc<ServerContext>, stream: TcpStream, addr: SocketAddr) {
    let peer_ip = addr.ip().to_string();
    let peer_port = addr.port();
    tracing::info!(%peer_ip, peer_port, "session starting");

    let (read_half, write_half) = stream.into_split();
    let control_writer = Arc::new(TokioMutex::new(write_half));
    let mut session = Session::new(peer_ip.clone(), peer_port, control_writer, server.clone());

    if session.send_reply(220, "FTP Server Ready").await.is_err() {
        return;
    }

    let timeout = Duration::from_secs(server.config.control_timeout_secs);
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let read_result = tokio::time::timeout(timeout, reader.read_line(&mut line)).await;
        let n = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(_)) | Err(_) => break,
        };
        if n == 0 {
            break;
        }

        if let Err(e) = dispatch_line(&server, &mut session, &line).await {
            tracing::warn!(error = %e, %peer_ip, "fatal session error");
            break;
        }
        if session.should_quit {
            break;
        }
    }

    if let Some(handle) = session.transfer_worker.take() {
        session.shared.request_abort();
        let _ = handle.await;
    }
    tracing::info!(%peer_ip, peer_port, "session ending");
}

async fn dispatch_line(server: &Arc<ServerContext>, session: &mut Session, line: &str) -> Result<(), crate::error::FtpError> {
    let command = match parse_command(line) {
        Ok(c) => c,
        Err(_) => {
            session.send_reply(500, "Syntax error, command unrecognized").await?;
            return Ok(());
        }
    };

    if !session.is_authenticated() && !handlers::allowed_before_auth(&command.verb) {
        session.send_reply(530, "Not logged in").await?;
        session.touch_activity();
        return Ok(());
    }

    match server.registry.dispatch(session, &command.verb, command.arg_str()).await {
        Some(Ok(())) => {}
        Some(Err(e)) => match e.reply_code() {
            Some((code, msg)) => session.send_reply(code, msg).await?,
            None => return Err(e),
        },
        None => session.send_reply(502, "Command not implemented").await?,
    }

    session.touch_activity();
    Ok(())
}
