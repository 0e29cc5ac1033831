//! Data-connection manager: PORT/PASV setup, opening the data socket for
//! a transfer, and lifecycle bookkeeping (spec §4.8).

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{FtpError, FtpResult};
use crate::session::{DataMode, Session};

/// Lowest port tried for a PASV listener (spec §4.8).
const PASV_PORT_MIN: u16 = 20000;
/// Highest port tried for a PASV listener (inclusive).
const PASV_PORT_MAX: u16 = 65535;

/// PORT: store the client's endpoint for active mode, closing any
/// existing data connection first.
pub fn set_active(session: &mut Session, ip: [u8; 4], port: u16) {
    session.close_data_connection_state();
    let ip_str = format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]);
    session.active_peer = Some((ip_str, port));
    session.data_mode = DataMode::Active;
}

/// PASV: bind the first free port in `[20000, 65535]`, closing any
/// existing data connection first. Returns the IP/port to report to the
/// client in the 227 reply.
pub async fn setup_passive(session: &mut Session) -> FtpResult<([u8; 4], u16)> {
    session.close_data_connection_state();
    let mut last_err = None;
    for port in PASV_PORT_MIN..=PASV_PORT_MAX {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                session.pasv_listener = Some(listener);
                session.passive_port = Some(port);
                session.data_mode = DataMode::Passive;
                return Ok((session.server.server_ip, port));
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(FtpError::data_connection(format!(
        "no passive port available in [{PASV_PORT_MIN}, {PASV_PORT_MAX}]: {last_err:?}"
    )))
}

/// Opens the data connection for a transfer: connects to the stored peer
/// in active mode, or accepts the single pending connection in passive
/// mode. Both paths respect the configured data-connection timeout
/// (spec §4.8, §5).
pub async fn open(session: &mut Session) -> FtpResult<TcpStream> {
    let timeout = Duration::from_secs(session.server.config.data_timeout_secs);
    match session.data_mode {
        DataMode::Active => {
            let (ip, port) = session
                .active_peer
                .clone()
                .ok_or_else(|| FtpError::data_connection("no active peer set"))?;
            let addr = format!("{ip}:{port}");
            let connect = TcpStream::connect(&addr);
            match tokio::time::timeout(timeout, connect).await {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(FtpError::data_connection(format!("active connect failed: {e}"))),
                Err(_) => Err(FtpError::data_connection("active connect timed out")),
            }
        }
        DataMode::Passive => {
            let listener = session
                .pasv_listener
                .take()
                .ok_or_else(|| FtpError::data_connection("no passive listener"))?;
            session.passive_port = None;
            match tokio::time::timeout(timeout, listener.accept()).await {
                Ok(Ok((stream, _addr))) => Ok(stream),
                Ok(Err(e)) => Err(FtpError::data_connection(format!("accept failed: {e}"))),
                Err(_) => Err(FtpError::data_connection("passive accept timed out")),
            }
        }
        DataMode::None => Err(FtpError::data_connection(
            "no data connection configured (use PORT or PASV first)",
        )),
    }
}
