//! End-to-end session tests: a real server bound to an ephemeral loopback
//! port, driven by a real client socket, covering the concrete scenarios
//! a client actually observes over the wire.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use ftpd_core::auth::{perm, AuthStore, UserTable};
use ftpd_core::config::{AddressFamily, Config, LogLevel};
use ftpd_core::context::ServerContext;
use ftpd_core::server;

fn test_config(root: &std::path::Path) -> Config {
    Config {
        port: 0,
        host: "127.0.0.1".to_string(),
        root: root.display().to_string(),
        family: AddressFamily::Ipv4,
        log_level: LogLevel::Error,
        max_connections: 8,
        users_file: None,
        anonymous: true,
        control_timeout_secs: 5,
        data_timeout_secs: 5,
    }
}

async fn spawn_server(auth: AuthStore, root: PathBuf) -> std::net::SocketAddr {
    let config = test_config(&root);
    let ctx = ServerContext::new(config, Arc::new(auth), root, [127, 0, 0, 1]);
    let listener = server::bind(&ctx).await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(server::serve(ctx, listener));
    addr
}

/// Reads one full reply (following continuation lines until the line
/// whose 4th byte is a space rather than a dash).
async fn read_reply<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> String {
    let mut full = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.expect("read reply line");
        assert!(n > 0, "connection closed while expecting a reply");
        full.push_str(&line);
        if line.len() < 4 || line.as_bytes()[3] != b'-' {
            break;
        }
    }
    full
}

async fn send(stream: &mut TcpStream, line: &str) {
    stream.write_all(format!("{line}\r\n").as_bytes()).await.expect("write command");
}

fn parse_pasv_port(reply: &str) -> u16 {
    let start = reply.find('(').expect("pasv reply has a paren") + 1;
    let end = reply.find(')').expect("pasv reply has a closing paren");
    let nums: Vec<u16> = reply[start..end].split(',').map(|n| n.trim().parse().unwrap()).collect();
    nums[4] * 256 + nums[5]
}

#[tokio::test]
async fn anonymous_login_and_list() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("pub")).unwrap();
    std::fs::write(dir.path().join("pub/readme.txt"), b"hello\n").unwrap();

    let auth = AuthStore::new(UserTable::new(true));
    let addr = spawn_server(auth, dir.path().to_path_buf()).await;

    let mut control = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(control.split().0);
    // BufReader over a split half requires re-wiring below; reconnect using
    // a single stream split into owned halves instead.
    drop(reader);

    let (read_half, mut write_half) = control.into_split();
    let mut reader = BufReader::new(read_half);

    assert!(read_reply(&mut reader).await.starts_with("220"));

    send(&mut write_half, "USER anonymous").await;
    assert!(read_reply(&mut reader).await.starts_with("331"));

    send(&mut write_half, "PASS guest@example.com").await;
    assert!(read_reply(&mut reader).await.starts_with("230"));

    send(&mut write_half, "PWD").await;
    let pwd_reply = read_reply(&mut reader).await;
    assert!(pwd_reply.contains("\"/pub\""), "unexpected PWD reply: {pwd_reply}");

    send(&mut write_half, "PASV").await;
    let pasv_reply = read_reply(&mut reader).await;
    assert!(pasv_reply.starts_with("227"));
    let data_port = parse_pasv_port(&pasv_reply);
    let mut data_conn = TcpStream::connect((addr.ip(), data_port)).await.unwrap();

    send(&mut write_half, "LIST").await;
    assert!(read_reply(&mut reader).await.starts_with("150"));

    let mut listing = Vec::new();
    data_conn.read_to_end(&mut listing).await.unwrap();
    let listing = String::from_utf8(listing).unwrap();
    assert!(listing.contains("readme.txt"), "listing missing entry: {listing}");

    assert!(read_reply(&mut reader).await.starts_with("226"));
}

#[tokio::test]
async fn path_escape_attempts_are_denied() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("users/alice")).unwrap();
    std::fs::create_dir_all(dir.path().join("users/bob")).unwrap();

    let mut table = UserTable::new(false);
    table.add_user("alice", "hunter2", "/users/alice", perm::ALL).unwrap();
    let addr = spawn_server(AuthStore::new(table), dir.path().to_path_buf()).await;

    let control = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = control.into_split();
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await;
    send(&mut write_half, "USER alice").await;
    read_reply(&mut reader).await;
    send(&mut write_half, "PASS hunter2").await;
    assert!(read_reply(&mut reader).await.starts_with("230"));

    send(&mut write_half, "CWD /users/bob").await;
    assert!(read_reply(&mut reader).await.starts_with("550"));

    send(&mut write_half, "CWD ../bob").await;
    assert!(read_reply(&mut reader).await.starts_with("550"));

    send(&mut write_half, "CWD .").await;
    assert!(read_reply(&mut reader).await.starts_with("250"));
}

#[tokio::test]
async fn restart_download_resumes_at_offset() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("users/alice")).unwrap();
    std::fs::write(dir.path().join("users/alice/big.bin"), vec![0x01u8; 1000]).unwrap();

    let mut table = UserTable::new(false);
    table.add_user("alice", "hunter2", "/users/alice", perm::ALL).unwrap();
    let addr = spawn_server(AuthStore::new(table), dir.path().to_path_buf()).await;

    let control = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = control.into_split();
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await;
    send(&mut write_half, "USER alice").await;
    read_reply(&mut reader).await;
    send(&mut write_half, "PASS hunter2").await;
    read_reply(&mut reader).await;

    send(&mut write_half, "TYPE I").await;
    assert!(read_reply(&mut reader).await.starts_with("200"));

    // PASV's pre-hook clears any pending restart offset (registry.rs's
    // default `ClearAll` hook -- spec §4.3), so it must run before REST,
    // not between REST and RETR.
    send(&mut write_half, "PASV").await;
    let pasv_reply = read_reply(&mut reader).await;
    let data_port = parse_pasv_port(&pasv_reply);
    let mut data_conn = TcpStream::connect((addr.ip(), data_port)).await.unwrap();

    send(&mut write_half, "REST 500").await;
    assert!(read_reply(&mut reader).await.starts_with("350"));

    send(&mut write_half, "RETR big.bin").await;
    assert!(read_reply(&mut reader).await.starts_with("150"));

    let mut received = Vec::new();
    data_conn.read_to_end(&mut received).await.unwrap();
    assert_eq!(received.len(), 500);
    assert!(received.iter().all(|&b| b == 0x01));

    assert!(read_reply(&mut reader).await.starts_with("226"));
}
