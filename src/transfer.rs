//! The transfer engine: the background worker spawned once a data
//! connection is open, and the ASCII/binary translation it applies while
//! streaming. Ownership of the data socket and the file lock held for the
//! duration of the transfer move into this worker; only it sends the
//! terminal control reply (150/226/426/451), so the session loop is free
//! to keep reading the next command while a transfer runs.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::error::FtpError;
use crate::filelock::FileLockGuard;
use crate::protocol::{format_reply, TransferType};
use crate::session::SessionShared;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOp {
    SendFile,
    RecvFile { append: bool },
    /// `abs_path` is the directory to list; `only`, when set, restricts
    /// the listing to that single entry name (the LIST-on-a-file case).
    SendList { only: Option<String> },
    SendNlst { only: Option<String> },
}

/// Everything the worker needs, decided by the handler before the data
/// socket is opened: which direction, which file, where to start, and the
/// already-acquired lock (if any -- LIST/NLST take none) whose release
/// this task now owns.
pub struct TransferRequest {
    pub op: TransferOp,
    pub abs_path: PathBuf,
    pub offset: u64,
    pub transfer_type: TransferType,
    pub lock: Option<FileLockGuard>,
}

/// Spawns the worker and returns its handle. The handler has already sent
/// the 150 reply; this task alone is responsible for the terminal reply.
pub fn spawn(
    data_stream: TcpStream,
    request: TransferRequest,
    shared: Arc<SessionShared>,
    control_writer: Arc<TokioMutex<OwnedWriteHalf>>,
) -> JoinHandle<()> {
    shared.transfer_running.store(true, Ordering::SeqCst);
    shared.reset_abort();
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        shared.set_data_fd(data_stream.as_raw_fd());
    }
    tokio::spawn(async move {
        let op = request.op.clone();
        let result = run(data_stream, &request, &shared).await;
        drop(request.lock);
        shared.transfer_running.store(false, Ordering::SeqCst);
        shared.set_data_fd(-1);
        report(&control_writer, op, result).await;
    })
}

async fn run(
    mut data_stream: TcpStream,
    request: &TransferRequest,
    shared: &Arc<SessionShared>,
) -> Result<(), FtpError> {
    match &request.op {
        TransferOp::SendFile => send_file(&mut data_stream, request, shared).await,
        TransferOp::RecvFile { append } => recv_file(&mut data_stream, request, shared, *append).await,
        TransferOp::SendList { only } => {
            send_listing(&mut data_stream, &request.abs_path, only.as_deref(), shared, true).await
        }
        TransferOp::SendNlst { only } => {
            send_listing(&mut data_stream, &request.abs_path, only.as_deref(), shared, false).await
        }
    }
}

async fn send_file(
    data_stream: &mut TcpStream,
    request: &TransferRequest,
    shared: &Arc<SessionShared>,
) -> Result<(), FtpError> {
    let mut file = tokio::fs::File::open(&request.abs_path).await?;
    if request.offset > 0 {
        file.seek(SeekFrom::Start(request.offset)).await?;
    }

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut out = Vec::with_capacity(CHUNK_SIZE * 2);
    loop {
        if check_abort(shared).await {
            return Err(FtpError::data_connection("transfer aborted"));
        }
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.clear();
        match request.transfer_type {
            TransferType::Ascii => ascii_encode(&buf[..n], &mut out),
            TransferType::Binary | TransferType::Ebcdic => out.extend_from_slice(&buf[..n]),
        }
        data_stream
            .write_all(&out)
            .await
            .map_err(|e| FtpError::data_connection(format!("data write failed: {e}")))?;
        shared.bytes_downloaded.fetch_add(n as u64, Ordering::SeqCst);
    }
    shared.files_downloaded.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

async fn recv_file(
    data_stream: &mut TcpStream,
    request: &TransferRequest,
    shared: &Arc<SessionShared>,
    append: bool,
) -> Result<(), FtpError> {
    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create(true);
    if append {
        opts.append(true);
    }
    let mut file = opts.open(&request.abs_path).await?;
    if !append {
        if request.offset > 0 {
            file.seek(SeekFrom::Start(request.offset)).await?;
        } else {
            file.set_len(0).await?;
        }
    }

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut out = Vec::with_capacity(CHUNK_SIZE * 2);
    let mut pending_cr = false;
    loop {
        if check_abort(shared).await {
            return Err(FtpError::data_connection("transfer aborted"));
        }
        let n = data_stream
            .read(&mut buf)
            .await
            .map_err(|e| FtpError::data_connection(format!("data read failed: {e}")))?;
        if n == 0 {
            break;
        }
        out.clear();
        match request.transfer_type {
            TransferType::Ascii => ascii_decode(&buf[..n], &mut out, &mut pending_cr),
            TransferType::Binary | TransferType::Ebcdic => out.extend_from_slice(&buf[..n]),
        }
        file.write_all(&out).await?;
        shared.bytes_uploaded.fetch_add(n as u64, Ordering::SeqCst);
    }
    if pending_cr {
        file.write_all(b"\r").await?;
    }
    shared.files_uploaded.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

async fn send_listing(
    data_stream: &mut TcpStream,
    dir: &PathBuf,
    only: Option<&str>,
    shared: &Arc<SessionShared>,
    long: bool,
) -> Result<(), FtpError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut lines = String::new();
    while let Some(entry) = entries.next_entry().await? {
        if check_abort(shared).await {
            return Err(FtpError::data_connection("transfer aborted"));
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(only) = only {
            if name != only {
                continue;
            }
        }
        if long {
            let metadata = entry.metadata().await?;
            let link_target = if metadata.is_symlink() {
                tokio::fs::read_link(entry.path()).await.ok()
            } else {
                None
            };
            lines.push_str(&format_listing_line(&name, &metadata, link_target.as_deref()));
        } else {
            lines.push_str(&name);
        }
        lines.push_str("\r\n");
    }
    data_stream
        .write_all(lines.as_bytes())
        .await
        .map_err(|e| FtpError::data_connection(format!("data write failed: {e}")))?;
    Ok(())
}

async fn check_abort(shared: &Arc<SessionShared>) -> bool {
    shared.is_aborting()
}

fn ascii_encode(input: &[u8], out: &mut Vec<u8>) {
    for &b in input {
        if b == b'\n' {
            out.push(b'\r');
        }
        out.push(b);
    }
}

fn ascii_decode(input: &[u8], out: &mut Vec<u8>, pending_cr: &mut bool) {
    for &b in input {
        if *pending_cr {
            *pending_cr = false;
            if b == b'\n' {
                out.push(b'\n');
                continue;
            }
            out.push(b'\r');
        }
        if b == b'\r' {
            *pending_cr = true;
            continue;
        }
        out.push(b);
    }
}

fn format_listing_line(name: &str, metadata: &std::fs::Metadata, link_target: Option<&Path>) -> String {
    let file_type = if metadata.is_symlink() {
        'l'
    } else if metadata.is_dir() {
        'd'
    } else {
        '-'
    };

    #[cfg(unix)]
    let (mode, nlink, uid, gid) = {
        use std::os::unix::fs::MetadataExt;
        (metadata.mode(), metadata.nlink(), metadata.uid(), metadata.gid())
    };
    #[cfg(not(unix))]
    let (mode, nlink, uid, gid): (u32, u64, u32, u32) = (
        if metadata.permissions().readonly() { 0o444 } else { 0o644 },
        1,
        0,
        0,
    );

    // No password-database lookup is wired in (spec §4.9 allows falling
    // back to decimal uid/gid when names aren't resolved); we always fall
    // back, matching the core's posture of not depending on a system
    // users database.
    let perms = format_permission_bits(mode);
    let size = metadata.len();
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let timestamp = modified.format("%b %d %H:%M");
    let suffix = match link_target {
        Some(target) => format!(" -> {}", target.display()),
        None => String::new(),
    };
    format!("{file_type}{perms} {nlink:>3} {uid} {gid} {size:>10} {timestamp} {name}{suffix}")
}

fn format_permission_bits(mode: u32) -> String {
    const BITS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    BITS.iter().map(|(mask, ch)| if mode & mask != 0 { *ch } else { '-' }).collect()
}

async fn report(
    control_writer: &Arc<TokioMutex<OwnedWriteHalf>>,
    _op: TransferOp,
    result: Result<(), FtpError>,
) {
    // The 426 for an aborted transfer was already sent by the ABOR handler;
    // the worker's own terminal reply for that case is 226.
    let (code, message) = match result {
        Ok(()) => (226, "Transfer complete".to_string()),
        Err(FtpError::DataConnection(msg)) if msg == "transfer aborted" => {
            (226, "ABOR command successful".to_string())
        }
        Err(FtpError::DataConnection(msg)) => (426, format!("Connection closed; transfer aborted: {msg}")),
        Err(FtpError::Io(e)) => (451, format!("Requested action aborted: {e}")),
        Err(other) => (451, format!("Requested action aborted: {other}")),
    };
    let line = format_reply(code, &message);
    let mut writer = control_writer.lock().await;
    let _ = writer.write_all(line.as_bytes()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_encode_doubles_bare_lf() {
        let mut out = Vec::new();
        ascii_encode(b"a\nb", &mut out);
        assert_eq!(out, b"a\r\nb");
    }

    #[test]
    fn ascii_decode_collapses_crlf() {
        let mut out = Vec::new();
        let mut pending = false;
        ascii_decode(b"a\r\nb", &mut out, &mut pending);
        assert_eq!(out, b"a\nb");
        assert!(!pending);
    }

    #[test]
    fn ascii_decode_handles_split_crlf_across_chunks() {
        let mut out = Vec::new();
        let mut pending = false;
        ascii_decode(b"a\r", &mut out, &mut pending);
        assert_eq!(out, b"a");
        assert!(pending);
        ascii_decode(b"\nb", &mut out, &mut pending);
        assert_eq!(out, b"a\nb");
        assert!(!pending);
    }

    #[test]
    fn lone_cr_passes_through_when_not_followed_by_lf() {
        let mut out = Vec::new();
        let mut pending = false;
        ascii_decode(b"a\rb", &mut out, &mut pending);
        assert_eq!(out, b"a\rb");
        assert!(!pending);
    }

    #[test]
    fn permission_bits_format_rwxr_xr_x() {
        assert_eq!(format_permission_bits(0o755), "rwxr-xr-x");
    }
}
