//! The 30-odd one-command handler functions implementing RFC 959
//! semantics. Each has the uniform shape `(session, arg) -> FtpResult<()>`
//! so the registry can hold them as plain function pointers; authentication
//! gating for commands that require it happens once, centrally, before
//! dispatch (see `server.rs`) rather than being repeated in every handler.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::auth::perm;
use crate::data_conn;
use crate::error::{AuthFailure, FtpError, FtpResult};
use crate::filelock::FileLockGuard;
use crate::protocol::{
    format_pasv, format_reply, format_reply_multiline, parse_mode, parse_port, parse_stru,
    parse_type, validate_path_argument, TransferType,
};
use crate::registry::CommandRegistry;
use crate::session::{Session, SessionState};
use crate::transfer::{self, TransferOp, TransferRequest};

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn lock_busy(session: &Session, abs: &Path) -> bool {
    let key = path_key(abs);
    let table = &session.server.file_locks;
    table.is_exclusive_locked(&key).await || table.shared_lock_count(&key).await > 0
}

/// First-line reject of blatantly absolute/escaping path arguments (spec
/// §4.4), for the handlers that take a pathname meant to be resolved
/// relative to the session (everything except CWD/CDUP, which
/// legitimately accept a session-absolute `/...` argument to jump
/// straight to a virtual path). Sends `501` and returns `false` on
/// rejection so the caller can bail out early.
async fn require_valid_path(session: &mut Session, input: &str) -> FtpResult<bool> {
    if validate_path_argument(input) {
        Ok(true)
    } else {
        session.send_reply(501, "Illegal file name").await?;
        Ok(false)
    }
}

pub async fn user(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let name = match arg {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => {
            session.send_reply(501, "USER requires a username").await?;
            return Ok(());
        }
    };

    let known = if name == "anonymous" {
        session.server.auth.anonymous_enabled().await
    } else {
        session.server.auth.user_exists(&name).await
    };

    if !known {
        session.send_reply(530, "Not logged in").await?;
        return Ok(());
    }

    session.username = Some(name);
    session.state = SessionState::WaitPassword;
    session.send_reply(331, "User name okay, need password").await
}

pub async fn pass(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    if session.state != SessionState::WaitPassword {
        session.send_reply(503, "Login with USER first").await?;
        return Ok(());
    }
    let username = session.username.clone().expect("WaitPassword implies a username was set");
    let password = arg.unwrap_or("");

    match session.server.auth.authenticate(&username, password).await {
        Some(user) => {
            session.permissions = user.permissions;
            session.user_home = user.home_dir.clone();
            session.current_dir = user.home_dir;
            session.state = SessionState::Authenticated;
            session.send_reply(230, "User logged in, proceed").await
        }
        None => {
            session.state = SessionState::Connected;
            session.username = None;
            session.send_reply(530, "Not logged in").await
        }
    }
}

pub async fn acct(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    session.send_reply(202, "Command not implemented, superfluous at this site").await
}

pub async fn smnt(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    session.send_reply(202, "Command not implemented, superfluous at this site").await
}

pub async fn stou(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    session.send_reply(202, "Command not implemented, superfluous at this site").await
}

pub async fn help(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    session.send_reply(202, "Command not implemented, superfluous at this site").await
}

pub async fn site(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    session.send_reply(202, "Command not implemented, superfluous at this site").await
}

pub async fn allo(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    session.send_reply(200, "ALLO command ignored").await
}

pub async fn quit(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    session.should_quit = true;
    let shared = &session.shared;
    let uptime = session
        .connect_time
        .elapsed()
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let lines = [
        "Goodbye.".to_string(),
        format!(
            "Stats: {} bytes up, {} bytes down, {} files up, {} files down, {} commands, {}s connected",
            shared.bytes_uploaded.load(std::sync::atomic::Ordering::SeqCst),
            shared.bytes_downloaded.load(std::sync::atomic::Ordering::SeqCst),
            shared.files_uploaded.load(std::sync::atomic::Ordering::SeqCst),
            shared.files_downloaded.load(std::sync::atomic::Ordering::SeqCst),
            shared.commands_received.load(std::sync::atomic::Ordering::SeqCst),
            uptime,
        ),
    ];
    session.send_reply_multiline(221, &lines).await
}

pub async fn rein(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    session.close_data_connection_state();
    session.reinitialize();
    session.send_reply(220, "Service ready for new user").await
}

pub async fn cwd(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let input = arg.unwrap_or("/");
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::READ) {
        return reply_for_error(session, e).await;
    }
    match tokio::fs::metadata(&abs).await {
        Ok(m) if m.is_dir() => {
            session.current_dir = virtual_path;
            session.send_reply(250, "Directory successfully changed").await
        }
        _ => session.send_reply(550, "Failed to change directory").await,
    }
}

pub async fn cdup(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    let (virtual_path, abs) = session.resolve("..");
    match tokio::fs::metadata(&abs).await {
        Ok(m) if m.is_dir() => {
            session.current_dir = virtual_path;
            session.send_reply(250, "Directory successfully changed").await
        }
        _ => session.send_reply(550, "Failed to change directory").await,
    }
}

pub async fn pwd(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    let msg = format!("\"{}\" is current directory", session.current_dir);
    session.send_reply(257, msg).await
}

pub async fn mkd(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let input = match arg {
        Some(a) if !a.is_empty() => a,
        _ => {
            session.send_reply(501, "MKD requires a pathname").await?;
            return Ok(());
        }
    };
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::MKDIR) {
        return reply_for_error(session, e).await;
    }
    match tokio::fs::create_dir(&abs).await {
        Ok(()) => session.send_reply(257, format!("\"{virtual_path}\" directory created")).await,
        Err(_) => session.send_reply(550, "Failed to create directory").await,
    }
}

pub async fn rmd(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let input = match arg {
        Some(a) if !a.is_empty() => a,
        _ => {
            session.send_reply(501, "RMD requires a pathname").await?;
            return Ok(());
        }
    };
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::RMDIR) {
        return reply_for_error(session, e).await;
    }
    match tokio::fs::remove_dir(&abs).await {
        Ok(()) => session.send_reply(250, "Directory removed").await,
        Err(_) => session.send_reply(550, "Failed to remove directory").await,
    }
}

pub async fn dele(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let input = match arg {
        Some(a) if !a.is_empty() => a,
        _ => {
            session.send_reply(501, "DELE requires a pathname").await?;
            return Ok(());
        }
    };
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::DELETE) {
        return reply_for_error(session, e).await;
    }
    if lock_busy(session, &abs).await {
        session.send_reply(450, "File is busy").await?;
        return Ok(());
    }
    let key = path_key(&abs);
    let guard = session.server.file_locks.acquire_exclusive(&key).await;
    let result = tokio::fs::remove_file(&abs).await;
    drop(guard);
    match result {
        Ok(()) => session.send_reply(250, "File deleted").await,
        Err(_) => session.send_reply(550, "Failed to delete file").await,
    }
}

pub async fn rnfr(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let input = match arg {
        Some(a) if !a.is_empty() => a,
        _ => {
            session.send_reply(501, "RNFR requires a pathname").await?;
            return Ok(());
        }
    };
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::RENAME) {
        return reply_for_error(session, e).await;
    }
    if tokio::fs::metadata(&abs).await.is_err() {
        session.send_reply(550, "File does not exist").await?;
        return Ok(());
    }
    if lock_busy(session, &abs).await {
        session.send_reply(450, "File is busy").await?;
        return Ok(());
    }
    session.rename_from = Some(virtual_path);
    session.send_reply(350, "File exists, ready for destination name").await
}

pub async fn rnto(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let from = match session.rename_from.take() {
        Some(f) => f,
        None => {
            session.send_reply(503, "RNFR required first").await?;
            return Ok(());
        }
    };
    let input = match arg {
        Some(a) if !a.is_empty() => a,
        _ => {
            session.send_reply(501, "RNTO requires a pathname").await?;
            return Ok(());
        }
    };
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (_, from_abs) = session.resolve(&from);
    let (to_virtual, to_abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&to_virtual, perm::RENAME) {
        return reply_for_error(session, e).await;
    }
    if lock_busy(session, &from_abs).await {
        session.send_reply(450, "File is busy").await?;
        return Ok(());
    }
    let key = path_key(&from_abs);
    let guard = session.server.file_locks.acquire_exclusive(&key).await;
    let result = tokio::fs::rename(&from_abs, &to_abs).await;
    drop(guard);
    match result {
        Ok(()) => session.send_reply(250, "Rename successful").await,
        Err(_) => session.send_reply(550, "Rename failed").await,
    }
}

pub async fn type_(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let arg = arg.unwrap_or("");
    match parse_type(arg) {
        Ok(TransferType::Ebcdic) => session.send_reply(504, "EBCDIC not supported").await,
        Ok(t) => {
            session.transfer_type = t;
            session.send_reply(200, "Type set to ok").await
        }
        Err(_) => session.send_reply(501, "Unrecognised TYPE argument").await,
    }
}

pub async fn mode(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    use crate::protocol::TransferMode;
    match parse_mode(arg.unwrap_or("")) {
        Ok(TransferMode::Stream) => {
            session.transfer_mode = TransferMode::Stream;
            session.send_reply(200, "Mode set to Stream").await
        }
        Ok(_) => session.send_reply(504, "Only MODE S is supported").await,
        Err(_) => session.send_reply(501, "Unrecognised MODE argument").await,
    }
}

pub async fn stru(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    use crate::protocol::DataStructure;
    match parse_stru(arg.unwrap_or("")) {
        Ok(DataStructure::File) => {
            session.data_structure = DataStructure::File;
            session.send_reply(200, "Structure set to File").await
        }
        Ok(_) => session.send_reply(504, "Only STRU F is supported").await,
        Err(_) => session.send_reply(501, "Unrecognised STRU argument").await,
    }
}

pub async fn port(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    match arg.map(parse_port) {
        Some(Ok(params)) => {
            data_conn::set_active(session, params.ip, params.port);
            session.send_reply(200, "PORT command successful").await
        }
        _ => session.send_reply(501, "Illegal PORT command").await,
    }
}

pub async fn pasv(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    match data_conn::setup_passive(session).await {
        Ok((ip, port)) => session.send_raw_reply(&format_pasv(ip, port)).await,
        Err(_) => session.send_reply(421, "Service not available, no free ports").await,
    }
}

pub async fn rest(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    match arg.and_then(|a| a.parse::<u64>().ok()) {
        Some(offset) => {
            session.restart_offset = offset;
            session.send_reply(350, "Restarting at requested offset").await
        }
        None => session.send_reply(501, "REST requires a numeric offset").await,
    }
}

pub async fn abor(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    if session.shared.transfer_running.load(std::sync::atomic::Ordering::SeqCst) {
        session.shared.request_abort();
        session.send_reply(426, "Connection closed; transfer aborted").await
    } else {
        session.send_reply(225, "Data connection open; no transfer in progress").await
    }
}

pub async fn retr(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let input = match arg {
        Some(a) if !a.is_empty() => a,
        _ => {
            session.send_reply(501, "RETR requires a pathname").await?;
            return Ok(());
        }
    };
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::READ) {
        return reply_for_error(session, e).await;
    }
    let metadata = match tokio::fs::metadata(&abs).await {
        Ok(m) if m.is_file() => m,
        _ => {
            session.send_reply(550, "File not found").await?;
            return Ok(());
        }
    };
    let offset = std::mem::take(&mut session.restart_offset);
    if offset > metadata.len() {
        session.send_reply(550, "Requested offset past end of file").await?;
        return Ok(());
    }

    let key = path_key(&abs);
    let lock = session.server.file_locks.acquire_shared(&key).await;
    begin_transfer(session, TransferOp::SendFile, abs, offset, Some(FileLockGuard::Shared(lock))).await
}

pub async fn stor(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let input = match arg {
        Some(a) if !a.is_empty() => a,
        _ => {
            session.send_reply(501, "STOR requires a pathname").await?;
            return Ok(());
        }
    };
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::WRITE) {
        return reply_for_error(session, e).await;
    }

    let offset = std::mem::take(&mut session.restart_offset);
    if offset > 0 {
        match tokio::fs::metadata(&abs).await {
            Ok(m) if offset <= m.len() => {}
            _ => {
                session.send_reply(550, "Restart offset beyond end of file").await?;
                return Ok(());
            }
        }
    }

    let key = path_key(&abs);
    let lock = session.server.file_locks.acquire_exclusive(&key).await;
    begin_transfer(session, TransferOp::RecvFile { append: false }, abs, offset, Some(FileLockGuard::Exclusive(lock))).await
}

pub async fn appe(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let input = match arg {
        Some(a) if !a.is_empty() => a,
        _ => {
            session.send_reply(501, "APPE requires a pathname").await?;
            return Ok(());
        }
    };
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::WRITE) {
        return reply_for_error(session, e).await;
    }
    let offset = tokio::fs::metadata(&abs).await.map(|m| m.len()).unwrap_or(0);

    let key = path_key(&abs);
    let lock = session.server.file_locks.acquire_exclusive(&key).await;
    begin_transfer(session, TransferOp::RecvFile { append: true }, abs, offset, Some(FileLockGuard::Exclusive(lock))).await
}

pub async fn list(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    list_or_nlst(session, arg, true).await
}

pub async fn nlst(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    list_or_nlst(session, arg, false).await
}

async fn list_or_nlst(session: &mut Session, arg: Option<&str>, long: bool) -> FtpResult<()> {
    let input = arg.unwrap_or(".");
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::READ) {
        return reply_for_error(session, e).await;
    }
    let (dir, only) = match tokio::fs::metadata(&abs).await {
        Ok(m) if m.is_dir() => (abs, None),
        Ok(_) => {
            let name = abs.file_name().map(|n| n.to_string_lossy().into_owned());
            let parent = abs.parent().map(Path::to_path_buf).unwrap_or(abs.clone());
            (parent, name)
        }
        Err(_) => {
            session.send_reply(450, "No such file or directory").await?;
            return Ok(());
        }
    };

    let op = if long { TransferOp::SendList { only } } else { TransferOp::SendNlst { only } };
    session.send_reply(150, "Opening data connection for requested listing").await?;
    let data_stream = match data_conn::open(session).await {
        Ok(s) => s,
        Err(_) => {
            session.send_reply(425, "Can't open data connection").await?;
            return Ok(());
        }
    };
    let request = TransferRequest {
        op,
        abs_path: dir,
        offset: 0,
        transfer_type: session.transfer_type,
        lock: None,
    };
    let handle = transfer::spawn(data_stream, request, session.shared.clone(), session.control_writer.clone());
    session.transfer_worker = Some(handle);
    session.close_data_connection_state();
    Ok(())
}

/// Shared tail of RETR/STOR/APPE: send 150, open the data connection, and
/// hand everything off to a spawned transfer worker.
async fn begin_transfer(
    session: &mut Session,
    op: TransferOp,
    abs: std::path::PathBuf,
    offset: u64,
    lock: Option<FileLockGuard>,
) -> FtpResult<()> {
    session.send_reply(150, "Opening data connection").await?;
    let data_stream = match data_conn::open(session).await {
        Ok(s) => s,
        Err(_) => {
            drop(lock);
            session.send_reply(425, "Can't open data connection").await?;
            return Ok(());
        }
    };
    let request = TransferRequest {
        op,
        abs_path: abs,
        offset,
        transfer_type: session.transfer_type,
        lock,
    };
    let handle = transfer::spawn(data_stream, request, session.shared.clone(), session.control_writer.clone());
    session.transfer_worker = Some(handle);
    session.close_data_connection_state();
    Ok(())
}

pub async fn syst(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    session.send_reply(215, "UNIX Type: L8").await
}

pub async fn stat(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    match arg {
        None | Some("") => {
            let shared = &session.shared;
            let lines = [
                "FTP server status:".to_string(),
                format!("Connected from {}", session.peer_ip),
                format!(
                    "TYPE: {}, MODE: S, STRU: F",
                    match session.transfer_type {
                        TransferType::Ascii => "A",
                        TransferType::Binary => "I",
                        TransferType::Ebcdic => "E",
                    }
                ),
                format!(
                    "{} commands processed, {} bytes up, {} bytes down",
                    shared.commands_received.load(std::sync::atomic::Ordering::SeqCst),
                    shared.bytes_uploaded.load(std::sync::atomic::Ordering::SeqCst),
                    shared.bytes_downloaded.load(std::sync::atomic::Ordering::SeqCst),
                ),
            ];
            session.send_reply_multiline(211, &lines).await
        }
        Some(path) => {
            let (virtual_path, abs) = session.resolve(path);
            if let Err(e) = session.check_path_access(&virtual_path, perm::READ) {
                return reply_for_error(session, e).await;
            }
            match tokio::fs::metadata(&abs).await {
                Ok(m) => {
                    let lines = [
                        format!("Status of {virtual_path}:"),
                        format!("{} {}", if m.is_dir() { "directory" } else { "file" }, m.len()),
                    ];
                    session.send_reply_multiline(213, &lines).await
                }
                Err(_) => session.send_reply(550, "File or directory does not exist").await,
            }
        }
    }
}

pub async fn noop(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    session.send_reply(200, "NOOP ok").await
}

pub async fn size(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let input = match arg {
        Some(a) if !a.is_empty() => a,
        _ => {
            session.send_reply(501, "SIZE requires a pathname").await?;
            return Ok(());
        }
    };
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::READ) {
        return reply_for_error(session, e).await;
    }
    match tokio::fs::metadata(&abs).await {
        Ok(m) if m.is_file() => session.send_reply(213, m.len().to_string()).await,
        _ => session.send_reply(550, "Could not get file size").await,
    }
}

pub async fn mdtm(session: &mut Session, arg: Option<&str>) -> FtpResult<()> {
    let input = match arg {
        Some(a) if !a.is_empty() => a,
        _ => {
            session.send_reply(501, "MDTM requires a pathname").await?;
            return Ok(());
        }
    };
    if !require_valid_path(session, input).await? {
        return Ok(());
    }
    let (virtual_path, abs) = session.resolve(input);
    if let Err(e) = session.check_path_access(&virtual_path, perm::READ) {
        return reply_for_error(session, e).await;
    }
    match tokio::fs::metadata(&abs).await {
        Ok(m) => match m.modified() {
            Ok(t) => {
                let dt: DateTime<Utc> = t.into();
                session.send_reply(213, dt.format("%Y%m%d%H%M%S").to_string()).await
            }
            Err(_) => session.send_reply(550, "Could not determine modification time").await,
        },
        Err(_) => session.send_reply(550, "File not found").await,
    }
}

/// RFC 2389: feature lines are indented by a single space and carry no
/// reply-code prefix, unlike ordinary multi-line replies.
pub async fn feat(session: &mut Session, _arg: Option<&str>) -> FtpResult<()> {
    let mut reply = format_reply_multiline(211, "Features:");
    for feature in ["SIZE", "MDTM", "REST STREAM"] {
        reply.push_str(&format!(" {feature}\r\n"));
    }
    reply.push_str(&format_reply(211, "End"));
    session.send_raw_reply(&reply).await
}

/// Translates an access-control failure into the reply the client should
/// see, without revealing which specific check failed.
async fn reply_for_error(session: &mut Session, error: FtpError) -> FtpResult<()> {
    match error {
        FtpError::Authorization(AuthFailure::NotAuthenticated) => session.send_reply(530, "Not logged in").await,
        FtpError::Authorization(_) => session.send_reply(550, "Permission denied").await,
        other => match other.reply_code() {
            Some((code, msg)) => session.send_reply(code, msg).await,
            None => Err(other),
        },
    }
}

/// Verbs the session loop lets through before authentication completes.
pub fn allowed_before_auth(verb: &str) -> bool {
    matches!(verb, "USER" | "PASS" | "QUIT" | "NOOP" | "SYST" | "FEAT" | "REIN")
}

pub fn build_registry() -> CommandRegistry {
    CommandRegistry::default()
}
