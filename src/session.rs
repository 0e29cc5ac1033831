//! Per-connection session state (spec §3). A `Session` is owned
//! exclusively by its session-loop task; the handful of fields a
//! background transfer worker must also touch (abort flag, counters)
//! live in the separately-shared [`SessionShared`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;

use crate::auth::{has_permission, home_contains, perm};
use crate::context::ServerContext;
use crate::error::{AuthFailure, FtpError, FtpResult};
use crate::path;
use crate::protocol::{
    format_reply, format_reply_multiline, DataStructure, TransferMode, TransferType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    WaitPassword,
    Authenticated,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    None,
    Active,
    Passive,
}

/// Fields a background transfer worker shares with the session that
/// spawned it. Everything else in [`Session`] belongs exclusively to the
/// session-loop task.
pub struct SessionShared {
    pub should_abort: AtomicBool,
    pub abort_notify: Notify,
    pub transfer_running: AtomicBool,
    /// Raw fd of the data socket currently owned by a transfer worker, or
    /// `-1` when none is open. Lets ABOR force-close a socket owned by a
    /// different task instead of only flipping the cooperative flag, so a
    /// transfer blocked in socket I/O unblocks promptly (spec §4.9, §5).
    data_fd: AtomicI32,
    pub bytes_uploaded: AtomicU64,
    pub bytes_downloaded: AtomicU64,
    pub files_uploaded: AtomicU32,
    pub files_downloaded: AtomicU32,
    pub commands_received: AtomicU32,
}

impl SessionShared {
    pub fn new() -> Arc<Self> {
        Arc::new(SessionShared {
            should_abort: AtomicBool::new(false),
            abort_notify: Notify::new(),
            transfer_running: AtomicBool::new(false),
            data_fd: AtomicI32::new(-1),
            bytes_uploaded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            files_uploaded: AtomicU32::new(0),
            files_downloaded: AtomicU32::new(0),
            commands_received: AtomicU32::new(0),
        })
    }

    pub fn request_abort(&self) {
        self.should_abort.store(true, Ordering::SeqCst);
        self.force_close_data_connection();
        self.abort_notify.notify_waiters();
    }

    pub fn reset_abort(&self) {
        self.should_abort.store(false, Ordering::SeqCst);
    }

    pub fn is_aborting(&self) -> bool {
        self.should_abort.load(Ordering::SeqCst)
    }

    /// Records the fd of a newly opened data socket, or clears it (`-1`)
    /// once the transfer owning it has finished.
    pub fn set_data_fd(&self, fd: i32) {
        self.data_fd.store(fd, Ordering::SeqCst);
    }

    /// Shuts down the in-flight data socket from outside the task that
    /// owns it. Duplicating the fd into a throwaway `TcpStream` and
    /// forgetting it afterwards shuts down the underlying socket without
    /// taking ownership away from the transfer worker, which still has to
    /// observe the resulting I/O error and exit on its own.
    #[cfg(unix)]
    fn force_close_data_connection(&self) {
        use std::os::unix::io::FromRawFd;
        let fd = self.data_fd.load(Ordering::SeqCst);
        if fd >= 0 {
            unsafe {
                let stream = std::net::TcpStream::from_raw_fd(fd);
                let _ = stream.shutdown(std::net::Shutdown::Both);
                std::mem::forget(stream);
            }
        }
    }

    #[cfg(not(unix))]
    fn force_close_data_connection(&self) {}
}

pub struct Session {
    pub peer_ip: String,
    pub peer_port: u16,
    pub control_writer: Arc<TokioMutex<OwnedWriteHalf>>,

    pub state: SessionState,
    pub username: Option<String>,
    pub permissions: u8,
    pub user_home: String,

    pub root_dir: PathBuf,
    pub current_dir: String,

    pub transfer_type: TransferType,
    pub transfer_mode: TransferMode,
    pub data_structure: DataStructure,

    pub data_mode: DataMode,
    pub active_peer: Option<(String, u16)>,
    pub pasv_listener: Option<TcpListener>,
    pub passive_port: Option<u16>,

    pub restart_offset: u64,
    pub rename_from: Option<String>,

    pub should_quit: bool,
    pub connect_time: SystemTime,
    pub last_activity: SystemTime,

    pub shared: Arc<SessionShared>,
    pub transfer_worker: Option<JoinHandle<()>>,

    pub server: Arc<ServerContext>,
}

impl Session {
    pub fn new(
        peer_ip: String,
        peer_port: u16,
        control_writer: Arc<TokioMutex<OwnedWriteHalf>>,
        server: Arc<ServerContext>,
    ) -> Self {
        let root_dir = server.root_dir.clone();
        Session {
            peer_ip,
            peer_port,
            control_writer,
            state: SessionState::Connected,
            username: None,
            permissions: 0,
            user_home: String::new(),
            root_dir,
            current_dir: "/".to_string(),
            transfer_type: TransferType::Ascii,
            transfer_mode: TransferMode::Stream,
            data_structure: DataStructure::File,
            data_mode: DataMode::None,
            active_peer: None,
            pasv_listener: None,
            passive_port: None,
            restart_offset: 0,
            rename_from: None,
            should_quit: false,
            connect_time: SystemTime::now(),
            last_activity: SystemTime::now(),
            shared: SessionShared::new(),
            transfer_worker: None,
            server,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn touch_activity(&mut self) {
        self.last_activity = SystemTime::now();
        self.shared.commands_received.fetch_add(1, Ordering::SeqCst);
    }

    /// Resolves `input` against this session's current directory and root
    /// (spec §4.5). Returns `(virtual_path, absolute_os_path)`.
    pub fn resolve(&self, input: &str) -> (String, PathBuf) {
        path::resolve(&self.root_dir, &self.current_dir, input)
    }

    /// spec §4.6's `check_path_access`.
    pub fn check_path_access(&self, virtual_path: &str, required: u8) -> Result<(), FtpError> {
        if !self.is_authenticated() {
            return Err(FtpError::Authorization(AuthFailure::NotAuthenticated));
        }
        if has_permission(self.permissions, perm::ADMIN) {
            return Ok(());
        }
        if !has_permission(self.permissions, required) {
            return Err(FtpError::Authorization(AuthFailure::MissingPermission));
        }
        if self.user_home.is_empty() {
            return Ok(());
        }
        if home_contains(&self.user_home, virtual_path) {
            Ok(())
        } else {
            Err(FtpError::Authorization(AuthFailure::OutsideHome))
        }
    }

    pub async fn send_reply(&self, code: u16, message: impl AsRef<str>) -> FtpResult<()> {
        let line = format_reply(code, message.as_ref());
        self.write_raw(&line).await
    }

    /// Sends a multi-line reply: every line but the last uses the
    /// `<code>-` continuation form (spec §4.4).
    pub async fn send_reply_multiline(&self, code: u16, lines: &[impl AsRef<str>]) -> FtpResult<()> {
        let mut buf = String::new();
        if let Some((last, rest)) = lines.split_last() {
            for line in rest {
                buf.push_str(&format_reply_multiline(code, line.as_ref()));
            }
            buf.push_str(&format_reply(code, last.as_ref()));
        }
        self.write_raw(&buf).await
    }

    /// Sends a line that's already fully formatted (e.g. by
    /// [`crate::protocol::format_pasv`]), as opposed to [`Session::send_reply`]
    /// which formats the `<code> <message>` wrapper itself.
    pub async fn send_raw_reply(&self, line: &str) -> FtpResult<()> {
        self.write_raw(line).await
    }

    async fn write_raw(&self, data: &str) -> FtpResult<()> {
        use tokio::io::AsyncWriteExt;
        let mut writer = self.control_writer.lock().await;
        writer
            .write_all(data.as_bytes())
            .await
            .map_err(|e| FtpError::fatal(format!("control write failed: {e}")))
    }

    pub fn close_data_connection_state(&mut self) {
        self.pasv_listener = None;
        self.passive_port = None;
        self.active_peer = None;
        self.data_mode = DataMode::None;
    }

    /// Resets everything REIN must reset (spec §4.7), preserving
    /// statistics.
    pub fn reinitialize(&mut self) {
        self.state = SessionState::Connected;
        self.username = None;
        self.permissions = 0;
        self.user_home.clear();
        self.current_dir = "/".to_string();
        self.transfer_type = TransferType::Ascii;
        self.transfer_mode = TransferMode::Stream;
        self.data_structure = DataStructure::File;
        self.close_data_connection_state();
        self.restart_offset = 0;
        self.rename_from = None;
        self.transfer_worker = None;
        self.shared.reset_abort();
    }
}
