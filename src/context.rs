//! Shared, process-wide state handed to every session: the "server
//! context" design note from spec §9 -- long-lived values reached through
//! reference-counted handles rather than module-level globals.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::auth::AuthStore;
use crate::config::Config;
use crate::filelock::FileLockTable;
use crate::registry::CommandRegistry;

pub struct ServerContext {
    pub config: Config,
    pub auth: Arc<AuthStore>,
    pub file_locks: Arc<FileLockTable>,
    pub registry: CommandRegistry,
    pub root_dir: PathBuf,
    pub server_ip: [u8; 4],
    active_connections: AtomicI64,
}

impl ServerContext {
    pub fn new(config: Config, auth: Arc<AuthStore>, root_dir: PathBuf, server_ip: [u8; 4]) -> Arc<Self> {
        Arc::new(ServerContext {
            config,
            auth,
            file_locks: FileLockTable::new(),
            registry: CommandRegistry::default(),
            root_dir,
            server_ip,
            active_connections: AtomicI64::new(0),
        })
    }

    /// Returns `true` (and reserves a slot) if under the connection cap,
    /// `false` if the server is at capacity (spec §4.1). `max_connections
    /// <= 0` means unlimited.
    pub fn try_reserve_connection(&self) -> bool {
        let max = self.config.max_connections;
        if max <= 0 {
            self.active_connections.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        loop {
            let current = self.active_connections.load(Ordering::SeqCst);
            if current >= max {
                return false;
            }
            if self
                .active_connections
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn release_connection(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_connection_count(&self) -> i64 {
        self.active_connections.load(Ordering::SeqCst)
    }
}
