//! User table, anonymous login, permission bitmask, and the users-file
//! text format loader/saver (spec §3, §4.6, §4.7, §6). The file format is
//! an external collaborator by spec's own framing, but without it the
//! `AuthStore` has nothing to load at startup, so a minimal loader/saver
//! is kept here (mirrors `auth_load_users`/`auth_save_users` in the
//! original source's `auth.c`).

use std::fmt;
use std::path::Path;

use tokio::sync::Mutex;

use crate::error::{AuthFailure, FtpError};

/// Permission bits (spec §3). `ADMIN` bypasses the home-directory
/// containment check entirely.
pub mod perm {
    pub const READ: u8 = 0x01;
    pub const WRITE: u8 = 0x02;
    pub const DELETE: u8 = 0x04;
    pub const RENAME: u8 = 0x08;
    pub const MKDIR: u8 = 0x10;
    pub const RMDIR: u8 = 0x20;
    pub const ADMIN: u8 = 0x40;
    pub const ALL: u8 = 0xFF;
}

pub fn has_permission(bits: u8, required: u8) -> bool {
    bits & required == required
}

/// Maximum number of stored users (spec §3 / `AUTH_MAX_USERS`).
pub const MAX_USERS: usize = 1024;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    /// Opaque one-way hash, produced by a [`PasswordHasher`]. The core
    /// never interprets its contents.
    pub password_hash: String,
    /// Virtual home directory, always starting with `/`.
    pub home_dir: String,
    pub permissions: u8,
}

/// A one-way, salted password hash. This default implementation is
/// explicitly **not** cryptographically secure -- spec §9 flags the
/// original's placeholder hash as an open question for real deployments
/// ("adopt at migration time"); we keep the same posture here rather than
/// pretend to deliver production crypto the spec never asked for.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> String;
    fn verify(&self, password: &str, hash: &str) -> bool {
        self.hash(password) == hash
    }
}

/// FNV-1a based placeholder hash with a fixed salt. Deterministic, cheap,
/// and explicitly not suitable for production secrets.
pub struct PlaceholderHasher;

impl PasswordHasher for PlaceholderHasher {
    fn hash(&self, password: &str) -> String {
        const SALT: &str = "ftpd-core-placeholder-salt";
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in SALT.bytes().chain(password.bytes()) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        format!("{hash:016x}")
    }
}

/// Fixed-capacity table of stored users (spec §3: `in_use` flag, ≤1024
/// slots), plus the anonymous-login configuration.
pub struct UserTable {
    users: Vec<AuthUser>,
    anonymous_enabled: bool,
    anonymous_home: String,
    anonymous_permissions: u8,
    hasher: Box<dyn PasswordHasher>,
}

impl fmt::Debug for UserTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserTable")
            .field("users", &self.users.iter().map(|u| &u.username).collect::<Vec<_>>())
            .field("anonymous_enabled", &self.anonymous_enabled)
            .finish()
    }
}

impl UserTable {
    pub fn new(anonymous_enabled: bool) -> Self {
        UserTable {
            users: Vec::new(),
            anonymous_enabled,
            anonymous_home: "/pub".to_string(),
            anonymous_permissions: perm::READ,
            hasher: Box::new(PlaceholderHasher),
        }
    }

    pub fn with_hasher(mut self, hasher: Box<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn anonymous_enabled(&self) -> bool {
        self.anonymous_enabled
    }

    pub fn add_user(
        &mut self,
        username: &str,
        password: &str,
        home_dir: &str,
        permissions: u8,
    ) -> Result<(), FtpError> {
        if self.users.len() >= MAX_USERS {
            return Err(FtpError::fatal("user table full"));
        }
        if username.len() > 255 {
            return Err(FtpError::protocol("username too long"));
        }
        let hash = self.hasher.hash(password);
        if let Some(existing) = self.users.iter_mut().find(|u| u.username == username) {
            existing.password_hash = hash;
            existing.home_dir = home_dir.to_string();
            existing.permissions = permissions;
        } else {
            self.users.push(AuthUser {
                username: username.to_string(),
                password_hash: hash,
                home_dir: home_dir.to_string(),
                permissions,
            });
        }
        Ok(())
    }

    /// Adds a user whose password is already hashed (used by the users-file loader).
    fn add_user_prehashed(&mut self, username: &str, hash: &str, home_dir: &str, permissions: u8) {
        self.users.push(AuthUser {
            username: username.to_string(),
            password_hash: hash.to_string(),
            home_dir: home_dir.to_string(),
            permissions,
        });
    }

    pub fn user_exists(&self, username: &str) -> bool {
        if username == "anonymous" {
            return self.anonymous_enabled;
        }
        self.users.iter().any(|u| u.username == username)
    }

    /// Looks up a user, including the virtual anonymous user when enabled
    /// and no stored `anonymous` user shadows it (spec §3).
    pub fn get_user(&self, username: &str) -> Option<AuthUser> {
        if let Some(u) = self.users.iter().find(|u| u.username == username) {
            return Some(u.clone());
        }
        if username == "anonymous" && self.anonymous_enabled {
            return Some(AuthUser {
                username: "anonymous".to_string(),
                password_hash: String::new(),
                home_dir: self.anonymous_home.clone(),
                permissions: self.anonymous_permissions,
            });
        }
        None
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Option<AuthUser> {
        if username == "anonymous" && self.anonymous_enabled {
            return self.get_user(username);
        }
        let user = self.users.iter().find(|u| u.username == username)?;
        if self.hasher.verify(password, &user.password_hash) {
            Some(user.clone())
        } else {
            None
        }
    }

    pub fn set_anonymous_enabled(&mut self, enabled: bool) {
        self.anonymous_enabled = enabled;
    }

    pub fn set_anonymous_defaults(&mut self, home_dir: &str, permissions: u8) {
        self.anonymous_home = home_dir.to_string();
        self.anonymous_permissions = permissions;
    }

    /// Loads users from the text format described in spec §6:
    /// `username:<hex hash>:<home>:<perm-decimal>`, `#`-prefixed comments.
    pub fn load_from_file(&mut self, path: &Path) -> Result<(), FtpError> {
        let contents = std::fs::read_to_string(path)?;
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.splitn(4, ':').collect();
            if parts.len() != 4 {
                return Err(FtpError::fatal(format!(
                    "users file malformed at line {}",
                    lineno + 1
                )));
            }
            let username = parts[0];
            let hash = parts[1];
            let home = parts[2];
            let permissions: u8 = parts[3].parse().map_err(|_| {
                FtpError::fatal(format!("invalid permission bitmask at line {}", lineno + 1))
            })?;
            if !home.starts_with('/') {
                return Err(FtpError::fatal(format!(
                    "home directory must start with '/' at line {}",
                    lineno + 1
                )));
            }
            self.add_user_prehashed(username, hash, home, permissions);
        }
        Ok(())
    }

    /// Persists the user table in the same format `load_from_file` reads.
    pub fn save_to_file(&self, path: &Path) -> Result<(), FtpError> {
        let mut out = String::from("# username:password_hash:home_dir:permissions\n");
        for user in &self.users {
            out.push_str(&format!(
                "{}:{}:{}:{}\n",
                user.username, user.password_hash, user.home_dir, user.permissions
            ));
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

/// Process-wide authentication table, guarded by one mutex (spec §5).
#[derive(Debug)]
pub struct AuthStore {
    table: Mutex<UserTable>,
}

impl AuthStore {
    pub fn new(table: UserTable) -> Self {
        AuthStore {
            table: Mutex::new(table),
        }
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Option<AuthUser> {
        self.table.lock().await.authenticate(username, password)
    }

    pub async fn user_exists(&self, username: &str) -> bool {
        self.table.lock().await.user_exists(username)
    }

    pub async fn anonymous_enabled(&self) -> bool {
        self.table.lock().await.anonymous_enabled()
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<(), FtpError> {
        self.table.lock().await.save_to_file(path)
    }
}

/// Implements spec §4.6's `check_path_access` containment rule, given a
/// user's home directory and the normalised virtual path being accessed.
pub fn home_contains(home: &str, virtual_path: &str) -> bool {
    if virtual_path == home {
        return true;
    }
    let prefix = if home.ends_with('/') {
        home.to_string()
    } else {
        format!("{home}/")
    };
    virtual_path.starts_with(&prefix)
}

pub fn auth_failure_for_stage(authenticated: bool) -> AuthFailure {
    if authenticated {
        AuthFailure::MissingPermission
    } else {
        AuthFailure::NotAuthenticated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_virtual_user_used_when_absent() {
        let table = UserTable::new(true);
        let u = table.get_user("anonymous").unwrap();
        assert_eq!(u.home_dir, "/pub");
        assert_eq!(u.permissions, perm::READ);
    }

    #[test]
    fn anonymous_disabled_is_absent() {
        let table = UserTable::new(false);
        assert!(table.get_user("anonymous").is_none());
        assert!(!table.user_exists("anonymous"));
    }

    #[test]
    fn stored_anonymous_user_shadows_virtual_default() {
        let mut table = UserTable::new(true);
        table.add_user("anonymous", "anypass", "/anon-home", perm::READ | perm::WRITE).unwrap();
        let u = table.get_user("anonymous").unwrap();
        assert_eq!(u.home_dir, "/anon-home");
        assert!(has_permission(u.permissions, perm::WRITE));
    }

    #[test]
    fn authenticate_round_trip() {
        let mut table = UserTable::new(true);
        table.add_user("alice", "hunter2", "/users/alice", perm::ALL).unwrap();
        assert!(table.authenticate("alice", "hunter2").is_some());
        assert!(table.authenticate("alice", "wrong").is_none());
    }

    #[test]
    fn home_containment_guards_sibling_prefix() {
        assert!(home_contains("/home/alice", "/home/alice"));
        assert!(home_contains("/home/alice", "/home/alice/docs/f.txt"));
        assert!(!home_contains("/home/alice", "/home/alice2"));
        assert!(!home_contains("/home/alice", "/home/bob"));
    }

    #[test]
    fn load_and_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.txt");
        std::fs::write(
            &path,
            "# comment\nalice:deadbeef:/users/alice:99\nbob:cafebabe:/users/bob:1\n",
        )
        .unwrap();

        let mut table = UserTable::new(true);
        table.load_from_file(&path).unwrap();
        assert!(table.user_exists("alice"));
        let alice = table.get_user("alice").unwrap();
        assert_eq!(alice.home_dir, "/users/alice");
        assert_eq!(alice.permissions, 99);

        let out_path = dir.path().join("out.txt");
        table.save_to_file(&out_path).unwrap();
        let mut reread = UserTable::new(true);
        reread.load_from_file(&out_path).unwrap();
        assert!(reread.user_exists("bob"));
    }
}
