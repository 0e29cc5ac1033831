//! Crate-wide error type. Every handler funnels its failures through
//! [`FtpError`] so the session loop has one place that knows how to turn
//! an error into a reply (or, for [`FtpError::Fatal`], into silence and a
//! closed connection).

use std::fmt;

/// The five error kinds crossing component boundaries (see spec §7).
#[derive(Debug, thiserror::Error)]
pub enum FtpError {
    /// Malformed command or argument. Reported with 500/501; the session continues.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Not logged in, missing permission, or path outside home. Never reveals
    /// which check failed -- the message is for logs only, the client always
    /// gets a generic reply via [`FtpError::reply_code`].
    #[error("authorization error: {0}")]
    Authorization(AuthFailure),

    /// Filesystem or disk failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Data connection peer closed mid-transfer, refused connect, or accept timed out.
    #[error("data connection error: {0}")]
    DataConnection(String),

    /// Control socket is dead or the protocol is out of sync. The session
    /// terminates; no reply is attempted.
    #[error("fatal error: {0}")]
    Fatal(String),
}

/// Stage at which an authorization check failed. Carried only for logging;
/// the wire-visible reply never distinguishes between these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    NotAuthenticated,
    MissingPermission,
    OutsideHome,
    BadCredentials,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthFailure::NotAuthenticated => "not authenticated",
            AuthFailure::MissingPermission => "missing permission",
            AuthFailure::OutsideHome => "outside home directory",
            AuthFailure::BadCredentials => "bad credentials",
        };
        f.write_str(s)
    }
}

impl FtpError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        FtpError::Protocol(msg.into())
    }

    pub fn data_connection(msg: impl Into<String>) -> Self {
        FtpError::DataConnection(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        FtpError::Fatal(msg.into())
    }

    /// Default (code, message) to send for this error absent a more specific
    /// reply already chosen by the caller. `Fatal` has no reply: the caller
    /// must check for it and skip writing to the control socket entirely.
    pub fn reply_code(&self) -> Option<(u16, String)> {
        match self {
            FtpError::Protocol(_) => Some((500, "Syntax error, command unrecognized".into())),
            FtpError::Authorization(AuthFailure::NotAuthenticated) => {
                Some((530, "Not logged in".into()))
            }
            FtpError::Authorization(_) => Some((550, "Permission denied".into())),
            FtpError::Io(_) => Some((550, "Requested action not taken".into())),
            FtpError::DataConnection(_) => Some((425, "Can't open data connection".into())),
            FtpError::Fatal(_) => None,
        }
    }
}

pub type FtpResult<T> = Result<T, FtpError>;
