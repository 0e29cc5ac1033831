//! Command-line surface (spec §6). Argument parsing is an external
//! collaborator by spec's own framing -- the core only needs the values
//! it produces -- but the process needs an entry point, so this module
//! is kept thin and generalizes the teacher's `arg_parser.rs`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    Unspec,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// A multi-user FTP server (RFC 959 core, SIZE/MDTM/REST/FEAT extensions).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Port to listen on.
    #[arg(long, default_value_t = 21)]
    pub port: u16,

    /// Listening address (combined with --family to bind the socket).
    #[arg(long, default_value_t = String::from("0.0.0.0"))]
    pub host: String,

    /// Root directory served to clients (becomes each session's virtual `/`).
    #[arg(long, default_value_t = String::from("./ftp_root"))]
    pub root: String,

    /// Address family to bind: ipv4, ipv6, or unspec.
    #[arg(long, value_enum, default_value_t = AddressFamily::Ipv4)]
    pub family: AddressFamily,

    /// Log verbosity.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Maximum concurrent connections. <= 0 means unlimited.
    #[arg(long, default_value_t = 256)]
    pub max_connections: i64,

    /// Path to the users file (spec §6 text format). Omit to run with
    /// anonymous login only.
    #[arg(long)]
    pub users_file: Option<PathBuf>,

    /// Whether anonymous login is enabled.
    #[arg(long, default_value_t = true)]
    pub anonymous: bool,

    /// Control-channel inactivity timeout, in seconds.
    #[arg(long, default_value_t = 300)]
    pub control_timeout_secs: u64,

    /// Data-connection open timeout, in seconds.
    #[arg(long, default_value_t = 10)]
    pub data_timeout_secs: u64,
}

impl Config {
    pub fn parse_args() -> Self {
        Config::parse()
    }
}
