//! FTP wire protocol: command parsing, reply formatting, and the small
//! parameter grammars (PORT/PASV, TYPE/MODE/STRU) defined by RFC 959.

mod command;
mod reply;

pub use command::{
    normalize_path, parse_command, parse_mode, parse_port, parse_stru, parse_type,
    validate_path_argument, Command, DataStructure, PortParams, TransferMode, TransferType,
};
pub use reply::{format_pasv, format_reply, format_reply_multiline, Reply};
