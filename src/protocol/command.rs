//! Command-line parsing and the small parameter grammars (PORT, TYPE,
//! MODE, STRU) used by individual handlers. Mirrors `protocol.c` /
//! `protocol.h` in the C original, generalized to the idioms of this crate.

use crate::error::FtpError;

/// Maximum length of the command verb, including the terminating NUL the
/// C original budgets for ("uppercase it, limit it to 4 characters (plus
/// NUL)" -- spec §4.4).
const MAX_VERB_LEN: usize = 4;
/// Maximum length of a command argument (spec §3, §4.4).
const MAX_ARG_LEN: usize = 511;

/// A parsed control line: an uppercase verb and an optional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: String,
    pub arg: Option<String>,
}

impl Command {
    pub fn arg_str(&self) -> Option<&str> {
        self.arg.as_deref()
    }
}

/// Parses one control line (already stripped of its CRLF by the caller's
/// line reader) into a [`Command`].
pub fn parse_command(line: &str) -> Result<Command, FtpError> {
    let line = line.trim_end_matches(['\r', '\n']).trim();
    if line.is_empty() {
        return Err(FtpError::protocol("empty command line"));
    }

    let (verb, rest) = match line.split_once(' ') {
        Some((v, r)) => (v, Some(r.trim())),
        None => (line, None),
    };

    if verb.is_empty() {
        return Err(FtpError::protocol("empty command verb"));
    }

    let mut verb = verb.to_ascii_uppercase();
    verb.truncate(MAX_VERB_LEN);

    let arg = match rest {
        Some(a) if !a.is_empty() => {
            let mut a = a.to_string();
            a.truncate(MAX_ARG_LEN);
            Some(a)
        }
        _ => None,
    };

    Ok(Command { verb, arg })
}

/// Parsed PORT command argument: `h1,h2,h3,h4,p1,p2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortParams {
    pub ip: [u8; 4],
    pub port: u16,
}

pub fn parse_port(arg: &str) -> Result<PortParams, FtpError> {
    let parts: Vec<&str> = arg.split(',').map(str::trim).collect();
    if parts.len() != 6 {
        return Err(FtpError::protocol("PORT requires six comma-separated octets"));
    }
    let mut nums = [0u16; 6];
    for (i, p) in parts.iter().enumerate() {
        nums[i] = p
            .parse::<u16>()
            .ok()
            .filter(|n| *n <= 255)
            .ok_or_else(|| FtpError::protocol("PORT octet out of range"))?;
    }
    let ip = [nums[0] as u8, nums[1] as u8, nums[2] as u8, nums[3] as u8];
    let port = nums[4] * 256 + nums[5];
    Ok(PortParams { ip, port })
}

/// Formats the `h1,h2,h3,h4,p1,p2` portion of a PASV reply (without the
/// surrounding `227 Entering Passive Mode (...)`, which is composed in
/// `reply.rs` to keep the two concerns independent and individually testable).
pub fn port_params_to_tuple(ip: [u8; 4], port: u16) -> (u8, u8, u8, u8, u8, u8) {
    (ip[0], ip[1], ip[2], ip[3], (port / 256) as u8, (port % 256) as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Ascii,
    Binary,
    Ebcdic,
}

/// Parses the TYPE command argument: `A`, `A N`, `I`, `E`, `E N`.
pub fn parse_type(arg: &str) -> Result<TransferType, FtpError> {
    let first = arg
        .split_whitespace()
        .next()
        .ok_or_else(|| FtpError::protocol("TYPE requires an argument"))?;
    match first.to_ascii_uppercase().as_str() {
        "A" => Ok(TransferType::Ascii),
        "I" => Ok(TransferType::Binary),
        "E" => Ok(TransferType::Ebcdic),
        _ => Err(FtpError::protocol("unknown TYPE code")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Stream,
    Block,
    Compressed,
}

pub fn parse_mode(arg: &str) -> Result<TransferMode, FtpError> {
    match arg.trim().to_ascii_uppercase().as_str() {
        "S" => Ok(TransferMode::Stream),
        "B" => Ok(TransferMode::Block),
        "C" => Ok(TransferMode::Compressed),
        _ => Err(FtpError::protocol("unknown MODE code")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStructure {
    File,
    Record,
    Page,
}

pub fn parse_stru(arg: &str) -> Result<DataStructure, FtpError> {
    match arg.trim().to_ascii_uppercase().as_str() {
        "F" => Ok(DataStructure::File),
        "R" => Ok(DataStructure::Record),
        "P" => Ok(DataStructure::Page),
        _ => Err(FtpError::protocol("unknown STRU code")),
    }
}

/// First-line reject of blatantly absolute/escaping input, for call sites
/// that expect a path relative to something (spec §4.4). The resolver
/// (`path.rs`) is what actually makes `..` safe; this just rejects the
/// obviously hostile forms up front.
pub fn validate_path_argument(arg: &str) -> bool {
    if arg.starts_with('/') || arg.starts_with('\\') {
        return false;
    }
    if arg.len() >= 2 && arg.as_bytes()[1] == b':' && arg.as_bytes()[0].is_ascii_alphabetic() {
        return false;
    }
    if arg.split(['/', '\\']).any(|seg| seg == "..") {
        return false;
    }
    true
}

/// Normalizes path separators: backslash to forward slash, collapse runs
/// of `/`, drop a trailing `/` unless the whole path is `/` (spec §4.4).
pub fn normalize_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut out = String::with_capacity(replaced.len());
    let mut last_was_slash = false;
    for c in replaced.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verb_and_arg() {
        let c = parse_command("retr file.txt\r\n").unwrap();
        assert_eq!(c.verb, "RETR");
        assert_eq!(c.arg_str(), Some("file.txt"));
    }

    #[test]
    fn verb_only_command() {
        let c = parse_command("PWD\r\n").unwrap();
        assert_eq!(c.verb, "PWD");
        assert_eq!(c.arg, None);
    }

    #[test]
    fn verb_truncated_to_four_chars() {
        let c = parse_command("USERNAME bob\r\n").unwrap();
        assert_eq!(c.verb, "USER");
    }

    #[test]
    fn empty_line_is_protocol_error() {
        assert!(parse_command("\r\n").is_err());
    }

    #[test]
    fn port_round_trip() {
        let params = parse_port("192,168,1,5,200,10").unwrap();
        assert_eq!(params.ip, [192, 168, 1, 5]);
        assert_eq!(params.port, 200 * 256 + 10);
    }

    #[test]
    fn port_rejects_out_of_range_octet() {
        assert!(parse_port("256,0,0,1,0,1").is_err());
    }

    #[test]
    fn type_parses_ascii_with_format_control() {
        assert_eq!(parse_type("A N").unwrap(), TransferType::Ascii);
        assert_eq!(parse_type("I").unwrap(), TransferType::Binary);
        assert_eq!(parse_type("E").unwrap(), TransferType::Ebcdic);
    }

    #[test]
    fn normalize_collapses_slashes_and_backslashes() {
        assert_eq!(normalize_path("a\\\\b//c/"), "a/b/c");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = ["a//b\\c/", "/", "foo", "..//bar/"];
        for i in inputs {
            let once = normalize_path(i);
            let twice = normalize_path(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn validate_rejects_absolute_and_traversal() {
        assert!(!validate_path_argument("/etc/passwd"));
        assert!(!validate_path_argument("..\\..\\secrets"));
        assert!(!validate_path_argument("C:\\windows"));
        assert!(!validate_path_argument("a/../b"));
        assert!(validate_path_argument("a/b/c"));
    }
}
