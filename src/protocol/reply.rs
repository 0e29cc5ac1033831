//! Reply formatting: single-line `"<code> <message>\r\n"` and multi-line
//! continuation `"<code>-<message>\r\n"` (spec §4.4, §6).

use super::command::port_params_to_tuple;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub message: String,
}

impl Reply {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        debug_assert!((100..=599).contains(&code), "reply code out of range");
        Reply {
            code,
            message: message.into(),
        }
    }

    pub fn to_wire(&self) -> String {
        format_reply(self.code, &self.message)
    }
}

/// Formats a single terminal reply line.
pub fn format_reply(code: u16, message: &str) -> String {
    format!("{code} {message}\r\n")
}

/// Formats one line of a multi-line response. Call this for every line
/// except the last, which should go through [`format_reply`] with the
/// same code.
pub fn format_reply_multiline(code: u16, message: &str) -> String {
    format!("{code}-{message}\r\n")
}

/// Formats the full `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
pub fn format_pasv(ip: [u8; 4], port: u16) -> String {
    let (h1, h2, h3, h4, p1, p2) = port_params_to_tuple(ip, port);
    format_reply(
        227,
        &format!("Entering Passive Mode ({h1},{h2},{h3},{h4},{p1},{p2})"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_format() {
        assert_eq!(format_reply(200, "NOOP ok"), "200 NOOP ok\r\n");
    }

    #[test]
    fn multiline_format() {
        assert_eq!(format_reply_multiline(211, "Features:"), "211-Features:\r\n");
    }

    #[test]
    fn pasv_format() {
        assert_eq!(
            format_pasv([127, 0, 0, 1], 49280),
            "227 Entering Passive Mode (127,0,0,1,192,128)\r\n"
        );
    }
}
