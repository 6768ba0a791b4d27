/// SMTP Protocol Constants, Replies and Line I/O
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// SMTP response codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCode(pub u16);

impl ResponseCode {
    pub const READY: Self = Self(220);
    pub const CLOSING: Self = Self(221);
    pub const OK: Self = Self(250);
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    pub const TLS_UNAVAILABLE: Self = Self(454);
    pub const BAD_SEQUENCE: Self = Self(503);
    pub const AUTH_CONTINUE: Self = Self(334);
    /// Synthesized when the upstream fails without giving us a reply code.
    pub const INTERNAL_ERROR: Self = Self(599);
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SMTP commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ehlo,
    Helo,
    StartTls,
    Auth,
    Mail,
    Rcpt,
    Data,
    Rset,
    Quit,
    Unknown,
}

impl Command {
    pub fn parse(s: &str) -> (Self, &str) {
        let s = s.trim();
        let (cmd, rest) = s.split_once(' ').unwrap_or((s, ""));
        let cmd = cmd.to_uppercase();

        let command = match cmd.as_str() {
            "EHLO" => Self::Ehlo,
            "HELO" => Self::Helo,
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth,
            "MAIL" => Self::Mail,
            "RCPT" => Self::Rcpt,
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "QUIT" => Self::Quit,
            _ => Self::Unknown,
        };

        (command, rest.trim())
    }
}

/// A complete (possibly multi-line) SMTP reply.
///
/// Multi-line replies keep their text lines joined with `\n`, without the
/// code prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub message: String,
}

impl Reply {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Check the code against an expectation the way textproto clients do:
    /// one digit matches the class, two digits the first two digits, three
    /// digits the exact code. Zero accepts anything.
    pub fn matches(&self, expect: u16) -> bool {
        match expect {
            0 => true,
            1..=9 => self.code / 100 == expect,
            10..=99 => self.code / 10 == expect,
            _ => self.code == expect,
        }
    }

    /// Render for the wire, continuation lines marked with `-`.
    pub fn to_wire(&self) -> String {
        let lines: Vec<&str> = self.message.split('\n').collect();
        let code = ResponseCode(self.code);
        Response::multi_line(code, &lines)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

/// Parse one reply line into (code, continues, text).
pub fn parse_reply_line(line: &str) -> Result<(u16, bool, &str)> {
    let short = || Error::Protocol(format!("short response: {line}"));
    if line.len() < 3 || !line.is_char_boundary(3) {
        return Err(short());
    }
    let code: u16 = line[..3]
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid response code: {line}")))?;
    if !(100..1000).contains(&code) {
        return Err(Error::Protocol(format!("invalid response code: {line}")));
    }
    match line.as_bytes().get(3) {
        None => Ok((code, false, "")),
        Some(b' ') => Ok((code, false, &line[4..])),
        Some(b'-') => Ok((code, true, &line[4..])),
        Some(_) => Err(short()),
    }
}

/// SMTP response builder
pub struct Response;

impl Response {
    /// Create a simple response
    pub fn new(code: ResponseCode, message: &str) -> String {
        format!("{} {}\r\n", code, message)
    }

    /// Create a multi-line response (last line has space after code)
    pub fn multi_line(code: ResponseCode, lines: &[&str]) -> String {
        if lines.is_empty() {
            return Self::new(code, "");
        }
        if lines.len() == 1 {
            return Self::new(code, lines[0]);
        }

        let mut result = String::new();
        for (i, line) in lines.iter().enumerate() {
            if i < lines.len() - 1 {
                result.push_str(&format!("{}-{line}\r\n", code));
            } else {
                result.push_str(&format!("{} {line}\r\n", code));
            }
        }
        result
    }

    /// Greeting response
    pub fn greeting(hostname: &str) -> String {
        Self::new(ResponseCode::READY, &format!("{hostname} ESMTP tracking proxy"))
    }

    /// EHLO response advertising the given capabilities
    pub fn ehlo(hostname: &str, capabilities: &[String]) -> String {
        let mut lines = vec![hostname];
        lines.extend(capabilities.iter().map(String::as_str));
        Self::multi_line(ResponseCode::OK, &lines)
    }

    /// STARTTLS response
    pub fn starttls() -> String {
        Self::new(ResponseCode::READY, "2.0.0 Ready to start TLS")
    }

    /// STARTTLS requested but no certificate is configured
    pub fn tls_unavailable() -> String {
        Self::new(ResponseCode::TLS_UNAVAILABLE, "4.7.0 TLS not available")
    }

    /// Closing the connection
    pub fn goodbye(hostname: &str) -> String {
        Self::new(ResponseCode::CLOSING, &format!("2.0.0 {hostname} closing connection"))
    }

    /// Upstream could not be reached
    pub fn service_unavailable(hostname: &str) -> String {
        Self::new(
            ResponseCode::SERVICE_UNAVAILABLE,
            &format!("4.4.1 {hostname} upstream unavailable, closing connection"),
        )
    }

    /// Bad sequence
    pub fn bad_sequence() -> String {
        Self::new(ResponseCode::BAD_SEQUENCE, "Bad sequence of commands")
    }
}

/// Parse an SMTP line, returning (command, arg) or None if empty
pub fn parse_line(line: &str) -> Option<(Command, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (cmd, arg) = Command::parse(line);
    Some((cmd, arg.to_string()))
}

/// Read one CRLF-terminated line, returning its bytes without the terminator.
/// `None` means the peer closed the connection.
pub async fn read_line<S: AsyncRead + Unpin + ?Sized>(
    stream: &mut S,
    buf: &mut BytesMut,
) -> Result<Option<Vec<u8>>> {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos);
            buf.advance(2); // Skip \r\n
            return Ok(Some(line.to_vec()));
        }

        let mut temp = vec![0u8; 1024];
        let n = stream.read(&mut temp).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&temp[..n]);
    }
}
