//! Dot stuffing for the SMTP DATA phase (RFC 5321 section 4.5.2).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Begin,
    BeginLine,
    Cr,
    Data,
}

/// Encodes a message body for transmission after DATA.
///
/// A `.` at the start of a line is doubled and bare LF is sent as CRLF.
/// [`DotStuffer::finish`] appends the `.` terminator line.
#[derive(Debug)]
pub struct DotStuffer {
    state: State,
}

impl Default for DotStuffer {
    fn default() -> Self {
        Self {
            state: State::Begin,
        }
    }
}

impl DotStuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stuff one chunk of body bytes into `out`.
    pub fn stuff(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        out.reserve(chunk.len() + chunk.len() / 64);
        for &b in chunk {
            match b {
                b'.' if matches!(self.state, State::Begin | State::BeginLine) => {
                    out.extend_from_slice(b"..");
                    self.state = State::Data;
                }
                b'\r' => {
                    out.push(b'\r');
                    self.state = State::Cr;
                }
                b'\n' => {
                    if self.state != State::Cr {
                        out.push(b'\r');
                    }
                    out.push(b'\n');
                    self.state = State::BeginLine;
                }
                _ => {
                    out.push(b);
                    self.state = State::Data;
                }
            }
        }
    }

    /// Complete the current line if needed and emit the terminator.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        match self.state {
            State::BeginLine => {}
            State::Cr => out.push(b'\n'),
            State::Begin | State::Data => out.extend_from_slice(b"\r\n"),
        }
        out.extend_from_slice(b".\r\n");
        self.state = State::Begin;
    }
}

/// Undo dot stuffing on one received DATA line (terminator already stripped).
///
/// Returns `None` for the lone `.` that ends the DATA phase.
pub fn unstuff_line(line: &[u8]) -> Option<&[u8]> {
    match line {
        b"." => None,
        [b'.', rest @ ..] => Some(rest),
        _ => Some(line),
    }
}
