use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;
use std::fmt;
use std::str;

use crate::error::{Error, ProtocolViolation, Result};

/// Default upper bound on a single bulk string (512MB)
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Arrays announce their length up front; never trust it for allocation.
const MAX_PREALLOC: usize = 1024;

/// A decoded reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK\r\n`
    Status(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$6\r\nfoobar\r\n`, or `$-1\r\n` for nil
    Bulk(Option<Bytes>),
    /// `*2\r\n...`, or `*-1\r\n` for a nil array
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Nil bulk string or nil array.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Bulk(None) | Self::Array(None))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn as_error_msg(&self) -> Option<&str> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bulk(Some(b)) => Some(b),
            Self::Status(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Status(s) => Some(s),
            Self::Bulk(Some(b)) => str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            Self::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Turn an error reply into `Err(Error::Server)`, pass everything else through.
    pub fn into_result(self) -> Result<RespValue> {
        match self {
            Self::Error(msg) => Err(Error::Server(msg)),
            other => Ok(other),
        }
    }
}

/// `redis-cli` style rendering.
impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_value(self, 0, f)
    }
}

fn fmt_value(value: &RespValue, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        RespValue::Status(s) => f.write_str(s),
        RespValue::Error(e) => write!(f, "(error) {}", e),
        RespValue::Integer(n) => write!(f, "(integer) {}", n),
        RespValue::Bulk(Some(b)) => write!(f, "{:?}", String::from_utf8_lossy(b)),
        RespValue::Bulk(None) | RespValue::Array(None) => f.write_str("(nil)"),
        RespValue::Array(Some(items)) if items.is_empty() => f.write_str("(empty array)"),
        RespValue::Array(Some(items)) => {
            let width = items.len().to_string().len();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, "\n{:indent$}", "", indent = indent)?;
                }
                let label = format!("{:>width$}) ", i + 1, width = width);
                f.write_str(&label)?;
                fmt_value(item, indent + label.len(), f)?;
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Status,
    Error,
    Integer,
    BulkLen,
    ArrayLen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// Waiting for the type byte of the next frame
    Start,
    /// Scanning for the CRLF that ends a single-line frame or a length header
    Line(LineKind),
    /// Waiting for a bulk body of this many bytes plus its terminator
    Body(usize),
}

/// An array whose header has been read but whose elements are still arriving.
#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    items: Vec<RespValue>,
}

/// Incremental RESP reply decoder.
///
/// Bytes are appended with [`feed`](Self::feed) in whatever chunks the socket
/// delivers; [`next_reply`](Self::next_reply) returns `Ok(None)` until a whole
/// top-level reply is buffered. All progress is kept between calls: the type
/// of the frame in flight, how far the current line has been scanned, the
/// pending bulk length, and a stack of partially built arrays. Consumed bytes
/// are never looked at again.
#[derive(Debug)]
pub struct ReplyDecoder {
    buffer: BytesMut,
    /// Bytes of the current line already scanned without finding a terminator
    scanned: usize,
    state: FrameState,
    stack: Vec<PartialArray>,
    max_bulk_len: usize,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::with_max_bulk_len(DEFAULT_MAX_BULK_LEN)
    }

    pub fn with_max_bulk_len(max_bulk_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            scanned: 0,
            state: FrameState::Start,
            stack: Vec::new(),
            max_bulk_len,
        }
    }

    /// Feed data into the decoder
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Current array nesting depth of the reply in flight
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// True when no reply is partially decoded and nothing is buffered
    pub fn is_idle(&self) -> bool {
        self.state == FrameState::Start && self.stack.is_empty() && self.buffer.is_empty()
    }

    /// Drop buffered bytes and any partially decoded reply
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.state = FrameState::Start;
        self.stack.clear();
    }

    /// Iterate over the replies that are complete in the buffer.
    ///
    /// The iterator ends when more bytes are needed, or right after yielding
    /// a protocol error.
    pub fn replies(&mut self) -> Replies<'_> {
        Replies {
            decoder: self,
            failed: false,
        }
    }

    /// Decode the next complete top-level reply.
    ///
    /// `Ok(None)` means more bytes are needed. After an error the decoder
    /// state is unspecified until [`reset`](Self::reset).
    pub fn next_reply(&mut self) -> Result<Option<RespValue>> {
        loop {
            let value = match self.state {
                FrameState::Start => {
                    let Some(&type_byte) = self.buffer.first() else {
                        return Ok(None);
                    };
                    let kind = match type_byte {
                        b'+' => LineKind::Status,
                        b'-' => LineKind::Error,
                        b':' => LineKind::Integer,
                        b'$' => LineKind::BulkLen,
                        b'*' => LineKind::ArrayLen,
                        other => return Err(ProtocolViolation::UnknownType(other).into()),
                    };
                    self.buffer.advance(1);
                    self.state = FrameState::Line(kind);
                    continue;
                }
                FrameState::Line(kind) => {
                    let Some(line) = self.take_line() else {
                        return Ok(None);
                    };
                    match self.finish_line(kind, &line)? {
                        Some(value) => value,
                        None => continue,
                    }
                }
                FrameState::Body(len) => {
                    if self.buffer.len() < len + 2 {
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(len).freeze();
                    // Terminator is skipped, not checked; the length is authoritative.
                    self.buffer.advance(2);
                    RespValue::Bulk(Some(body))
                }
            };

            self.state = FrameState::Start;
            if let Some(reply) = self.complete(value) {
                return Ok(Some(reply));
            }
        }
    }

    /// Split off the next CRLF-terminated line, terminator excluded.
    fn take_line(&mut self) -> Option<BytesMut> {
        let mut pos = self.scanned;
        while let Some(offset) = memchr(b'\n', &self.buffer[pos..]) {
            let nl = pos + offset;
            if nl > 0 && self.buffer[nl - 1] == b'\r' {
                let mut line = self.buffer.split_to(nl + 1);
                line.truncate(nl - 1);
                self.scanned = 0;
                return Some(line);
            }
            pos = nl + 1;
        }
        self.scanned = self.buffer.len();
        None
    }

    /// Handle a complete line. Headers that open a body or an array return
    /// `Ok(None)` after updating the state.
    fn finish_line(&mut self, kind: LineKind, line: &[u8]) -> Result<Option<RespValue>> {
        match kind {
            LineKind::Status => Ok(Some(RespValue::Status(utf8(line, "status reply")?))),
            LineKind::Error => Ok(Some(RespValue::Error(utf8(line, "error reply")?))),
            LineKind::Integer => {
                let n = parse_number(line).ok_or_else(|| {
                    ProtocolViolation::InvalidInteger(String::from_utf8_lossy(line).into_owned())
                })?;
                Ok(Some(RespValue::Integer(n)))
            }
            LineKind::BulkLen => match self.parse_length(line)? {
                None => Ok(Some(RespValue::Bulk(None))),
                Some(len) if len > self.max_bulk_len => Err(ProtocolViolation::BulkTooLarge {
                    len,
                    max: self.max_bulk_len,
                }
                .into()),
                Some(len) => {
                    self.state = FrameState::Body(len);
                    Ok(None)
                }
            },
            LineKind::ArrayLen => match self.parse_length(line)? {
                None => Ok(Some(RespValue::Array(None))),
                Some(0) => Ok(Some(RespValue::Array(Some(Vec::new())))),
                Some(count) => {
                    self.stack.push(PartialArray {
                        remaining: count,
                        items: Vec::with_capacity(count.min(MAX_PREALLOC)),
                    });
                    self.state = FrameState::Start;
                    Ok(None)
                }
            },
        }
    }

    /// Parse a length header: `-1` is nil, other negatives are invalid.
    fn parse_length(&self, line: &[u8]) -> Result<Option<usize>> {
        let invalid = || ProtocolViolation::InvalidLength(String::from_utf8_lossy(line).into_owned());
        match parse_number(line).ok_or_else(invalid)? {
            -1 => Ok(None),
            n if n < 0 => Err(invalid().into()),
            n => Ok(Some(usize::try_from(n).map_err(|_| invalid())?)),
        }
    }

    /// Attach a finished value to the innermost open array, closing arrays
    /// that become full. Returns the value once it is a whole top-level reply.
    fn complete(&mut self, mut value: RespValue) -> Option<RespValue> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Some(value);
            };
            top.items.push(value);
            top.remaining -= 1;
            if top.remaining > 0 {
                return None;
            }
            let items = std::mem::take(&mut top.items);
            self.stack.pop();
            value = RespValue::Array(Some(items));
        }
    }
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`ReplyDecoder::replies`].
pub struct Replies<'a> {
    decoder: &'a mut ReplyDecoder,
    failed: bool,
}

impl Iterator for Replies<'_> {
    type Item = Result<RespValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.decoder.next_reply() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[inline]
fn parse_number(line: &[u8]) -> Option<i64> {
    str::from_utf8(line).ok()?.parse::<i64>().ok()
}

fn utf8(line: &[u8], what: &'static str) -> Result<String> {
    str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| ProtocolViolation::InvalidUtf8(what).into())
}
