//! Request encoding.
//!
//! A command is written as an array of bulk strings:
//! `*<N>\r\n$<len>\r\n<name>\r\n$<len>\r\n<arg>\r\n...`
//! Arguments are embedded verbatim; the length prefix is what delimits them.

use bytes::Bytes;
use itoa::Buffer;
use std::fmt;

/// Conversion of a command argument into the bytes sent on the wire.
pub trait ToArg {
    fn to_arg(&self) -> Bytes;
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

macro_rules! int_to_arg {
    ($($t:ty),*) => {
        $(
            impl ToArg for $t {
                fn to_arg(&self) -> Bytes {
                    let mut buf = Buffer::new();
                    Bytes::copy_from_slice(buf.format(*self).as_bytes())
                }
            }
        )*
    };
}

int_to_arg!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ToArg for f64 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

/// A command name with its arguments, already converted to bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Build a command from a name and any list of convertible arguments.
    pub fn with_args<I, A>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToArg,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(|a| a.to_arg()).collect(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Wire form with the standard CRLF terminator
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len(2));
        self.write_to(&mut buf, b"\r\n");
        buf
    }

    /// Append the wire form to `buf` using `terminator` after every line
    pub fn write_to(&self, buf: &mut Vec<u8>, terminator: &[u8]) {
        let mut itoa_buf = Buffer::new();

        // *<N>
        buf.push(b'*');
        buf.extend_from_slice(itoa_buf.format(1 + self.args.len()).as_bytes());
        buf.extend_from_slice(terminator);

        write_bulk(buf, self.name.as_bytes(), terminator, &mut itoa_buf);
        for arg in &self.args {
            write_bulk(buf, arg, terminator, &mut itoa_buf);
        }
    }

    fn encoded_len(&self, terminator_len: usize) -> usize {
        let mut cap = 1 + 10 + terminator_len; // '*' + max_digits(usize) + terminator
        cap += 1 + 10 + terminator_len + self.name.len() + terminator_len;
        for arg in &self.args {
            cap += 1 + 10 + terminator_len + arg.len() + terminator_len;
        }
        cap
    }
}

#[inline]
fn write_bulk(buf: &mut Vec<u8>, data: &[u8], terminator: &[u8], itoa_buf: &mut Buffer) {
    // $<len><term><data><term>
    buf.push(b'$');
    buf.extend_from_slice(itoa_buf.format(data.len()).as_bytes());
    buf.extend_from_slice(terminator);
    buf.extend_from_slice(data);
    buf.extend_from_slice(terminator);
}

/// Encode `name` and `args` with the standard terminator.
pub fn encode<A: ToArg>(name: &str, args: &[A]) -> Vec<u8> {
    Command::with_args(name, args).encode()
}

/// Encode `name` and `args`, ending every line with `terminator`.
pub fn encode_with_terminator<A: ToArg>(name: &str, args: &[A], terminator: &str) -> Vec<u8> {
    let command = Command::with_args(name, args);
    let mut buf = Vec::with_capacity(command.encoded_len(terminator.len()));
    command.write_to(&mut buf, terminator.as_bytes());
    buf
}

/// Log form: the name followed by each argument quoted, e.g. `SET "a" "b"`.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            write!(f, " {:?}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
