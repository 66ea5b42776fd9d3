use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Malformed or unexpected data on the reply stream.
///
/// Every variant leaves the connection desynchronized: it must be closed and
/// its outstanding commands treated as failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("unknown reply type byte: 0x{0:02x}")]
    UnknownType(u8),

    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    #[error("invalid length: {0:?}")]
    InvalidLength(String),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("bulk string of {len} bytes exceeds limit of {max}")]
    BulkTooLarge { len: usize, max: usize },

    #[error("reply received with no pending command")]
    UnexpectedReply,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the connection that produced this error must be dropped.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() != io::ErrorKind::WouldBlock,
            Error::Protocol(_) | Error::ConnectionClosed => true,
            Error::Server(_) | Error::Config(_) | Error::Other(_) => false,
        }
    }
}
