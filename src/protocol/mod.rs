//! RESP wire format: request encoding and incremental reply decoding.

pub mod command;
pub mod resp;

pub use command::{encode, encode_with_terminator, Command, ToArg};
pub use resp::{ReplyDecoder, RespValue};
