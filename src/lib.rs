//! redispatch: non-blocking pipelined RESP client
//!
//! Commands are encoded and queued without waiting for earlier replies;
//! replies are decoded incrementally as bytes arrive and handed to the
//! handler of the command that produced them, in submission order.
//!
//! # Architecture
//!
//! - Incremental reply decoder that resumes mid-frame across reads
//! - FIFO of pending records correlating replies with commands
//! - Connection driven by external readiness events (any `Transport`)
//! - mio-based single-threaded event loop for TCP

/// Readiness loop over a TCP connection
pub mod client;

/// Configuration management for the client
pub mod config;

/// Error types and result aliases
pub mod error;

/// Wire logging hooks
pub mod logging;

/// Connection state and transports
pub mod network;

/// Pending command bookkeeping
pub mod pipeline;

/// Redis protocol (RESP) encoding and decoding
pub mod protocol;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, ProtocolViolation, Result};
pub use logging::{NullLog, TracingLog, WireLog};
pub use network::{Connection, ReadOutcome, Transport};
pub use pipeline::{PendingQueue, PendingRecord, ReplyHandler};
pub use protocol::{Command, ReplyDecoder, RespValue, ToArg};
