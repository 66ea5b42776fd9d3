//! Wire logging hooks handed to a [`Connection`](crate::network::Connection).

use crate::protocol::{Command, RespValue};
use tracing::debug;

/// Observes traffic on a connection.
///
/// Every hook defaults to doing nothing.
pub trait WireLog {
    /// A command was encoded into the outbound buffer
    fn log_send(&self, _command: &Command) {}

    /// A reply was decoded
    fn log_recv(&self, _reply: &RespValue) {}

    /// Connection lifecycle message
    fn log_info(&self, _message: &str) {}
}

/// Inert hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl WireLog for NullLog {}

/// Emits every command and reply as `debug` events on the
/// `redispatch::client::tx` and `redispatch::client::rx` targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl WireLog for TracingLog {
    fn log_send(&self, command: &Command) {
        debug!(target: "redispatch::client::tx", "{}", command);
    }

    fn log_recv(&self, reply: &RespValue) {
        debug!(target: "redispatch::client::rx", "{:?}", reply);
    }

    fn log_info(&self, message: &str) {
        debug!("{}", message);
    }
}
