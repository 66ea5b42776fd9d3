//! Correlation of pipelined commands with their replies.
//!
//! Replies arrive in the order commands were written, so a plain FIFO is
//! enough: every decoded reply completes the record at the head.

use crate::error::{ProtocolViolation, Result};
use crate::protocol::{Command, RespValue};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Receives the reply to a submitted command together with the caller's data.
///
/// Error replies (`-ERR ...`) are delivered here like any other value.
pub trait ReplyHandler<D> {
    fn handle_reply(&mut self, command: &Command, data: D, reply: RespValue);
}

impl<D, F> ReplyHandler<D> for F
where
    F: FnMut(&Command, D, RespValue),
{
    fn handle_reply(&mut self, command: &Command, data: D, reply: RespValue) {
        self(command, data, reply)
    }
}

/// A command that has been submitted and is waiting for its reply.
pub struct PendingRecord<D> {
    command: Command,
    handler: Option<Box<dyn ReplyHandler<D>>>,
    data: D,
    submitted_at: Instant,
}

impl<D> PendingRecord<D> {
    pub fn new(command: Command, handler: Option<Box<dyn ReplyHandler<D>>>, data: D) -> Self {
        Self {
            command,
            handler,
            data,
            submitted_at: Instant::now(),
        }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Time since submission
    pub fn age(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Hand the reply to the handler, consuming the record.
    pub fn complete(self, reply: RespValue) {
        let PendingRecord {
            command,
            handler,
            data,
            ..
        } = self;
        if let Some(mut handler) = handler {
            handler.handle_reply(&command, data, reply);
        }
    }
}

impl<D: fmt::Debug> fmt::Debug for PendingRecord<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRecord")
            .field("command", &self.command)
            .field("has_handler", &self.handler.is_some())
            .field("data", &self.data)
            .field("submitted_at", &self.submitted_at)
            .finish()
    }
}

/// FIFO of records awaiting replies.
pub struct PendingQueue<D> {
    records: VecDeque<PendingRecord<D>>,
}

impl<D> PendingQueue<D> {
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
        }
    }

    pub fn push(&mut self, record: PendingRecord<D>) {
        self.records.push_back(record);
    }

    /// Remove the oldest record.
    ///
    /// An empty queue means a reply arrived that nobody asked for, which is
    /// a protocol violation.
    pub fn pop(&mut self) -> Result<PendingRecord<D>> {
        self.records
            .pop_front()
            .ok_or_else(|| ProtocolViolation::UnexpectedReply.into())
    }

    pub fn front(&self) -> Option<&PendingRecord<D>> {
        self.records.front()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record without running its handler. Returns how many were dropped.
    pub fn abandon(&mut self) -> usize {
        let n = self.records.len();
        self.records.clear();
        n
    }
}

impl<D> Default for PendingQueue<D> {
    fn default() -> Self {
        Self::new()
    }
}
