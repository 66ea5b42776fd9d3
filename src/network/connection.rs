use crate::config::{ClientConfig, MIN_READ_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::logging::{NullLog, WireLog};
use crate::network::Transport;
use crate::pipeline::{PendingQueue, PendingRecord, ReplyHandler};
use crate::protocol::{Command, ReplyDecoder, RespValue};
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one read-ready event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A chunk was read and this many replies were delivered
    Replies(usize),
    /// Nothing to read right now
    WouldBlock,
    /// The peer closed the stream; pending commands were abandoned
    Closed,
}

/// Pipelined client connection.
///
/// Commands are encoded into the write buffer as soon as they are submitted
/// and their records queued; replies are decoded as bytes arrive and matched
/// to records strictly in submission order. All I/O happens in
/// [`handle_write`](Self::handle_write) and [`handle_read`](Self::handle_read),
/// which the owner calls when the transport reports readiness.
pub struct Connection<T: Transport, D> {
    transport: T,

    // Protocol state
    decoder: ReplyDecoder,
    pending: PendingQueue<D>,

    // Outbound bytes not yet accepted by the transport
    write_buffer: Vec<u8>,
    write_position: usize,
    terminator: Vec<u8>,

    read_buffer: Vec<u8>,

    log: Box<dyn WireLog>,

    // Connection state
    established: bool,
    handshake_pending: bool,
    closed: bool,
    abandoned: usize,
}

impl<T: Transport, D> Connection<T, D> {
    /// Create a connection with inert logging
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        Self::with_log(transport, config, Box::new(NullLog))
    }

    pub fn with_log(transport: T, config: &ClientConfig, log: Box<dyn WireLog>) -> Self {
        Self {
            transport,
            decoder: ReplyDecoder::with_max_bulk_len(config.max_bulk_len),
            pending: PendingQueue::new(),
            write_buffer: Vec::with_capacity(16 * 1024),
            write_position: 0,
            terminator: config.terminator.as_bytes().to_vec(),
            read_buffer: vec![0u8; config.read_chunk_size.max(MIN_READ_CHUNK_SIZE)],
            log,
            established: false,
            handshake_pending: false,
            closed: false,
            abandoned: 0,
        }
    }

    /// Queue a synthetic `CONNECT` record ahead of every command.
    ///
    /// `handler` runs with a `+OK` status reply once the transport reports the
    /// connection as established.
    pub fn with_connect_handler<H>(mut self, handler: H, data: D) -> Self
    where
        H: ReplyHandler<D> + 'static,
    {
        self.pending.push(PendingRecord::new(
            Command::new("CONNECT"),
            Some(Box::new(handler)),
            data,
        ));
        self.handshake_pending = true;
        self
    }

    /// Encode `command` and queue `handler` to receive its reply.
    ///
    /// Returns immediately; nothing is written until the next
    /// [`handle_write`](Self::handle_write).
    pub fn submit<H>(&mut self, command: Command, handler: H, data: D) -> Result<()>
    where
        H: ReplyHandler<D> + 'static,
    {
        self.enqueue(command, Some(Box::new(handler)), data)
    }

    /// Like [`submit`](Self::submit), but the reply is discarded.
    pub fn submit_detached(&mut self, command: Command, data: D) -> Result<()> {
        self.enqueue(command, None, data)
    }

    fn enqueue(
        &mut self,
        command: Command,
        handler: Option<Box<dyn ReplyHandler<D>>>,
        data: D,
    ) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        self.log.log_send(&command);

        // Only reset the buffer once every earlier byte has been written
        if self.write_position >= self.write_buffer.len() {
            self.write_buffer.clear();
            self.write_position = 0;
        }
        command.write_to(&mut self.write_buffer, &self.terminator);

        self.pending.push(PendingRecord::new(command, handler, data));
        Ok(())
    }

    /// Write-ready: hand as many outbound bytes to the transport as it takes.
    ///
    /// Returns the number of bytes written. Unsent bytes stay buffered for the
    /// next call.
    pub fn handle_write(&mut self) -> Result<usize> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if !self.ensure_established()? {
            return Ok(0);
        }

        let mut written = 0;
        while self.write_position < self.write_buffer.len() {
            let data = &self.write_buffer[self.write_position..];
            let data_len = data.len();
            match self.transport.send(data) {
                Ok(0) => return Err(Error::Io(ErrorKind::WriteZero.into())),
                Ok(n) => {
                    self.consume_writes(n);
                    written += n;
                    if n < data_len {
                        // Partial write, would block
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if self.write_position >= self.write_buffer.len() {
            self.write_buffer.clear();
            self.write_position = 0;
        } else if self.write_position > self.write_buffer.len() / 2 {
            self.write_buffer.drain(..self.write_position);
            self.write_position = 0;
        }

        Ok(written)
    }

    /// Read-ready: read one chunk and deliver every reply it completes.
    pub fn handle_read(&mut self) -> Result<ReadOutcome> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.ensure_established()?;

        let n = loop {
            match self.transport.recv(&mut self.read_buffer) {
                Ok(0) => {
                    self.log.log_info("connection closed by peer");
                    self.close();
                    return Ok(ReadOutcome::Closed);
                }
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        self.decoder.feed(&self.read_buffer[..n]);
        self.dispatch_replies().map(ReadOutcome::Replies)
    }

    /// Deliver replies contained in bytes obtained outside of
    /// [`handle_read`](Self::handle_read).
    ///
    /// Bytes from the peer mean the connection is up, so the connect
    /// handshake completes here if no readiness event has done so yet.
    pub fn process_read(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if !self.established {
            self.establish()?;
        }
        self.decoder.feed(data);
        self.dispatch_replies()
    }

    fn dispatch_replies(&mut self) -> Result<usize> {
        let mut delivered = 0;
        loop {
            let reply = match self.decoder.next_reply() {
                Ok(Some(reply)) => reply,
                Ok(None) => return Ok(delivered),
                Err(e) => return Err(self.fail(e)),
            };

            self.log.log_recv(&reply);

            let record = match self.pending.pop() {
                Ok(record) => record,
                Err(e) => return Err(self.fail(e)),
            };
            record.complete(reply);
            delivered += 1;
        }
    }

    /// Protocol errors desynchronize the stream for good.
    fn fail(&mut self, error: Error) -> Error {
        warn!("Closing connection after protocol error: {}", error);
        self.close();
        error
    }

    /// Complete the connect handshake the first time the transport reports
    /// the connection as up.
    fn ensure_established(&mut self) -> Result<bool> {
        if self.established {
            return Ok(true);
        }
        if !self.transport.poll_connected()? {
            return Ok(false);
        }
        self.establish()?;
        Ok(true)
    }

    fn establish(&mut self) -> Result<()> {
        self.established = true;
        self.log.log_info("connected");

        if self.handshake_pending {
            self.handshake_pending = false;
            let record = self.pending.pop()?;
            record.complete(RespValue::Status("OK".to_string()));
        }
        Ok(())
    }

    /// Close the transport and drop everything in flight.
    ///
    /// Pending handlers are not run. Returns how many commands were abandoned.
    pub fn close(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.closed = true;

        if let Err(e) = self.transport.close() {
            debug!("Error closing transport: {}", e);
        }

        self.write_buffer.clear();
        self.write_position = 0;
        self.decoder.reset();
        self.handshake_pending = false;

        let abandoned = self.pending.abandon();
        self.abandoned = abandoned;
        if abandoned > 0 {
            debug!("Abandoned {} pending commands", abandoned);
        }
        abandoned
    }

    /// Get pending write data as a single buffer slice
    pub fn pending_writes(&self) -> Option<&[u8]> {
        if self.write_position < self.write_buffer.len() {
            Some(&self.write_buffer[self.write_position..])
        } else {
            None
        }
    }

    /// Mark bytes as written
    fn consume_writes(&mut self, n: usize) {
        self.write_position += n;
    }

    /// Whether there are outbound bytes waiting for write-readiness
    pub fn wants_write(&self) -> bool {
        self.write_position < self.write_buffer.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.write_buffer.len() - self.write_position
    }

    /// Commands waiting for a reply
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Age of the oldest command still waiting for a reply
    pub fn oldest_pending(&self) -> Option<Duration> {
        self.pending.front().map(PendingRecord::age)
    }

    /// Commands dropped unanswered when the connection closed
    pub fn abandoned(&self) -> usize {
        self.abandoned
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
