use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::logging::WireLog;
use crate::network::{Connection, ReadOutcome};
use crate::pipeline::ReplyHandler;
use crate::protocol::{Command, RespValue};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::io::ErrorKind;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECTION: Token = Token(0);

/// Single-threaded readiness loop around one [`Connection`].
///
/// The loop owns a `mio::Poll` and forwards readable/writable events to the
/// connection. Nothing blocks except [`turn`](Self::turn) while waiting for
/// events.
pub struct Client<D> {
    poll: Poll,
    events: Events,
    connection: Connection<TcpStream, D>,
    interest: Interest,
    tcp_nodelay: bool,
    nodelay_applied: bool,
    poll_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

impl<D: 'static> Client<D> {
    /// Start a non-blocking connect to `config.addr()`.
    pub fn connect(config: &ClientConfig, log: Box<dyn WireLog>) -> Result<Self> {
        Self::build(config, log, |conn| conn)
    }

    /// Start a connect and run `handler` once the connection is established.
    pub fn connect_with_handler<H>(
        config: &ClientConfig,
        log: Box<dyn WireLog>,
        handler: H,
        data: D,
    ) -> Result<Self>
    where
        H: ReplyHandler<D> + 'static,
    {
        Self::build(config, log, |conn| conn.with_connect_handler(handler, data))
    }

    fn build<F>(config: &ClientConfig, log: Box<dyn WireLog>, prepare: F) -> Result<Self>
    where
        F: FnOnce(Connection<TcpStream, D>) -> Connection<TcpStream, D>,
    {
        config.validate()?;

        let addr_str = config.addr();
        let addr = addr_str
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("could not resolve {}", addr_str)))?;

        let mut stream = TcpStream::connect(addr)?;

        let poll = Poll::new()?;
        let interest = Interest::READABLE | Interest::WRITABLE;
        poll.registry().register(&mut stream, CONNECTION, interest)?;

        info!("Connecting to {} (db {})", addr, config.db);

        let connection = prepare(Connection::with_log(stream, config, log));

        Ok(Self {
            poll,
            events: Events::with_capacity(64),
            connection,
            interest,
            tcp_nodelay: config.tcp_nodelay,
            nodelay_applied: false,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Submit `command`; `handler` receives the reply with `data`.
    pub fn submit<H>(&mut self, command: Command, handler: H, data: D) -> Result<()>
    where
        H: ReplyHandler<D> + 'static,
    {
        self.connection.submit(command, handler, data)?;
        self.update_interest()
    }

    pub fn submit_detached(&mut self, command: Command, data: D) -> Result<()> {
        self.connection.submit_detached(command, data)?;
        self.update_interest()
    }

    /// Queue `SELECT db`. An error reply is logged, not raised.
    pub fn select_db(&mut self, db: i64, data: D) -> Result<()> {
        self.submit(
            Command::new("SELECT").arg(db),
            |command: &Command, _: D, reply: RespValue| {
                if let Some(msg) = reply.as_error_msg() {
                    warn!("{} failed: {}", command, msg);
                }
            },
            data,
        )
    }

    /// Flag checked between iterations of [`run`](Self::run) and
    /// [`run_until_idle`](Self::run_until_idle); safe to set from a signal handler.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn connection(&self) -> &Connection<TcpStream, D> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection<TcpStream, D> {
        &mut self.connection
    }

    /// Close the socket, abandoning pending commands.
    pub fn close(&mut self) -> usize {
        self.deregister();
        self.connection.close()
    }

    /// True when nothing is waiting to be written or answered
    pub fn is_idle(&self) -> bool {
        self.connection.pending_len() == 0 && !self.connection.wants_write()
    }

    /// Poll until every submitted command has been answered.
    ///
    /// Fails with `ConnectionClosed` if the connection goes away while
    /// commands are still unanswered.
    pub fn run_until_idle(&mut self) -> Result<()> {
        loop {
            if self.connection.is_closed() {
                if self.connection.abandoned() > 0 {
                    return Err(Error::ConnectionClosed);
                }
                return Ok(());
            }
            if self.shutdown.load(Ordering::Acquire) || self.is_idle() {
                return Ok(());
            }
            self.turn(Some(self.poll_timeout))?;
        }
    }

    /// Poll until shutdown is requested or the connection closes.
    pub fn run(&mut self) -> Result<()> {
        while !self.shutdown.load(Ordering::Acquire) && !self.connection.is_closed() {
            self.turn(Some(self.poll_timeout))?;
        }
        Ok(())
    }

    /// One poll iteration: wait up to `timeout` for readiness and handle it.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<()> {
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e.into());
        }

        let mut readable = false;
        let mut writable = false;
        for event in self.events.iter() {
            if event.token() != CONNECTION {
                continue;
            }
            readable |= event.is_readable() || event.is_read_closed() || event.is_error();
            writable |= event.is_writable() || event.is_error();
        }

        if writable {
            if let Err(e) = self.connection.handle_write() {
                return Err(self.abort(e));
            }
            self.apply_nodelay();
        }

        if readable {
            // Readiness is edge-triggered: drain until the socket would block
            loop {
                match self.connection.handle_read() {
                    Ok(ReadOutcome::Replies(n)) => {
                        debug!("Delivered {} replies", n);
                    }
                    Ok(ReadOutcome::WouldBlock) => break,
                    Ok(ReadOutcome::Closed) => {
                        info!("Server closed the connection");
                        self.deregister();
                        return Ok(());
                    }
                    Err(e) => return Err(self.abort(e)),
                }
            }
        }

        self.update_interest()
    }

    fn deregister(&mut self) {
        if let Err(e) = self.poll.registry().deregister(self.connection.transport_mut()) {
            debug!("Error deregistering connection: {}", e);
        }
    }

    fn abort(&mut self, error: Error) -> Error {
        if !self.connection.is_closed() {
            warn!("Closing connection: {}", error);
            let abandoned = self.close();
            if abandoned > 0 {
                warn!("{} pending commands abandoned", abandoned);
            }
        }
        error
    }

    fn apply_nodelay(&mut self) {
        if self.nodelay_applied || !self.connection.is_established() {
            return;
        }
        self.nodelay_applied = true;
        if let Err(e) = self.connection.transport().set_nodelay(self.tcp_nodelay) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
    }

    /// Keep write interest only while there is something to write, or while
    /// the connect is still in progress.
    fn update_interest(&mut self) -> Result<()> {
        if self.connection.is_closed() {
            return Ok(());
        }
        let wanted = if self.connection.wants_write() || !self.connection.is_established() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if wanted != self.interest {
            self.poll
                .registry()
                .reregister(self.connection.transport_mut(), CONNECTION, wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }
}
