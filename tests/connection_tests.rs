//! Connection Tests
//!
//! Drives a `Connection` over a scripted in-memory transport to check
//! pipelining, reply correlation and failure handling.

use redispatch::{
    ClientConfig, Command, Connection, Error, ProtocolViolation, ReadOutcome, RespValue, Transport,
};
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

/// Transport whose behaviour is scripted per call.
#[derive(Default)]
struct ScriptedTransport {
    /// Everything accepted by `send`
    written: Vec<u8>,
    /// Max bytes accepted by successive `send` calls; 0 means would-block.
    /// Unlimited once exhausted.
    write_limits: VecDeque<usize>,
    /// Results of successive `recv` calls; would-block once exhausted
    reads: VecDeque<io::Result<Vec<u8>>>,
    closed: bool,
}

impl ScriptedTransport {
    fn push_read(&mut self, chunk: &[u8]) {
        self.reads.push_back(Ok(chunk.to_vec()));
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.write_limits.pop_front() {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(limit) => limit.min(buf.len()),
            None => buf.len(),
        };
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            Some(Ok(chunk)) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            Some(Err(e)) => Err(e),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

type Seen = Rc<RefCell<Vec<(String, u32, RespValue)>>>;

fn connection() -> Connection<ScriptedTransport, u32> {
    Connection::new(ScriptedTransport::default(), &ClientConfig::default())
}

fn submit_recorded(conn: &mut Connection<ScriptedTransport, u32>, seen: &Seen, command: Command, data: u32) {
    let sink = Rc::clone(seen);
    conn.submit(
        command,
        move |cmd: &Command, data: u32, reply: RespValue| {
            sink.borrow_mut().push((cmd.name().to_string(), data, reply));
        },
        data,
    )
    .unwrap();
}

fn bulk(s: &str) -> RespValue {
    RespValue::Bulk(Some(Bytes::copy_from_slice(s.as_bytes())))
}

/// Read until the transport would block, returning replies delivered.
fn drain_reads(conn: &mut Connection<ScriptedTransport, u32>) -> usize {
    let mut delivered = 0;
    loop {
        match conn.handle_read().unwrap() {
            ReadOutcome::Replies(n) => delivered += n,
            ReadOutcome::WouldBlock | ReadOutcome::Closed => return delivered,
        }
    }
}

const REPLIES: &[u8] = b"$5\r\nhello\r\n:1\r\n*2\r\n$1\r\nx\r\n$-1\r\n";

fn expected_replies() -> Vec<(String, u32, RespValue)> {
    vec![
        ("GET".to_string(), 1, bulk("hello")),
        ("INCR".to_string(), 2, RespValue::Integer(1)),
        (
            "MGET".to_string(),
            3,
            RespValue::Array(Some(vec![bulk("x"), RespValue::Bulk(None)])),
        ),
    ]
}

fn submit_three(conn: &mut Connection<ScriptedTransport, u32>, seen: &Seen) {
    submit_recorded(conn, seen, Command::new("GET").arg("a"), 1);
    submit_recorded(conn, seen, Command::new("INCR").arg("n"), 2);
    submit_recorded(conn, seen, Command::with_args("MGET", ["x", "y"]), 3);
}

// =============================================================================
// Write side
// =============================================================================

#[test]
fn test_submit_does_not_write() {
    let mut conn = connection();
    conn.submit_detached(Command::with_args("SET", ["a", "b"]), 0)
        .unwrap();
    assert!(conn.transport().written.is_empty());
    assert_eq!(
        conn.pending_writes(),
        Some(&b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\nb\r\n"[..])
    );
}

#[test]
fn test_partial_write_resumes() {
    let mut conn = connection();
    conn.submit_detached(Command::with_args("SET", ["a", "b"]), 0)
        .unwrap();
    let wire = b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\nb\r\n";

    conn.transport_mut().write_limits.extend([5, 0]);

    assert_eq!(conn.handle_write().unwrap(), 5);
    assert_eq!(conn.outbound_len(), wire.len() - 5);
    assert!(conn.wants_write());

    // Would block: nothing moves
    assert_eq!(conn.handle_write().unwrap(), 0);
    assert_eq!(conn.outbound_len(), wire.len() - 5);

    assert_eq!(conn.handle_write().unwrap(), wire.len() - 5);
    assert_eq!(conn.transport().written, wire);
    assert!(!conn.wants_write());
}

#[test]
fn test_submit_between_partial_writes() {
    let mut conn = connection();
    let first = Command::with_args("SET", ["key", "value"]);
    let second = Command::new("GET").arg("key");
    let mut expected = first.encode();
    expected.extend_from_slice(&second.encode());

    conn.submit_detached(first, 0).unwrap();
    conn.transport_mut().write_limits.extend([20, 3, 0]);
    conn.handle_write().unwrap();

    conn.submit_detached(second, 1).unwrap();
    conn.handle_write().unwrap();
    conn.handle_write().unwrap();
    conn.handle_write().unwrap();

    assert_eq!(conn.transport().written, expected);
    assert_eq!(conn.outbound_len(), 0);
}

#[test]
fn test_write_error_surfaces() {
    struct Broken;
    impl Transport for Broken {
        fn send(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
        fn recv(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let mut broken: Connection<Broken, ()> = Connection::new(Broken, &ClientConfig::default());
    broken.submit_detached(Command::new("PING"), ()).unwrap();
    let err = broken.handle_write().unwrap_err();
    assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));
    assert!(err.is_fatal());
    // Transport errors are left to the caller
    assert!(!broken.is_closed());
    assert_eq!(broken.pending_len(), 1);
}

// =============================================================================
// Read side
// =============================================================================

#[test]
fn test_fifo_single_chunk() {
    let seen: Seen = Rc::default();
    let mut conn = connection();
    submit_three(&mut conn, &seen);

    conn.transport_mut().push_read(REPLIES);
    assert_eq!(conn.handle_read().unwrap(), ReadOutcome::Replies(3));
    assert_eq!(*seen.borrow(), expected_replies());
    assert_eq!(conn.pending_len(), 0);
}

#[test]
fn test_fifo_one_byte_reads() {
    let seen: Seen = Rc::default();
    let mut conn = connection();
    submit_three(&mut conn, &seen);

    for byte in REPLIES.chunks(1) {
        conn.transport_mut().push_read(byte);
    }
    assert_eq!(drain_reads(&mut conn), 3);
    assert_eq!(*seen.borrow(), expected_replies());
}

#[test]
fn test_fifo_every_split_point() {
    for split in 1..REPLIES.len() {
        let seen: Seen = Rc::default();
        let mut conn = connection();
        submit_three(&mut conn, &seen);

        conn.transport_mut().push_read(&REPLIES[..split]);
        conn.transport_mut().push_read(&REPLIES[split..]);
        assert_eq!(drain_reads(&mut conn), 3, "split at {}", split);
        assert_eq!(*seen.borrow(), expected_replies(), "split at {}", split);
    }
}

#[test]
fn test_error_reply_is_delivered() {
    let seen: Seen = Rc::default();
    let mut conn = connection();
    submit_recorded(&mut conn, &seen, Command::new("BOGUS"), 9);
    submit_recorded(&mut conn, &seen, Command::new("PING"), 10);

    conn.transport_mut()
        .push_read(b"-ERR unknown command 'BOGUS'\r\n+PONG\r\n");
    assert_eq!(conn.handle_read().unwrap(), ReadOutcome::Replies(2));

    let seen = seen.borrow();
    assert_eq!(seen[0].2, RespValue::Error("ERR unknown command 'BOGUS'".into()));
    assert_eq!(seen[1].2, RespValue::Status("PONG".into()));
    assert!(!conn.is_closed());
}

#[test]
fn test_process_read_feeds_external_bytes() {
    let seen: Seen = Rc::default();
    let mut conn = connection();
    submit_recorded(&mut conn, &seen, Command::new("PING"), 0);
    assert_eq!(conn.process_read(b"+PO").unwrap(), 0);
    assert_eq!(conn.process_read(b"NG\r\n").unwrap(), 1);
    assert_eq!(seen.borrow()[0].2, RespValue::Status("PONG".into()));
}

#[test]
fn test_handshake_precedes_replies() {
    let seen: Seen = Rc::default();
    let sink = Rc::clone(&seen);
    let mut conn = Connection::new(ScriptedTransport::default(), &ClientConfig::default())
        .with_connect_handler(
            move |cmd: &Command, data: u32, reply: RespValue| {
                sink.borrow_mut().push((cmd.name().to_string(), data, reply));
            },
            0,
        );
    submit_recorded(&mut conn, &seen, Command::new("PING"), 1);

    conn.transport_mut().push_read(b"+PONG\r\n");
    assert_eq!(conn.handle_read().unwrap(), ReadOutcome::Replies(1));
    assert_eq!(
        *seen.borrow(),
        vec![
            ("CONNECT".to_string(), 0, RespValue::Status("OK".into())),
            ("PING".to_string(), 1, RespValue::Status("PONG".into())),
        ]
    );
}

#[test]
fn test_handshake_completes_on_external_bytes() {
    let seen: Seen = Rc::default();
    let sink = Rc::clone(&seen);
    let mut conn = Connection::new(ScriptedTransport::default(), &ClientConfig::default())
        .with_connect_handler(
            move |cmd: &Command, data: u32, reply: RespValue| {
                sink.borrow_mut().push((cmd.name().to_string(), data, reply));
            },
            0,
        );
    submit_recorded(&mut conn, &seen, Command::new("PING"), 1);
    submit_recorded(&mut conn, &seen, Command::new("GET").arg("a"), 2);

    // No readiness event has been handled yet
    assert!(!conn.is_established());
    assert_eq!(conn.process_read(b"+PONG\r\n$1\r\nb\r\n").unwrap(), 2);

    assert!(conn.is_established());
    assert_eq!(conn.pending_len(), 0);
    assert_eq!(
        *seen.borrow(),
        vec![
            ("CONNECT".to_string(), 0, RespValue::Status("OK".into())),
            ("PING".to_string(), 1, RespValue::Status("PONG".into())),
            ("GET".to_string(), 2, bulk("b")),
        ]
    );
}

#[test]
fn test_zero_read_chunk_size_still_reads() {
    let config = ClientConfig {
        read_chunk_size: 0,
        ..Default::default()
    };
    let mut conn: Connection<ScriptedTransport, u32> =
        Connection::new(ScriptedTransport::default(), &config);
    let seen: Seen = Rc::default();
    submit_recorded(&mut conn, &seen, Command::new("PING"), 0);

    conn.transport_mut().push_read(b"+OK\r\n");
    assert_eq!(conn.handle_read().unwrap(), ReadOutcome::Replies(1));
    assert!(!conn.is_closed());
    assert_eq!(conn.abandoned(), 0);
    assert_eq!(seen.borrow()[0].2, RespValue::Status("OK".into()));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_reply_without_pending_command() {
    let mut conn = connection();
    conn.transport_mut().push_read(b":1\r\n");

    let err = conn.handle_read().unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolViolation::UnexpectedReply)
    ));
    assert!(conn.is_closed());
    assert!(conn.transport().closed);
}

#[test]
fn test_protocol_violation_abandons_rest() {
    let seen: Seen = Rc::default();
    let mut conn = connection();
    submit_recorded(&mut conn, &seen, Command::new("A"), 1);
    submit_recorded(&mut conn, &seen, Command::new("B"), 2);
    submit_recorded(&mut conn, &seen, Command::new("C"), 3);

    conn.transport_mut().push_read(b":1\r\n%2\r\n:3\r\n");
    let err = conn.handle_read().unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolViolation::UnknownType(b'%'))
    ));

    // The reply decoded before the bad frame was delivered; the rest never are
    assert_eq!(
        *seen.borrow(),
        vec![("A".to_string(), 1, RespValue::Integer(1))]
    );
    assert!(conn.is_closed());
    assert_eq!(conn.pending_len(), 0);
    assert_eq!(conn.abandoned(), 2);
    assert!(matches!(conn.handle_read(), Err(Error::ConnectionClosed)));
}

#[test]
fn test_invalid_integer_is_fatal() {
    let mut conn = connection();
    conn.submit_detached(Command::new("INCR").arg("k"), 0).unwrap();
    conn.transport_mut().push_read(b":abc\r\n");
    assert!(matches!(
        conn.handle_read(),
        Err(Error::Protocol(ProtocolViolation::InvalidInteger(_)))
    ));
    assert!(conn.is_closed());
}

#[test]
fn test_read_error_surfaces() {
    let mut conn = connection();
    conn.submit_detached(Command::new("PING"), 0).unwrap();
    conn.transport_mut()
        .reads
        .push_back(Err(io::ErrorKind::ConnectionReset.into()));

    let err = conn.handle_read().unwrap_err();
    assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::ConnectionReset));
    assert_eq!(conn.pending_len(), 1);
}

#[test]
fn test_peer_close_drops_pending_silently() {
    let seen: Seen = Rc::default();
    let mut conn = connection();
    submit_three(&mut conn, &seen);
    conn.transport_mut().push_read(b"$5\r\nhel");
    conn.transport_mut().push_read(b"");

    assert_eq!(conn.handle_read().unwrap(), ReadOutcome::Replies(0));
    assert_eq!(conn.handle_read().unwrap(), ReadOutcome::Closed);
    assert!(seen.borrow().is_empty());
    assert_eq!(conn.abandoned(), 3);
}
