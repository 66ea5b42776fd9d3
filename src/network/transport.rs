use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::Shutdown;

/// Non-blocking byte stream driven by readiness events.
///
/// `send` and `recv` follow `std::io` conventions: they may transfer fewer
/// bytes than offered and return `ErrorKind::WouldBlock` when not ready.
pub trait Transport {
    /// Write as much of `buf` as the transport accepts right now
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read into `buf`; `Ok(0)` means the peer closed the stream
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&mut self) -> io::Result<()>;

    /// Whether an in-progress connect has completed. Transports that are
    /// connected from the start keep the default.
    fn poll_connected(&mut self) -> io::Result<bool> {
        Ok(true)
    }
}

impl Transport for TcpStream {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    /// A non-blocking connect is done once the socket has a peer and no
    /// pending error.
    fn poll_connected(&mut self) -> io::Result<bool> {
        if let Some(e) = self.take_error()? {
            return Err(e);
        }
        match self.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }
}
