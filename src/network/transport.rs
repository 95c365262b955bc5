//! Transport
//!
//! The socket abstraction the scheduler polls. Neither side ever blocks:
//! workers peek at whatever is already buffered and the sender loop writes
//! only what the kernel accepts right now.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

/// A byte-stream connection that can be polled without blocking
pub trait Transport: Send + Sync {
    fn is_open(&self) -> bool;

    /// Copy buffered bytes into `buf` without consuming them.
    /// Returns the readable byte count, at most `buf.len()`; zero when
    /// nothing is buffered.
    fn peek(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Consume up to `buf.len()` buffered bytes
    fn receive(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write as much of `bytes` as can be written without blocking.
    /// Returns the number of bytes accepted; zero when the peer is not
    /// draining its end.
    fn send(&self, bytes: &[u8]) -> io::Result<usize>;

    fn close(&self);

    /// Peer address for logging
    fn peer_addr(&self) -> &str;
}

/// Non-blocking TCP transport
pub struct TcpTransport {
    stream: TcpStream,

    open: AtomicBool,

    peer_addr: String,
}

impl TcpTransport {
    /// Wrap an accepted or connected stream
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        stream.set_nonblocking(true)?;

        // Disable Nagle's algorithm; the sender loop already batches
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            open: AtomicBool::new(true),
            peer_addr,
        })
    }

    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::new(stream)
    }

    fn mark_closed(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::debug!("Connection to {} closed", self.peer_addr);
        }
    }
}

impl Transport for TcpTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn peek(&self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Ok(0);
        }
        match self.stream.peek(buf) {
            Ok(0) if !buf.is_empty() => {
                // Orderly shutdown by the peer
                self.mark_closed();
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
                ) {
                    self.mark_closed();
                }
                Err(e)
            }
        }
    }

    fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match (&self.stream).read(&mut buf[filled..]) {
                Ok(0) => {
                    self.mark_closed();
                    break;
                }
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < bytes.len() {
            match (&self.stream).write(&bytes[written..]) {
                Ok(0) => {
                    self.mark_closed();
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed while writing",
                    ));
                }
                Ok(n) => written += n,
                // Kernel buffer full; the caller keeps the rest for later
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if matches!(
                        e.kind(),
                        io::ErrorKind::BrokenPipe
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionAborted
                    ) {
                        self.mark_closed();
                    }
                    return Err(e);
                }
            }
        }
        Ok(written)
    }

    fn close(&self) {
        if self.is_open() {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
        self.mark_closed();
    }

    fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}
