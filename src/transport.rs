//! The byte-stream transport contract consumed by the engine.
//!
//! The engine is transport-agnostic: it drives any [`Transport`] through a
//! byte-oriented send/receive/shutdown interface and never assumes TCP or
//! TLS specifics. Transient conditions (`WouldBlock`, `TimedOut`) must be
//! reported as the matching [`Error`] variants so the caller can retry the
//! same engine operation; every other error tears the connection down.
//!
//! [`TcpTransport`] is the reference implementation over `std::net`.

use std::io::{Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::{Error, Result};

/// A synchronous byte-stream transport.
pub trait Transport {
    /// Establish (or re-establish) a connection to the given peer.
    ///
    /// `connect` may be called again after [`shutdown`](Transport::shutdown)
    /// when the engine retries a connection attempt.
    fn connect(&mut self, addr: IpAddr, port: u16) -> Result<()>;

    /// Write up to `data.len()` bytes, returning how many were accepted.
    ///
    /// # Errors
    ///
    /// [`Error::WouldBlock`] / [`Error::TimedOut`] when no progress could be
    /// made within the configured timeout; any other error is fatal.
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Read up to `buf.len()` bytes, returning how many were read.
    ///
    /// `Ok(0)` signals the end of the stream.
    ///
    /// # Errors
    ///
    /// [`Error::WouldBlock`] / [`Error::TimedOut`] when nothing arrived
    /// within the configured timeout; any other error is fatal.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Shut the stream down in both directions.
    fn shutdown(&mut self) -> Result<()>;

    /// Set the timeout applied to subsequent blocking operations.
    ///
    /// `None` blocks indefinitely.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
}

/// Blocking TCP transport over [`std::net::TcpStream`].
#[derive(Debug, Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    timeout: Option<Duration>,
}

impl TcpTransport {
    /// Create an unconnected transport; `connect` establishes the stream.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stream: None,
            timeout: None,
        }
    }

    /// Wrap an already-connected stream (server side, after `accept`).
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true).map_err(Error::from)?;
        Ok(Self {
            stream: Some(stream),
            timeout: None,
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, addr: IpAddr, port: u16) -> Result<()> {
        let peer = SocketAddr::new(addr, port);
        let stream = match self.timeout {
            Some(t) => TcpStream::connect_timeout(&peer, t)?,
            None => TcpStream::connect(peer)?,
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.stream()?.write(data)?)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream()?.read(buf)?)
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.shutdown(Shutdown::Both)?;
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.timeout = timeout;
        if let Some(stream) = self.stream.as_ref() {
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
        }
        Ok(())
    }
}
