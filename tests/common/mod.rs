//! In-memory paired transport for driving a client and a server engine
//! against each other in one thread.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::rc::Rc;
use std::time::Duration;

use emws::{Error, RandomSource, Result, Transport};

#[derive(Default)]
struct Channel {
    data: VecDeque<u8>,
    closed: bool,
}

/// One endpoint of an in-memory duplex pipe.
///
/// An empty incoming channel reports `WouldBlock` until the peer shuts its
/// side down, after which it reports end of stream. `chunk` caps the bytes
/// moved per call so partial-I/O resumption gets exercised.
pub struct MemTransport {
    outgoing: Rc<RefCell<Channel>>,
    incoming: Rc<RefCell<Channel>>,
    chunk: usize,
}

/// Create a connected transport pair.
pub fn pair() -> (MemTransport, MemTransport) {
    pair_with_chunk(usize::MAX)
}

/// Create a connected transport pair moving at most `chunk` bytes per call.
pub fn pair_with_chunk(chunk: usize) -> (MemTransport, MemTransport) {
    let a_to_b = Rc::new(RefCell::new(Channel::default()));
    let b_to_a = Rc::new(RefCell::new(Channel::default()));
    (
        MemTransport {
            outgoing: Rc::clone(&a_to_b),
            incoming: Rc::clone(&b_to_a),
            chunk,
        },
        MemTransport {
            outgoing: b_to_a,
            incoming: a_to_b,
            chunk,
        },
    )
}

impl Transport for MemTransport {
    fn connect(&mut self, _addr: IpAddr, _port: u16) -> Result<()> {
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let mut channel = self.outgoing.borrow_mut();
        if channel.closed {
            return Err(Error::Io("peer closed".into()));
        }
        let n = data.len().min(self.chunk);
        channel.data.extend(data[..n].iter().copied());
        Ok(n)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut channel = self.incoming.borrow_mut();
        if channel.data.is_empty() {
            return if channel.closed {
                Ok(0)
            } else {
                Err(Error::WouldBlock)
            };
        }
        let n = buf.len().min(channel.data.len()).min(self.chunk);
        for slot in buf.iter_mut().take(n) {
            *slot = channel.data.pop_front().unwrap();
        }
        Ok(n)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.outgoing.borrow_mut().closed = true;
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

/// Deterministic randomness for reproducible masks and keys.
pub struct CountingRandom(pub std::sync::atomic::AtomicU8);

impl CountingRandom {
    pub fn new() -> Self {
        Self(std::sync::atomic::AtomicU8::new(0))
    }
}

impl RandomSource for CountingRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<()> {
        for slot in buf.iter_mut() {
            *slot = self
                .0
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        Ok(())
    }
}
