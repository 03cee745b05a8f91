//! # emws: an embedded-friendly WebSocket engine
//!
//! `emws` is an RFC 6455 compliant WebSocket protocol engine, client and
//! server, designed to ride on any byte-oriented transport. It grew out of
//! firmware work where the network stack, the TLS session and the scheduler
//! are all someone else's problem: the engine only asks for a
//! [`Transport`] (send/receive/shutdown with timeouts) and a
//! [`RandomSource`], and exposes a frame-oriented read/write interface that
//! higher-level protocols such as an MQTT client can tunnel over.
//!
//! ## Design
//!
//! - **Synchronous and resumable.** Every operation is an explicit state
//!   machine with stored cursors. A `WouldBlock`/`TimedOut` from the
//!   transport surfaces to the caller, and the next call continues exactly
//!   where the last one stopped.
//! - **Full handshake support.** HTTP upgrade with accept-key
//!   verification, sub-protocol advertisement, and Basic/Digest
//!   authentication on 401.
//! - **Strict validation.** Framing rules, close-status codes and
//!   incremental UTF-8 checking across fragment boundaries.
//! - **Bounded resources.** A fixed-capacity [`ConnectionPool`] and a
//!   configurable per-connection staging buffer.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use emws::{Config, Connection, OpCode, Role, SystemRandom, TcpTransport};
//!
//! let mut conn = Connection::new(
//!     TcpTransport::new(),
//!     Role::Client,
//!     Arc::new(SystemRandom),
//!     Config::default(),
//! );
//! conn.set_host("printer.local");
//! conn.connect("192.0.2.1".parse()?, 80, "/mqtt")?;
//!
//! conn.send(b"hello", OpCode::Text)?;
//! let mut buf = [0u8; 1024];
//! let received = conn.receive(&mut buf)?;
//! conn.shutdown()?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod pool;
pub mod protocol;
pub mod rand;
pub mod transport;

pub use config::Config;
pub use connection::{Connection, ConnectionState, Role};
pub use error::{Error, Result};
pub use message::{CloseCode, Received};
pub use pool::{ConnectionPool, PoolSlot};
pub use protocol::{AuthScheme, AuthSchemes, OpCode, WS_GUID, accept_key};
pub use rand::{RandomSource, SystemRandom};
pub use transport::{TcpTransport, Transport};
