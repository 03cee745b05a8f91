//! Connection management: role, lifecycle states and the state machine.
//!
//! ## Lifecycle
//!
//! A client runs `Closed → Init → Connecting → ClientHandshake →
//! ServerHandshake → Open`; a server accepts in `Init →
//! ClientHandshake → ServerHandshake → Open`. Either side then leaves
//! `Open` through the closing handshake (`ClosingTx → ClosingRx →
//! Shutdown → Closed`) or through an unconditional `close`.

mod connection;
mod context;
mod role;
mod state;

pub use connection::Connection;
pub use role::Role;
pub use state::ConnectionState;
