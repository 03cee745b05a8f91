//! Connection lifecycle states.

/// Lifecycle state of a WebSocket connection.
///
/// `Open` is the only state in which application data frames may be sent;
/// receiving is additionally allowed in `ClosingRx` while draining the
/// peer's side of the closing handshake. An unoccupied pool slot has no
/// state at all; a `Connection` always exists in one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection is established. Initial (client) and terminal state.
    #[default]
    Closed,
    /// A connection attempt is starting; the retry budget is charged here.
    Init,
    /// The transport is being connected.
    Connecting,
    /// The client handshake is being transmitted (client role) or parsed
    /// (server role).
    ClientHandshake,
    /// The server handshake is being awaited (client role) or transmitted
    /// (server role).
    ServerHandshake,
    /// The body of a non-upgrade response (e.g. a 401) is being drained.
    ServerRespBody,
    /// Data transfer is allowed in both directions.
    Open,
    /// The local Close frame is being transmitted.
    ClosingTx,
    /// Waiting for (and discarding data until) the peer's Close frame.
    ClosingRx,
    /// The transport is being shut down.
    Shutdown,
}

impl ConnectionState {
    /// Whether data frames may be transmitted.
    #[inline]
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Whether data frames may be received.
    #[inline]
    #[must_use]
    pub const fn can_receive(self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::ClosingRx)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Init => "init",
            ConnectionState::Connecting => "connecting",
            ConnectionState::ClientHandshake => "client-handshake",
            ConnectionState::ServerHandshake => "server-handshake",
            ConnectionState::ServerRespBody => "server-resp-body",
            ConnectionState::Open => "open",
            ConnectionState::ClosingTx => "closing-tx",
            ConnectionState::ClosingRx => "closing-rx",
            ConnectionState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_only_when_open() {
        assert!(ConnectionState::Open.can_send());
        assert!(!ConnectionState::Closed.can_send());
        assert!(!ConnectionState::ClientHandshake.can_send());
        assert!(!ConnectionState::ClosingTx.can_send());
        assert!(!ConnectionState::ClosingRx.can_send());
    }

    #[test]
    fn test_receive_in_open_and_closing_rx() {
        assert!(ConnectionState::Open.can_receive());
        assert!(ConnectionState::ClosingRx.can_receive());
        assert!(!ConnectionState::Closed.can_receive());
        assert!(!ConnectionState::ClosingTx.can_receive());
        assert!(!ConnectionState::Shutdown.can_receive());
    }

    #[test]
    fn test_default_is_closed() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
    }
}
