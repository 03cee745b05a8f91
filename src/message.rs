//! Close status codes and receive results.

use crate::protocol::OpCode;

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000). The connection completed its purpose.
    Normal,
    /// Going away (1001). Endpoint is leaving (shutdown, navigation).
    GoingAway,
    /// Protocol error (1002). A malformed frame or protocol violation.
    ProtocolError,
    /// Unsupported data (1003). The endpoint cannot handle the data type.
    UnsupportedData,
    /// No status received (1005). Reserved; never transmitted on the wire.
    #[default]
    NoStatusReceived,
    /// Abnormal closure (1006). Reserved; never transmitted on the wire.
    AbnormalClosure,
    /// Invalid payload data (1007). Non-UTF-8 bytes in a text message.
    InvalidPayloadData,
    /// Policy violation (1008).
    PolicyViolation,
    /// Message too big (1009).
    MessageTooBig,
    /// Mandatory extension missing (1010).
    MandatoryExtension,
    /// Internal error (1011).
    InternalError,
    /// TLS handshake failure (1015). Reserved; never transmitted.
    TlsHandshake,
    /// Any other code, including the ≥3000 extension/application range.
    Other(u16),
}

impl CloseCode {
    /// Map a numeric status code to a `CloseCode`.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::AbnormalClosure,
            1007 => CloseCode::InvalidPayloadData,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1015 => CloseCode::TlsHandshake,
            other => CloseCode::Other(other),
        }
    }

    /// The numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::AbnormalClosure => 1006,
            CloseCode::InvalidPayloadData => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Other(code) => *code,
        }
    }

    /// Whether this code is valid inside a received Close frame.
    ///
    /// Valid values are the named codes an endpoint may send plus the
    /// range ≥3000 reserved for extensions and applications.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1011) || self.as_u16() >= 3000
    }
}

/// The result of a successful [`Connection::receive`](crate::Connection::receive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Payload bytes were written into the caller's buffer.
    Data {
        /// Number of bytes written.
        len: usize,
        /// Effective frame type, aggregated across fragments.
        kind: OpCode,
        /// The data starts a new message.
        first_frag: bool,
        /// The data completes the message.
        last_frag: bool,
    },
    /// The peer sent a Close frame; nothing was written to the buffer.
    Closed {
        /// Status code carried by the Close frame (`NormalClosure` when the
        /// frame had an empty payload).
        code: CloseCode,
    },
}

impl Received {
    /// Bytes written into the caller's buffer.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Received::Data { len, .. } => *len,
            Received::Closed { .. } => 0,
        }
    }

    /// Whether this result carries no payload bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the peer closed the connection.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Received::Closed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_roundtrip() {
        for code in [1000, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011, 1015, 3000, 4999]
        {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
    }

    #[test]
    fn test_named_codes_are_valid() {
        assert!(CloseCode::Normal.is_valid());
        assert!(CloseCode::GoingAway.is_valid());
        assert!(CloseCode::ProtocolError.is_valid());
        assert!(CloseCode::InternalError.is_valid());
    }

    #[test]
    fn test_reserved_codes_are_invalid() {
        assert!(!CloseCode::NoStatusReceived.is_valid());
        assert!(!CloseCode::AbnormalClosure.is_valid());
        assert!(!CloseCode::TlsHandshake.is_valid());
        assert!(!CloseCode::Other(1004).is_valid());
        assert!(!CloseCode::Other(2999).is_valid());
    }

    #[test]
    fn test_application_range_is_valid() {
        assert!(CloseCode::Other(3000).is_valid());
        assert!(CloseCode::Other(4000).is_valid());
        assert!(CloseCode::Other(65535).is_valid());
    }

    #[test]
    fn test_received_accessors() {
        let data = Received::Data {
            len: 5,
            kind: OpCode::Text,
            first_frag: true,
            last_frag: true,
        };
        assert_eq!(data.len(), 5);
        assert!(!data.is_empty());
        assert!(!data.is_closed());

        let closed = Received::Closed {
            code: CloseCode::Normal,
        };
        assert_eq!(closed.len(), 0);
        assert!(closed.is_empty());
        assert!(closed.is_closed());
    }
}
