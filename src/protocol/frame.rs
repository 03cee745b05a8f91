//! Frame header formatting and parsing (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                    Masking key (if MASK set)                  |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```
//!
//! The header is decoded in two steps to suit a streaming reader: the first
//! two bytes announce via [`FrameHeader::remaining_len`] how many more header
//! bytes follow, and [`FrameHeader::parse`] decodes the complete header once
//! they have arrived.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::message::CloseCode;
use crate::protocol::OpCode;
use crate::protocol::utf8::Utf8Validator;

/// Maximum payload length of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// A decoded WebSocket frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment of the message.
    pub fin: bool,
    /// The three reserved bits; must be zero without extensions.
    pub reserved: u8,
    /// Frame type.
    pub opcode: OpCode,
    /// Masking key, present iff the MASK bit was set.
    pub masking_key: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: usize,
}

impl FrameHeader {
    /// Header bytes that follow the first two, implied by their content:
    /// the extended payload length plus the masking key.
    #[must_use]
    pub const fn remaining_len(second: u8) -> usize {
        let ext = match second & 0x7F {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let mask = if second & 0x80 != 0 { 4 } else { 0 };
        ext + mask
    }

    /// Decode a complete frame header.
    ///
    /// Returns the header and the number of bytes it occupied. The caller
    /// must supply at least `2 + remaining_len(buf[1])` bytes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOpcode`] for reserved opcode values, or
    /// [`Error::InvalidFrame`] if the buffer is shorter than the header it
    /// announces.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::InvalidFrame("truncated frame header".into()));
        }

        let fin = buf[0] & 0x80 != 0;
        let reserved = (buf[0] >> 4) & 0x07;
        let opcode = OpCode::from_u8(buf[0] & 0x0F)?;
        let masked = buf[1] & 0x80 != 0;

        let mut pos = 2;
        let payload_len = match buf[1] & 0x7F {
            126 => {
                if buf.len() < pos + 2 {
                    return Err(Error::InvalidFrame("truncated extended length".into()));
                }
                let len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
                pos += 2;
                len
            }
            127 => {
                if buf.len() < pos + 8 {
                    return Err(Error::InvalidFrame("truncated extended length".into()));
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&buf[pos..pos + 8]);
                pos += 8;
                usize::try_from(u64::from_be_bytes(bytes))
                    .map_err(|_| Error::InvalidFrame("payload length overflow".into()))?
            }
            inline => inline as usize,
        };

        let masking_key = if masked {
            if buf.len() < pos + 4 {
                return Err(Error::InvalidFrame("truncated masking key".into()));
            }
            let key = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
            pos += 4;
            Some(key)
        } else {
            None
        };

        Ok((
            Self {
                fin,
                reserved,
                opcode,
                masking_key,
                payload_len,
            },
            pos,
        ))
    }

    /// Append the wire encoding of this header to `out`.
    ///
    /// The minimal length encoding is selected automatically: inline for
    /// ≤125, 16-bit for ≤65535, 64-bit otherwise. The MASK bit mirrors
    /// `masking_key`.
    pub fn encode(&self, out: &mut BytesMut) {
        let mut first = (self.opcode.as_u8() & 0x0F) | ((self.reserved & 0x07) << 4);
        if self.fin {
            first |= 0x80;
        }
        out.put_u8(first);

        let mask_bit = if self.masking_key.is_some() { 0x80 } else { 0 };
        if self.payload_len <= 125 {
            out.put_u8(mask_bit | self.payload_len as u8);
        } else if self.payload_len <= 65535 {
            out.put_u8(mask_bit | 126);
            out.put_u16(self.payload_len as u16);
        } else {
            out.put_u8(mask_bit | 127);
            out.put_u64(self.payload_len as u64);
        }

        if let Some(key) = self.masking_key {
            out.put_slice(&key);
        }
    }

    /// Total encoded size of this header.
    #[must_use]
    pub const fn wire_len(&self) -> usize {
        let ext = if self.payload_len <= 125 {
            0
        } else if self.payload_len <= 65535 {
            2
        } else {
            8
        };
        let mask = if self.masking_key.is_some() { 4 } else { 0 };
        2 + ext + mask
    }
}

/// Decode the body of a Close frame (already unmasked).
///
/// An empty body means the peer sent no status and is reported as
/// `NormalClosure`. Bytes after the status code are a UTF-8 reason string.
///
/// # Errors
///
/// - [`Error::InvalidFrame`] for a 1-byte body or a status code outside the
///   valid set (named codes, or ≥3000).
/// - [`Error::InvalidUtf8`] when the reason string is malformed.
pub fn parse_close_payload(payload: &[u8]) -> Result<CloseCode> {
    match payload.len() {
        0 => Ok(CloseCode::Normal),
        1 => Err(Error::InvalidFrame("close payload of one byte".into())),
        _ => {
            let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
            if !code.is_valid() {
                return Err(Error::InvalidFrame(format!(
                    "close status code {} out of range",
                    code.as_u16()
                )));
            }

            let reason = &payload[2..];
            let mut validator = Utf8Validator::new();
            validator.advance(reason, reason.len())?;

            Ok(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(fin: bool, opcode: OpCode, payload_len: usize, key: Option<[u8; 4]>) {
        let header = FrameHeader {
            fin,
            reserved: 0,
            opcode,
            masking_key: key,
            payload_len,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), header.wire_len());
        assert_eq!(FrameHeader::remaining_len(buf[1]), buf.len() - 2);

        let (parsed, consumed) = FrameHeader::parse(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_roundtrip_all_length_brackets() {
        for len in [0, 1, 125, 126, 65535, 65536] {
            roundtrip(true, OpCode::Binary, len, None);
            roundtrip(false, OpCode::Text, len, Some([0xDE, 0xAD, 0xBE, 0xEF]));
        }
    }

    #[test]
    fn test_minimal_length_encoding() {
        let sizes = [(0, 2), (125, 2), (126, 4), (65535, 4), (65536, 10)];
        for (len, expected) in sizes {
            let header = FrameHeader {
                fin: true,
                reserved: 0,
                opcode: OpCode::Binary,
                masking_key: None,
                payload_len: len,
            };
            let mut buf = BytesMut::new();
            header.encode(&mut buf);
            assert_eq!(buf.len(), expected, "payload length {len}");
        }
    }

    #[test]
    fn test_parse_known_bytes() {
        // FIN + text, unmasked, length 5.
        let (header, consumed) = FrameHeader::parse(&[0x81, 0x05]).unwrap();
        assert_eq!(consumed, 2);
        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.masking_key, None);
        assert_eq!(header.reserved, 0);
    }

    #[test]
    fn test_parse_masked_header() {
        let bytes = [0x82, 0x85, 0x37, 0xfa, 0x21, 0x3d];
        let (header, consumed) = FrameHeader::parse(&bytes).unwrap();
        assert_eq!(consumed, 6);
        assert_eq!(header.opcode, OpCode::Binary);
        assert_eq!(header.masking_key, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(header.payload_len, 5);
    }

    #[test]
    fn test_parse_reserved_bits_preserved() {
        // RSV1 set; the connection rejects it, the parser just reports it.
        let (header, _) = FrameHeader::parse(&[0xC1, 0x00]).unwrap();
        assert_eq!(header.reserved, 0b100);
    }

    #[test]
    fn test_parse_reserved_opcode() {
        assert_eq!(
            FrameHeader::parse(&[0x83, 0x00]).unwrap_err(),
            Error::InvalidOpcode(0x3)
        );
    }

    #[test]
    fn test_parse_truncated() {
        assert!(FrameHeader::parse(&[0x81]).is_err());
        assert!(FrameHeader::parse(&[0x81, 0x7E, 0x01]).is_err());
        assert!(FrameHeader::parse(&[0x81, 0x85, 0x37, 0xfa]).is_err());
    }

    #[test]
    fn test_remaining_len() {
        assert_eq!(FrameHeader::remaining_len(0x05), 0);
        assert_eq!(FrameHeader::remaining_len(0x7E), 2);
        assert_eq!(FrameHeader::remaining_len(0x7F), 8);
        assert_eq!(FrameHeader::remaining_len(0x85), 4);
        assert_eq!(FrameHeader::remaining_len(0xFE), 6);
        assert_eq!(FrameHeader::remaining_len(0xFF), 12);
    }

    #[test]
    fn test_close_payload_empty_is_normal() {
        assert_eq!(parse_close_payload(&[]).unwrap(), CloseCode::Normal);
    }

    #[test]
    fn test_close_payload_single_byte_rejected() {
        assert!(matches!(
            parse_close_payload(&[0x03]),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_close_payload_status_1000() {
        assert_eq!(
            parse_close_payload(&[0x03, 0xE8]).unwrap(),
            CloseCode::Normal
        );
    }

    #[test]
    fn test_close_payload_with_reason() {
        let mut payload = vec![0x03, 0xE9];
        payload.extend_from_slice("going away".as_bytes());
        assert_eq!(parse_close_payload(&payload).unwrap(), CloseCode::GoingAway);
    }

    #[test]
    fn test_close_payload_reserved_code_rejected() {
        // 1005 must never appear on the wire.
        assert!(parse_close_payload(&[0x03, 0xED]).is_err());
        // 2999 sits below the extension range.
        assert!(parse_close_payload(&[0x0B, 0xB7]).is_err());
    }

    #[test]
    fn test_close_payload_application_code_accepted() {
        assert_eq!(
            parse_close_payload(&[0x0B, 0xB8]).unwrap(),
            CloseCode::Other(3000)
        );
    }

    #[test]
    fn test_close_payload_invalid_reason() {
        let payload = [0x03, 0xE8, 0xC0, 0x80];
        assert_eq!(parse_close_payload(&payload).unwrap_err(), Error::InvalidUtf8);
    }
}
