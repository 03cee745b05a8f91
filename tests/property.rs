//! Property tests for the protocol primitives.

use bytes::BytesMut;
use proptest::prelude::*;

use emws::CloseCode;
use emws::protocol::frame::FrameHeader;
use emws::protocol::mask::apply_mask;
use emws::protocol::utf8::Utf8Validator;
use emws::OpCode;

fn arb_opcode() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Continuation),
        Just(OpCode::Text),
        Just(OpCode::Binary),
        Just(OpCode::Close),
        Just(OpCode::Ping),
        Just(OpCode::Pong),
    ]
}

proptest! {
    #[test]
    fn mask_is_its_own_inverse(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        key in any::<[u8; 4]>(),
        offset in 0usize..16,
    ) {
        let mut data = payload.clone();
        apply_mask(&mut data, key, offset);
        apply_mask(&mut data, key, offset);
        prop_assert_eq!(data, payload);
    }

    #[test]
    fn mask_split_equals_whole(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        key in any::<[u8; 4]>(),
        split_frac in 0.0f64..1.0,
    ) {
        let split = ((payload.len() as f64) * split_frac) as usize;

        let mut whole = payload.clone();
        apply_mask(&mut whole, key, 0);

        let mut parts = payload.clone();
        let (head, tail) = parts.split_at_mut(split);
        apply_mask(head, key, 0);
        apply_mask(tail, key, split);

        prop_assert_eq!(whole, parts);
    }

    #[test]
    fn frame_header_roundtrips(
        fin in any::<bool>(),
        opcode in arb_opcode(),
        payload_len in prop_oneof![
            0usize..=125,
            126usize..=65_535,
            65_536usize..=1_000_000,
        ],
        key in proptest::option::of(any::<[u8; 4]>()),
    ) {
        let header = FrameHeader {
            fin,
            reserved: 0,
            opcode,
            masking_key: key,
            payload_len,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        prop_assert_eq!(buf.len(), header.wire_len());
        prop_assert_eq!(FrameHeader::remaining_len(buf[1]), buf.len() - 2);

        let (parsed, consumed) = FrameHeader::parse(&buf).unwrap();
        prop_assert_eq!(consumed, buf.len());
        prop_assert_eq!(parsed, header);
    }

    #[test]
    fn close_code_u16_roundtrips(code in any::<u16>()) {
        prop_assert_eq!(CloseCode::from_u16(code).as_u16(), code);
    }

    #[test]
    fn close_code_validity_ranges(code in any::<u16>()) {
        let valid = CloseCode::from_u16(code).is_valid();
        let expected = matches!(code, 1000..=1003 | 1007..=1011) || code >= 3000;
        prop_assert_eq!(valid, expected);
    }

    #[test]
    fn utf8_validator_agrees_with_std(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut validator = Utf8Validator::new();
        let accepted = validator.advance(&bytes, bytes.len()).is_ok();
        prop_assert_eq!(accepted, std::str::from_utf8(&bytes).is_ok());
    }

    #[test]
    fn utf8_validator_accepts_any_split_of_valid_text(
        text in "\\PC{0,64}",
        split_frac in 0.0f64..1.0,
    ) {
        let bytes = text.as_bytes();
        let split = ((bytes.len() as f64) * split_frac) as usize;

        let mut validator = Utf8Validator::new();
        prop_assert!(validator.advance(&bytes[..split], bytes.len()).is_ok());
        prop_assert!(validator.advance(&bytes[split..], bytes.len() - split).is_ok());
    }
}
