//! Payload masking (RFC 6455 Section 5.3).
//!
//! Masking XORs byte `i` of the payload with `key[i % 4]`. The routine is its
//! own inverse, so the same call masks on send and unmasks on receive. The
//! `offset` parameter is the cumulative payload position of the first byte in
//! `data`, which keeps the key phase correct when one frame's payload passes
//! through the staging buffer in several partial I/O steps.

/// XOR `data` with `key`, phased as if `data[0]` sat at payload
/// position `offset`.
#[inline]
pub fn apply_mask(data: &mut [u8], key: [u8; 4], offset: usize) {
    // Rotate the key by the offset phase, then process word-at-a-time.
    let phase = offset % 4;
    let rotated = [
        key[phase],
        key[(phase + 1) % 4],
        key[(phase + 2) % 4],
        key[(phase + 3) % 4],
    ];

    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
            ^ u32::from_ne_bytes(rotated);
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= rotated[i % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_reference(data: &mut [u8], key: [u8; 4], offset: usize) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= key[(offset + i) % 4];
        }
    }

    #[test]
    fn test_mask_is_involution() {
        let key = [0x12, 0x34, 0x56, 0x78];
        let original = b"Hello, WebSocket!".to_vec();
        let mut data = original.clone();

        apply_mask(&mut data, key, 0);
        assert_ne!(data, original);
        apply_mask(&mut data, key, 0);
        assert_eq!(data, original);
    }

    #[test]
    fn test_mask_rfc_example() {
        // RFC 6455 Section 5.7: "Hello" masked with 37 fa 21 3d.
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut data = b"Hello".to_vec();
        apply_mask(&mut data, key, 0);
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn test_mask_matches_reference_at_all_offsets() {
        let key = [0xab, 0xcd, 0xef, 0x12];
        for offset in 0..8 {
            for len in [0usize, 1, 3, 4, 5, 7, 8, 15, 16, 63, 64, 100] {
                let original: Vec<u8> = (0..len).map(|i| (i & 0xff) as u8).collect();
                let mut fast = original.clone();
                let mut reference = original.clone();
                apply_mask(&mut fast, key, offset);
                mask_reference(&mut reference, key, offset);
                assert_eq!(fast, reference, "offset {offset}, len {len}");
            }
        }
    }

    #[test]
    fn test_split_masking_equals_whole() {
        // Masking a payload in two chunks with cumulative offsets must equal
        // masking it in one pass.
        let key = [0x11, 0x22, 0x33, 0x44];
        let payload: Vec<u8> = (0..37).collect();

        let mut whole = payload.clone();
        apply_mask(&mut whole, key, 0);

        let mut split = payload.clone();
        let (head, tail) = split.split_at_mut(13);
        apply_mask(head, key, 0);
        apply_mask(tail, key, 13);

        assert_eq!(whole, split);
    }

    #[test]
    fn test_mask_empty() {
        let mut data: Vec<u8> = vec![];
        apply_mask(&mut data, [1, 2, 3, 4], 7);
        assert!(data.is_empty());
    }
}
