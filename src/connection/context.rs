//! Per-direction I/O context: sub-state, staging buffer and cursors.

use bytes::BytesMut;

use crate::protocol::OpCode;

/// What the staging buffer currently holds.
///
/// Every resumable operation is a loop over these phases; a transient
/// transport error leaves the phase and cursors untouched so the next call
/// continues exactly where the last one stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Phase {
    /// Nothing staged; the next step decides what to do.
    #[default]
    Idle,
    /// The leading line of a handshake (request line or status line).
    HandshakeLine,
    /// A handshake header field line.
    HandshakeHeader,
    /// Peeking one byte past a CRLF to detect header folding.
    HandshakeFold,
    /// The first two bytes of a frame header.
    FrameHeader,
    /// The extended length and masking key (and, for Close, the payload).
    FrameExtHeader,
    /// Frame payload in transit.
    FramePayload,
}

/// Encoding/decoding state for one direction of a connection.
///
/// Invariants: at most one frame is in flight, `payload_pos <= payload_len`,
/// and `masking_key` is present iff the frame's MASK bit is set.
#[derive(Debug)]
pub(crate) struct FrameContext {
    /// Current sub-state.
    pub phase: Phase,
    /// Staging buffer; logical content is `buffer[..buffer_len]`.
    pub buffer: BytesMut,
    /// Cursor into the staged bytes (sent or filled so far).
    pub buffer_pos: usize,
    /// Logical end of the staged bytes (or fill target on receive).
    pub buffer_len: usize,
    /// Declared payload length of the frame in flight.
    pub payload_len: usize,
    /// Payload bytes already processed.
    pub payload_pos: usize,
    /// Masking key of the frame in flight.
    pub masking_key: Option<[u8; 4]>,
    /// Data opcode of the current message (Text or Binary).
    pub data_kind: OpCode,
    /// Control opcode of the current frame; `Continuation` means none.
    pub control_kind: OpCode,
    /// FIN flag; `true` when no fragmented message is open (receive side).
    pub fin: bool,
}

impl FrameContext {
    pub fn new(capacity: usize) -> Self {
        let mut buffer = BytesMut::with_capacity(capacity);
        buffer.resize(capacity, 0);
        Self {
            phase: Phase::Idle,
            buffer,
            buffer_pos: 0,
            buffer_len: 0,
            payload_len: 0,
            payload_pos: 0,
            masking_key: None,
            data_kind: OpCode::Continuation,
            control_kind: OpCode::Continuation,
            fin: true,
        }
    }

    /// Grow the buffer so indices below `len` are valid.
    pub fn ensure(&mut self, len: usize) {
        if self.buffer.len() < len {
            self.buffer.resize(len, 0);
        }
    }

    /// Stage a fully formatted block (handshake text, close frame) for
    /// transmission from the start of the buffer.
    pub fn stage(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.buffer[..bytes.len()].copy_from_slice(bytes);
        self.buffer_pos = 0;
        self.buffer_len = bytes.len();
    }

    /// Forget any in-flight frame and staged bytes.
    pub fn clear(&mut self) {
        self.phase = Phase::Idle;
        self.buffer_pos = 0;
        self.buffer_len = 0;
        self.payload_len = 0;
        self.payload_pos = 0;
        self.masking_key = None;
        self.data_kind = OpCode::Continuation;
        self.control_kind = OpCode::Continuation;
        self.fin = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_idle() {
        let ctx = FrameContext::new(256);
        assert_eq!(ctx.phase, Phase::Idle);
        assert_eq!(ctx.buffer.len(), 256);
        assert_eq!(ctx.buffer_len, 0);
        assert!(ctx.fin);
    }

    #[test]
    fn test_stage_and_clear() {
        let mut ctx = FrameContext::new(8);
        ctx.stage(b"GET / HTTP/1.1\r\n");
        assert_eq!(ctx.buffer_len, 16);
        assert_eq!(&ctx.buffer[..16], b"GET / HTTP/1.1\r\n");

        ctx.clear();
        assert_eq!(ctx.buffer_len, 0);
        assert_eq!(ctx.phase, Phase::Idle);
    }

    #[test]
    fn test_ensure_grows() {
        let mut ctx = FrameContext::new(4);
        ctx.ensure(64);
        assert!(ctx.buffer.len() >= 64);
    }
}
