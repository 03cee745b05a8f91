//! WebSocket protocol primitives (RFC 6455).

pub mod auth;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod utf8;

pub use auth::{AuthContext, AuthScheme, AuthSchemes};
pub use frame::{FrameHeader, MAX_CONTROL_PAYLOAD, parse_close_payload};
pub use handshake::{HandshakeContext, HttpVersion, WS_GUID, accept_key};
pub use mask::apply_mask;
pub use opcode::OpCode;
pub use utf8::Utf8Validator;
