//! Configuration for WebSocket connections.

use std::time::Duration;

/// Configuration for a WebSocket connection.
///
/// The buffer size bounds both handshake lines and the frame staging buffers,
/// so it also caps the largest header the engine will accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Size of the per-direction staging buffer in bytes.
    ///
    /// Handshake lines longer than this are rejected as invalid. Frame
    /// payloads are staged through the buffer in chunks of at most this size.
    ///
    /// Default: 1024. Minimum: 128.
    pub buffer_size: usize,

    /// Maximum number of whole-sequence connection attempts made by
    /// [`Connection::connect`](crate::Connection::connect).
    ///
    /// Default: 3
    pub max_retries: u32,

    /// Initial timeout for blocking transport operations.
    ///
    /// `None` blocks indefinitely. Forwarded to the transport on
    /// construction; adjustable later through `set_timeout`.
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            max_retries: 3,
            timeout: None,
        }
    }
}

impl Config {
    /// Minimum accepted staging buffer size.
    pub const MIN_BUFFER_SIZE: usize = 128;

    /// Create a configuration with the given buffer size.
    ///
    /// Sizes below [`Config::MIN_BUFFER_SIZE`] are clamped up; a buffer that
    /// cannot hold a complete frame header plus a control payload is useless.
    #[must_use]
    pub fn with_buffer_size(size: usize) -> Self {
        Self {
            buffer_size: size.max(Self::MIN_BUFFER_SIZE),
            ..Self::default()
        }
    }

    /// Configuration suitable for small embedded targets.
    ///
    /// - Buffer: 256 bytes
    /// - Retries: 2
    /// - Timeout: 10 seconds
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            buffer_size: 256,
            max_retries: 2,
            timeout: Some(Duration::from_secs(10)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn test_buffer_size_clamped() {
        let config = Config::with_buffer_size(16);
        assert_eq!(config.buffer_size, Config::MIN_BUFFER_SIZE);

        let config = Config::with_buffer_size(4096);
        assert_eq!(config.buffer_size, 4096);
    }

    #[test]
    fn test_embedded_profile() {
        let config = Config::embedded();
        assert_eq!(config.buffer_size, 256);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.timeout, Some(Duration::from_secs(10)));
    }
}
