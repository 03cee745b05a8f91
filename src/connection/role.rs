//! Endpoint role.

/// Whether this endpoint initiated the connection or accepted it.
///
/// The role decides masking: clients mask every outgoing frame with a fresh
/// random key, servers never mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The endpoint that initiates the connection.
    Client,
    /// The endpoint that awaits connections.
    Server,
}

impl Role {
    /// Whether outgoing frames from this role carry a masking key.
    #[inline]
    #[must_use]
    pub const fn masks_output(self) -> bool {
        matches!(self, Role::Client)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_by_role() {
        assert!(Role::Client.masks_output());
        assert!(!Role::Server.masks_output());
    }

    #[test]
    fn test_display() {
        assert_eq!(Role::Client.to_string(), "client");
        assert_eq!(Role::Server.to_string(), "server");
    }
}
