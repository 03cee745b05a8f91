//! HTTP authentication for the client handshake (Basic and Digest).
//!
//! Only a 401 response triggers this module: the `WWW-Authenticate` header
//! selects the scheme and supplies its parameters, and the retried handshake
//! carries the matching `Authorization` header. Digest follows RFC 2617 with
//! `qop=auth` and MD5 hashing.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::error::Result;
use crate::rand::RandomSource;

/// Size of the generated client nonce in raw bytes (hex doubles it).
const CNONCE_SIZE: usize = 16;

/// An HTTP authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    /// No authentication.
    #[default]
    None,
    /// Basic access authentication.
    Basic,
    /// Digest access authentication (RFC 2617, qop=auth).
    Digest,
}

/// Set of schemes the caller permits the client to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthSchemes(u8);

impl AuthSchemes {
    /// Permit no authentication at all.
    pub const NONE: Self = Self(0);
    /// Permit Basic.
    pub const BASIC: Self = Self(1);
    /// Permit Digest.
    pub const DIGEST: Self = Self(1 << 1);
    /// Permit both schemes.
    pub const ALL: Self = Self(Self::BASIC.0 | Self::DIGEST.0);

    /// Whether `scheme` is in the set.
    #[must_use]
    pub const fn allows(self, scheme: AuthScheme) -> bool {
        match scheme {
            AuthScheme::None => true,
            AuthScheme::Basic => self.0 & Self::BASIC.0 != 0,
            AuthScheme::Digest => self.0 & Self::DIGEST.0 != 0,
        }
    }
}

impl std::ops::BitOr for AuthSchemes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Per-connection authentication state.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// Schemes the caller allows.
    pub allowed: AuthSchemes,
    /// Scheme the server demanded in its last 401.
    pub required: AuthScheme,
    /// Scheme the client has committed to for the retry.
    pub selected: AuthScheme,
    /// Credentials supplied by the caller.
    pub username: String,
    /// Credentials supplied by the caller.
    pub password: String,
    /// Protection realm announced by the server.
    pub realm: String,
    /// Server nonce (Digest).
    pub nonce: String,
    /// Client nonce, hex-encoded (Digest).
    pub cnonce: String,
    /// Opaque value echoed back verbatim (Digest).
    pub opaque: String,
    /// Requests issued under the current nonce (Digest).
    pub nonce_count: u32,
    /// The server marked the previous nonce as stale.
    pub stale: bool,
}

impl AuthContext {
    /// Store the caller's credentials and permitted schemes.
    pub fn set_credentials(&mut self, username: &str, password: &str, allowed: AuthSchemes) {
        self.username = username.to_string();
        self.password = password.to_string();
        self.allowed = allowed;
    }

    /// Reset the per-response fields before parsing a new handshake.
    pub fn begin_parse(&mut self) {
        self.required = AuthScheme::None;
        self.nonce.clear();
        self.opaque.clear();
        self.stale = false;
    }

    /// Parse a `WWW-Authenticate` header value.
    ///
    /// The leading token names the scheme; the remainder is a
    /// comma-separated list of `name="value"` parameters. Unknown schemes
    /// and parameters are ignored.
    pub fn parse_authenticate_field(&mut self, value: &str) {
        let value = value.trim();
        let (scheme, params) = match value.split_once(char::is_whitespace) {
            Some((scheme, params)) => (scheme, params),
            None => (value, ""),
        };

        if scheme.eq_ignore_ascii_case("Basic") {
            self.required = AuthScheme::Basic;
        } else if scheme.eq_ignore_ascii_case("Digest") {
            self.required = AuthScheme::Digest;
        } else {
            return;
        }

        for param in params.split(',') {
            let Some((name, raw)) = param.split_once('=') else {
                continue;
            };
            let name = name.trim();
            let value = raw.trim().trim_matches('"');

            if name.eq_ignore_ascii_case("realm") {
                self.realm = value.to_string();
            } else if name.eq_ignore_ascii_case("nonce") {
                self.nonce = value.to_string();
            } else if name.eq_ignore_ascii_case("opaque") {
                self.opaque = value.to_string();
            } else if name.eq_ignore_ascii_case("stale") {
                self.stale = value.eq_ignore_ascii_case("true");
            }
        }
    }

    /// Draw a fresh client nonce for the next authenticated attempt.
    ///
    /// # Errors
    ///
    /// Propagates a [`RandomSource`] failure; a predictable cnonce defeats
    /// the challenge-response exchange.
    pub fn generate_cnonce(&mut self, rand: &dyn RandomSource) -> Result<()> {
        let mut raw = [0u8; CNONCE_SIZE];
        rand.fill(&mut raw)?;
        self.cnonce = hex_string(&raw);
        Ok(())
    }

    /// Build the `Authorization` header value for the selected scheme.
    ///
    /// Returns `None` while no scheme has been selected. Digest increments
    /// the nonce count on every call.
    pub fn authorization_field(&mut self, resource: &str) -> Option<String> {
        match self.selected {
            AuthScheme::None => None,
            AuthScheme::Basic => {
                let credentials = format!("{}:{}", self.username, self.password);
                Some(format!("Basic {}", BASE64.encode(credentials)))
            }
            AuthScheme::Digest => {
                self.nonce_count = self.nonce_count.wrapping_add(1);
                let nc = format!("{:08x}", self.nonce_count);

                let ha1 = md5_hex(&format!(
                    "{}:{}:{}",
                    self.username, self.realm, self.password
                ));
                let ha2 = md5_hex(&format!("GET:{resource}"));
                let response = md5_hex(&format!(
                    "{ha1}:{}:{nc}:{}:auth:{ha2}",
                    self.nonce, self.cnonce
                ));

                let mut field = format!(
                    "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{resource}\", \
                     qop=auth, nc={nc}, cnonce=\"{}\", response=\"{response}\"",
                    self.username, self.realm, self.nonce, self.cnonce
                );
                if !self.opaque.is_empty() {
                    field.push_str(&format!(", opaque=\"{}\"", self.opaque));
                }
                Some(field)
            }
        }
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rand::SystemRandom;

    #[test]
    fn test_schemes_set() {
        assert!(AuthSchemes::ALL.allows(AuthScheme::Basic));
        assert!(AuthSchemes::ALL.allows(AuthScheme::Digest));
        assert!(AuthSchemes::BASIC.allows(AuthScheme::Basic));
        assert!(!AuthSchemes::BASIC.allows(AuthScheme::Digest));
        assert!(!AuthSchemes::NONE.allows(AuthScheme::Basic));
        assert_eq!(AuthSchemes::BASIC | AuthSchemes::DIGEST, AuthSchemes::ALL);
    }

    #[test]
    fn test_parse_basic_challenge() {
        let mut ctx = AuthContext::default();
        ctx.parse_authenticate_field("Basic realm=\"printer\"");
        assert_eq!(ctx.required, AuthScheme::Basic);
        assert_eq!(ctx.realm, "printer");
    }

    #[test]
    fn test_parse_digest_challenge() {
        let mut ctx = AuthContext::default();
        ctx.parse_authenticate_field(
            "Digest realm=\"testrealm@host.com\", qop=\"auth\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", \
             opaque=\"5ccc069c403ebaf9f0171e9517f40e41\", stale=TRUE",
        );
        assert_eq!(ctx.required, AuthScheme::Digest);
        assert_eq!(ctx.realm, "testrealm@host.com");
        assert_eq!(ctx.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(ctx.opaque, "5ccc069c403ebaf9f0171e9517f40e41");
        assert!(ctx.stale);
    }

    #[test]
    fn test_parse_unknown_scheme_ignored() {
        let mut ctx = AuthContext::default();
        ctx.parse_authenticate_field("Negotiate abcdef");
        assert_eq!(ctx.required, AuthScheme::None);
    }

    #[test]
    fn test_basic_authorization_field() {
        let mut ctx = AuthContext::default();
        ctx.set_credentials("user", "pass", AuthSchemes::BASIC);
        ctx.selected = AuthScheme::Basic;
        assert_eq!(
            ctx.authorization_field("/").unwrap(),
            "Basic dXNlcjpwYXNz"
        );
    }

    #[test]
    fn test_no_field_without_selection() {
        let mut ctx = AuthContext::default();
        ctx.set_credentials("user", "pass", AuthSchemes::ALL);
        assert_eq!(ctx.authorization_field("/"), None);
    }

    #[test]
    fn test_digest_rfc2617_vector() {
        // The worked example from RFC 2617 Section 3.5.
        let mut ctx = AuthContext::default();
        ctx.set_credentials("Mufasa", "Circle Of Life", AuthSchemes::DIGEST);
        ctx.selected = AuthScheme::Digest;
        ctx.realm = "testrealm@host.com".into();
        ctx.nonce = "dcd98b7102dd2f0e8b11d0f600bfb0c093".into();
        ctx.cnonce = "0a4f113b".into();
        ctx.opaque = "5ccc069c403ebaf9f0171e9517f40e41".into();

        let field = ctx.authorization_field("/dir/index.html").unwrap();
        assert_eq!(ctx.nonce_count, 1);
        assert!(field.starts_with("Digest username=\"Mufasa\""));
        assert!(field.contains("nc=00000001"));
        assert!(field.contains("qop=auth"));
        assert!(field.contains("uri=\"/dir/index.html\""));
        assert!(field.contains("response=\"6629fae49393a05397450978507c4ef1\""));
        assert!(field.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }

    #[test]
    fn test_digest_nonce_count_increments() {
        let mut ctx = AuthContext::default();
        ctx.set_credentials("u", "p", AuthSchemes::DIGEST);
        ctx.selected = AuthScheme::Digest;
        ctx.nonce = "n".into();
        ctx.cnonce = "c".into();

        let first = ctx.authorization_field("/a").unwrap();
        let second = ctx.authorization_field("/a").unwrap();
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_digest_omits_empty_opaque() {
        let mut ctx = AuthContext::default();
        ctx.set_credentials("u", "p", AuthSchemes::DIGEST);
        ctx.selected = AuthScheme::Digest;
        ctx.nonce = "n".into();
        ctx.cnonce = "c".into();
        assert!(!ctx.authorization_field("/a").unwrap().contains("opaque"));
    }

    #[test]
    fn test_generate_cnonce() {
        let mut ctx = AuthContext::default();
        ctx.generate_cnonce(&SystemRandom).unwrap();
        assert_eq!(ctx.cnonce.len(), CNONCE_SIZE * 2);
        assert!(ctx.cnonce.chars().all(|c| c.is_ascii_hexdigit()));

        let first = ctx.cnonce.clone();
        ctx.generate_cnonce(&SystemRandom).unwrap();
        assert_ne!(ctx.cnonce, first);
    }

    #[test]
    fn test_begin_parse_clears_challenge_state() {
        let mut ctx = AuthContext::default();
        ctx.required = AuthScheme::Digest;
        ctx.nonce = "n".into();
        ctx.opaque = "o".into();
        ctx.stale = true;

        ctx.begin_parse();
        assert_eq!(ctx.required, AuthScheme::None);
        assert!(ctx.nonce.is_empty());
        assert!(ctx.opaque.is_empty());
        assert!(!ctx.stale);
    }
}
