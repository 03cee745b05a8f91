//! Opening handshake: HTTP upgrade formatting, parsing and verification
//! (RFC 6455 Section 4).
//!
//! Formatting produces complete request/response byte buffers for the
//! connection to transmit. Parsing is line-oriented: the connection delivers
//! one unfolded line at a time (request line, status line, or header field)
//! and the [`HandshakeContext`] dispatches recognized headers; unrecognized
//! headers are ignored.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::{BufMut, BytesMut};
use sha1::{Digest, Sha1};

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::auth::AuthContext;
use crate::rand::RandomSource;

/// The fixed GUID concatenated with the client key for the accept digest
/// (RFC 6455 Section 1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Reason phrases for the error responses the engine can emit.
const REASON_PHRASES: &[(u16, &str)] = &[
    (200, "OK"),
    (301, "Moved Permanently"),
    (302, "Found"),
    (400, "Bad Request"),
    (401, "Unauthorized"),
    (403, "Forbidden"),
    (404, "Not Found"),
    (426, "Upgrade Required"),
    (500, "Internal Server Error"),
    (501, "Not Implemented"),
    (503, "Service Unavailable"),
];

/// HTTP protocol versions the parser distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum HttpVersion {
    /// HTTP/0.9 (no version token on the request line).
    V0_9,
    /// HTTP/1.0.
    V1_0,
    /// HTTP/1.1.
    #[default]
    V1_1,
}

impl HttpVersion {
    /// Major and minor version numbers.
    #[must_use]
    pub const fn parts(self) -> (u8, u8) {
        match self {
            HttpVersion::V0_9 => (0, 9),
            HttpVersion::V1_0 => (1, 0),
            HttpVersion::V1_1 => (1, 1),
        }
    }
}

/// State accumulated while formatting and parsing the opening handshake.
#[derive(Debug, Clone, Default)]
pub struct HandshakeContext {
    /// HTTP version observed on the peer's leading line.
    pub version: HttpVersion,
    /// Numeric status code of a server response.
    pub status_code: u16,
    /// An `Upgrade: websocket` header was seen.
    pub upgrade_websocket: bool,
    /// A `Connection` header carrying the `Upgrade` token was seen.
    pub connection_upgrade: bool,
    /// The peer asked to close the connection after the response.
    pub connection_close: bool,
    /// Declared body length of a non-upgrade response.
    pub content_length: usize,
    /// Request target received from a client (percent-decoded).
    pub resource: String,
    /// Query string received from a client.
    pub query: String,
    /// The Sec-WebSocket-Key value (generated locally or received).
    pub client_key: String,
    /// The Sec-WebSocket-Accept value (computed locally or received).
    pub server_key: String,
    /// A Close frame has been sent on this connection.
    pub close_sent: bool,
    /// A Close frame has been received on this connection.
    pub close_received: bool,
}

impl HandshakeContext {
    /// Prepare for parsing an incoming handshake.
    ///
    /// Clears everything the peer is expected to supply; the locally
    /// generated key survives so a client can verify the accept value.
    pub fn begin_parse(&mut self, role: Role) {
        self.status_code = 0;
        self.upgrade_websocket = false;
        self.connection_upgrade = false;
        self.connection_close = false;
        self.content_length = 0;
        self.close_sent = false;
        self.close_received = false;
        match role {
            Role::Client => self.server_key.clear(),
            Role::Server => self.client_key.clear(),
        }
    }

    /// Parse the Request-Line of a client handshake (`GET /chat HTTP/1.1`).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a non-GET method, a malformed target or
    /// an unknown protocol version.
    pub fn parse_request_line(&mut self, line: &str) -> Result<()> {
        let mut tokens = line.split_ascii_whitespace();

        let method = tokens
            .next()
            .ok_or_else(|| Error::InvalidRequest("empty request line".into()))?;
        if !method.eq_ignore_ascii_case("GET") {
            return Err(Error::InvalidRequest(format!("method {method} not allowed")));
        }

        let target = tokens
            .next()
            .ok_or_else(|| Error::InvalidRequest("missing request target".into()))?;
        match target.split_once('?') {
            Some((path, query)) => {
                self.resource = decode_percent_encoded(path)?;
                self.query = query.to_string();
            }
            None => {
                self.resource = decode_percent_encoded(target)?;
                self.query.clear();
            }
        }

        match tokens.next() {
            // No version token at all is HTTP/0.9.
            None => {
                self.version = HttpVersion::V0_9;
                self.connection_close = true;
            }
            Some(v) if v.eq_ignore_ascii_case("HTTP/1.0") => {
                self.version = HttpVersion::V1_0;
                self.connection_close = true;
            }
            Some(v) if v.eq_ignore_ascii_case("HTTP/1.1") => {
                self.version = HttpVersion::V1_1;
                self.connection_close = false;
            }
            Some(v) => {
                return Err(Error::InvalidRequest(format!("unsupported version {v}")));
            }
        }

        Ok(())
    }

    /// Parse the Status-Line of a server handshake (`HTTP/1.1 101 ...`).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSyntax`] when the line has no parseable status code.
    pub fn parse_status_line(&mut self, line: &str) -> Result<()> {
        let mut tokens = line.split_ascii_whitespace();

        tokens
            .next()
            .ok_or_else(|| Error::InvalidSyntax("empty status line".into()))?;

        let status = tokens
            .next()
            .ok_or_else(|| Error::InvalidSyntax("missing status code".into()))?;
        self.status_code = status
            .parse()
            .map_err(|_| Error::InvalidSyntax(format!("bad status code {status:?}")))?;

        Ok(())
    }

    /// Dispatch one unfolded header field line.
    ///
    /// Lines without a colon and unrecognized header names are ignored.
    pub fn parse_header_field(&mut self, line: &str, role: Role, auth: &mut AuthContext) {
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("Upgrade") {
            if value.eq_ignore_ascii_case("websocket") {
                self.upgrade_websocket = true;
            }
        } else if name.eq_ignore_ascii_case("Connection") {
            self.parse_connection_field(value);
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
            if role == Role::Server {
                self.client_key = value.to_string();
            }
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Accept") {
            if role == Role::Client {
                self.server_key = value.to_string();
            }
        } else if name.eq_ignore_ascii_case("WWW-Authenticate") {
            auth.parse_authenticate_field(value);
        } else if name.eq_ignore_ascii_case("Content-Length") {
            self.content_length = value.parse().unwrap_or(0);
        }
    }

    /// Tokens of a `Connection` header value, comma-separated.
    fn parse_connection_field(&mut self, value: &str) {
        for token in value.split(',') {
            let token = token.trim();
            if token.eq_ignore_ascii_case("upgrade") {
                self.connection_upgrade = true;
            } else if token.eq_ignore_ascii_case("close") {
                self.connection_close = true;
            } else if token.eq_ignore_ascii_case("keep-alive") {
                self.connection_close = false;
            }
        }
    }

    /// Validate a fully parsed client request (server side).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a missing upgrade, connection-upgrade
    /// or key header, or an HTTP version below 1.1; [`Error::InvalidKey`]
    /// when the key does not decode to 16 bytes.
    pub fn verify_client_request(&self) -> Result<()> {
        if self.version < HttpVersion::V1_1 {
            return Err(Error::InvalidRequest("HTTP version below 1.1".into()));
        }
        if !self.upgrade_websocket {
            return Err(Error::InvalidRequest("missing Upgrade: websocket".into()));
        }
        if !self.connection_upgrade {
            return Err(Error::InvalidRequest("missing Connection: Upgrade".into()));
        }
        if self.client_key.is_empty() {
            return Err(Error::InvalidRequest("missing Sec-WebSocket-Key".into()));
        }
        verify_client_key(&self.client_key)
    }

    /// Validate a fully parsed server response (client side).
    ///
    /// # Errors
    ///
    /// [`Error::AuthRequired`] on 401 (drives the authentication retry
    /// path), [`Error::InvalidStatus`] on any other non-101 status,
    /// [`Error::InvalidSyntax`] for missing upgrade/connection/accept
    /// headers, [`Error::InvalidKey`] when the accept value differs from
    /// the locally recomputed one.
    pub fn verify_server_response(&self) -> Result<()> {
        if self.status_code == 401 {
            return Err(Error::AuthRequired);
        }
        if self.status_code != 101 {
            return Err(Error::InvalidStatus(self.status_code));
        }
        if !self.upgrade_websocket {
            return Err(Error::InvalidSyntax("missing Upgrade: websocket".into()));
        }
        if !self.connection_upgrade {
            return Err(Error::InvalidSyntax("missing Connection: Upgrade".into()));
        }
        if self.server_key.is_empty() {
            return Err(Error::InvalidSyntax("missing Sec-WebSocket-Accept".into()));
        }
        if self.server_key != accept_key(&self.client_key) {
            return Err(Error::InvalidKey);
        }
        Ok(())
    }
}

/// Compute the Sec-WebSocket-Accept value for a client key:
/// `base64(SHA-1(key ++ GUID))`.
///
/// ```
/// use emws::protocol::handshake::accept_key;
///
/// assert_eq!(
///     accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a fresh Sec-WebSocket-Key: 16 random bytes, base64-encoded.
///
/// # Errors
///
/// Propagates a [`RandomSource`] failure; the key must be unpredictable.
pub fn generate_client_key(rand: &dyn RandomSource) -> Result<String> {
    let mut nonce = [0u8; 16];
    rand.fill(&mut nonce)?;
    Ok(BASE64.encode(nonce))
}

/// Check that a received client key is base64 for exactly 16 bytes.
///
/// # Errors
///
/// [`Error::InvalidKey`] otherwise.
pub fn verify_client_key(client_key: &str) -> Result<()> {
    match BASE64.decode(client_key) {
        Ok(decoded) if decoded.len() == 16 => Ok(()),
        _ => Err(Error::InvalidKey),
    }
}

/// Format the client's upgrade request.
///
/// Field order follows the engine's canonical layout: request line, `Host`,
/// optional `Authorization`, `Origin` (the literal `null` when unset),
/// `Upgrade`, `Connection`, optional `Sec-WebSocket-Protocol`,
/// `Sec-WebSocket-Key`, `Sec-WebSocket-Version`, blank line.
#[must_use]
pub fn format_request(
    resource: &str,
    host: &str,
    port: u16,
    origin: &str,
    sub_protocol: &str,
    authorization: Option<&str>,
    client_key: &str,
) -> BytesMut {
    let mut out = BytesMut::new();
    put_line(&mut out, format_args!("GET {resource} HTTP/1.1"));

    if host.is_empty() {
        // A request without a configured hostname still carries the Host
        // header, with an empty value.
        put_line(&mut out, format_args!("Host:"));
    } else {
        put_line(&mut out, format_args!("Host: {host}:{port}"));
    }

    if let Some(credentials) = authorization {
        put_line(&mut out, format_args!("Authorization: {credentials}"));
    }

    if origin.is_empty() {
        put_line(&mut out, format_args!("Origin: null"));
    } else {
        put_line(&mut out, format_args!("Origin: {origin}"));
    }

    put_line(&mut out, format_args!("Upgrade: websocket"));
    put_line(&mut out, format_args!("Connection: Upgrade"));

    if !sub_protocol.is_empty() {
        put_line(&mut out, format_args!("Sec-WebSocket-Protocol: {sub_protocol}"));
    }

    put_line(&mut out, format_args!("Sec-WebSocket-Key: {client_key}"));
    put_line(&mut out, format_args!("Sec-WebSocket-Version: 13"));
    out.put_slice(b"\r\n");
    out
}

/// Format the server's `101 Switching Protocols` response.
#[must_use]
pub fn format_response(sub_protocol: &str, server_key: &str) -> BytesMut {
    let mut out = BytesMut::new();
    put_line(&mut out, format_args!("HTTP/1.1 101 Switching Protocols"));
    put_line(&mut out, format_args!("Upgrade: websocket"));
    put_line(&mut out, format_args!("Connection: Upgrade"));
    if !sub_protocol.is_empty() {
        put_line(&mut out, format_args!("Sec-WebSocket-Protocol: {sub_protocol}"));
    }
    put_line(&mut out, format_args!("Sec-WebSocket-Accept: {server_key}"));
    out.put_slice(b"\r\n");
    out
}

/// Format a plain HTTP error response with a small HTML body.
#[must_use]
pub fn format_error_response(version: HttpVersion, status: u16, message: &str) -> BytesMut {
    let (major, minor) = version.parts();
    let reason = REASON_PHRASES
        .iter()
        .find(|(code, _)| *code == status)
        .map_or("", |(_, phrase)| *phrase);

    let body = format!(
        "<!doctype html>\r\n<html>\r\n<head><title>Error {status:03}</title></head>\r\n\
         <body>\r\n<h2>Error {status:03}</h2>\r\n<p>{message}</p>\r\n</body>\r\n</html>\r\n"
    );

    let mut out = BytesMut::new();
    put_line(&mut out, format_args!("HTTP/{major}.{minor} {status} {reason}"));
    put_line(&mut out, format_args!("Content-Type: text/html"));
    put_line(&mut out, format_args!("Content-Length: {}", body.len()));
    out.put_slice(b"\r\n");
    out.put_slice(body.as_bytes());
    out
}

fn put_line(out: &mut BytesMut, line: std::fmt::Arguments<'_>) {
    use std::fmt::Write as _;
    let mut s = String::new();
    let _ = s.write_fmt(line);
    out.put_slice(s.as_bytes());
    out.put_slice(b"\r\n");
}

/// Decode a percent-encoded request target. `+` decodes to space.
///
/// # Errors
///
/// [`Error::InvalidRequest`] on a truncated or non-hex escape.
pub fn decode_percent_encoded(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .ok_or_else(|| Error::InvalidRequest("truncated escape".into()))?;
                let hex = std::str::from_utf8(hex)
                    .map_err(|_| Error::InvalidRequest("bad escape".into()))?;
                let value = u8::from_str_radix(hex, 16)
                    .map_err(|_| Error::InvalidRequest(format!("bad escape %{hex}")))?;
                out.push(value);
                i += 3;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| Error::InvalidRequest("target is not UTF-8".into()))
}
