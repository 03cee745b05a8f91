//! The connection state machine.
//!
//! A [`Connection`] drives one WebSocket endpoint over a caller-supplied
//! [`Transport`]. Every operation is a loop over explicit states and
//! sub-states with stored cursors: when the transport reports a transient
//! condition the operation returns it (or the partial byte count) and the
//! next call resumes exactly where the last one stopped. Nothing is ever
//! re-ordered or interleaved within one direction.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::Config;
use crate::connection::context::{FrameContext, Phase};
use crate::connection::{ConnectionState, Role};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Received};
use crate::pool::PoolSlot;
use crate::protocol::auth::{AuthContext, AuthScheme, AuthSchemes};
use crate::protocol::frame::{FrameHeader, MAX_CONTROL_PAYLOAD, parse_close_payload};
use crate::protocol::handshake::{self, HandshakeContext, HttpVersion};
use crate::protocol::mask::apply_mask;
use crate::protocol::utf8::Utf8Validator;
use crate::protocol::OpCode;
use crate::rand::RandomSource;
use crate::transport::Transport;

/// Outcome of decoding one frame header on the receive path.
enum ParsedHeader {
    /// A data or Ping/Pong frame; its payload follows.
    Frame,
    /// The frame's type does not match the data already aggregated in this
    /// call; it stays buffered for the next call.
    TypeSwitch,
    /// A Close frame with a valid status code.
    Close(CloseCode),
}

/// A WebSocket connection over a byte-stream transport.
///
/// ## Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use emws::{Config, Connection, OpCode, Role, SystemRandom, TcpTransport};
///
/// let mut conn = Connection::new(
///     TcpTransport::new(),
///     Role::Client,
///     Arc::new(SystemRandom),
///     Config::default(),
/// );
/// conn.set_host("server.example.com");
/// conn.connect("192.0.2.1".parse()?, 80, "/mqtt")?;
/// conn.send(b"hello", OpCode::Text)?;
/// conn.shutdown()?;
/// ```
pub struct Connection<T> {
    transport: T,
    role: Role,
    state: ConnectionState,
    /// Pending close status, transmitted by the closing handshake.
    status_code: CloseCode,
    retry_count: u32,
    host: String,
    origin: String,
    sub_protocol: String,
    resource: String,
    config: Config,
    rand: Arc<dyn RandomSource>,
    slot: Option<PoolSlot>,
    auth: AuthContext,
    handshake: HandshakeContext,
    tx: FrameContext,
    rx: FrameContext,
    utf8: Utf8Validator,
}

impl<T: Transport> Connection<T> {
    /// Create a connection over `transport`.
    ///
    /// A client starts in `Closed` and is driven by [`connect`]; a server
    /// starts in `Init` with an already-accepted transport and is driven by
    /// [`parse_client_handshake`] or [`accept_upgrade`].
    ///
    /// [`connect`]: Connection::connect
    /// [`parse_client_handshake`]: Connection::parse_client_handshake
    /// [`accept_upgrade`]: Connection::accept_upgrade
    pub fn new(transport: T, role: Role, rand: Arc<dyn RandomSource>, config: Config) -> Self {
        let buffer_size = config.buffer_size;
        Self {
            transport,
            role,
            state: match role {
                Role::Client => ConnectionState::Closed,
                Role::Server => ConnectionState::Init,
            },
            status_code: CloseCode::NoStatusReceived,
            retry_count: 0,
            host: String::new(),
            origin: String::new(),
            sub_protocol: String::new(),
            resource: String::new(),
            config,
            rand,
            slot: None,
            auth: AuthContext::default(),
            handshake: HandshakeContext::default(),
            tx: FrameContext::new(buffer_size),
            rx: FrameContext::new(buffer_size),
            utf8: Utf8Validator::new(),
        }
    }

    /// Like [`Connection::new`], additionally tying a pool slot's lifetime
    /// to this connection. The slot is returned when [`close`] runs or the
    /// connection is dropped.
    ///
    /// [`close`]: Connection::close
    pub fn with_slot(
        slot: PoolSlot,
        transport: T,
        role: Role,
        rand: Arc<dyn RandomSource>,
        config: Config,
    ) -> Self {
        let mut conn = Self::new(transport, role, rand, config);
        conn.slot = Some(slot);
        conn
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Endpoint role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether data frames may be exchanged.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// The pending close status code: the code received from the peer, or
    /// the code this endpoint will transmit in its Close frame.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        self.status_code
    }

    /// The request target: configured by [`connect`] on a client, received
    /// from the peer's request line on a server.
    ///
    /// [`connect`]: Connection::connect
    #[must_use]
    pub fn resource(&self) -> &str {
        match self.role {
            Role::Client => &self.resource,
            Role::Server => &self.handshake.resource,
        }
    }

    /// The query string received with the client's request (server role).
    #[must_use]
    pub fn query(&self) -> &str {
        &self.handshake.query
    }

    /// Set the hostname sent in the `Host` header.
    pub fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    /// Set the `Origin` header value. Unset, the literal `null` is sent.
    pub fn set_origin(&mut self, origin: &str) {
        self.origin = origin.to_string();
    }

    /// Set the sub-protocol advertised (client) or echoed (server) in
    /// `Sec-WebSocket-Protocol`.
    pub fn set_sub_protocol(&mut self, sub_protocol: &str) {
        self.sub_protocol = sub_protocol.to_string();
    }

    /// Supply credentials and the set of authentication schemes the client
    /// may answer a 401 with.
    pub fn set_auth_info(&mut self, username: &str, password: &str, allowed: AuthSchemes) {
        self.auth.set_credentials(username, password, allowed);
    }

    /// Set the timeout for blocking operations, forwarding it to the
    /// transport.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.config.timeout = timeout;
        self.transport.set_timeout(timeout)
    }

    /// Establish a WebSocket connection to `addr:port` requesting
    /// `resource` (client role).
    ///
    /// Drives `Init → Connecting → ClientHandshake → ServerHandshake →
    /// Open`, retrying the whole sequence up to `Config::max_retries` times
    /// on connection failure. A 401 response selects the best allowed
    /// authentication scheme and retries once with credentials.
    ///
    /// # Errors
    ///
    /// Transient errors ([`Error::is_transient`]) leave the state machine
    /// in place; call again to continue. Every other error tears the
    /// connection down to `Closed` before returning:
    /// [`Error::OpenFailed`] when the retry budget is exhausted,
    /// [`Error::AuthRequired`] on an unresolvable 401, handshake validation
    /// errors, or transport failures.
    pub fn connect(&mut self, addr: IpAddr, port: u16, resource: &str) -> Result<()> {
        if self.role != Role::Client {
            return Err(Error::WrongState);
        }

        while self.state != ConnectionState::Open {
            let step = self.connect_step(addr, port, resource);

            let step = match step {
                Err(Error::AuthRequired) => self.select_auth_scheme(),
                other => other,
            };

            if let Err(err) = step {
                if err.is_transient() {
                    return Err(err);
                }
                let _ = self.transport.shutdown();
                self.change_state(ConnectionState::Closed);
                return Err(err);
            }
        }

        Ok(())
    }

    fn connect_step(&mut self, addr: IpAddr, port: u16, resource: &str) -> Result<()> {
        match self.state {
            ConnectionState::Closed => {
                self.resource = resource.to_string();
                self.retry_count = 0;
                self.auth.required = AuthScheme::None;
                self.auth.selected = AuthScheme::None;
                self.change_state(ConnectionState::Init);
                Ok(())
            }
            ConnectionState::Init => {
                self.retry_count += 1;
                if self.retry_count > self.config.max_retries {
                    return Err(Error::OpenFailed);
                }
                self.transport.set_timeout(self.config.timeout)?;
                self.change_state(ConnectionState::Connecting);
                Ok(())
            }
            ConnectionState::Connecting => {
                self.transport.connect(addr, port)?;
                self.handshake.client_key = handshake::generate_client_key(self.rand.as_ref())?;
                self.format_client_handshake(port);
                self.change_state(ConnectionState::ClientHandshake);
                Ok(())
            }
            ConnectionState::ClientHandshake => {
                self.send_pending()?;
                self.change_state(ConnectionState::ServerHandshake);
                Ok(())
            }
            ConnectionState::ServerHandshake => self.parse_handshake(),
            ConnectionState::ServerRespBody => {
                if self.handshake.connection_close {
                    // The server is closing this connection; reconnect
                    // before the authenticated attempt.
                    let _ = self.transport.shutdown();
                    self.change_state(ConnectionState::Init);
                    Ok(())
                } else if self.handshake.content_length > 0 {
                    let want = self.handshake.content_length.min(self.config.buffer_size);
                    self.rx.ensure(want);
                    let n = self.transport.receive(&mut self.rx.buffer[..want])?;
                    if n == 0 {
                        return Err(Error::EndOfStream);
                    }
                    self.handshake.content_length -= n;
                    Ok(())
                } else {
                    self.format_client_handshake(port);
                    self.change_state(ConnectionState::ClientHandshake);
                    Ok(())
                }
            }
            _ => Err(Error::WrongState),
        }
    }

    /// React to a 401: commit to the best allowed scheme and retry once.
    fn select_auth_scheme(&mut self) -> Result<()> {
        // One authenticated attempt only; a second 401 is final.
        if self.auth.selected != AuthScheme::None {
            return Err(Error::AuthRequired);
        }

        let scheme = match self.auth.required {
            // Digest wins whenever the server offered it and it is allowed.
            AuthScheme::Digest if self.auth.allowed.allows(AuthScheme::Digest) => {
                AuthScheme::Digest
            }
            AuthScheme::Basic | AuthScheme::None
                if self.auth.allowed.allows(AuthScheme::Basic) =>
            {
                AuthScheme::Basic
            }
            _ => return Err(Error::AuthRequired),
        };

        if scheme == AuthScheme::Digest {
            self.auth.generate_cnonce(self.rand.as_ref())?;
        }

        debug!(scheme = ?scheme, "retrying handshake with credentials");
        self.auth.selected = scheme;
        self.change_state(ConnectionState::ServerRespBody);
        Ok(())
    }

    fn format_client_handshake(&mut self, port: u16) {
        let authorization = self.auth.authorization_field(&self.resource);
        let request = handshake::format_request(
            &self.resource,
            &self.host,
            port,
            &self.origin,
            &self.sub_protocol,
            authorization.as_deref(),
            &self.handshake.client_key,
        );
        trace!(len = request.len(), "formatted client handshake");
        self.tx.stage(&request);
    }

    /// Take over an upgrade whose HTTP part was handled elsewhere: validate
    /// the received `Sec-WebSocket-Key`, derive the accept key and prepare
    /// the `101` response (server role). The caller transmits it with
    /// [`send_server_handshake`](Connection::send_server_handshake).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKey`] when the key is not base64 for 16 bytes;
    /// [`Error::WrongState`] on a client-role connection.
    pub fn accept_upgrade(&mut self, client_key: &str) -> Result<()> {
        if self.role != Role::Server {
            return Err(Error::WrongState);
        }

        handshake::verify_client_key(client_key)?;
        self.transport.set_timeout(self.config.timeout)?;

        self.status_code = CloseCode::NoStatusReceived;
        self.handshake.client_key = client_key.to_string();
        self.handshake.version = HttpVersion::V1_1;
        self.handshake.upgrade_websocket = true;
        self.handshake.connection_upgrade = true;
        self.rx.fin = true;

        self.handshake.server_key = handshake::accept_key(client_key);
        let response = handshake::format_response(&self.sub_protocol, &self.handshake.server_key);
        self.tx.stage(&response);
        self.change_state(ConnectionState::ServerHandshake);
        Ok(())
    }

    /// Read and validate the client's upgrade request off the transport,
    /// then prepare the `101` response (server role).
    ///
    /// # Errors
    ///
    /// Transient errors are resumable; [`Error::InvalidRequest`] /
    /// [`Error::InvalidKey`] abort the handshake.
    pub fn parse_client_handshake(&mut self) -> Result<()> {
        if self.role != Role::Server {
            return Err(Error::WrongState);
        }

        while self.state != ConnectionState::ServerHandshake {
            match self.state {
                ConnectionState::Init => {
                    self.transport.set_timeout(self.config.timeout)?;
                    self.change_state(ConnectionState::Connecting);
                }
                ConnectionState::Connecting => {
                    // Any TLS negotiation belongs to the transport.
                    self.change_state(ConnectionState::ClientHandshake);
                }
                ConnectionState::ClientHandshake => {
                    self.parse_handshake()?;
                    self.handshake.server_key = handshake::accept_key(&self.handshake.client_key);
                    let response =
                        handshake::format_response(&self.sub_protocol, &self.handshake.server_key);
                    self.tx.stage(&response);
                }
                _ => return Err(Error::WrongState),
            }
        }

        Ok(())
    }

    /// Transmit the prepared server handshake; `ServerHandshake → Open`.
    ///
    /// # Errors
    ///
    /// Transient errors are resumable; [`Error::WrongState`] when no
    /// response has been prepared.
    pub fn send_server_handshake(&mut self) -> Result<()> {
        if self.role != Role::Server {
            return Err(Error::WrongState);
        }

        while self.state != ConnectionState::Open {
            match self.state {
                ConnectionState::ServerHandshake => {
                    self.send_pending()?;
                    self.change_state(ConnectionState::Open);
                }
                _ => return Err(Error::WrongState),
            }
        }

        Ok(())
    }

    /// Send a plain HTTP error response and give the connection up
    /// (server role, before the upgrade completed).
    ///
    /// # Errors
    ///
    /// Transient errors are resumable; the connection enters `Shutdown`
    /// once the response is out.
    pub fn send_error_response(&mut self, status: u16, message: &str) -> Result<()> {
        loop {
            match self.tx.phase {
                Phase::Idle => {
                    let response =
                        handshake::format_error_response(self.handshake.version, status, message);
                    self.tx.stage(&response);
                    self.tx.phase = Phase::FramePayload;
                }
                Phase::FramePayload => {
                    self.send_pending()?;
                    self.change_state(ConnectionState::Shutdown);
                    return Ok(());
                }
                _ => return Err(Error::WrongState),
            }
        }
    }

    /// Transmit `data` as one unfragmented frame of the given type.
    ///
    /// Equivalent to `send_fragment(data, kind, true, true)`.
    ///
    /// # Errors
    ///
    /// See [`send_fragment`](Connection::send_fragment).
    pub fn send(&mut self, data: &[u8], kind: OpCode) -> Result<usize> {
        self.send_fragment(data, kind, true, true)
    }

    /// Transmit one fragment of a message.
    ///
    /// A fragmented message is sent as `first_frag` with the real opcode
    /// and `last_frag == false`, any middle fragments with both flags
    /// `false`, and a final fragment with `last_frag == true`; every
    /// fragment after the first goes out with the `Continuation` opcode
    /// regardless of `kind`.
    ///
    /// Returns the number of caller bytes consumed. A short count means
    /// the frame is still in flight: call again with the remaining bytes
    /// (and the same flags) to continue it.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] outside `Open`. [`Error::WouldBlock`] /
    /// [`Error::TimedOut`] are returned only when no byte was consumed;
    /// with partial progress the short count is returned instead. Any
    /// other error is fatal for the connection.
    pub fn send_fragment(
        &mut self,
        data: &[u8],
        kind: OpCode,
        first_frag: bool,
        last_frag: bool,
    ) -> Result<usize> {
        if self.state != ConnectionState::Open {
            return Err(Error::NotConnected);
        }

        let mut written = 0usize;

        loop {
            match self.tx.phase {
                Phase::Idle => {
                    let opcode = if first_frag { kind } else { OpCode::Continuation };
                    self.format_frame_header(last_frag, opcode, data.len() - written)?;
                    self.tx.phase = Phase::FrameHeader;
                }
                Phase::FrameHeader => {
                    if self.tx.buffer_pos < self.tx.buffer_len {
                        match self.send_step() {
                            Ok(()) => {}
                            Err(e) if e.is_transient() && written > 0 => return Ok(written),
                            Err(e) => return Err(e),
                        }
                    } else {
                        self.tx.payload_pos = 0;
                        self.tx.buffer_pos = 0;
                        self.tx.buffer_len = 0;
                        self.tx.phase = Phase::FramePayload;
                    }
                }
                Phase::FramePayload => {
                    if self.tx.buffer_pos < self.tx.buffer_len {
                        let before = self.tx.buffer_pos;
                        match self.send_step() {
                            Ok(()) => {
                                let n = self.tx.buffer_pos - before;
                                self.tx.payload_pos += n;
                                written += n;
                            }
                            Err(e) if e.is_transient() && written > 0 => return Ok(written),
                            Err(e) => return Err(e),
                        }
                    } else if self.tx.payload_pos < self.tx.payload_len {
                        // Stage the next chunk, masking it in place at its
                        // cumulative payload position.
                        let n = (data.len() - written)
                            .min(self.tx.payload_len - self.tx.payload_pos)
                            .min(self.config.buffer_size);
                        if n == 0 {
                            // The frame needs more bytes than this call
                            // supplied; resume with the rest later.
                            return Ok(written);
                        }
                        self.stage_tx_chunk(&data[written..written + n]);
                        if let Some(key) = self.tx.masking_key {
                            apply_mask(&mut self.tx.buffer[..n], key, self.tx.payload_pos);
                        }
                    } else {
                        self.tx.phase = Phase::Idle;
                        if written >= data.len() {
                            return Ok(written);
                        }
                    }
                }
                _ => return Err(Error::WrongState),
            }
        }
    }

    /// Copy a payload chunk to the front of the tx staging buffer.
    fn stage_tx_chunk(&mut self, chunk: &[u8]) {
        self.tx.ensure(chunk.len());
        self.tx.buffer[..chunk.len()].copy_from_slice(chunk);
        self.tx.buffer_pos = 0;
        self.tx.buffer_len = chunk.len();
    }

    /// One transport write against the staged tx bytes.
    fn send_step(&mut self) -> Result<()> {
        let n = self
            .transport
            .send(&self.tx.buffer[self.tx.buffer_pos..self.tx.buffer_len])?;
        if n == 0 {
            return Err(Error::Io("transport accepted no bytes".into()));
        }
        self.tx.buffer_pos += n;
        Ok(())
    }

    /// Drain every staged tx byte, blocking up to the transport timeout.
    fn send_pending(&mut self) -> Result<()> {
        while self.tx.buffer_pos < self.tx.buffer_len {
            self.send_step()?;
        }
        Ok(())
    }

    fn format_frame_header(&mut self, fin: bool, kind: OpCode, payload_len: usize) -> Result<()> {
        let masking_key = if self.role.masks_output() {
            let mut key = [0u8; 4];
            self.rand.fill(&mut key)?;
            Some(key)
        } else {
            None
        };

        let header = FrameHeader {
            fin,
            reserved: 0,
            opcode: kind,
            masking_key,
            payload_len,
        };
        debug!(%kind, fin, payload_len, masked = masking_key.is_some(), "sending frame");

        let mut encoded = bytes::BytesMut::with_capacity(header.wire_len());
        header.encode(&mut encoded);

        self.tx.stage(&encoded);
        self.tx.masking_key = masking_key;
        self.tx.payload_len = payload_len;
        self.tx.payload_pos = 0;
        Ok(())
    }

    /// Receive payload data into `buf`.
    ///
    /// Decodes frames until the buffer is full or a message boundary is
    /// reached. [`Received::Data`] carries the effective frame type
    /// (aggregated across fragments) with first/last-fragment flags;
    /// `first_frag` reports that a frame header was decoded during this
    /// call, i.e. the returned bytes start at a frame boundary. A Close
    /// frame is never delivered as data: it is reported as
    /// [`Received::Closed`] (after any data already copied in the same call
    /// has been returned first).
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] outside `Open`/`ClosingRx`. Transient errors
    /// are returned only when nothing was copied; with partial progress the
    /// data is returned instead. Protocol violations set the pending close
    /// status and surface as [`Error::InvalidFrame`] /
    /// [`Error::InvalidUtf8`] / [`Error::InvalidOpcode`].
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<Received> {
        if !self.state.can_receive() {
            return Err(Error::NotConnected);
        }

        let mut read = 0usize;
        let mut agg_kind = OpCode::Continuation;
        let mut first_frag = false;
        let mut last_frag = false;

        while read < buf.len() {
            match self.rx.phase {
                Phase::Idle => {
                    self.rx.buffer_pos = 0;
                    self.rx.buffer_len = 2;
                    self.rx.phase = Phase::FrameHeader;
                }
                Phase::FrameHeader => {
                    if self.rx.buffer_pos < self.rx.buffer_len {
                        match self.receive_step() {
                            Ok(()) => {}
                            Err(e) if e.is_transient() && read > 0 => {
                                return Ok(self.finish_data(read, first_frag, false));
                            }
                            Err(e) => return Err(e),
                        }
                    } else {
                        let second = self.rx.buffer[1];
                        let mut target = 2 + FrameHeader::remaining_len(second);

                        // A Close frame's payload rides along with the
                        // header read so the whole frame is in the buffer.
                        if self.rx.buffer[0] & 0x0F == OpCode::Close.as_u8() {
                            let inline_len = (second & 0x7F) as usize;
                            if inline_len > MAX_CONTROL_PAYLOAD {
                                self.status_code = CloseCode::ProtocolError;
                                return Err(Error::InvalidFrame(
                                    "oversized close payload".into(),
                                ));
                            }
                            target += inline_len;
                        }

                        self.rx.buffer_len = target;
                        self.rx.phase = Phase::FrameExtHeader;
                    }
                }
                Phase::FrameExtHeader => {
                    if self.rx.buffer_pos < self.rx.buffer_len {
                        match self.receive_step() {
                            Ok(()) => {}
                            Err(e) if e.is_transient() && read > 0 => {
                                return Ok(self.finish_data(read, first_frag, false));
                            }
                            Err(e) => return Err(e),
                        }
                    } else {
                        match self.parse_rx_frame_header(&mut agg_kind)? {
                            ParsedHeader::TypeSwitch => break,
                            ParsedHeader::Close(code) => {
                                if read > 0 {
                                    // Deliver the data first; the buffered
                                    // Close frame is re-parsed (and
                                    // reported) by the next call.
                                    break;
                                }
                                return Ok(Received::Closed { code });
                            }
                            ParsedHeader::Frame => {
                                first_frag = true;
                                self.rx.payload_pos = 0;
                                self.rx.buffer_pos = 0;
                                self.rx.buffer_len = 0;
                                self.rx.phase = Phase::FramePayload;
                            }
                        }
                    }
                }
                Phase::FramePayload => {
                    if self.rx.payload_pos < self.rx.payload_len {
                        let want = (buf.len() - read)
                            .min(self.rx.payload_len - self.rx.payload_pos)
                            .min(self.config.buffer_size);
                        self.rx.ensure(want);

                        let n = match self.transport.receive(&mut self.rx.buffer[..want]) {
                            Ok(0) => return Err(Error::EndOfStream),
                            Ok(n) => n,
                            Err(e) if e.is_transient() && read > 0 => {
                                return Ok(self.finish_data(read, first_frag, false));
                            }
                            Err(e) => return Err(e),
                        };

                        if let Some(key) = self.rx.masking_key {
                            apply_mask(&mut self.rx.buffer[..n], key, self.rx.payload_pos);
                        }

                        if self.rx.data_kind == OpCode::Text
                            && self.rx.control_kind == OpCode::Continuation
                        {
                            // Bytes left in the logical message, or zero
                            // while fragments are still outstanding.
                            let remaining = if self.rx.fin {
                                self.rx.payload_len - self.rx.payload_pos
                            } else {
                                0
                            };
                            if self.utf8.advance(&self.rx.buffer[..n], remaining).is_err() {
                                self.status_code = CloseCode::InvalidPayloadData;
                                return Err(Error::InvalidUtf8);
                            }
                        }

                        buf[read..read + n].copy_from_slice(&self.rx.buffer[..n]);
                        self.rx.payload_pos += n;
                        read += n;
                    }

                    if self.rx.payload_pos == self.rx.payload_len {
                        self.rx.phase = Phase::Idle;
                        if self.rx.fin || self.rx.control_kind != OpCode::Continuation {
                            last_frag = true;
                            break;
                        }
                    }
                }
                _ => return Err(Error::WrongState),
            }
        }

        Ok(self.finish_data(read, first_frag, last_frag))
    }

    fn finish_data(&self, len: usize, first_frag: bool, last_frag: bool) -> Received {
        let kind = if self.rx.control_kind != OpCode::Continuation {
            self.rx.control_kind
        } else {
            self.rx.data_kind
        };
        Received::Data {
            len,
            kind,
            first_frag,
            last_frag,
        }
    }

    /// One transport read towards the rx buffer's current fill target.
    fn receive_step(&mut self) -> Result<()> {
        let target = self.rx.buffer_len;
        self.rx.ensure(target);
        let n = self
            .transport
            .receive(&mut self.rx.buffer[self.rx.buffer_pos..target])?;
        if n == 0 {
            return Err(Error::EndOfStream);
        }
        self.rx.buffer_pos += n;
        Ok(())
    }

    /// Decode and validate the buffered frame header.
    fn parse_rx_frame_header(&mut self, agg_kind: &mut OpCode) -> Result<ParsedHeader> {
        let (header, consumed) = match FrameHeader::parse(&self.rx.buffer[..self.rx.buffer_len]) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.status_code = CloseCode::ProtocolError;
                return Err(e);
            }
        };

        // A frame of a different type than the data already aggregated in
        // this call stays buffered; the next call re-parses it afresh.
        if *agg_kind != OpCode::Continuation
            && header.opcode != OpCode::Continuation
            && header.opcode != *agg_kind
        {
            return Ok(ParsedHeader::TypeSwitch);
        }

        debug!(
            kind = %header.opcode,
            fin = header.fin,
            payload_len = header.payload_len,
            masked = header.masking_key.is_some(),
            "frame received"
        );

        self.rx.payload_len = header.payload_len;
        self.rx.masking_key = header.masking_key;

        if header.opcode == OpCode::Text || header.opcode == OpCode::Close {
            self.utf8.reset();
        }

        if header.reserved != 0 {
            self.status_code = CloseCode::ProtocolError;
            return Err(Error::InvalidFrame("reserved bits set".into()));
        }

        match header.opcode {
            OpCode::Continuation => {
                if self.rx.fin {
                    self.status_code = CloseCode::ProtocolError;
                    return Err(Error::InvalidFrame(
                        "continuation frame without an open message".into(),
                    ));
                }
                self.rx.control_kind = OpCode::Continuation;
            }
            OpCode::Text | OpCode::Binary => {
                if !self.rx.fin {
                    self.status_code = CloseCode::ProtocolError;
                    return Err(Error::InvalidFrame(
                        "data frame while a fragmented message is open".into(),
                    ));
                }
                self.rx.data_kind = header.opcode;
                self.rx.control_kind = OpCode::Continuation;
            }
            OpCode::Close => {
                // The whole close payload is already buffered.
                let end = consumed + self.rx.payload_len;
                if let Some(key) = header.masking_key {
                    apply_mask(&mut self.rx.buffer[consumed..end], key, 0);
                    self.rx.masking_key = None;
                }

                let outcome = parse_close_payload(&self.rx.buffer[consumed..end]);
                self.handshake.close_received = true;

                return match outcome {
                    Ok(code) => {
                        debug!(code = code.as_u16(), "close frame received");
                        self.status_code = code;
                        Ok(ParsedHeader::Close(code))
                    }
                    Err(Error::InvalidUtf8) => {
                        self.status_code = CloseCode::InvalidPayloadData;
                        Err(Error::InvalidUtf8)
                    }
                    Err(e) => {
                        self.status_code = CloseCode::ProtocolError;
                        Err(e)
                    }
                };
            }
            OpCode::Ping | OpCode::Pong => {
                self.rx.control_kind = header.opcode;
                if !header.fin {
                    self.status_code = CloseCode::ProtocolError;
                    return Err(Error::InvalidFrame("fragmented control frame".into()));
                }
                if header.payload_len > MAX_CONTROL_PAYLOAD {
                    self.status_code = CloseCode::ProtocolError;
                    return Err(Error::InvalidFrame("oversized control payload".into()));
                }
            }
        }

        if self.rx.control_kind != OpCode::Continuation {
            *agg_kind = self.rx.control_kind;
        } else {
            self.rx.fin = header.fin;
            *agg_kind = self.rx.data_kind;
        }

        Ok(ParsedHeader::Frame)
    }

    /// Parse an incoming handshake: the server response (client role) or
    /// the client request (server role).
    fn parse_handshake(&mut self) -> Result<()> {
        loop {
            match self.role {
                Role::Client if self.state == ConnectionState::Open => return Ok(()),
                Role::Server if self.state == ConnectionState::ServerHandshake => return Ok(()),
                _ => {}
            }

            match self.rx.phase {
                Phase::Idle => {
                    self.status_code = CloseCode::NoStatusReceived;
                    self.rx.fin = true;
                    self.rx.buffer_pos = 0;
                    self.rx.buffer_len = 0;
                    self.handshake.begin_parse(self.role);
                    self.auth.begin_parse();
                    self.rx.phase = Phase::HandshakeLine;
                }
                Phase::HandshakeLine => {
                    self.read_handshake_line()?;
                    let line = self.take_handshake_line()?;
                    trace!(%line, "handshake leading line");
                    match self.role {
                        Role::Client => self.handshake.parse_status_line(&line)?,
                        Role::Server => self.handshake.parse_request_line(&line)?,
                    }
                    self.rx.buffer_pos = 0;
                    self.rx.buffer_len = 0;
                    self.rx.phase = Phase::HandshakeHeader;
                }
                Phase::HandshakeHeader => {
                    self.read_handshake_line()?;
                    if self.rx.buffer_len == 2 {
                        // A bare CRLF ends the header block.
                        match self.role {
                            Role::Client => {
                                self.handshake.verify_server_response()?;
                                debug!("server handshake verified");
                                self.change_state(ConnectionState::Open);
                            }
                            Role::Server => {
                                self.handshake.verify_client_request()?;
                                debug!(resource = %self.handshake.resource, "client handshake verified");
                                self.change_state(ConnectionState::ServerHandshake);
                            }
                        }
                    } else {
                        // Peek one byte: a CRLF followed by SP/HT folds
                        // into the previous header line.
                        self.rx.phase = Phase::HandshakeFold;
                    }
                }
                Phase::HandshakeFold => {
                    let mut next = [0u8; 1];
                    let n = self.transport.receive(&mut next)?;
                    if n == 0 {
                        return Err(Error::EndOfStream);
                    }

                    if next[0] == b' ' || next[0] == b'\t' {
                        if self.rx.buffer_len >= 2 {
                            self.rx.buffer_len -= 2;
                        }
                        self.rx.phase = Phase::HandshakeHeader;
                    } else {
                        let line = self.take_handshake_line()?;
                        trace!(%line, "handshake header field");
                        self.handshake
                            .parse_header_field(&line, self.role, &mut self.auth);

                        self.rx.buffer[0] = next[0];
                        self.rx.buffer_len = 1;
                        self.rx.phase = Phase::HandshakeHeader;
                    }
                }
                _ => return Err(Error::WrongState),
            }
        }
    }

    /// Append transport bytes until the rx buffer ends with CRLF.
    ///
    /// One byte at a time so the engine never consumes past the end of the
    /// handshake into frame data.
    fn read_handshake_line(&mut self) -> Result<()> {
        loop {
            let len = self.rx.buffer_len;
            if len >= 2 && &self.rx.buffer[len - 2..len] == b"\r\n" {
                return Ok(());
            }
            if len >= self.config.buffer_size {
                return Err(match self.role {
                    Role::Client => Error::InvalidSyntax("handshake line too long".into()),
                    Role::Server => Error::InvalidRequest("handshake line too long".into()),
                });
            }

            let mut byte = [0u8; 1];
            let n = self.transport.receive(&mut byte)?;
            if n == 0 {
                return Err(Error::EndOfStream);
            }
            self.rx.ensure(len + 1);
            self.rx.buffer[len] = byte[0];
            self.rx.buffer_len += 1;
        }
    }

    /// The buffered handshake line, CRLF stripped, as an owned string.
    fn take_handshake_line(&self) -> Result<String> {
        let raw = &self.rx.buffer[..self.rx.buffer_len];
        let text = std::str::from_utf8(raw).map_err(|_| match self.role {
            Role::Client => Error::InvalidSyntax("handshake is not ASCII".into()),
            Role::Server => Error::InvalidRequest("handshake is not ASCII".into()),
        })?;
        Ok(text.trim_end_matches("\r\n").to_string())
    }

    /// Run the closing handshake: send a Close frame (once), drain until
    /// the peer's Close frame or the end of the stream, then shut the
    /// transport down. On success the state is `Closed`.
    ///
    /// # Errors
    ///
    /// [`Error::SendInProgress`] while a data frame is still in flight
    /// (transient: finish the send and call again). Other transient errors
    /// resume on the next call. [`Error::WrongState`] outside the
    /// open/closing states.
    pub fn shutdown(&mut self) -> Result<()> {
        while self.state != ConnectionState::Closed {
            match self.state {
                ConnectionState::Open => {
                    if self.tx.payload_pos != self.tx.payload_len {
                        return Err(Error::SendInProgress);
                    }
                    self.format_close_frame()?;
                    self.handshake.close_sent = true;
                    self.state = ConnectionState::ClosingTx;
                }
                ConnectionState::ClosingTx => {
                    self.send_pending()?;
                    self.state = if self.handshake.close_received {
                        ConnectionState::Shutdown
                    } else {
                        ConnectionState::ClosingRx
                    };
                }
                ConnectionState::ClosingRx => {
                    // Discard anything that is not the peer's Close frame.
                    let mut scratch = vec![0u8; self.config.buffer_size];
                    match self.receive(&mut scratch) {
                        Ok(Received::Closed { .. }) => {
                            self.state = ConnectionState::Shutdown;
                        }
                        Ok(Received::Data { .. }) => {
                            if self.handshake.close_received {
                                self.state = ConnectionState::Shutdown;
                            }
                        }
                        Err(e) if e.is_transient() => return Err(e),
                        Err(
                            Error::EndOfStream
                            | Error::InvalidFrame(_)
                            | Error::InvalidUtf8
                            | Error::InvalidOpcode(_),
                        ) => {
                            // The peer is gone or misbehaving; stop waiting.
                            self.state = ConnectionState::Shutdown;
                        }
                        Err(e) => return Err(e),
                    }
                }
                ConnectionState::Shutdown => {
                    self.transport.shutdown()?;
                    self.change_state(ConnectionState::Closed);
                }
                _ => return Err(Error::WrongState),
            }
        }

        Ok(())
    }

    fn format_close_frame(&mut self) -> Result<()> {
        // 1005 is reserved for the absence of a code; promote it.
        if self.status_code == CloseCode::NoStatusReceived {
            self.status_code = CloseCode::Normal;
        }
        debug!(code = self.status_code.as_u16(), "sending close frame");

        self.format_frame_header(true, OpCode::Close, 2)?;

        let mut body = self.status_code.as_u16().to_be_bytes();
        if let Some(key) = self.tx.masking_key {
            body[0] ^= key[0];
            body[1] ^= key[1];
        }

        let len = self.tx.buffer_len;
        self.tx.ensure(len + 2);
        self.tx.buffer[len..len + 2].copy_from_slice(&body);
        self.tx.buffer_len += 2;
        self.tx.payload_pos = 2;
        Ok(())
    }

    /// Unconditional teardown: shut the transport down (errors ignored),
    /// clear every context, release the pool slot and enter `Closed`.
    ///
    /// Caller-provided settings (host, origin, sub-protocol, credentials)
    /// survive; protocol state does not.
    pub fn close(&mut self) {
        debug!(state = %self.state, "closing connection");
        let _ = self.transport.shutdown();

        self.tx.clear();
        self.rx.clear();
        self.utf8.reset();
        self.handshake = HandshakeContext::default();
        self.auth.begin_parse();
        self.auth.selected = AuthScheme::None;
        self.status_code = CloseCode::NoStatusReceived;
        self.retry_count = 0;
        self.slot = None;
        self.state = ConnectionState::Closed;
    }

    fn change_state(&mut self, new_state: ConnectionState) {
        trace!(from = %self.state, to = %new_state, "state change");
        self.state = new_state;
        self.tx.phase = Phase::Idle;
        self.rx.phase = Phase::Idle;
    }
}
