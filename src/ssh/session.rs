// SSH会话管理
//
// Session 独占 socket 和传输上下文; Channel / Listener / KnownHosts 只借用 Session,
// 生命周期由借用检查保证。断开连接后子资源被标记失效, 原生句柄在析构时统一释放。
use super::channel::Channel;
use super::keepalive::KeepaliveConfig;
use super::known_hosts::KnownHosts;
use super::listener::Listener;
use super::registry::{Handle, Registry};
use super::ssh2_transport::Ssh2Transport;
use super::transport::{
    BlockDirections, ChannelId, DisconnectReason, HashType, HostKey, MethodType, Status, Transport,
};
use crate::utils::error::{check_error, Error, ErrorContext, Result, StateError};
use crate::utils::fingerprint::hex_colon;
use log::{debug, info, warn};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

/// Default receive window for channels opened by [`Session::open_session`].
pub const DEFAULT_WINDOW_SIZE: u32 = 2 * 1024 * 1024;
/// Default maximum packet size for channels opened by [`Session::open_session`].
pub const DEFAULT_PACKET_SIZE: u32 = 32768;
/// Default backlog of a remote port forward.
pub const DEFAULT_QUEUE_MAX: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Context allocated, no handshake yet.
    Initialized,
    Connected,
    Authenticated,
    Disconnected,
}

/// One SSH connection: the socket, the transport context and the lifecycle
/// state machine driving them.
///
/// A session is meant to be used from one thread; all calls on it and on the
/// channels, listeners and known-hosts stores derived from it must be
/// serialized by the caller.
pub struct Session<T: Transport = Ssh2Transport> {
    transport: RefCell<T>,
    state: Cell<SessionState>,
    registry: RefCell<Registry>,
    keepalive: Cell<Option<KeepaliveConfig>>,
    method_prefs: RefCell<HashMap<MethodType, String>>,
}

impl<T: Transport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state.get())
            .field("keepalive", &self.keepalive.get())
            .field("children", &self.registry.borrow().live_count())
            .field("transport", &"<transport>")
            .finish()
    }
}

impl Session<Ssh2Transport> {
    /// Allocates a libssh2 session context.
    pub fn new() -> Result<Self> {
        let transport = Ssh2Transport::new().map_err(|code| {
            debug!("libssh2 session allocation failed with code {}", code);
            Error::InitFailure
        })?;
        Ok(Self::with_transport(transport))
    }

    /// Connects to `host:port` and performs the handshake.
    pub fn open(host: &str, port: u16) -> Result<Self> {
        debug!("connecting to {}:{}", host, port);
        let socket = TcpStream::connect((host, port)).map_err(Error::Connect)?;
        let session = Self::new()?;
        session.handshake(socket)?;
        Ok(session)
    }

    /// Opens a session, hands it to `f`, and disconnects afterwards whether
    /// `f` succeeded or not.
    pub fn with_connection<R, F>(host: &str, port: u16, f: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        Self::open(host, port)?.scoped(f)
    }
}

impl<T: Transport> Session<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport: RefCell::new(transport),
            state: Cell::new(SessionState::Initialized),
            registry: RefCell::new(Registry::default()),
            keepalive: Cell::new(None),
            method_prefs: RefCell::new(HashMap::new()),
        }
    }

    /// Runs `f` with this session and disconnects on every exit path.
    ///
    /// An error from `f` takes precedence over a disconnect failure.
    pub fn scoped<R, F>(self, f: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        let result = f(&self);
        let disconnected = self.disconnect(DisconnectReason::ByApplication, "closed by application");
        let value = result?;
        disconnected?;
        Ok(value)
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// True strictly between a successful handshake and a disconnect.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state.get(),
            SessionState::Connected | SessionState::Authenticated
        )
    }

    fn check<R>(&self, status: Status<R>, context: ErrorContext) -> Result<R> {
        match status {
            Ok(value) => Ok(value),
            Err(code) => {
                let message = self.transport.borrow().last_error();
                check_error(code, message.clone(), context)?;
                // 传输层用非负码报告失败, 按协议错误处理
                Err(Error::Protocol { code, message })
            }
        }
    }

    fn call<R>(&self, context: ErrorContext, f: impl FnOnce(&mut T) -> Status<R>) -> Result<R> {
        let status = f(&mut self.transport.borrow_mut());
        self.check(status, context)
    }

    fn require_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StateError::NotConnected.into())
        }
    }

    fn require_before_handshake(&self, what: &'static str) -> Result<()> {
        if self.state.get() == SessionState::Initialized {
            Ok(())
        } else {
            Err(StateError::AfterHandshake(what).into())
        }
    }

    fn require_login_allowed(&self) -> Result<()> {
        match self.state.get() {
            SessionState::Connected => Ok(()),
            SessionState::Authenticated => Err(StateError::AlreadyAuthenticated.into()),
            SessionState::Initialized | SessionState::Disconnected => {
                Err(StateError::NotConnected.into())
            }
        }
    }

    /// Takes ownership of a connected socket and negotiates the transport.
    ///
    /// Allowed once per session. On failure the session stays
    /// [`SessionState::Initialized`].
    pub fn handshake(&self, socket: TcpStream) -> Result<()> {
        if self.state.get() != SessionState::Initialized {
            return Err(StateError::AlreadyHandshaken.into());
        }
        if let Ok(peer) = socket.peer_addr() {
            debug!("starting SSH handshake with {}", peer);
        }
        self.call(ErrorContext::Handshake, |t| t.handshake(socket))?;
        self.state.set(SessionState::Connected);
        info!("SSH handshake completed");
        Ok(())
    }

    fn authenticate(
        &self,
        user: &str,
        method: &str,
        f: impl FnOnce(&mut T) -> Status<()>,
    ) -> Result<()> {
        self.require_login_allowed()?;
        match self.call(ErrorContext::Auth, f) {
            Ok(()) => {
                self.state.set(SessionState::Authenticated);
                info!("authenticated as {} using {}", user, method);
                Ok(())
            }
            Err(err) => {
                debug!("{} authentication for {} failed: {}", method, user, err);
                Err(err)
            }
        }
    }

    /// Password authentication.
    pub fn login(&self, user: &str, password: &str) -> Result<()> {
        self.authenticate(user, "password", |t| t.userauth_password(user, password))
    }

    /// Public-key authentication with keys held in memory.
    pub fn login_with(
        &self,
        user: &str,
        private_key: &str,
        public_key: Option<&str>,
        passphrase: Option<&str>,
    ) -> Result<()> {
        self.authenticate(user, "publickey", |t| {
            t.userauth_pubkey_memory(user, private_key, public_key, passphrase)
        })
    }

    /// Public-key authentication with keys read from disk.
    pub fn login_with_pubkey(
        &self,
        user: &str,
        private_key: &Path,
        public_key: Option<&Path>,
        passphrase: Option<&str>,
    ) -> Result<()> {
        self.authenticate(user, "publickey file", |t| {
            t.userauth_pubkey_file(user, private_key, public_key, passphrase)
        })
    }

    /// Authenticates with the identities offered by a running ssh-agent.
    pub fn login_with_agent(&self, user: &str) -> Result<()> {
        self.authenticate(user, "agent", |t| t.userauth_agent(user))
    }

    /// Sends a "none" authentication request and returns the methods the
    /// server will accept.
    ///
    /// `None` is ambiguous: the server may have accepted "none" outright.
    /// Check [`Session::is_authenticated`] to tell the cases apart.
    pub fn login_with_noauth(&self, user: &str) -> Result<Option<String>> {
        self.require_login_allowed()?;
        let methods = self.call(ErrorContext::Auth, |t| t.userauth_list(user))?;
        if self.transport.borrow().authenticated() {
            self.state.set(SessionState::Authenticated);
            info!("server accepted \"none\" authentication for {}", user);
        }
        Ok(methods)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.get() == SessionState::Authenticated
    }

    /// Host key digest as lowercase hex pairs joined by `:`, or `""` when no
    /// host key is available.
    pub fn hashkey(&self, hash: HashType) -> String {
        self.transport
            .borrow()
            .host_key_hash(hash)
            .map(|digest| hex_colon(&digest))
            .unwrap_or_default()
    }

    pub fn hostkey(&self) -> Option<HostKey> {
        self.transport.borrow().host_key()
    }

    /// Sends SSH_MSG_DISCONNECT. A no-op unless connected.
    ///
    /// The session is marked disconnected even when sending fails, so a
    /// second call never retries. Outstanding channels, listeners and
    /// known-hosts stores become invalid; their native handles are released
    /// when the session is dropped.
    pub fn disconnect(&self, reason: DisconnectReason, description: &str) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        let status = self.transport.borrow_mut().disconnect(reason, description);
        self.state.set(SessionState::Disconnected);
        let invalidated = self.registry.borrow_mut().invalidate_all();
        debug!(
            "session disconnected ({:?}), {} child handle(s) invalidated",
            reason, invalidated
        );
        self.check(status, ErrorContext::General)
    }

    pub fn banner(&self) -> Option<String> {
        self.transport.borrow().banner()
    }

    /// Sets the identification banner sent during the handshake.
    pub fn set_banner(&self, banner: &str) -> Result<()> {
        self.require_before_handshake("banner")?;
        self.call(ErrorContext::General, |t| t.set_banner(banner))
    }

    pub fn block_directions(&self) -> BlockDirections {
        self.transport.borrow().block_directions()
    }

    pub fn is_blocking(&self) -> bool {
        self.transport.borrow().is_blocking()
    }

    /// In non-blocking mode channel reads and writes return `Ok(None)`
    /// instead of waiting.
    pub fn set_blocking(&self, blocking: bool) {
        self.transport.borrow_mut().set_blocking(blocking);
    }

    /// `None` means blocking calls wait forever.
    pub fn timeout(&self) -> Option<Duration> {
        match self.transport.borrow().timeout_ms() {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        }
    }

    /// Millisecond resolution. A non-zero duration shorter than 1 ms is
    /// rounded up to 1 ms; `Some(Duration::ZERO)` waits forever like `None`.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.transport
            .borrow_mut()
            .set_timeout_ms(timeout.map_or(0, timeout_ms));
    }

    pub fn set_enable_sigpipe(&self, enable: bool) {
        self.transport.borrow_mut().set_sigpipe(enable);
    }

    pub fn set_enable_compression(&self, enable: bool) -> Result<()> {
        self.require_before_handshake("compression")?;
        self.transport.borrow_mut().set_compress(enable);
        Ok(())
    }

    /// Sets the comma-separated preference list for one negotiable method.
    pub fn set_method_pref(&self, method: MethodType, prefs: &str) -> Result<()> {
        self.require_before_handshake("method preferences")?;
        self.call(ErrorContext::General, |t| t.set_method_pref(method, prefs))?;
        self.method_prefs
            .borrow_mut()
            .insert(method, prefs.to_string());
        Ok(())
    }

    /// Configured preference before the handshake, negotiated method after.
    pub fn method_pref(&self, method: MethodType) -> Option<String> {
        if self.state.get() == SessionState::Initialized {
            return self.method_prefs.borrow().get(&method).cloned();
        }
        self.transport.borrow().methods(method)
    }

    pub fn supported_algs(&self, method: MethodType) -> Result<Vec<String>> {
        let status = self.transport.borrow().supported_algs(method);
        self.check(status, ErrorContext::General)
    }

    /// Sends a keepalive if one is due. Returns the seconds until the next
    /// call is required.
    pub fn send_keepalive(&self) -> Result<u32> {
        self.require_connected()?;
        self.call(ErrorContext::General, |t| t.keepalive_send())
    }

    pub fn keepalive_config(&self, want_reply: bool, interval: u32) {
        let config = KeepaliveConfig::new(want_reply, interval);
        self.transport
            .borrow_mut()
            .set_keepalive(config.want_reply, config.interval);
        debug!("keepalive set to every {}s (want_reply={})", config.interval, want_reply);
        self.keepalive.set(Some(config));
    }

    /// The effective keepalive configuration, if one was set.
    pub fn keepalive(&self) -> Option<KeepaliveConfig> {
        self.keepalive.get()
    }

    pub fn known_hosts(&self) -> Result<KnownHosts<'_, T>> {
        if self.state.get() == SessionState::Disconnected {
            return Err(StateError::NotConnected.into());
        }
        let id = self.call(ErrorContext::General, |t| t.known_hosts_init())?;
        self.register(Handle::KnownHosts(id));
        Ok(KnownHosts::new(self, id))
    }

    /// Asks the server to listen on `host:port` and forward connections
    /// back. Port 0 lets the server choose; an empty host means all
    /// interfaces.
    pub fn forward_listen(&self, host: &str, port: u16) -> Result<Listener<'_, T>> {
        self.forward_listen_with_queue(host, port, DEFAULT_QUEUE_MAX)
    }

    pub fn forward_listen_with_queue(
        &self,
        host: &str,
        port: u16,
        queue_max: u32,
    ) -> Result<Listener<'_, T>> {
        self.require_connected()?;
        let bind_host = (!host.is_empty()).then_some(host);
        let (id, bound_port) = self.call(ErrorContext::General, |t| {
            t.forward_listen(bind_host, port, queue_max)
        })?;
        self.register(Handle::Listener(id));
        info!("remote forward listening on {}:{}", bind_host.unwrap_or("*"), bound_port);
        Ok(Listener::new(self, id, bound_port))
    }

    /// Allocates a channel. The caller is responsible for closing it.
    pub fn open_channel(
        &self,
        channel_type: &str,
        window_size: u32,
        packet_size: u32,
        message: Option<&str>,
    ) -> Result<Channel<'_, T>> {
        self.require_connected()?;
        let id = self.call(ErrorContext::General, |t| {
            t.channel_open(channel_type, window_size, packet_size, message)
        })?;
        Ok(self.adopt_channel(id))
    }

    /// Opens a "session" channel with default window and packet sizes.
    pub fn open_session(&self) -> Result<Channel<'_, T>> {
        self.open_channel("session", DEFAULT_WINDOW_SIZE, DEFAULT_PACKET_SIZE, None)
    }

    /// Opens a "session" channel, passes it to `f` and closes it on every
    /// exit path.
    pub fn with_session<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Channel<'_, T>) -> Result<R>,
    {
        let mut channel = self.open_session()?;
        let result = f(&mut channel);
        let closed = channel.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Opens a tunnel to `host:port` through the remote host.
    pub fn direct_tcpip(
        &self,
        host: &str,
        port: u16,
        source_host: &str,
        source_port: u16,
    ) -> Result<Channel<'_, T>> {
        self.require_connected()?;
        let id = self.call(ErrorContext::General, |t| {
            t.channel_direct_tcpip(host, port, Some((source_host, source_port)))
        })?;
        debug!("direct-tcpip channel to {}:{} opened", host, port);
        Ok(self.adopt_channel(id))
    }

    pub(crate) fn adopt_channel(&self, id: ChannelId) -> Channel<'_, T> {
        self.register(Handle::Channel(id));
        Channel::new(self, id)
    }

    fn register(&self, handle: Handle) {
        self.registry.borrow_mut().register(handle);
    }

    pub(crate) fn is_invalidated(&self, handle: Handle) -> bool {
        self.registry.borrow().is_invalidated(handle)
    }

    /// Transport call on behalf of a child handle.
    pub(crate) fn child_call<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut T) -> Status<R>,
    ) -> Result<R> {
        self.registry.borrow().check(handle)?;
        self.call(ErrorContext::General, f)
    }

    /// Read-only query on behalf of a child handle; no status mapping.
    pub(crate) fn child_query<R>(&self, handle: Handle, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.registry.borrow().check(handle)?;
        Ok(f(&self.transport.borrow()))
    }

    /// Frees a child's native handle. Invalidated handles are left for
    /// teardown.
    pub(crate) fn release(&self, handle: Handle) {
        if self.is_invalidated(handle) {
            return;
        }
        {
            let mut transport = self.transport.borrow_mut();
            match handle {
                Handle::Channel(id) => transport.channel_free(id),
                Handle::Listener(id) => transport.listener_free(id),
                Handle::KnownHosts(id) => transport.known_hosts_free(id),
            }
        }
        self.registry.borrow_mut().release(handle);
    }
}

fn timeout_ms(timeout: Duration) -> u32 {
    match timeout.as_millis() {
        0 if !timeout.is_zero() => 1,
        ms => u32::try_from(ms).unwrap_or(u32::MAX),
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if self.is_connected() {
            if let Err(err) = self.disconnect(DisconnectReason::ByApplication, "session closed") {
                warn!("disconnect during teardown failed: {}", err);
            }
        }
        debug!("releasing SSH transport context");
    }
}
