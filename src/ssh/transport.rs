// 传输引擎接口
//
// Session 只负责编排调用和映射结果, 握手/认证/通道的实际工作都交给 Transport。
use std::fmt;
use std::net::TcpStream;
use std::path::Path;
use std::str::FromStr;

/// Result of a transport call: the output value, or a negative status code.
pub type Status<T> = std::result::Result<T, i32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KnownHostsId(pub u32);

/// Digest used to fingerprint the server's host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    Md5,
    Sha1,
    Sha256,
}

impl HashType {
    /// Digest size in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashType::Md5 => 16,
            HashType::Sha1 => 20,
            HashType::Sha256 => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyType {
    Unknown,
    Rsa,
    Dss,
    Ecdsa256,
    Ecdsa384,
    Ecdsa521,
    Ed25519,
}

impl HostKeyType {
    /// Algorithm name as written in known_hosts files.
    pub fn name(self) -> &'static str {
        match self {
            HostKeyType::Unknown => "unknown",
            HostKeyType::Rsa => "ssh-rsa",
            HostKeyType::Dss => "ssh-dss",
            HostKeyType::Ecdsa256 => "ecdsa-sha2-nistp256",
            HostKeyType::Ecdsa384 => "ecdsa-sha2-nistp384",
            HostKeyType::Ecdsa521 => "ecdsa-sha2-nistp521",
            HostKeyType::Ed25519 => "ssh-ed25519",
        }
    }
}

/// The server's raw public host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    pub key: Vec<u8>,
    pub key_type: HostKeyType,
}

/// Negotiable protocol parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodType {
    Kex,
    HostKey,
    CryptCs,
    CryptSc,
    MacCs,
    MacSc,
    CompCs,
    CompSc,
    LangCs,
    LangSc,
}

impl MethodType {
    pub const ALL: [MethodType; 10] = [
        MethodType::Kex,
        MethodType::HostKey,
        MethodType::CryptCs,
        MethodType::CryptSc,
        MethodType::MacCs,
        MethodType::MacSc,
        MethodType::CompCs,
        MethodType::CompSc,
        MethodType::LangCs,
        MethodType::LangSc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MethodType::Kex => "kex",
            MethodType::HostKey => "hostkey",
            MethodType::CryptCs => "crypt-cs",
            MethodType::CryptSc => "crypt-sc",
            MethodType::MacCs => "mac-cs",
            MethodType::MacSc => "mac-sc",
            MethodType::CompCs => "comp-cs",
            MethodType::CompSc => "comp-sc",
            MethodType::LangCs => "lang-cs",
            MethodType::LangSc => "lang-sc",
        }
    }
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        MethodType::ALL
            .into_iter()
            .find(|method| method.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = MethodType::ALL.iter().map(|m| m.as_str()).collect();
                format!("unknown method type '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

/// Reason codes sent with SSH_MSG_DISCONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    HostNotAllowedToConnect,
    ProtocolError,
    KeyExchangeFailed,
    MacError,
    CompressionError,
    ServiceNotAvailable,
    ProtocolVersionNotSupported,
    HostKeyNotVerifiable,
    ConnectionLost,
    ByApplication,
    TooManyConnections,
    AuthCancelledByUser,
    NoMoreAuthMethodsAvailable,
    IllegalUserName,
}

/// Directions the last non-blocking call was waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDirections {
    None,
    Inbound,
    Outbound,
    Both,
}

/// Outcome of a known_hosts lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Match,
    Mismatch,
    NotFound,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHostEntry {
    /// Plain host name, or `None` for hashed entries.
    pub name: Option<String>,
    /// Base64 key as stored in the file.
    pub key: String,
}

/// Sub-stream of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStream {
    Data,
    Stderr,
}

/// The engine a [`Session`](super::Session) drives.
///
/// Every fallible call reports failure as a negative status code; the
/// human-readable detail of the most recent failure is available through
/// [`Transport::last_error`]. Child handles (channels, listeners,
/// known-hosts stores) are addressed by id and stay allocated until their
/// `*_free` call or until the transport itself is dropped.
pub trait Transport {
    fn last_error(&self) -> Option<String>;

    fn handshake(&mut self, socket: TcpStream) -> Status<()>;

    fn userauth_password(&mut self, user: &str, password: &str) -> Status<()>;
    fn userauth_pubkey_memory(
        &mut self,
        user: &str,
        private_key: &str,
        public_key: Option<&str>,
        passphrase: Option<&str>,
    ) -> Status<()>;
    fn userauth_pubkey_file(
        &mut self,
        user: &str,
        private_key: &Path,
        public_key: Option<&Path>,
        passphrase: Option<&str>,
    ) -> Status<()>;
    /// Authenticates with identities held by a running ssh-agent.
    fn userauth_agent(&mut self, user: &str) -> Status<()>;
    /// Sends a "none" request. `Ok(None)` when the server listed no methods.
    fn userauth_list(&mut self, user: &str) -> Status<Option<String>>;
    fn authenticated(&self) -> bool;

    fn host_key_hash(&self, hash: HashType) -> Option<Vec<u8>>;
    fn host_key(&self) -> Option<HostKey>;

    fn disconnect(&mut self, reason: DisconnectReason, description: &str) -> Status<()>;

    fn banner(&self) -> Option<String>;
    fn set_banner(&mut self, banner: &str) -> Status<()>;

    fn block_directions(&self) -> BlockDirections;
    fn is_blocking(&self) -> bool;
    fn set_blocking(&mut self, blocking: bool);
    /// Milliseconds; 0 waits forever.
    fn timeout_ms(&self) -> u32;
    fn set_timeout_ms(&mut self, timeout_ms: u32);
    fn set_sigpipe(&mut self, enable: bool);
    fn set_compress(&mut self, enable: bool);

    fn set_method_pref(&mut self, method: MethodType, prefs: &str) -> Status<()>;
    /// Negotiated method, available after the handshake.
    fn methods(&self, method: MethodType) -> Option<String>;
    fn supported_algs(&self, method: MethodType) -> Status<Vec<String>>;

    fn keepalive_send(&mut self) -> Status<u32>;
    fn set_keepalive(&mut self, want_reply: bool, interval: u32);

    fn known_hosts_init(&mut self) -> Status<KnownHostsId>;
    fn known_hosts_add(
        &mut self,
        id: KnownHostsId,
        host: &str,
        key: &[u8],
        comment: &str,
        key_type: HostKeyType,
    ) -> Status<()>;
    fn known_hosts_check(&mut self, id: KnownHostsId, host: &str, port: u16, key: &[u8]) -> CheckResult;
    /// Removes every entry whose name matches `host`, returning how many went.
    fn known_hosts_remove(&mut self, id: KnownHostsId, host: &str) -> Status<usize>;
    fn known_hosts_entries(&mut self, id: KnownHostsId) -> Status<Vec<KnownHostEntry>>;
    fn known_hosts_read_file(&mut self, id: KnownHostsId, path: &Path) -> Status<u32>;
    fn known_hosts_write_file(&mut self, id: KnownHostsId, path: &Path) -> Status<()>;
    fn known_hosts_free(&mut self, id: KnownHostsId);

    /// Returns the listener and the port the server actually bound.
    fn forward_listen(
        &mut self,
        host: Option<&str>,
        port: u16,
        queue_max: u32,
    ) -> Status<(ListenerId, u16)>;
    fn listener_accept(&mut self, id: ListenerId) -> Status<ChannelId>;
    /// Releases the listener, cancelling the remote forward.
    fn listener_free(&mut self, id: ListenerId);

    fn channel_open(
        &mut self,
        channel_type: &str,
        window_size: u32,
        packet_size: u32,
        message: Option<&str>,
    ) -> Status<ChannelId>;
    fn channel_direct_tcpip(
        &mut self,
        host: &str,
        port: u16,
        source: Option<(&str, u16)>,
    ) -> Status<ChannelId>;
    fn channel_read(&mut self, id: ChannelId, stream: ChannelStream, buf: &mut [u8]) -> Status<usize>;
    fn channel_write(&mut self, id: ChannelId, stream: ChannelStream, buf: &[u8]) -> Status<usize>;
    fn channel_flush(&mut self, id: ChannelId) -> Status<()>;
    /// Starts `exec`, `shell` or `subsystem` on the channel.
    fn channel_process_startup(
        &mut self,
        id: ChannelId,
        request: &str,
        message: Option<&str>,
    ) -> Status<()>;
    fn channel_request_pty(&mut self, id: ChannelId, term: &str, size: Option<(u32, u32)>) -> Status<()>;
    fn channel_setenv(&mut self, id: ChannelId, name: &str, value: &str) -> Status<()>;
    fn channel_send_eof(&mut self, id: ChannelId) -> Status<()>;
    fn channel_eof(&self, id: ChannelId) -> bool;
    fn channel_wait_close(&mut self, id: ChannelId) -> Status<()>;
    fn channel_exit_status(&self, id: ChannelId) -> Status<i32>;
    fn channel_close(&mut self, id: ChannelId) -> Status<()>;
    /// Releases the native channel handle.
    fn channel_free(&mut self, id: ChannelId);
}
