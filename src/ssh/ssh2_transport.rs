// 基于 ssh2 (libssh2) 的传输引擎
use super::transport::{
    BlockDirections, ChannelId, ChannelStream, CheckResult, DisconnectReason, HashType, HostKey,
    HostKeyType, KnownHostEntry, KnownHostsId, ListenerId, MethodType, Status, Transport,
};
use crate::utils::error::codes;
use log::debug;
use ssh2::ErrorCode;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;

/// Production transport: a libssh2 session plus the child handles it has
/// handed out. Dropping it frees every channel, listener and known-hosts
/// store, then the session itself.
pub struct Ssh2Transport {
    session: ssh2::Session,
    channels: HashMap<ChannelId, ssh2::Channel>,
    listeners: HashMap<ListenerId, ssh2::Listener>,
    known_hosts: HashMap<KnownHostsId, ssh2::KnownHosts>,
    next_id: u32,
    // 每次失败都会覆盖, 包括只读调用
    last_error: RefCell<Option<String>>,
}

impl fmt::Debug for Ssh2Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ssh2Transport")
            .field("session", &"<ssh2::Session>")
            .field("channels", &self.channels.len())
            .field("listeners", &self.listeners.len())
            .field("known_hosts", &self.known_hosts.len())
            .finish()
    }
}

impl Ssh2Transport {
    pub fn new() -> Status<Self> {
        let session = ssh2::Session::new().map_err(|e| session_code(&e))?;
        Ok(Self {
            session,
            channels: HashMap::new(),
            listeners: HashMap::new(),
            known_hosts: HashMap::new(),
            next_id: 0,
            last_error: RefCell::new(None),
        })
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&self, code: i32, message: String) -> i32 {
        *self.last_error.borrow_mut() = Some(message);
        code
    }

    fn check<T>(&self, result: Result<T, ssh2::Error>) -> Status<T> {
        result.map_err(|err| self.record(session_code(&err), err.message().to_string()))
    }

    fn check_io<T>(&self, result: io::Result<T>) -> Status<T> {
        result.map_err(|err| self.record(io_code(&err), err.to_string()))
    }

    fn unknown(&self, id: impl fmt::Debug) -> i32 {
        self.record(codes::BAD_USE, format!("unknown handle {:?}", id))
    }

    fn insert_channel(&mut self, channel: ssh2::Channel) -> ChannelId {
        let id = ChannelId(self.next_id());
        self.channels.insert(id, channel);
        debug!("allocated channel {:?}", id);
        id
    }
}

fn lookup<'a, K, V>(
    map: &'a mut HashMap<K, V>,
    last_error: &RefCell<Option<String>>,
    id: K,
) -> Status<&'a mut V>
where
    K: Hash + Eq + Copy + fmt::Debug,
{
    match map.get_mut(&id) {
        Some(value) => Ok(value),
        None => {
            *last_error.borrow_mut() = Some(format!("unknown handle {:?}", id));
            Err(codes::BAD_USE)
        }
    }
}

// 服务器返回空列表时没有可报告的方法
fn auth_method_list(methods: &str) -> Option<String> {
    (!methods.is_empty()).then(|| methods.to_string())
}

fn session_code(err: &ssh2::Error) -> i32 {
    match err.code() {
        ErrorCode::Session(code) => code,
        ErrorCode::SFTP(code) => code,
    }
}

// ssh2 把 libssh2 错误包进 io::Error, 优先取回原始错误码
fn io_code(err: &io::Error) -> i32 {
    if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<ssh2::Error>()) {
        return session_code(inner);
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => codes::EAGAIN,
        io::ErrorKind::TimedOut => codes::SOCKET_TIMEOUT,
        _ => codes::SOCKET_RECV,
    }
}

fn hash_type(hash: HashType) -> ssh2::HashType {
    match hash {
        HashType::Md5 => ssh2::HashType::Md5,
        HashType::Sha1 => ssh2::HashType::Sha1,
        HashType::Sha256 => ssh2::HashType::Sha256,
    }
}

fn method_type(method: MethodType) -> ssh2::MethodType {
    match method {
        MethodType::Kex => ssh2::MethodType::Kex,
        MethodType::HostKey => ssh2::MethodType::HostKey,
        MethodType::CryptCs => ssh2::MethodType::CryptCs,
        MethodType::CryptSc => ssh2::MethodType::CryptSc,
        MethodType::MacCs => ssh2::MethodType::MacCs,
        MethodType::MacSc => ssh2::MethodType::MacSc,
        MethodType::CompCs => ssh2::MethodType::CompCs,
        MethodType::CompSc => ssh2::MethodType::CompSc,
        MethodType::LangCs => ssh2::MethodType::LangCs,
        MethodType::LangSc => ssh2::MethodType::LangSc,
    }
}

fn disconnect_code(reason: DisconnectReason) -> ssh2::DisconnectCode {
    use ssh2::DisconnectCode as Code;
    match reason {
        DisconnectReason::HostNotAllowedToConnect => Code::HostNotAllowedToConnect,
        DisconnectReason::ProtocolError => Code::ProtocolError,
        DisconnectReason::KeyExchangeFailed => Code::KeyExchangeFailed,
        DisconnectReason::MacError => Code::MacError,
        DisconnectReason::CompressionError => Code::CompressionError,
        DisconnectReason::ServiceNotAvailable => Code::ServiceNotAvailable,
        DisconnectReason::ProtocolVersionNotSupported => Code::ProtocolVersionNotSupported,
        DisconnectReason::HostKeyNotVerifiable => Code::HostKeyNotVerifiable,
        DisconnectReason::ConnectionLost => Code::ConnectionLost,
        DisconnectReason::ByApplication => Code::ByApplication,
        DisconnectReason::TooManyConnections => Code::TooManyConnections,
        DisconnectReason::AuthCancelledByUser => Code::AuthCancelledByUser,
        DisconnectReason::NoMoreAuthMethodsAvailable => Code::NoMoreAuthMethodsAvailable,
        DisconnectReason::IllegalUserName => Code::IllegalUserName,
    }
}

#[allow(unreachable_patterns)]
fn host_key_type(key_type: ssh2::HostKeyType) -> HostKeyType {
    match key_type {
        ssh2::HostKeyType::Rsa => HostKeyType::Rsa,
        ssh2::HostKeyType::Dss => HostKeyType::Dss,
        ssh2::HostKeyType::Ecdsa256 => HostKeyType::Ecdsa256,
        ssh2::HostKeyType::Ecdsa384 => HostKeyType::Ecdsa384,
        ssh2::HostKeyType::Ecdsa521 => HostKeyType::Ecdsa521,
        ssh2::HostKeyType::Ed25519 => HostKeyType::Ed25519,
        _ => HostKeyType::Unknown,
    }
}

fn ssh2_host_key_type(key_type: HostKeyType) -> ssh2::HostKeyType {
    match key_type {
        HostKeyType::Unknown => ssh2::HostKeyType::Unknown,
        HostKeyType::Rsa => ssh2::HostKeyType::Rsa,
        HostKeyType::Dss => ssh2::HostKeyType::Dss,
        HostKeyType::Ecdsa256 => ssh2::HostKeyType::Ecdsa256,
        HostKeyType::Ecdsa384 => ssh2::HostKeyType::Ecdsa384,
        HostKeyType::Ecdsa521 => ssh2::HostKeyType::Ecdsa521,
        HostKeyType::Ed25519 => ssh2::HostKeyType::Ed25519,
    }
}

fn remove_named(known_hosts: &ssh2::KnownHosts, host: &str) -> Result<usize, ssh2::Error> {
    let mut removed = 0;
    for entry in known_hosts.iter()? {
        if entry.name() == Some(host) {
            known_hosts.remove(&entry)?;
            removed += 1;
        }
    }
    Ok(removed)
}

impl Transport for Ssh2Transport {
    fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    fn handshake(&mut self, socket: TcpStream) -> Status<()> {
        self.session.set_tcp_stream(socket);
        let result = self.session.handshake();
        self.check(result)
    }

    fn userauth_password(&mut self, user: &str, password: &str) -> Status<()> {
        let result = self.session.userauth_password(user, password);
        self.check(result)
    }

    fn userauth_pubkey_memory(
        &mut self,
        user: &str,
        private_key: &str,
        public_key: Option<&str>,
        passphrase: Option<&str>,
    ) -> Status<()> {
        let result = self
            .session
            .userauth_pubkey_memory(user, public_key, private_key, passphrase);
        self.check(result)
    }

    fn userauth_pubkey_file(
        &mut self,
        user: &str,
        private_key: &Path,
        public_key: Option<&Path>,
        passphrase: Option<&str>,
    ) -> Status<()> {
        let result = self
            .session
            .userauth_pubkey_file(user, public_key, private_key, passphrase);
        self.check(result)
    }

    fn userauth_agent(&mut self, user: &str) -> Status<()> {
        let result = self.session.userauth_agent(user);
        self.check(result)
    }

    fn userauth_list(&mut self, user: &str) -> Status<Option<String>> {
        let result = self.session.auth_methods(user).map(auth_method_list);
        self.check(result)
    }

    fn authenticated(&self) -> bool {
        self.session.authenticated()
    }

    fn host_key_hash(&self, hash: HashType) -> Option<Vec<u8>> {
        self.session.host_key_hash(hash_type(hash)).map(<[u8]>::to_vec)
    }

    fn host_key(&self) -> Option<HostKey> {
        self.session.host_key().map(|(key, key_type)| HostKey {
            key: key.to_vec(),
            key_type: host_key_type(key_type),
        })
    }

    fn disconnect(&mut self, reason: DisconnectReason, description: &str) -> Status<()> {
        let result = self
            .session
            .disconnect(Some(disconnect_code(reason)), description, None);
        self.check(result)
    }

    fn banner(&self) -> Option<String> {
        self.session.banner().map(str::to_string)
    }

    fn set_banner(&mut self, banner: &str) -> Status<()> {
        let result = self.session.set_banner(banner);
        self.check(result)
    }

    fn block_directions(&self) -> BlockDirections {
        match self.session.block_directions() {
            ssh2::BlockDirections::None => BlockDirections::None,
            ssh2::BlockDirections::Inbound => BlockDirections::Inbound,
            ssh2::BlockDirections::Outbound => BlockDirections::Outbound,
            ssh2::BlockDirections::Both => BlockDirections::Both,
        }
    }

    fn is_blocking(&self) -> bool {
        self.session.is_blocking()
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.session.set_blocking(blocking);
    }

    fn timeout_ms(&self) -> u32 {
        self.session.timeout()
    }

    fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.session.set_timeout(timeout_ms);
    }

    fn set_sigpipe(&mut self, enable: bool) {
        self.session.set_allow_sigpipe(enable);
    }

    fn set_compress(&mut self, enable: bool) {
        self.session.set_compress(enable);
    }

    fn set_method_pref(&mut self, method: MethodType, prefs: &str) -> Status<()> {
        let result = self.session.method_pref(method_type(method), prefs);
        self.check(result)
    }

    fn methods(&self, method: MethodType) -> Option<String> {
        self.session.methods(method_type(method)).map(str::to_string)
    }

    fn supported_algs(&self, method: MethodType) -> Status<Vec<String>> {
        let result = self
            .session
            .supported_algs(method_type(method))
            .map(|algs| algs.into_iter().map(str::to_string).collect());
        self.check(result)
    }

    fn keepalive_send(&mut self) -> Status<u32> {
        let result = self.session.keepalive_send();
        self.check(result)
    }

    fn set_keepalive(&mut self, want_reply: bool, interval: u32) {
        self.session.set_keepalive(want_reply, interval);
    }

    fn known_hosts_init(&mut self) -> Status<KnownHostsId> {
        let result = self.session.known_hosts();
        let known_hosts = self.check(result)?;
        let id = KnownHostsId(self.next_id());
        self.known_hosts.insert(id, known_hosts);
        Ok(id)
    }

    fn known_hosts_add(
        &mut self,
        id: KnownHostsId,
        host: &str,
        key: &[u8],
        comment: &str,
        key_type: HostKeyType,
    ) -> Status<()> {
        let format = ssh2::KnownHostKeyFormat::from(ssh2_host_key_type(key_type));
        let result = lookup(&mut self.known_hosts, &self.last_error, id)?
            .add(host, key, comment, format);
        self.check(result)
    }

    fn known_hosts_check(&mut self, id: KnownHostsId, host: &str, port: u16, key: &[u8]) -> CheckResult {
        let Some(known_hosts) = self.known_hosts.get(&id) else {
            self.unknown(id);
            return CheckResult::Failure;
        };
        match known_hosts.check_port(host, port, key) {
            ssh2::CheckResult::Match => CheckResult::Match,
            ssh2::CheckResult::Mismatch => CheckResult::Mismatch,
            ssh2::CheckResult::NotFound => CheckResult::NotFound,
            ssh2::CheckResult::Failure => {
                self.record(codes::KNOWN_HOSTS, format!("known_hosts check failed for {}:{}", host, port));
                CheckResult::Failure
            }
        }
    }

    fn known_hosts_remove(&mut self, id: KnownHostsId, host: &str) -> Status<usize> {
        let known_hosts = lookup(&mut self.known_hosts, &self.last_error, id)?;
        let result = remove_named(known_hosts, host);
        self.check(result)
    }

    fn known_hosts_entries(&mut self, id: KnownHostsId) -> Status<Vec<KnownHostEntry>> {
        let result = lookup(&mut self.known_hosts, &self.last_error, id)?
            .iter()
            .map(|hosts| {
                hosts
                    .iter()
                    .map(|host| KnownHostEntry {
                        name: host.name().map(str::to_string),
                        key: host.key().to_string(),
                    })
                    .collect()
            });
        self.check(result)
    }

    fn known_hosts_read_file(&mut self, id: KnownHostsId, path: &Path) -> Status<u32> {
        let result = lookup(&mut self.known_hosts, &self.last_error, id)?
            .read_file(path, ssh2::KnownHostFileKind::OpenSSH);
        self.check(result)
    }

    fn known_hosts_write_file(&mut self, id: KnownHostsId, path: &Path) -> Status<()> {
        let result = lookup(&mut self.known_hosts, &self.last_error, id)?
            .write_file(path, ssh2::KnownHostFileKind::OpenSSH);
        self.check(result)
    }

    fn known_hosts_free(&mut self, id: KnownHostsId) {
        if self.known_hosts.remove(&id).is_some() {
            debug!("released known_hosts {:?}", id);
        }
    }

    fn forward_listen(
        &mut self,
        host: Option<&str>,
        port: u16,
        queue_max: u32,
    ) -> Status<(ListenerId, u16)> {
        let result = self
            .session
            .channel_forward_listen(port, host, Some(queue_max));
        let (listener, bound_port) = self.check(result)?;
        let id = ListenerId(self.next_id());
        self.listeners.insert(id, listener);
        Ok((id, bound_port))
    }

    fn listener_accept(&mut self, id: ListenerId) -> Status<ChannelId> {
        let result = lookup(&mut self.listeners, &self.last_error, id)?.accept();
        let channel = self.check(result)?;
        Ok(self.insert_channel(channel))
    }

    fn listener_free(&mut self, id: ListenerId) {
        if self.listeners.remove(&id).is_some() {
            debug!("released listener {:?}", id);
        }
    }

    fn channel_open(
        &mut self,
        channel_type: &str,
        window_size: u32,
        packet_size: u32,
        message: Option<&str>,
    ) -> Status<ChannelId> {
        let result = self
            .session
            .channel_open(channel_type, window_size, packet_size, message);
        let channel = self.check(result)?;
        Ok(self.insert_channel(channel))
    }

    fn channel_direct_tcpip(
        &mut self,
        host: &str,
        port: u16,
        source: Option<(&str, u16)>,
    ) -> Status<ChannelId> {
        let result = self.session.channel_direct_tcpip(host, port, source);
        let channel = self.check(result)?;
        Ok(self.insert_channel(channel))
    }

    fn channel_read(&mut self, id: ChannelId, stream: ChannelStream, buf: &mut [u8]) -> Status<usize> {
        let channel = lookup(&mut self.channels, &self.last_error, id)?;
        let result = match stream {
            ChannelStream::Data => channel.read(buf),
            ChannelStream::Stderr => channel.stderr().read(buf),
        };
        self.check_io(result)
    }

    fn channel_write(&mut self, id: ChannelId, stream: ChannelStream, buf: &[u8]) -> Status<usize> {
        let channel = lookup(&mut self.channels, &self.last_error, id)?;
        let result = match stream {
            ChannelStream::Data => channel.write(buf),
            ChannelStream::Stderr => channel.stderr().write(buf),
        };
        self.check_io(result)
    }

    fn channel_flush(&mut self, id: ChannelId) -> Status<()> {
        let result = lookup(&mut self.channels, &self.last_error, id)?.flush();
        self.check_io(result)
    }

    fn channel_process_startup(
        &mut self,
        id: ChannelId,
        request: &str,
        message: Option<&str>,
    ) -> Status<()> {
        let result = lookup(&mut self.channels, &self.last_error, id)?
            .process_startup(request, message);
        self.check(result)
    }

    fn channel_request_pty(&mut self, id: ChannelId, term: &str, size: Option<(u32, u32)>) -> Status<()> {
        let dim = size.map(|(cols, rows)| (cols, rows, 0, 0));
        let result = lookup(&mut self.channels, &self.last_error, id)?.request_pty(term, None, dim);
        self.check(result)
    }

    fn channel_setenv(&mut self, id: ChannelId, name: &str, value: &str) -> Status<()> {
        let result = lookup(&mut self.channels, &self.last_error, id)?.setenv(name, value);
        self.check(result)
    }

    fn channel_send_eof(&mut self, id: ChannelId) -> Status<()> {
        let result = lookup(&mut self.channels, &self.last_error, id)?.send_eof();
        self.check(result)
    }

    fn channel_eof(&self, id: ChannelId) -> bool {
        self.channels.get(&id).map_or(true, |channel| channel.eof())
    }

    fn channel_wait_close(&mut self, id: ChannelId) -> Status<()> {
        let result = lookup(&mut self.channels, &self.last_error, id)?.wait_close();
        self.check(result)
    }

    fn channel_exit_status(&self, id: ChannelId) -> Status<i32> {
        let channel = self.channels.get(&id).ok_or_else(|| self.unknown(id))?;
        self.check(channel.exit_status())
    }

    fn channel_close(&mut self, id: ChannelId) -> Status<()> {
        let result = lookup(&mut self.channels, &self.last_error, id)?.close();
        self.check(result)
    }

    fn channel_free(&mut self, id: ChannelId) {
        if self.channels.remove(&id).is_some() {
            debug!("released channel {:?}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapped(kind: io::ErrorKind, code: i32) -> io::Error {
        io::Error::new(kind, ssh2::Error::new(ErrorCode::Session(code), "wrapped"))
    }

    #[test]
    fn io_code_recovers_wrapped_libssh2_codes() {
        assert_eq!(io_code(&wrapped(io::ErrorKind::WouldBlock, codes::EAGAIN)), codes::EAGAIN);
        assert_eq!(
            io_code(&wrapped(io::ErrorKind::Other, codes::CHANNEL_CLOSED)),
            codes::CHANNEL_CLOSED
        );
    }

    #[test]
    fn io_code_maps_plain_io_errors_by_kind() {
        assert_eq!(io_code(&io::ErrorKind::WouldBlock.into()), codes::EAGAIN);
        assert_eq!(io_code(&io::ErrorKind::TimedOut.into()), codes::SOCKET_TIMEOUT);
        assert_eq!(io_code(&io::ErrorKind::ConnectionReset.into()), codes::SOCKET_RECV);
    }

    #[test]
    fn empty_auth_list_means_no_methods() {
        assert_eq!(auth_method_list(""), None);
        assert_eq!(
            auth_method_list("publickey,password").as_deref(),
            Some("publickey,password")
        );
    }

    #[test]
    fn host_key_types_round_trip() {
        for key_type in [
            HostKeyType::Unknown,
            HostKeyType::Rsa,
            HostKeyType::Dss,
            HostKeyType::Ecdsa256,
            HostKeyType::Ecdsa384,
            HostKeyType::Ecdsa521,
            HostKeyType::Ed25519,
        ] {
            assert_eq!(host_key_type(ssh2_host_key_type(key_type)), key_type);
        }
    }

    #[test]
    fn failed_queries_replace_the_previous_message() {
        let transport = Ssh2Transport::new().unwrap();
        *transport.last_error.borrow_mut() = Some("Failed getting banner".to_string());

        let code = transport.supported_algs(MethodType::LangCs).unwrap_err();
        assert_eq!(code, codes::METHOD_NOT_SUPPORTED);
        let message = transport.last_error();
        assert!(message.is_some());
        assert_ne!(message.as_deref(), Some("Failed getting banner"));
    }

    #[test]
    fn unknown_channel_is_reported_with_its_own_message() {
        let transport = Ssh2Transport::new().unwrap();
        *transport.last_error.borrow_mut() = Some("stale".to_string());

        assert_eq!(transport.channel_exit_status(ChannelId(99)), Err(codes::BAD_USE));
        assert!(transport
            .last_error()
            .is_some_and(|message| message.contains("unknown handle")));
    }
}
