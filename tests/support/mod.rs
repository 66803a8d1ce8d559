// 测试辅助: 可编排的传输引擎
#![allow(dead_code)]

use ssh_session::ssh::{
    BlockDirections, ChannelId, ChannelStream, CheckResult, DisconnectReason, HashType, HostKey,
    HostKeyType, KnownHostEntry, KnownHostsId, ListenerId, MethodType, Status, Transport,
};
use ssh_session::utils::error::codes;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::rc::Rc;

/// A connected loopback socket to hand to `Session::handshake`.
pub fn connected_socket() -> TcpStream {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let _server = listener.accept().unwrap();
    client
}

#[derive(Debug, Default)]
pub struct FakeChannel {
    pub channel_type: String,
    pub data: VecDeque<Vec<u8>>,
    pub stderr: VecDeque<Vec<u8>>,
    pub written: Vec<u8>,
    pub requests: Vec<(String, Option<String>)>,
    pub env: Vec<(String, String)>,
    pub exit_status: i32,
    /// Remote side keeps its streams open once the queues are drained.
    pub held_open: bool,
    pub eof_sent: bool,
    pub closed: bool,
    pub freed: bool,
}

/// Script and observation log shared between a test and its `FakeTransport`.
#[derive(Debug)]
pub struct FakeState {
    pub handshake_error: Option<i32>,
    pub handshakes: usize,
    pub credentials: Option<(String, String)>,
    pub accept_pubkey: bool,
    pub accept_agent: bool,
    pub accept_none: bool,
    pub auth_methods: Option<String>,
    pub authenticated: bool,
    pub host_key: Option<HostKey>,
    pub disconnect_error: Option<i32>,
    pub disconnects: Vec<(DisconnectReason, String)>,
    pub banner: Option<String>,
    pub blocking: bool,
    pub timeout_ms: u32,
    pub sigpipe: bool,
    pub compress: bool,
    pub method_prefs: HashMap<MethodType, String>,
    pub keepalive: Option<(bool, u32)>,
    pub keepalives_sent: usize,
    pub known_hosts: HashMap<KnownHostsId, Vec<(String, Vec<u8>)>>,
    pub next_id: u32,
    pub server_port: u16,
    pub forwards: Vec<(Option<String>, u16, u32)>,
    pub pending: HashMap<ListenerId, VecDeque<FakeChannel>>,
    pub released_listeners: Vec<ListenerId>,
    pub released_known_hosts: Vec<KnownHostsId>,
    /// Served in order by the next "session" channel opens.
    pub scripted: VecDeque<FakeChannel>,
    pub channels: HashMap<ChannelId, FakeChannel>,
    pub last_error: Option<String>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            handshake_error: None,
            handshakes: 0,
            credentials: Some(("user".to_string(), "pass".to_string())),
            accept_pubkey: false,
            accept_agent: false,
            accept_none: false,
            auth_methods: Some("publickey,password".to_string()),
            authenticated: false,
            host_key: Some(HostKey {
                key: b"AAAAC3NzaC1lZDI1NTE5AAAAIFakeHostKey".to_vec(),
                key_type: HostKeyType::Ed25519,
            }),
            disconnect_error: None,
            disconnects: Vec::new(),
            banner: None,
            blocking: true,
            timeout_ms: 0,
            sigpipe: false,
            compress: false,
            method_prefs: HashMap::new(),
            keepalive: None,
            keepalives_sent: 0,
            known_hosts: HashMap::new(),
            next_id: 0,
            server_port: 40123,
            forwards: Vec::new(),
            pending: HashMap::new(),
            released_listeners: Vec::new(),
            released_known_hosts: Vec::new(),
            scripted: VecDeque::new(),
            channels: HashMap::new(),
            last_error: None,
        }
    }
}

impl FakeState {
    fn fail<T>(&mut self, code: i32, message: &str) -> Status<T> {
        self.last_error = Some(message.to_string());
        Err(code)
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Queues data the next channel read will return.
    pub fn push_data(&mut self, id: ChannelId, data: &[u8]) {
        self.channels.get_mut(&id).unwrap().data.push_back(data.to_vec());
    }

    pub fn channel(&self, id: ChannelId) -> &FakeChannel {
        &self.channels[&id]
    }
}

#[derive(Clone)]
pub struct FakeTransport {
    pub state: Rc<RefCell<FakeState>>,
}

impl FakeTransport {
    /// Returns the transport and a handle the test keeps for inspection.
    pub fn new() -> (Self, Rc<RefCell<FakeState>>) {
        Self::with_state(FakeState::default())
    }

    pub fn with_state(state: FakeState) -> (Self, Rc<RefCell<FakeState>>) {
        let state = Rc::new(RefCell::new(state));
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }

    fn channel_mut<R>(
        &mut self,
        id: ChannelId,
        f: impl FnOnce(&mut FakeChannel) -> Status<R>,
    ) -> Status<R> {
        let mut state = self.state.borrow_mut();
        match state.channels.get_mut(&id) {
            Some(channel) if !channel.freed => f(channel),
            _ => state.fail(codes::BAD_USE, "unknown channel"),
        }
    }
}

fn fake_digest(hash: HashType) -> Vec<u8> {
    (0..hash.digest_len()).map(|i| (i as u8).wrapping_mul(17)).collect()
}

impl Transport for FakeTransport {
    fn last_error(&self) -> Option<String> {
        self.state.borrow().last_error.clone()
    }

    fn handshake(&mut self, _socket: TcpStream) -> Status<()> {
        let mut state = self.state.borrow_mut();
        state.handshakes += 1;
        match state.handshake_error {
            Some(code) => state.fail(code, "Unable to exchange encryption keys"),
            None => Ok(()),
        }
    }

    fn userauth_password(&mut self, user: &str, password: &str) -> Status<()> {
        let mut state = self.state.borrow_mut();
        let accepted = state
            .credentials
            .as_ref()
            .map_or(false, |(u, p)| u == user && p == password);
        if accepted {
            state.authenticated = true;
            Ok(())
        } else {
            state.fail(
                codes::AUTHENTICATION_FAILED,
                "Authentication failed (username/password)",
            )
        }
    }

    fn userauth_pubkey_memory(
        &mut self,
        _user: &str,
        private_key: &str,
        _public_key: Option<&str>,
        _passphrase: Option<&str>,
    ) -> Status<()> {
        let mut state = self.state.borrow_mut();
        if state.accept_pubkey && !private_key.is_empty() {
            state.authenticated = true;
            Ok(())
        } else {
            state.fail(codes::PUBLICKEY_UNVERIFIED, "Username/PublicKey combination invalid")
        }
    }

    fn userauth_pubkey_file(
        &mut self,
        _user: &str,
        private_key: &Path,
        _public_key: Option<&Path>,
        _passphrase: Option<&str>,
    ) -> Status<()> {
        let mut state = self.state.borrow_mut();
        if !private_key.exists() {
            return state.fail(codes::FILE, "Unable to open private key file");
        }
        if state.accept_pubkey {
            state.authenticated = true;
            Ok(())
        } else {
            state.fail(codes::PUBLICKEY_UNVERIFIED, "Username/PublicKey combination invalid")
        }
    }

    fn userauth_agent(&mut self, _user: &str) -> Status<()> {
        let mut state = self.state.borrow_mut();
        if state.accept_agent {
            state.authenticated = true;
            Ok(())
        } else {
            state.fail(codes::AUTHENTICATION_FAILED, "agent offered no accepted identity")
        }
    }

    fn userauth_list(&mut self, _user: &str) -> Status<Option<String>> {
        let mut state = self.state.borrow_mut();
        if state.accept_none {
            state.authenticated = true;
            return Ok(None);
        }
        Ok(state.auth_methods.clone())
    }

    fn authenticated(&self) -> bool {
        self.state.borrow().authenticated
    }

    fn host_key_hash(&self, hash: HashType) -> Option<Vec<u8>> {
        let state = self.state.borrow();
        state.host_key.as_ref().map(|_| fake_digest(hash))
    }

    fn host_key(&self) -> Option<HostKey> {
        self.state.borrow().host_key.clone()
    }

    fn disconnect(&mut self, reason: DisconnectReason, description: &str) -> Status<()> {
        let mut state = self.state.borrow_mut();
        state.disconnects.push((reason, description.to_string()));
        match state.disconnect_error {
            Some(code) => state.fail(code, "socket disconnected"),
            None => Ok(()),
        }
    }

    fn banner(&self) -> Option<String> {
        self.state.borrow().banner.clone()
    }

    fn set_banner(&mut self, banner: &str) -> Status<()> {
        self.state.borrow_mut().banner = Some(banner.to_string());
        Ok(())
    }

    fn block_directions(&self) -> BlockDirections {
        if self.state.borrow().blocking {
            BlockDirections::None
        } else {
            BlockDirections::Inbound
        }
    }

    fn is_blocking(&self) -> bool {
        self.state.borrow().blocking
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.state.borrow_mut().blocking = blocking;
    }

    fn timeout_ms(&self) -> u32 {
        self.state.borrow().timeout_ms
    }

    fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.state.borrow_mut().timeout_ms = timeout_ms;
    }

    fn set_sigpipe(&mut self, enable: bool) {
        self.state.borrow_mut().sigpipe = enable;
    }

    fn set_compress(&mut self, enable: bool) {
        self.state.borrow_mut().compress = enable;
    }

    fn set_method_pref(&mut self, method: MethodType, prefs: &str) -> Status<()> {
        let mut state = self.state.borrow_mut();
        if prefs.is_empty() {
            return state.fail(codes::METHOD_NOT_SUPPORTED, "The requested method(s) are not currently supported");
        }
        state.method_prefs.insert(method, prefs.to_string());
        Ok(())
    }

    fn methods(&self, method: MethodType) -> Option<String> {
        let state = self.state.borrow();
        state
            .method_prefs
            .get(&method)
            .and_then(|prefs| prefs.split(',').next())
            .map(str::to_string)
    }

    fn supported_algs(&self, method: MethodType) -> Status<Vec<String>> {
        match method {
            MethodType::Kex => Ok(vec![
                "curve25519-sha256".to_string(),
                "diffie-hellman-group14-sha256".to_string(),
            ]),
            MethodType::LangCs | MethodType::LangSc => self
                .state
                .borrow_mut()
                .fail(codes::METHOD_NOT_SUPPORTED, "method not supported"),
            _ => Ok(vec!["aes256-ctr".to_string()]),
        }
    }

    fn keepalive_send(&mut self) -> Status<u32> {
        let mut state = self.state.borrow_mut();
        state.keepalives_sent += 1;
        Ok(state.keepalive.map_or(0, |(_, interval)| interval))
    }

    fn set_keepalive(&mut self, want_reply: bool, interval: u32) {
        self.state.borrow_mut().keepalive = Some((want_reply, interval));
    }

    fn known_hosts_init(&mut self) -> Status<KnownHostsId> {
        let mut state = self.state.borrow_mut();
        let id = KnownHostsId(state.next_id());
        state.known_hosts.insert(id, Vec::new());
        Ok(id)
    }

    fn known_hosts_add(
        &mut self,
        id: KnownHostsId,
        host: &str,
        key: &[u8],
        _comment: &str,
        _key_type: HostKeyType,
    ) -> Status<()> {
        let mut state = self.state.borrow_mut();
        match state.known_hosts.get_mut(&id) {
            Some(entries) => {
                entries.push((host.to_string(), key.to_vec()));
                Ok(())
            }
            None => state.fail(codes::BAD_USE, "unknown known_hosts handle"),
        }
    }

    fn known_hosts_check(&mut self, id: KnownHostsId, host: &str, port: u16, key: &[u8]) -> CheckResult {
        let state = self.state.borrow();
        let Some(entries) = state.known_hosts.get(&id) else {
            return CheckResult::Failure;
        };
        let name = if port == 22 {
            host.to_string()
        } else {
            format!("[{}]:{}", host, port)
        };
        match entries.iter().find(|(entry, _)| *entry == name) {
            Some((_, stored)) if stored == key => CheckResult::Match,
            Some(_) => CheckResult::Mismatch,
            None => CheckResult::NotFound,
        }
    }

    fn known_hosts_remove(&mut self, id: KnownHostsId, host: &str) -> Status<usize> {
        let mut state = self.state.borrow_mut();
        match state.known_hosts.get_mut(&id) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|(name, _)| name != host);
                Ok(before - entries.len())
            }
            None => state.fail(codes::BAD_USE, "unknown known_hosts handle"),
        }
    }

    fn known_hosts_entries(&mut self, id: KnownHostsId) -> Status<Vec<KnownHostEntry>> {
        let state = self.state.borrow();
        Ok(state
            .known_hosts
            .get(&id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(name, key)| KnownHostEntry {
                        name: Some(name.clone()),
                        key: String::from_utf8_lossy(key).to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn known_hosts_read_file(&mut self, _id: KnownHostsId, path: &Path) -> Status<u32> {
        let mut state = self.state.borrow_mut();
        if path.exists() {
            Ok(0)
        } else {
            state.fail(codes::FILE, &format!("Failed to open file {}", path.display()))
        }
    }

    fn known_hosts_write_file(&mut self, _id: KnownHostsId, _path: &Path) -> Status<()> {
        Ok(())
    }

    fn known_hosts_free(&mut self, id: KnownHostsId) {
        let mut state = self.state.borrow_mut();
        state.known_hosts.remove(&id);
        state.released_known_hosts.push(id);
    }

    fn forward_listen(
        &mut self,
        host: Option<&str>,
        port: u16,
        queue_max: u32,
    ) -> Status<(ListenerId, u16)> {
        let mut state = self.state.borrow_mut();
        state.forwards.push((host.map(str::to_string), port, queue_max));
        let bound = if port == 0 { state.server_port } else { port };
        let id = ListenerId(state.next_id());
        state.pending.insert(id, VecDeque::new());
        Ok((id, bound))
    }

    fn listener_accept(&mut self, id: ListenerId) -> Status<ChannelId> {
        let mut state = self.state.borrow_mut();
        let next = state.pending.get_mut(&id).and_then(VecDeque::pop_front);
        match next {
            Some(channel) => {
                let channel_id = ChannelId(state.next_id());
                state.channels.insert(channel_id, channel);
                Ok(channel_id)
            }
            None if !state.blocking => state.fail(codes::EAGAIN, "Would block waiting for connection"),
            None => state.fail(codes::SOCKET_TIMEOUT, "Timed out waiting for connection"),
        }
    }

    fn listener_free(&mut self, id: ListenerId) {
        let mut state = self.state.borrow_mut();
        state.pending.remove(&id);
        state.released_listeners.push(id);
    }

    fn channel_open(
        &mut self,
        channel_type: &str,
        _window_size: u32,
        _packet_size: u32,
        _message: Option<&str>,
    ) -> Status<ChannelId> {
        let mut state = self.state.borrow_mut();
        if channel_type != "session" && channel_type != "direct-tcpip" {
            return state.fail(codes::CHANNEL_FAILURE, "Channel open failure (unknown channel type)");
        }
        let scripted = if channel_type == "session" {
            state.scripted.pop_front()
        } else {
            None
        };
        let channel = FakeChannel {
            channel_type: channel_type.to_string(),
            ..scripted.unwrap_or_default()
        };
        let id = ChannelId(state.next_id());
        state.channels.insert(id, channel);
        Ok(id)
    }

    fn channel_direct_tcpip(
        &mut self,
        host: &str,
        port: u16,
        _source: Option<(&str, u16)>,
    ) -> Status<ChannelId> {
        let message = format!("{}:{}", host, port);
        let id = self.channel_open("direct-tcpip", 0, 0, None)?;
        self.state
            .borrow_mut()
            .channels
            .get_mut(&id)
            .unwrap()
            .requests
            .push(("direct-tcpip".to_string(), Some(message)));
        Ok(id)
    }

    fn channel_read(&mut self, id: ChannelId, stream: ChannelStream, buf: &mut [u8]) -> Status<usize> {
        let blocking = self.state.borrow().blocking;
        let mut state = self.state.borrow_mut();
        let Some(channel) = state.channels.get_mut(&id).filter(|c| !c.freed) else {
            return state.fail(codes::BAD_USE, "unknown channel");
        };
        let held_open = channel.held_open;
        let (queue, other) = match stream {
            ChannelStream::Data => (&mut channel.data, &channel.stderr),
            ChannelStream::Stderr => (&mut channel.stderr, &channel.data),
        };
        let other_pending = !other.is_empty();
        match queue.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    queue.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if !blocking && held_open => state.fail(codes::EAGAIN, "Would block"),
            None if !blocking => Ok(0),
            // 另一个流积压时远端窗口已满, 阻塞读永远等不到数据
            None if other_pending || held_open => {
                state.fail(codes::SOCKET_TIMEOUT, "Timed out waiting on channel")
            }
            None => Ok(0),
        }
    }

    fn channel_write(&mut self, id: ChannelId, _stream: ChannelStream, buf: &[u8]) -> Status<usize> {
        self.channel_mut(id, |channel| {
            channel.written.extend_from_slice(buf);
            Ok(buf.len())
        })
    }

    fn channel_flush(&mut self, id: ChannelId) -> Status<()> {
        self.channel_mut(id, |_| Ok(()))
    }

    fn channel_process_startup(
        &mut self,
        id: ChannelId,
        request: &str,
        message: Option<&str>,
    ) -> Status<()> {
        self.channel_mut(id, |channel| {
            channel
                .requests
                .push((request.to_string(), message.map(str::to_string)));
            Ok(())
        })
    }

    fn channel_request_pty(&mut self, id: ChannelId, term: &str, _size: Option<(u32, u32)>) -> Status<()> {
        self.channel_mut(id, |channel| {
            channel
                .requests
                .push(("pty-req".to_string(), Some(term.to_string())));
            Ok(())
        })
    }

    fn channel_setenv(&mut self, id: ChannelId, name: &str, value: &str) -> Status<()> {
        self.channel_mut(id, |channel| {
            channel.env.push((name.to_string(), value.to_string()));
            Ok(())
        })
    }

    fn channel_send_eof(&mut self, id: ChannelId) -> Status<()> {
        self.channel_mut(id, |channel| {
            channel.eof_sent = true;
            Ok(())
        })
    }

    fn channel_eof(&self, id: ChannelId) -> bool {
        self.state
            .borrow()
            .channels
            .get(&id)
            .map_or(true, |channel| !channel.held_open && channel.data.is_empty())
    }

    fn channel_wait_close(&mut self, id: ChannelId) -> Status<()> {
        self.channel_mut(id, |_| Ok(()))
    }

    fn channel_exit_status(&self, id: ChannelId) -> Status<i32> {
        let mut state = self.state.borrow_mut();
        match state.channels.get(&id).map(|channel| channel.exit_status) {
            Some(status) => Ok(status),
            None => state.fail(codes::BAD_USE, "unknown channel"),
        }
    }

    fn channel_close(&mut self, id: ChannelId) -> Status<()> {
        self.channel_mut(id, |channel| {
            channel.closed = true;
            Ok(())
        })
    }

    fn channel_free(&mut self, id: ChannelId) {
        if let Some(channel) = self.state.borrow_mut().channels.get_mut(&id) {
            channel.freed = true;
        }
    }
}
