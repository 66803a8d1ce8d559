// SSH模块入口
pub mod channel;
pub mod client;
pub mod keepalive;
pub mod known_hosts;
pub mod listener;
pub mod options;
mod registry;
pub mod session;
pub mod ssh2_transport;
pub mod transport;

pub use channel::Channel;
pub use client::{exec, verify_host_key, CommandOutput, SshClient};
pub use keepalive::KeepaliveConfig;
pub use known_hosts::KnownHosts;
pub use listener::Listener;
pub use options::SessionOptions;
pub use session::{Session, SessionState, DEFAULT_PACKET_SIZE, DEFAULT_QUEUE_MAX, DEFAULT_WINDOW_SIZE};
pub use ssh2_transport::Ssh2Transport;
pub use transport::{
    BlockDirections, ChannelId, ChannelStream, CheckResult, DisconnectReason, HashType, HostKey,
    HostKeyType, KnownHostEntry, KnownHostsId, ListenerId, MethodType, Status, Transport,
};
