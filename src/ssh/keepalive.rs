// 心跳配置

/// Keepalive cadence applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub want_reply: bool,
    /// Seconds between keepalives; 0 disables them.
    pub interval: u32,
}

impl KeepaliveConfig {
    /// An interval of exactly 1 second is raised to 2.
    pub fn new(want_reply: bool, interval: u32) -> Self {
        let interval = if interval == 1 { 2 } else { interval };
        Self {
            want_reply,
            interval,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval > 0
    }
}
