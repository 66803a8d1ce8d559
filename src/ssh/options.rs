// 握手前的会话选项
use super::session::Session;
use super::transport::{MethodType, Transport};
use crate::utils::error::Result;
use std::time::Duration;

/// Settings applied to a [`Session`] before its handshake.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Identification banner sent to the server.
    pub banner: Option<String>,
    pub blocking: bool,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub compression: bool,
    pub sigpipe: bool,
    /// `(want_reply, interval_secs)`.
    pub keepalive: Option<(bool, u32)>,
    /// Preference lists, applied in order.
    pub method_prefs: Vec<(MethodType, String)>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            banner: None,
            blocking: true,
            timeout: None,
            compression: false,
            sigpipe: false,
            keepalive: None,
            method_prefs: Vec::new(),
        }
    }
}

impl SessionOptions {
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn compression(mut self, enable: bool) -> Self {
        self.compression = enable;
        self
    }

    pub fn keepalive(mut self, want_reply: bool, interval: u32) -> Self {
        self.keepalive = Some((want_reply, interval));
        self
    }

    pub fn method_pref(mut self, method: MethodType, prefs: impl Into<String>) -> Self {
        self.method_prefs.push((method, prefs.into()));
        self
    }

    /// Applies every option. Must run before the handshake.
    pub fn apply<T: Transport>(&self, session: &Session<T>) -> Result<()> {
        if let Some(banner) = &self.banner {
            session.set_banner(banner)?;
        }
        session.set_enable_compression(self.compression)?;
        for (method, prefs) in &self.method_prefs {
            session.set_method_pref(*method, prefs)?;
        }
        session.set_enable_sigpipe(self.sigpipe);
        session.set_blocking(self.blocking);
        session.set_timeout(self.timeout);
        if let Some((want_reply, interval)) = self.keepalive {
            session.keepalive_config(want_reply, interval);
        }
        Ok(())
    }
}
