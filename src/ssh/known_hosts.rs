// known_hosts 绑定
use super::registry::Handle;
use super::session::Session;
use super::ssh2_transport::Ssh2Transport;
use super::transport::{CheckResult, HostKey, HostKeyType, KnownHostEntry, KnownHostsId, Transport};
use crate::utils::error::Result;
use std::path::Path;

/// Host-key trust store bound to a [`Session`].
pub struct KnownHosts<'s, T: Transport = Ssh2Transport> {
    session: &'s Session<T>,
    id: KnownHostsId,
}

impl<'s, T: Transport> KnownHosts<'s, T> {
    pub(crate) fn new(session: &'s Session<T>, id: KnownHostsId) -> Self {
        Self { session, id }
    }

    fn handle(&self) -> Handle {
        Handle::KnownHosts(self.id)
    }

    /// Loads entries from an OpenSSH known_hosts file. Returns how many were read.
    pub fn read_file(&mut self, path: &Path) -> Result<u32> {
        let id = self.id;
        self.session
            .child_call(self.handle(), |t| t.known_hosts_read_file(id, path))
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        let id = self.id;
        self.session
            .child_call(self.handle(), |t| t.known_hosts_write_file(id, path))
    }

    pub fn add(&mut self, host: &str, key: &[u8], comment: &str, key_type: HostKeyType) -> Result<()> {
        let id = self.id;
        self.session.child_call(self.handle(), |t| {
            t.known_hosts_add(id, host, key, comment, key_type)
        })
    }

    pub fn add_host_key(&mut self, host: &str, host_key: &HostKey, comment: &str) -> Result<()> {
        self.add(host, &host_key.key, comment, host_key.key_type)
    }

    pub fn check(&self, host: &str, port: u16, key: &[u8]) -> Result<CheckResult> {
        let id = self.id;
        self.session
            .child_call(self.handle(), |t| Ok(t.known_hosts_check(id, host, port, key)))
    }

    /// Checks the key the session's server presented during the handshake.
    pub fn check_session_host(&self, host: &str, port: u16) -> Result<CheckResult> {
        match self.session.hostkey() {
            Some(host_key) => self.check(host, port, &host_key.key),
            None => Ok(CheckResult::Failure),
        }
    }

    /// Removes all entries for `host`. Returns how many were removed.
    pub fn remove(&mut self, host: &str) -> Result<usize> {
        let id = self.id;
        self.session
            .child_call(self.handle(), |t| t.known_hosts_remove(id, host))
    }

    pub fn entries(&self) -> Result<Vec<KnownHostEntry>> {
        let id = self.id;
        self.session
            .child_call(self.handle(), |t| t.known_hosts_entries(id))
    }
}

impl<T: Transport> Drop for KnownHosts<'_, T> {
    fn drop(&mut self) {
        self.session.release(self.handle());
    }
}
