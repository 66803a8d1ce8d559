// 远程端口转发监听
use super::channel::Channel;
use super::registry::Handle;
use super::session::Session;
use super::ssh2_transport::Ssh2Transport;
use super::transport::{ListenerId, Transport};
use crate::utils::error::Result;
use log::debug;

/// A remote port forward. The server queues inbound connections until they
/// are accepted.
pub struct Listener<'s, T: Transport = Ssh2Transport> {
    session: &'s Session<T>,
    id: ListenerId,
    bound_port: u16,
}

impl<'s, T: Transport> Listener<'s, T> {
    pub(crate) fn new(session: &'s Session<T>, id: ListenerId, bound_port: u16) -> Self {
        Self {
            session,
            id,
            bound_port,
        }
    }

    /// Port the server bound, which differs from the requested one when 0
    /// was requested.
    pub fn bound_port(&self) -> u16 {
        self.bound_port
    }

    /// Takes the next forwarded connection. In non-blocking mode an empty
    /// queue surfaces as an error for which `is_would_block()` is true.
    pub fn accept(&mut self) -> Result<Channel<'s, T>> {
        let listener = self.id;
        let id = self
            .session
            .child_call(Handle::Listener(listener), |t| t.listener_accept(listener))?;
        debug!("accepted forwarded connection on port {} as {:?}", self.bound_port, id);
        Ok(self.session.adopt_channel(id))
    }
}

impl<T: Transport> Drop for Listener<'_, T> {
    fn drop(&mut self) {
        debug!("cancelling remote forward on port {}", self.bound_port);
        self.session.release(Handle::Listener(self.id));
    }
}
