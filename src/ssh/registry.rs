// 子资源登记表
//
// 断开连接时只标记失效, 不关闭原生句柄; 原生句柄统一在 Session 析构时释放。
use super::transport::{ChannelId, KnownHostsId, ListenerId};
use crate::utils::error::StateError;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Handle {
    Channel(ChannelId),
    Listener(ListenerId),
    KnownHosts(KnownHostsId),
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    live: HashSet<Handle>,
    invalidated: HashSet<Handle>,
}

impl Registry {
    pub(crate) fn register(&mut self, handle: Handle) {
        self.live.insert(handle);
    }

    pub(crate) fn release(&mut self, handle: Handle) {
        self.live.remove(&handle);
        self.invalidated.remove(&handle);
    }

    pub(crate) fn check(&self, handle: Handle) -> Result<(), StateError> {
        if self.invalidated.contains(&handle) {
            return Err(StateError::Invalidated);
        }
        Ok(())
    }

    pub(crate) fn is_invalidated(&self, handle: Handle) -> bool {
        self.invalidated.contains(&handle)
    }

    /// Marks every live child invalid. Returns how many were affected.
    pub(crate) fn invalidate_all(&mut self) -> usize {
        let count = self.live.len();
        self.invalidated.extend(self.live.drain());
        count
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }
}
