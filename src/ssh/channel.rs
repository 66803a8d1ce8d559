// SSH通道
use super::registry::Handle;
use super::session::Session;
use super::ssh2_transport::Ssh2Transport;
use super::transport::{ChannelId, ChannelStream, Status, Transport};
use crate::utils::error::{Result, StateError};
use log::debug;
use std::fmt;
use std::io;

/// A logical stream multiplexed inside a [`Session`].
///
/// Channels from [`Session::open_channel`] are not closed automatically;
/// call [`Channel::close`] or use [`Session::with_session`].
pub struct Channel<'s, T: Transport = Ssh2Transport> {
    session: &'s Session<T>,
    id: ChannelId,
    closed: bool,
}

impl<'s, T: Transport> fmt::Debug for Channel<'s, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<'s, T: Transport> Channel<'s, T> {
    pub(crate) fn new(session: &'s Session<T>, id: ChannelId) -> Self {
        Self {
            session,
            id,
            closed: false,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn handle(&self) -> Handle {
        Handle::Channel(self.id)
    }

    fn call<R>(&self, f: impl FnOnce(&mut T, ChannelId) -> Status<R>) -> Result<R> {
        if self.closed {
            return Err(StateError::ChannelClosed.into());
        }
        let id = self.id;
        self.session.child_call(self.handle(), |t| f(t, id))
    }

    // 非阻塞模式下无数据可读/无空间可写时返回 None
    fn would_block<R>(result: Result<R>) -> Result<Option<R>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_would_block() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Reads from the data stream. `Some(0)` is end of file; `None` means a
    /// non-blocking session had nothing to read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        Self::would_block(self.call(|t, id| t.channel_read(id, ChannelStream::Data, buf)))
    }

    /// Reads from the extended-data (stderr) stream.
    pub fn read_stderr(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        Self::would_block(self.call(|t, id| t.channel_read(id, ChannelStream::Stderr, buf)))
    }

    /// Writes to the data stream. `None` means a non-blocking session had no
    /// window space.
    pub fn write(&mut self, buf: &[u8]) -> Result<Option<usize>> {
        Self::would_block(self.call(|t, id| t.channel_write(id, ChannelStream::Data, buf)))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.call(|t, id| t.channel_flush(id))
    }

    pub fn exec(&mut self, command: &str) -> Result<()> {
        debug!("channel {:?}: exec {}", self.id, command);
        self.call(|t, id| t.channel_process_startup(id, "exec", Some(command)))
    }

    pub fn shell(&mut self) -> Result<()> {
        self.call(|t, id| t.channel_process_startup(id, "shell", None))
    }

    pub fn subsystem(&mut self, name: &str) -> Result<()> {
        self.call(|t, id| t.channel_process_startup(id, "subsystem", Some(name)))
    }

    /// Requests a pseudo-terminal; `size` is `(columns, rows)`.
    pub fn request_pty(&mut self, term: &str, size: Option<(u32, u32)>) -> Result<()> {
        self.call(|t, id| t.channel_request_pty(id, term, size))
    }

    pub fn setenv(&mut self, name: &str, value: &str) -> Result<()> {
        self.call(|t, id| t.channel_setenv(id, name, value))
    }

    pub fn send_eof(&mut self) -> Result<()> {
        self.call(|t, id| t.channel_send_eof(id))
    }

    /// True once the remote side has sent EOF. Closed or invalidated
    /// channels report EOF.
    pub fn eof(&self) -> bool {
        if self.closed {
            return true;
        }
        let id = self.id;
        self.session
            .child_query(self.handle(), |t| t.channel_eof(id))
            .unwrap_or(true)
    }

    /// Blocks until the remote side closes the channel.
    pub fn wait_close(&mut self) -> Result<()> {
        self.call(|t, id| t.channel_wait_close(id))
    }

    /// Exit status reported by the remote process, valid after
    /// [`Channel::wait_close`].
    pub fn exit_status(&self) -> Result<i32> {
        self.call(|t, id| t.channel_exit_status(id))
    }

    /// Closes the channel. Calling it again is a no-op.
    ///
    /// After the session has disconnected nothing is sent; the handle is
    /// left for the session to release at teardown.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.session.is_invalidated(self.handle()) {
            debug!("channel {:?} closed after disconnect", self.id);
            return Ok(());
        }
        let id = self.id;
        let result = self.session.child_call(self.handle(), |t| t.channel_close(id));
        self.session.release(self.handle());
        debug!("channel {:?} closed", id);
        result
    }
}

impl<T: Transport> Drop for Channel<'_, T> {
    fn drop(&mut self) {
        if !self.closed {
            debug!("channel {:?} dropped without close", self.id);
        }
    }
}

impl<T: Transport> io::Read for Channel<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Channel::read(self, buf)? {
            Some(n) => Ok(n),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl<T: Transport> io::Write for Channel<'_, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match Channel::write(self, buf)? {
            Some(n) => Ok(n),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Channel::flush(self)?;
        Ok(())
    }
}
