//! Response output abstraction.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Where a session writes its response bytes.
///
/// A sink that reports [`PacketSink::is_closed`] (or fails a send with
/// [`crate::GitError::ClientDisconnected`]) stops pack serialization.
#[async_trait]
pub trait PacketSink: Send {
    /// Sends bytes to the client.
    async fn send(&mut self, bytes: Bytes) -> Result<()>;

    /// Returns true once the client has gone away.
    fn is_closed(&self) -> bool;
}

#[async_trait]
impl PacketSink for Vec<u8> {
    async fn send(&mut self, bytes: Bytes) -> Result<()> {
        self.extend_from_slice(&bytes);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}
