use crate::types::{Channel, OutboundMessage};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The surface this adapter delivers to.
    fn channel(&self) -> Channel;

    /// Send a message to a user on this platform. Fire and forget: failures
    /// surface to the caller but are never retried here.
    async fn send(&self, recipient_id: &str, message: OutboundMessage) -> Result<()>;
}
