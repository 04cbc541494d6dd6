pub mod console;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::pipeline::Message;

/// A connected chat transport. Produces inbound messages and accepts
/// outbound sends; everything protocol-specific lives behind this
/// trait.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Establish the connection. `Ok(false)` means the transport is
    /// unreachable; callers must not subscribe in that case.
    async fn connect(&self) -> Result<bool>;

    /// Tear the connection down.
    async fn disconnect(&self);

    /// Deliver a message to a channel. `action` marks an emote.
    async fn send_message(&self, channel: &str, text: &str, action: bool) -> Result<()>;

    /// Recent messages on a channel, optionally narrowed to one user.
    #[allow(dead_code)]
    async fn message_history(&self, channel: &str, user: Option<&str>) -> Result<Vec<Message>>;

    /// Hand over the inbound message stream. Yields `Some` exactly
    /// once; call after a successful `connect`. Delivery through the
    /// channel supports overlapping dispatch cycles.
    async fn subscribe(&self) -> Option<mpsc::Receiver<Message>>;
}
