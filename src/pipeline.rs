use anyhow::Result;
use async_trait::async_trait;

/// An inbound message from the connected chat transport.
///
/// Immutable for the duration of one dispatch cycle; stages only ever
/// see a shared reference.
#[derive(Debug, Clone)]
pub struct Message {
    /// Channel the message arrived on (e.g. "#general")
    pub channel: String,
    /// User who sent it
    pub user: String,
    /// Raw text body
    pub text: String,
    /// True for an emote ("/me waves") rather than a plain message
    pub action: bool,
}

/// An outbound reply, produced by a responder and threaded through the
/// transformers before the dispatch engine sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub channel: String,
    pub text: String,
    pub action: bool,
}

impl Response {
    /// Plain reply on the channel the message arrived on.
    pub fn to(message: &Message, text: impl Into<String>) -> Self {
        Self {
            channel: message.channel.clone(),
            text: text.into(),
            action: false,
        }
    }

    /// Emote reply on the channel the message arrived on.
    pub fn emote(message: &Message, text: impl Into<String>) -> Self {
        Self {
            channel: message.channel.clone(),
            text: text.into(),
            action: true,
        }
    }
}

/// Side-effect-only stage: observes every inbound message.
///
/// Listeners run concurrently with each other and cannot influence the
/// rest of the cycle; a failing listener is logged and ignored.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Short stage name used in log output.
    fn name(&self) -> &str;

    async fn observe(&self, message: &Message) -> Result<()>;
}

/// Stage that may answer a message.
///
/// Responders run sequentially in registration order; the first one to
/// return `Some` wins and the rest are skipped. Returning `None` is
/// the normal "not mine" case, not an error.
#[async_trait]
pub trait Responder: Send + Sync {
    fn name(&self) -> &str;

    async fn respond(&self, message: &Message) -> Result<Option<Response>>;
}

/// Stage that rewrites an outbound response before it is sent.
///
/// Transformers run sequentially in registration order, each receiving
/// the previous one's output. A failing transformer acts as identity.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    async fn transform(&self, response: Response) -> Result<Response>;
}
