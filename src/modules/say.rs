use anyhow::Result;
use async_trait::async_trait;

use crate::pipeline::{Message, Responder, Response};

/// Echoes back whatever follows `say` (or `emote`, as an action).
pub struct SayResponder;

#[async_trait]
impl Responder for SayResponder {
    fn name(&self) -> &str {
        "say"
    }

    async fn respond(&self, message: &Message) -> Result<Option<Response>> {
        if let Some(rest) = message.text.strip_prefix("say ") {
            return Ok(Some(Response::to(message, rest)));
        }
        if let Some(rest) = message.text.strip_prefix("emote ") {
            return Ok(Some(Response::emote(message, rest)));
        }
        Ok(None)
    }
}
