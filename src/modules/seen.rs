use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::pipeline::{Listener, Message, Responder, Response};
use crate::store::DataStore;

/// Records the last sighting of every speaker, one record per user.
pub struct SeenListener {
    store: DataStore,
}

impl SeenListener {
    pub fn new(store: DataStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Listener for SeenListener {
    fn name(&self) -> &str {
        "seen"
    }

    async fn observe(&self, message: &Message) -> Result<()> {
        let sighting = format!(
            "{} in {} saying: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            message.channel,
            message.text
        );
        self.store.set_single(&message.user, &sighting).await?;
        Ok(())
    }
}

/// Answers `seen <user>` from the recorded sightings. The user
/// argument may itself be a pattern ("seen ali%").
pub struct SeenResponder {
    store: DataStore,
}

impl SeenResponder {
    pub fn new(store: DataStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Responder for SeenResponder {
    fn name(&self) -> &str {
        "seen"
    }

    async fn respond(&self, message: &Message) -> Result<Option<Response>> {
        let Some(user) = message.text.strip_prefix("seen ") else {
            return Ok(None);
        };
        let user = user.trim();
        if user.is_empty() {
            return Ok(None);
        }

        let reply = match self.store.get_single(user).await? {
            Some(record) => format!("{} was last seen {}", record.key, record.value),
            None => format!("I haven't seen {}.", user),
        };
        Ok(Some(Response::to(message, reply)))
    }
}
