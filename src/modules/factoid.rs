use anyhow::Result;
use async_trait::async_trait;

use crate::pipeline::{Message, Responder, Response};
use crate::store::DataStore;

/// Teaches and recalls factoids:
///
///   !learn <key> = <value>     remember one more value for a key
///   !forget <key> = <value>    drop matching values (patterns allowed)
///   !count <pattern>           how many factoids match
///   <key>?                     reply with a random value for the key
pub struct FactoidResponder {
    store: DataStore,
}

impl FactoidResponder {
    pub fn new(store: DataStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Responder for FactoidResponder {
    fn name(&self) -> &str {
        "factoid"
    }

    async fn respond(&self, message: &Message) -> Result<Option<Response>> {
        let text = message.text.trim();

        if let Some(rest) = text.strip_prefix("!learn ") {
            let Some((key, value)) = split_assignment(rest) else {
                return Ok(Some(Response::to(message, "Usage: !learn <key> = <value>")));
            };
            self.store.add(key, value).await?;
            return Ok(Some(Response::to(message, format!("Okay, learned {}.", key))));
        }

        if let Some(rest) = text.strip_prefix("!forget ") {
            let Some((key, value)) = split_assignment(rest) else {
                return Ok(Some(Response::to(message, "Usage: !forget <key> = <value>")));
            };
            let reply = if self.store.remove(key, value).await? {
                format!("Forgot {}.", key)
            } else {
                format!("I don't know {} = {}.", key, value)
            };
            return Ok(Some(Response::to(message, reply)));
        }

        if let Some(pattern) = text.strip_prefix("!count ") {
            let pattern = pattern.trim();
            let count = self.store.get_count(pattern).await?;
            return Ok(Some(Response::to(
                message,
                format!("{} factoid(s) match {}.", count, pattern),
            )));
        }

        if let Some(key) = text.strip_suffix('?') {
            let key = key.trim();
            if !key.is_empty() {
                if let Some(record) = self.store.get_random(key).await? {
                    return Ok(Some(Response::to(message, record.value)));
                }
            }
        }

        Ok(None)
    }
}

fn split_assignment(text: &str) -> Option<(&str, &str)> {
    let (key, value) = text.split_once('=')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}
