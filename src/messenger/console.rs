use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::messenger::Messenger;
use crate::pipeline::Message;

const INBOUND_BUFFER: usize = 64;

/// Chat transport backed by the local terminal: stdin lines become
/// inbound messages on a fixed channel, outbound sends are printed to
/// stdout. Mostly useful for trying modules out without a real
/// network connection.
pub struct ConsoleMessenger {
    channel: String,
    user: String,
    bot_name: String,
    sender: mpsc::Sender<Message>,
    inbound: Mutex<Option<mpsc::Receiver<Message>>>,
    history: Arc<Mutex<Vec<Message>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// "/me waves" is the emote convention; everything else is plain text.
fn split_emote(line: &str) -> (&str, bool) {
    match line.strip_prefix("/me ") {
        Some(rest) => (rest, true),
        None => (line, false),
    }
}

impl ConsoleMessenger {
    pub fn new(
        channel: impl Into<String>,
        user: impl Into<String>,
        bot_name: impl Into<String>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(INBOUND_BUFFER);
        Self {
            channel: channel.into(),
            user: user.into(),
            bot_name: bot_name.into(),
            sender,
            inbound: Mutex::new(Some(receiver)),
            history: Arc::new(Mutex::new(Vec::new())),
            reader: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn connect(&self) -> Result<bool> {
        let mut reader = self.reader.lock().await;
        if reader.is_some() {
            return Ok(true);
        }

        let channel = self.channel.clone();
        let user = self.user.clone();
        let sender = self.sender.clone();
        let history = Arc::clone(&self.history);

        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim_end();
                        if line.is_empty() {
                            continue;
                        }
                        let (text, action) = split_emote(line);
                        let message = Message {
                            channel: channel.clone(),
                            user: user.clone(),
                            text: text.to_string(),
                            action,
                        };
                        history.lock().await.push(message.clone());
                        if sender.send(message).await.is_err() {
                            debug!("Inbound channel closed, stopping console reader");
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("Console input reached EOF");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read console input: {}", e);
                        break;
                    }
                }
            }
        });

        *reader = Some(handle);
        info!("Console messenger connected on {}", self.channel);
        Ok(true)
    }

    async fn disconnect(&self) {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        info!("Console messenger disconnected");
    }

    async fn send_message(&self, channel: &str, text: &str, action: bool) -> Result<()> {
        if action {
            println!("[{}] * {} {}", channel, self.bot_name, text);
        } else {
            println!("[{}] <{}> {}", channel, self.bot_name, text);
        }
        Ok(())
    }

    async fn message_history(&self, channel: &str, user: Option<&str>) -> Result<Vec<Message>> {
        let history = self.history.lock().await;
        Ok(history
            .iter()
            .filter(|m| m.channel == channel)
            .filter(|m| user.map_or(true, |u| m.user == u))
            .cloned()
            .collect())
    }

    async fn subscribe(&self) -> Option<mpsc::Receiver<Message>> {
        self.inbound.lock().await.take()
    }
}
