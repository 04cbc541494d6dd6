mod config;
mod dispatch;
mod messenger;
mod modules;
mod pipeline;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::messenger::console::ConsoleMessenger;
use crate::messenger::Messenger;
use crate::modules::factoid::FactoidResponder;
use crate::modules::say::SayResponder;
use crate::modules::seen::{SeenListener, SeenResponder};
use crate::modules::vars::VariableTransformer;
use crate::pipeline::{Listener, Responder, Transformer};
use crate::store::StoreProvider;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gabble=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Starting {}", config.bot_name);
    info!("  Database: {}", config.storage.database_path.display());
    info!("  Console channel: {}", config.console.channel);

    // One SQLite connection, one namespace per module
    let provider = StoreProvider::open(&config.storage.database_path)?;
    let seen_store = provider.data_store("seen").await?;
    let factoid_store = provider.data_store("factoids").await?;
    let vars_store = provider.data_store("vars").await?;

    let messenger = Arc::new(ConsoleMessenger::new(
        &config.console.channel,
        &config.console.user,
        &config.bot_name,
    ));

    // Stage registration order is dispatch order
    let listeners: Vec<Arc<dyn Listener>> = vec![Arc::new(SeenListener::new(seen_store.clone()))];
    let responders: Vec<Arc<dyn Responder>> = vec![
        Arc::new(SayResponder),
        Arc::new(SeenResponder::new(seen_store)),
        Arc::new(FactoidResponder::new(factoid_store)),
    ];
    let transformers: Vec<Arc<dyn Transformer>> =
        vec![Arc::new(VariableTransformer::new(vars_store))];

    let dispatcher = Arc::new(Dispatcher::new(
        listeners,
        responders,
        transformers,
        Arc::clone(&messenger) as Arc<dyn Messenger>,
    ));

    tokio::select! {
        result = dispatcher.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            messenger.disconnect().await;
            info!("Done.");
        }
    }

    Ok(())
}
