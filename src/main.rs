mod api;
mod bot;
mod callback;
mod commands;
mod config;
mod database;
mod doi;
mod error;
mod events;
mod models;
mod notify;
mod resolver;
mod schema;
mod storage;
mod telegram;

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate serde_derive;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clokwerk::AsyncScheduler;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::bot::Bot;
use crate::config::{Config, Thresholds};
use crate::database::Database;
use crate::resolver::{CrossrefResolver, DoiResolver, NoLookup};
use crate::storage::LocalFileStore;
use crate::telegram::{TelegramApi, UpdateFetcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(err) = dotenv::dotenv() {
        eprintln!("No .env loaded: {}", err);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!("Starting sciarticle-bot {}", env!("GIT_HASH"));

    let db = Database::new(&config.database_url, config.database_pool_size)
        .context("Failed to open the database")?;
    let bot_api = TelegramApi::new(&config.telegram_api_url, &config.telegram_token, config.http_timeout)?;
    let me = bot_api.get_me().await.context("Failed to reach Telegram")?;
    info!("Connected as {}", telegram::handle(&me));

    let store = LocalFileStore::new(&config.storage_dir).await?;
    let resolver: Arc<dyn DoiResolver> = if config.doi_lookup {
        Arc::new(CrossrefResolver::new(&config.crossref_api_url, config.http_timeout)?)
    } else {
        Arc::new(NoLookup)
    };

    let (thresholds_tx, thresholds_rx) = watch::channel(config.thresholds);
    let bot = Bot::new(db, Arc::new(bot_api.clone()), Arc::new(store), resolver, thresholds_rx)
        .with_username(me.username);

    let mut scheduler = AsyncScheduler::new();
    events::setup_schedulers(&mut scheduler, bot.clone(), config.expiry_sweep_minutes);
    tokio::spawn(async move {
        loop {
            scheduler.run_pending().await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    });

    let server = api::start_api(bot.clone(), &config.api_bind)?;
    let server_handle = server.handle();
    tokio::spawn(server);

    #[cfg(unix)]
    tokio::spawn(reload_thresholds(thresholds_tx));
    #[cfg(not(unix))]
    drop(thresholds_tx);

    let mut fetcher = UpdateFetcher::new(bot_api);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            update = fetcher.next_update() => {
                if let Some(update) = update {
                    tokio::spawn(bot.clone().handle_update(update));
                }
            }
        }
    }

    server_handle.stop(true).await;
    Ok(())
}

/// Re-reads the reward thresholds on SIGHUP.
#[cfg(unix)]
async fn reload_thresholds(sender: watch::Sender<Thresholds>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(err) => {
            warn!("Threshold reload disabled: {}", err);
            return;
        }
    };
    while hangup.recv().await.is_some() {
        match Thresholds::load() {
            Ok(thresholds) => {
                info!(
                    "Reloaded thresholds: {} uploads, {} validations",
                    thresholds.uploads, thresholds.validations
                );
                if sender.send(thresholds).is_err() {
                    return;
                }
            }
            Err(err) => error!("Keeping previous thresholds: {:#}", err),
        }
    }
}
