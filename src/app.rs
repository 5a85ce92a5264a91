use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use teloxide::dispatching::UpdateHandler;
use teloxide::dptree;
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::bot;
use crate::bot::AppContext;
use crate::bot::ConfigSources;
use crate::bot::TelegramMessenger;
use crate::bot::engine;
use crate::cache::PendingStore;
use crate::config;
use crate::config::AppConfig;
use crate::db::Db;
use crate::delivery::GoogleSheets;
use crate::delivery::oauth::OAuthClient;
use crate::models::Registration;

pub struct App {
  bot: Bot,
  context: Arc<AppContext>,
  handler: UpdateHandler<anyhow::Error>,
  db: Option<Db>,
  config: AppConfig,
}

impl App {
  pub async fn new(config: AppConfig, config_path: PathBuf) -> Result<Self> {
    let bot = Bot::new(config.bot_token()?);
    let me = bot.get_me().await.context("failed to authenticate the bot with Telegram")?;
    info!(username = me.username(), "bot identity confirmed");

    let shelters = config::load_shelters(&config.shelters_file)?;
    info!(count = shelters.len(), "shelter catalog loaded");

    let store = Arc::new(PendingStore::new());
    let db = open_cache(&config.cache.database_url, &store).await;

    let http = reqwest::Client::new();
    let oauth = OAuthClient::new(http.clone(), &config.google.credentials_file, &config.google.token_file);
    let sink = Arc::new(GoogleSheets::new(http, oauth));
    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));

    let sources = ConfigSources {
      config_path,
      shelters_path: config.shelters_file.clone(),
    };
    let context = AppContext::new(messenger, sink, store, shelters, config.runtime_settings(), sources)
      .with_bot_username(me.username());

    Ok(Self {
      bot,
      context: Arc::new(context),
      handler: bot::build_schema(),
      db,
      config,
    })
  }

  pub async fn run(self) -> Result<()> {
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    if let Some(db) = self.db.clone() {
      let every = Duration::from_secs(self.config.cache.snapshot_interval_secs.max(1));
      tracker.spawn(snapshot_loop(self.context.clone(), db, every, cancel.clone()));
    }
    tracker.spawn(sweep_loop(
      self.context.clone(),
      Duration::from_secs(self.config.sessions.idle_ttl_secs),
      Duration::from_secs(self.config.sessions.sweep_interval_secs.max(1)),
      cancel.clone(),
    ));
    if !self.context.store.is_empty() {
      let context = self.context.clone();
      tracker.spawn(async move {
        let report = engine::retry_pending(&context).await;
        info!(delivered = report.delivered, remaining = report.remaining, "retried registrations from the last run");
      });
    }

    let listener = Polling::builder(self.bot.clone())
      .timeout(self.config.polling_timeout())
      .build();
    Dispatcher::builder(self.bot.clone(), self.handler)
      .dependencies(dptree::deps![self.context.clone()])
      .enable_ctrlc_handler()
      .build()
      .dispatch_with_listener(listener, LoggingErrorHandler::with_custom_text("update listener failed"))
      .await;

    info!("dispatcher stopped, shutting down background tasks");
    cancel.cancel();
    tracker.close();
    tracker.wait().await;

    if let Some(db) = &self.db {
      db.save_snapshot(&self.context.store.snapshot())
        .await
        .context("failed to save the registration cache on shutdown")?;
      info!(pending = self.context.store.len(), "registration cache saved");
    }
    Ok(())
  }
}

/// Opens the snapshot database and restores the store from it. An unreadable database is moved
/// aside and replaced by an empty one so the store keeps being persisted.
async fn open_cache(database_url: &str, store: &PendingStore<Registration>) -> Option<Db> {
  let db = match Db::connect(database_url).await {
    Ok(db) => db,
    Err(err) => {
      warn!(database_url, error = %format!("{err:#}"), "registration cache unreadable, starting a fresh one");
      return fresh_cache(database_url).await;
    },
  };
  match db.load_snapshot::<Registration>().await {
    Ok(snapshot) => {
      store.restore(snapshot);
      info!(pending = store.len(), "registration cache restored");
      Some(db)
    },
    Err(err) => {
      warn!(error = %format!("{err:#}"), "failed to read registration cache, starting a fresh one");
      db.close().await;
      fresh_cache(database_url).await
    },
  }
}

async fn fresh_cache(database_url: &str) -> Option<Db> {
  match Db::recreate(database_url).await {
    Ok(db) => Some(db),
    Err(err) => {
      warn!(database_url, error = %format!("{err:#}"), "registration cache unavailable, running without persistence");
      None
    },
  }
}

async fn snapshot_loop(context: Arc<AppContext>, db: Db, every: Duration, cancel: CancellationToken) {
  let mut interval = tokio::time::interval(every);
  let mut saved = context.store.revision();
  loop {
    tokio::select! {
      _ = interval.tick() => {
        let revision = context.store.revision();
        if revision == saved {
          continue;
        }
        match db.save_snapshot(&context.store.snapshot()).await {
          Ok(()) => {
            saved = revision;
            debug!(revision, "registration cache snapshot written");
          },
          Err(err) => warn!(error = %format!("{err:#}"), "failed to write registration cache snapshot"),
        }
      }
      _ = cancel.cancelled() => break,
    }
  }
}

async fn sweep_loop(context: Arc<AppContext>, ttl: Duration, every: Duration, cancel: CancellationToken) {
  let mut interval = tokio::time::interval(every);
  loop {
    tokio::select! {
      _ = interval.tick() => {
        let now = Instant::now();
        let sessions = context.sessions.sweep_idle(now, ttl);
        let polls = context.polls.sweep(now, ttl);
        if sessions > 0 || polls > 0 {
          info!(sessions, polls, remaining = context.sessions.len(), "evicted idle conversation state");
        }
      }
      _ = cancel.cancelled() => break,
    }
  }
}
