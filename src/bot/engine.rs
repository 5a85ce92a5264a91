//! Runs conversation steps for one chat at a time and carries out their effects.

use std::time::Instant;

use anyhow::Result;
use chrono::Local;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::bot::context::AppContext;
use crate::bot::machine;
use crate::bot::machine::AdminAction;
use crate::bot::machine::Effect;
use crate::bot::machine::Event;
use crate::bot::machine::StepContext;
use crate::bot::messages;
use crate::cache::FlushReport;
use crate::config;
use crate::config::AppConfig;
use crate::config::RuntimeSettings;
use crate::delivery;
use crate::models::Registration;

#[instrument(skip(ctx, text))]
pub async fn handle_message(ctx: &AppContext, chat_id: i64, display_name: &str, text: &str) -> Result<()> {
  let event = Event::Text {
    text: text.to_string(),
    display_name: display_name.to_string(),
  };
  process(ctx, chat_id, event).await
}

#[instrument(skip(ctx))]
pub async fn handle_poll_answer(ctx: &AppContext, poll_id: &str, display_name: &str, options: &[usize]) -> Result<()> {
  if options.is_empty() {
    debug!(poll_id, "vote retracted, waiting for a new answer");
    return Ok(());
  }
  let Some(poll) = ctx.polls.take(poll_id) else {
    debug!(poll_id, "answer to an unknown poll");
    return Ok(());
  };
  let event = Event::PollAnswer {
    kind: poll.kind,
    display_name: display_name.to_string(),
    options: options.to_vec(),
  };
  process(ctx, poll.chat_id, event).await
}

async fn process(ctx: &AppContext, chat_id: i64, event: Event) -> Result<()> {
  let handle = ctx.sessions.get_or_create(chat_id);
  let mut session = handle.lock().await;
  session.touch(Instant::now());

  let settings = ctx.settings();
  let shelters = ctx.shelters();
  let step_ctx = StepContext {
    shelters: &shelters,
    today: Local::now().date_naive(),
    is_admin: ctx.is_admin(chat_id),
    bot_username: &ctx.bot_username,
  };
  let previous = session.stage;
  let effects = machine::step(&mut session, event, &step_ctx);
  if previous != session.stage {
    info!(chat_id, from = %previous, to = %session.stage, "stage changed");
  }

  for effect in effects {
    if let Err(err) = execute(ctx, chat_id, effect, &settings).await {
      warn!(chat_id, error = %err, "failed to carry out conversation effect");
    }
  }
  Ok(())
}

async fn execute(ctx: &AppContext, chat_id: i64, effect: Effect, settings: &RuntimeSettings) -> Result<()> {
  match effect {
    Effect::Send(message) => ctx.messenger.send_message(chat_id, &message).await,
    Effect::Poll(kind) => {
      let poll_id = ctx.messenger.send_poll(chat_id, kind).await?;
      debug!(chat_id, poll_id = %poll_id, ?kind, "poll sent");
      ctx.polls.insert(poll_id, chat_id, kind);
      Ok(())
    },
    Effect::Complete(registration) => complete_registration(ctx, chat_id, registration, settings).await,
    Effect::Admin(action) => run_admin(ctx, chat_id, action, settings).await,
  }
}

/// Queues the registration behind any older undelivered ones from the same chat, then tries to
/// deliver the whole queue in order.
#[instrument(skip(ctx, registration, settings))]
async fn complete_registration(
  ctx: &AppContext,
  chat_id: i64,
  mut registration: Registration,
  settings: &RuntimeSettings,
) -> Result<()> {
  let Some(id) = registration.derive_id(chat_id) else {
    error!(chat_id, "completed registration has no shelter or date, not storing it");
    return Ok(());
  };
  if ctx.store.pending_for(chat_id).contains(&id) {
    ctx.store.delete(&id, chat_id);
  }
  registration.id = id.clone();
  ctx.store.put(chat_id, registration);
  info!(chat_id, registration_id = %id, "registration stored");

  let report = flush_chat(ctx, chat_id, settings).await;
  if report.remaining > 0 {
    warn!(chat_id, remaining = report.remaining, "registrations left undelivered");
    notify_admin(ctx, settings, messages::DELIVERY_FAILED).await;
  }
  Ok(())
}

async fn flush_chat(ctx: &AppContext, chat_id: i64, settings: &RuntimeSettings) -> FlushReport {
  ctx
    .store
    .flush_chat(chat_id, |record| deliver_queued(ctx, settings, record))
    .await
}

async fn flush_all(ctx: &AppContext, settings: &RuntimeSettings) -> FlushReport {
  let report = ctx
    .store
    .flush_all(|record| deliver_queued(ctx, settings, record))
    .await;
  info!(delivered = report.delivered, remaining = report.remaining, "flushed pending registrations");
  report
}

/// Delivers a queued record; after a failure the sheets it did reach are written back to the
/// store so the next attempt skips them.
async fn deliver_queued(ctx: &AppContext, settings: &RuntimeSettings, mut record: Registration) -> bool {
  let delivered = delivery::deliver(
    ctx.sink.as_ref(),
    &settings.targets,
    Some(&mut record),
    settings.delivery_timeout,
  )
  .await;
  if !delivered && !record.written_to.is_empty() {
    ctx.store.update(record);
  }
  delivered
}

/// Retries every pending registration; used after the backend comes back.
pub async fn retry_pending(ctx: &AppContext) -> FlushReport {
  let settings = ctx.settings();
  flush_all(ctx, &settings).await
}

async fn notify_admin(ctx: &AppContext, settings: &RuntimeSettings, text: &str) {
  let Some(admin) = settings.admin_chat_id else {
    warn!(text, "no admin chat configured, dropping notification");
    return;
  };
  if let Err(err) = ctx.messenger.send_message(admin, &messages::error(text)).await {
    error!(admin, error = %err, "failed to notify admin");
  }
}

#[instrument(skip(ctx, action, settings))]
async fn run_admin(ctx: &AppContext, chat_id: i64, action: AdminAction, settings: &RuntimeSettings) -> Result<()> {
  let reply = match action {
    AdminAction::ReloadShelters => match config::load_shelters(&ctx.sources.shelters_path) {
      Ok(shelters) => {
        let count = shelters.len();
        ctx.replace_shelters(shelters);
        info!(count, "shelter catalog reloaded");
        messages::shelters_reloaded(count)
      },
      Err(err) => {
        warn!(error = %format!("{err:#}"), "keeping previous shelter catalog");
        messages::admin_failure("Не удалось перечитать приюты", &format!("{err:#}"))
      },
    },
    AdminAction::ReloadConfig => match AppConfig::load(&ctx.sources.config_path) {
      Ok(config) => {
        ctx.replace_settings(config.runtime_settings());
        info!("runtime settings reloaded");
        messages::config_reloaded()
      },
      Err(err) => {
        warn!(error = %format!("{err:#}"), "keeping previous runtime settings");
        messages::admin_failure("Не удалось перечитать настройки", &format!("{err:#}"))
      },
    },
    AdminAction::RequestAuthUrl => match ctx.sink.authorization_url().await {
      Ok(url) => messages::auth_code_prompt(&url),
      Err(err) => messages::admin_failure("Не удалось получить ссылку авторизации", &err),
    },
    AdminAction::ExchangeAuthCode(code) => match ctx.sink.authorize(&code).await {
      Ok(()) => {
        info!("spreadsheet authorization updated");
        ctx.messenger.send_message(chat_id, &messages::error(messages::AUTH_UPDATED)).await?;
        flush_all(ctx, settings).await;
        return Ok(());
      },
      Err(err) => messages::admin_failure("Не удалось обновить токен", &err),
    },
    AdminAction::ClearCache => {
      let report = flush_all(ctx, settings).await;
      let dropped = ctx.store.clear();
      if dropped > 0 {
        warn!(dropped, "dropped undelivered registrations");
      }
      messages::cache_cleared(report.delivered, dropped)
    },
  };
  ctx.messenger.send_message(chat_id, &reply).await
}
