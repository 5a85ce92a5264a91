use std::sync::Arc;

use teloxide::dispatching::UpdateHandler;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::MaybeAnonymousUser;
use teloxide::types::Message;
use teloxide::types::PollAnswer;
use tracing::debug;
use tracing::instrument;

use crate::bot::HandlerResult;
use crate::bot::context::AppContext;
use crate::bot::engine;

type SharedContext = Arc<AppContext>;

pub fn build_schema() -> UpdateHandler<anyhow::Error> {
  let message_handler = Update::filter_message().endpoint(handle_message);
  let poll_answer_handler = Update::filter_poll_answer().endpoint(handle_poll_answer);

  dptree::entry().branch(message_handler).branch(poll_answer_handler)
}

#[instrument(skip(ctx, msg), fields(chat_id = %msg.chat.id))]
async fn handle_message(ctx: SharedContext, msg: Message) -> HandlerResult {
  let Some(text) = msg.text() else {
    debug!("ignoring message without text");
    return Ok(());
  };
  let display_name = msg
    .from
    .as_ref()
    .and_then(|user| user.username.clone())
    .unwrap_or_default();
  engine::handle_message(&ctx, msg.chat.id.0, &display_name, text).await
}

#[instrument(skip(ctx, answer), fields(poll_id = %answer.poll_id))]
async fn handle_poll_answer(ctx: SharedContext, answer: PollAnswer) -> HandlerResult {
  let display_name = match &answer.voter {
    MaybeAnonymousUser::User(user) => user.username.clone().unwrap_or_default(),
    MaybeAnonymousUser::Chat(_) => String::new(),
  };
  let options: Vec<usize> = answer.option_ids.iter().map(|id| *id as usize).collect();
  engine::handle_poll_answer(&ctx, &answer.poll_id.to_string(), &display_name, &options).await
}
