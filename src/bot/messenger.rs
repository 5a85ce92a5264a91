use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::InputPollOption;
use teloxide::types::KeyboardButton;
use teloxide::types::KeyboardMarkup;
use teloxide::types::KeyboardRemove;
use teloxide::types::LinkPreviewOptions;
use teloxide::types::ParseMode;
use teloxide::types::ReplyMarkup;

use crate::bot::messages::Keyboard;
use crate::bot::messages::OutgoingMessage;
use crate::bot::messages::PollKind;

/// Outbound side of the chat transport.
#[async_trait]
pub trait Messenger: Send + Sync {
  async fn send_message(&self, chat_id: i64, message: &OutgoingMessage) -> Result<()>;

  /// Sends a non-anonymous poll and returns its id.
  async fn send_poll(&self, chat_id: i64, kind: PollKind) -> Result<String>;
}

pub struct TelegramMessenger {
  bot: Bot,
}

impl TelegramMessenger {
  pub fn new(bot: Bot) -> Self {
    Self { bot }
  }
}

fn reply_markup(keyboard: &Keyboard) -> ReplyMarkup {
  match keyboard {
    Keyboard::Remove => ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
    Keyboard::Reply(rows) => {
      let rows = rows
        .iter()
        .map(|row| row.iter().map(|label| KeyboardButton::new(label.clone())).collect::<Vec<_>>());
      ReplyMarkup::Keyboard(KeyboardMarkup::new(rows).resize_keyboard())
    },
  }
}

#[async_trait]
impl Messenger for TelegramMessenger {
  async fn send_message(&self, chat_id: i64, message: &OutgoingMessage) -> Result<()> {
    let mut request = self.bot.send_message(ChatId(chat_id), message.text.clone());
    if let Some(keyboard) = &message.keyboard {
      request = request.reply_markup(reply_markup(keyboard));
    }
    if message.html {
      request = request.parse_mode(ParseMode::Html);
    }
    if message.disable_preview {
      request = request.link_preview_options(LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
      });
    }
    request.await?;
    Ok(())
  }

  async fn send_poll(&self, chat_id: i64, kind: PollKind) -> Result<String> {
    let options: Vec<InputPollOption> = kind.options().iter().map(|option| InputPollOption::new(*option)).collect();
    let sent = self
      .bot
      .send_poll(ChatId(chat_id), kind.question(), options)
      .is_anonymous(false)
      .allows_multiple_answers(kind.allows_multiple_answers())
      .reply_markup(ReplyMarkup::KeyboardRemove(KeyboardRemove::new()))
      .await?;
    let poll = sent.poll().context("sent poll message carries no poll")?;
    Ok(poll.id.to_string())
  }
}
