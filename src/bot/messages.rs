//! User-facing texts and keyboards.

use chrono::NaiveDate;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;

use crate::bot::Command;
use crate::models::Registration;
use crate::models::Shelter;
use crate::models::ShelterList;
use crate::schedule;

pub const CHOOSE_BY_SHELTER: &str = "Выбор по приюту";
pub const CHOOSE_BY_DATE: &str = "Выбор по дате";
pub const YES: &str = "Да";
pub const NO: &str = "Нет";

pub const WRONG_SHELTER: &str = "не похоже на название приюта";
pub const WRONG_DATE: &str = "Кажется вы ошиблись с датой 🤔";
pub const WRONG_MONTH: &str = "Кажется вы ошиблись с месяцем 🤔";
pub const YES_OR_NO_ONLY: &str = "доступные ответы \"Да\" и \"Нет\"";
pub const PURPOSE_REMINDER: &str = "Выберите цели поездки и нажмите кнопку голосовать";
pub const TRAVEL_REMINDER: &str = "Расскажите как добираетесь до приюта";
pub const SOURCE_REMINDER: &str = "Расскажите как вы о нас узнали";
pub const FALLBACK: &str = "Не понимаю 🐶 Попробуй /start";
pub const DELIVERY_FAILED: &str = "G.Sheet auth expired.";
pub const AUTH_UPDATED: &str = "G.Sheet токен авторизации обновлен";
pub const AUTH_CODE_MISSING: &str = "Не удалось найти код авторизации, пришлите ссылку из адресной строки целиком";

const PURPOSES: [&str; 6] = [
  "Погулять с собаками",
  "Помочь приюту руками (прибрать, помыть, почесать :-)",
  "Пофотографировать животных для соц.сетей",
  "Привезти корм/медикаменты и т.п. для нужд приюта",
  "Перевести деньги для приюта",
  "Есть другие идеи (обязательно расскажите нам на выезде :-)",
];

const TRAVEL_MODES: [&str; 5] = [
  "Еду на своей машине или с кем-то на машине (мест больше нет)",
  "Еду на своей машине или с кем-то на машине (готов предложить места другим волонтерам)",
  "Еду общественным транспортом",
  "Ищу с кем поехать",
  "Какой-то другой магический вариант :)",
];

const SOURCES: [&str; 10] = [
  "Сарафанное радио (друзья, родственники, коллеги)",
  "Нашел в интернете",
  "Telegram",
  "WhatsApp",
  "Вконтакте",
  "Другие социальные сети",
  "Авито/Юла",
  "Мосволонтер",
  "Знаю вас уже давно",
  "Другой вариант",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
  Remove,
  Reply(Vec<Vec<String>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
  pub text: String,
  pub keyboard: Option<Keyboard>,
  pub html: bool,
  pub disable_preview: bool,
}

impl OutgoingMessage {
  pub fn text(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      keyboard: None,
      html: false,
      disable_preview: false,
    }
  }

  pub fn with_buttons<I, R, S>(mut self, rows: I) -> Self
  where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let rows = rows
      .into_iter()
      .map(|row| row.into_iter().map(Into::into).collect())
      .collect();
    self.keyboard = Some(Keyboard::Reply(rows));
    self
  }

  pub fn remove_keyboard(mut self) -> Self {
    self.keyboard = Some(Keyboard::Remove);
    self
  }

  pub fn html(mut self) -> Self {
    self.html = true;
    self
  }

  pub fn without_preview(mut self) -> Self {
    self.disable_preview = true;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollKind {
  Purpose,
  TravelMode,
  Source,
}

impl PollKind {
  pub fn question(&self) -> &'static str {
    match self {
      PollKind::Purpose => "🎯 Чем хочу помочь",
      PollKind::TravelMode => "🚗 Как добираетесь до приюта?",
      PollKind::Source => "🤫 Как вы о нас узнали?",
    }
  }

  pub fn options(&self) -> &'static [&'static str] {
    match self {
      PollKind::Purpose => &PURPOSES,
      PollKind::TravelMode => &TRAVEL_MODES,
      PollKind::Source => &SOURCES,
    }
  }

  pub fn allows_multiple_answers(&self) -> bool {
    !matches!(self, PollKind::TravelMode)
  }

  /// Labels of the selected options; indices outside the option list are skipped.
  pub fn labels(&self, selected: &[usize]) -> Vec<String> {
    selected
      .iter()
      .filter_map(|index| self.options().get(*index))
      .map(|label| label.to_string())
      .collect()
  }
}

pub fn welcome() -> OutgoingMessage {
  OutgoingMessage::text(
    "🐕 /go_shelter Записаться на выезд в приют

📐 /masterclass Записаться на мастер-класс по изготовлению будок и котодомиков для приютов

❤️ /donation Сделать пожертвование

@walkthedog_support Задать вопрос или предложить добрую идею

@walkthedog Подписаться на наш телеграм канал",
  )
  .remove_keyboard()
}

pub fn help() -> OutgoingMessage {
  OutgoingMessage::text(Command::descriptions().to_string())
}

pub fn fallback() -> OutgoingMessage {
  OutgoingMessage::text(FALLBACK)
}

pub fn error(text: impl Into<String>) -> OutgoingMessage {
  OutgoingMessage::text(text)
}

pub fn trip_mode_prompt() -> OutgoingMessage {
  OutgoingMessage::text(
    "Вы можете записаться на выезд в приют исходя из даты (напр. хотите поехать в ближайшие выходные) или выбрать \
     конкретный приют и записаться на ближайший выезд в него. На страничке walkthedog.ru/shelters есть удобная \
     карта, которая покажет ближайший к вам приют.",
  )
  .with_buttons([[CHOOSE_BY_DATE, CHOOSE_BY_SHELTER]])
}

pub fn wrong_trip_mode() -> OutgoingMessage {
  error(format!("Нажмите кнопку \"{CHOOSE_BY_DATE}\" или \"{CHOOSE_BY_SHELTER}\""))
}

pub fn shelter_list(shelters: &ShelterList) -> OutgoingMessage {
  OutgoingMessage::text("В какой приют желаете записаться?")
    .with_buttons(shelters.listed().map(|shelter| [shelter.choice_label()]))
}

/// Sent for a shelter without group trips; the guide explains how to visit on your own.
pub fn shelter_guide(shelter: &Shelter) -> OutgoingMessage {
  let text = if shelter.guide.trim().is_empty() {
    format!(
      "<b>{}</b>\nГрупповые выезды в этот приют сейчас не проводятся.",
      html::escape(&shelter.title)
    )
  } else {
    shelter.guide.clone()
  };
  OutgoingMessage::text(text).html().remove_keyboard()
}

pub fn month_list(today: NaiveDate) -> OutgoingMessage {
  let names: Vec<&str> = schedule::upcoming_months(today, schedule::DEFAULT_HORIZON_MONTHS)
    .into_iter()
    .filter_map(schedule::month_name)
    .collect();
  OutgoingMessage::text("Выберите месяц выезда:").with_buttons(names.chunks(3).map(|row| row.to_vec()))
}

pub fn no_trips_in_month() -> OutgoingMessage {
  error("В этом месяце выездов нет, выберите другой месяц")
}

pub fn date_list(labels: &[String]) -> OutgoingMessage {
  OutgoingMessage::text("Выберите дату выезда:").with_buttons(labels.iter().map(|label| [label.as_str()]))
}

pub fn first_trip_question() -> OutgoingMessage {
  OutgoingMessage::text("Это ваша первая поездка?").with_buttons([[YES, NO]])
}

pub fn ask_contact() -> OutgoingMessage {
  OutgoingMessage::text(
    "Регистрация почти завершена 👍

Но мы не можем определить ваше имя пользователя Телеграм.
Пожалуйста напишите в следующем сообщении email или номер телефона, чтобы мы смогли добавить вас в чат выезда в приют.

Если возникли проблемы напишите нам @walkthedog_support",
  )
  .html()
  .remove_keyboard()
}

pub fn summary(registration: &Registration) -> OutgoingMessage {
  let (link, title) = registration
    .shelter
    .as_ref()
    .map(|shelter| (html::escape(&shelter.link), html::escape(&shelter.title)))
    .unwrap_or_default();
  OutgoingMessage::text(format!(
    "Регистрация прошла успешно.

ℹ️ Информация о событии
Выезд в приют: <a href=\"{link}\">{title}</a>
Дата и время: {date}

❤️ Напоминаем, что участие в выезде в приют является бесплатным. При этом вы можете сделать добровольное пожертвование.

💬 За 5 дней до выезда мы добавим вас в чат, где можно будет узнать все детали о выезде в приют включая адрес, как доехать, что взять, потребности приюта и задать вопросы.

Если у вас появятся вопросы до добавления в чат - пишите @walkthedog_support",
    date = html::escape(&registration.date),
  ))
  .html()
  .remove_keyboard()
}

pub fn donation() -> OutgoingMessage {
  OutgoingMessage::text(
    "Добровольное пожертвование в 500 рублей и более осчастливит 1 собаку (500 рублей = 2 недели питания одной \
     собаки в приюте). На собранные пожертвования мы строим теплые будки для приютов, покупаем корм и медикаменты.

📍 /donation_shelter_list - пожертвовать в конкретный приют

📍 Перевод по номеру телефона +79160851342 (Михайлов Дмитрий) - укажите \"пожертвование\"

📍 Сбор пожертвований через <a href=\"https://www.tinkoff.ru/sl/72xLdsZQp6\">Тинькоф банк</a>

📍 <a href=\"https://yoomoney.ru/to/410015848442299\">Яндекс.Деньги</a>",
  )
  .html()
  .without_preview()
  .remove_keyboard()
}

pub fn donation_shelter_list(shelters: &ShelterList) -> OutgoingMessage {
  let mut text = String::from("Пожертвовать в приют:\n");
  for shelter in shelters.iter().filter(|shelter| !shelter.donate_link.is_empty()) {
    text.push_str(&format!("{}. {}\n {}\n", shelter.id, shelter.title, shelter.donate_link));
  }
  OutgoingMessage::text(text).without_preview().remove_keyboard()
}

pub fn masterclass() -> OutgoingMessage {
  OutgoingMessage::text(
    "Запись на мастер-классы скоро здесь появится, а пока вы можете записаться на ближайший на walkthedog.ru/cages",
  )
  .remove_keyboard()
}

pub fn auth_code_prompt(url: &str) -> OutgoingMessage {
  OutgoingMessage::text(format!(
    "Откройте ссылку, разрешите доступ к таблице и пришлите адрес страницы, на которую вас перенаправит Google:\n{url}"
  ))
  .without_preview()
}

pub fn shelters_reloaded(count: usize) -> OutgoingMessage {
  OutgoingMessage::text(format!("Список приютов обновлен, приютов: {count}"))
}

pub fn config_reloaded() -> OutgoingMessage {
  OutgoingMessage::text("Настройки приложения перечитаны")
}

pub fn admin_failure(action: &str, err: &impl std::fmt::Display) -> OutgoingMessage {
  OutgoingMessage::text(format!("{action}: {err}"))
}

pub fn cache_cleared(delivered: usize, dropped: usize) -> OutgoingMessage {
  OutgoingMessage::text(format!(
    "Кэш очищен. Отправлено в таблицу: {delivered}, удалено без отправки: {dropped}"
  ))
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use pretty_assertions::assert_eq;

  use super::Keyboard;
  use super::PollKind;
  use super::donation_shelter_list;
  use super::month_list;
  use super::shelter_list;
  use super::summary;
  use crate::models::Registration;
  use crate::models::fixtures;

  #[test]
  fn shelter_list_offers_only_scheduled_shelters() {
    let message = shelter_list(&fixtures::catalog());
    assert_eq!(
      message.keyboard,
      Some(Keyboard::Reply(vec![
        vec!["1. Хаски Хелп".to_string()],
        vec!["2. Шанс".to_string()],
      ]))
    );
  }

  #[test]
  fn month_list_starts_with_current_month_and_wraps_the_year() {
    let message = month_list(NaiveDate::from_ymd_opt(2024, 10, 5).unwrap());
    let Some(Keyboard::Reply(rows)) = message.keyboard else {
      panic!("month list must carry a keyboard");
    };
    let months: Vec<String> = rows.into_iter().flatten().collect();
    assert_eq!(months, vec!["Октябрь", "Ноябрь", "Декабрь", "Январь", "Февраль", "Март"]);
  }

  #[test]
  fn poll_labels_skip_unknown_indices() {
    assert_eq!(PollKind::TravelMode.labels(&[2, 99]), vec!["Еду общественным транспортом"]);
    assert!(PollKind::Purpose.allows_multiple_answers());
    assert!(!PollKind::TravelMode.allows_multiple_answers());
  }

  #[test]
  fn summary_links_the_shelter() {
    let mut registration = Registration::new("volunteer");
    registration.shelter = Some(fixtures::saturday_shelter(2, "Шанс"));
    registration.date = "Суббота 14.09.2024 11:00".to_string();

    let message = summary(&registration);
    assert!(message.html);
    assert!(message.text.contains("<a href=\"https://example.org/2\">Шанс</a>"));
    assert!(message.text.contains("Дата и время: Суббота 14.09.2024 11:00"));
  }

  #[test]
  fn donation_list_skips_shelters_without_link() {
    let message = donation_shelter_list(&fixtures::catalog());
    assert!(message.text.contains("2. Шанс\n https://example.org/2/donate"));
    assert!(!message.text.contains("Лемур"));
    assert!(message.disable_preview);
  }
}
