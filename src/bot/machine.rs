//! Conversation transitions.
//!
//! [`step`] maps the current [`Session`] and one inbound [`Event`] to the next stage plus a list of
//! [`Effect`]s. It performs no I/O; the engine executes the effects afterwards.

use chrono::NaiveDate;
use teloxide::utils::command::BotCommands;
use tracing::debug;
use tracing::warn;

use crate::bot::Command;
use crate::bot::messages;
use crate::bot::messages::OutgoingMessage;
use crate::bot::messages::PollKind;
use crate::bot::state::Session;
use crate::bot::state::Stage;
use crate::models::Registration;
use crate::models::ShelterList;
use crate::schedule;
use crate::util;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  Text {
    text: String,
    display_name: String,
  },
  PollAnswer {
    kind: PollKind,
    display_name: String,
    options: Vec<usize>,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
  ReloadShelters,
  ReloadConfig,
  RequestAuthUrl,
  ExchangeAuthCode(String),
  ClearCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
  Send(OutgoingMessage),
  Poll(PollKind),
  /// A finished registration to store and deliver.
  Complete(Registration),
  Admin(AdminAction),
}

pub struct StepContext<'a> {
  pub shelters: &'a ShelterList,
  pub today: NaiveDate,
  pub is_admin: bool,
  pub bot_username: &'a str,
}

pub fn step(session: &mut Session, event: Event, ctx: &StepContext<'_>) -> Vec<Effect> {
  let effects = match event {
    Event::Text { text, display_name } => match Command::parse(text.trim(), ctx.bot_username) {
      Ok(command) => on_command(session, command, &display_name, ctx),
      Err(_) => on_text(session, text.trim(), ctx),
    },
    Event::PollAnswer {
      kind,
      display_name,
      options,
    } => on_poll_answer(session, kind, &display_name, &options),
  };
  debug!(chat_id = session.chat_id, stage = %session.stage, effects = effects.len(), "conversation step");
  effects
}

fn send(message: OutgoingMessage) -> Effect {
  Effect::Send(message)
}

fn on_command(session: &mut Session, command: Command, display_name: &str, ctx: &StepContext<'_>) -> Vec<Effect> {
  if command.is_admin_only() && !ctx.is_admin {
    warn!(chat_id = session.chat_id, ?command, "admin command from a non-admin chat");
    return vec![send(messages::fallback())];
  }

  match command {
    Command::Start => {
      session.reset();
      vec![send(messages::welcome())]
    },
    Command::Help => vec![send(messages::help())],
    Command::GoShelter => {
      session.registration = Some(Registration::new(display_name));
      session.stage = Stage::AwaitingTripMode;
      vec![send(messages::trip_mode_prompt())]
    },
    Command::ChooseShelter => {
      session.registration = Some(Registration::new(display_name));
      session.stage = Stage::AwaitingShelter;
      vec![send(messages::shelter_list(ctx.shelters))]
    },
    Command::TripDates => {
      let shelter = session
        .registration
        .as_ref()
        .and_then(|registration| registration.shelter.as_ref());
      match shelter {
        Some(shelter) => {
          let dates = schedule::dates_for_shelter(shelter, ctx.today);
          session.stage = Stage::AwaitingDate;
          vec![send(messages::date_list(&dates))]
        },
        None => {
          session.registration_mut(display_name);
          session.stage = Stage::AwaitingTripMode;
          vec![send(messages::trip_mode_prompt())]
        },
      }
    },
    Command::Masterclass => vec![send(messages::masterclass())],
    Command::Donation => vec![send(messages::donation())],
    Command::DonationShelterList => vec![send(messages::donation_shelter_list(ctx.shelters))],
    Command::RereadShelters => vec![Effect::Admin(AdminAction::ReloadShelters)],
    Command::RereadAppConfig => vec![Effect::Admin(AdminAction::ReloadConfig)],
    Command::UpdateGoogleAuth => {
      session.stage = Stage::AwaitingAuthCode;
      vec![Effect::Admin(AdminAction::RequestAuthUrl)]
    },
    Command::ClearCache => vec![Effect::Admin(AdminAction::ClearCache)],
  }
}

fn on_text(session: &mut Session, text: &str, ctx: &StepContext<'_>) -> Vec<Effect> {
  match session.stage {
    Stage::Idle | Stage::Started | Stage::Complete => vec![send(messages::fallback())],
    Stage::AwaitingTripMode => match text {
      messages::CHOOSE_BY_SHELTER => {
        session.stage = Stage::AwaitingShelter;
        vec![send(messages::shelter_list(ctx.shelters))]
      },
      messages::CHOOSE_BY_DATE => {
        session.stage = Stage::AwaitingMonth;
        vec![send(messages::month_list(ctx.today))]
      },
      _ => vec![send(messages::wrong_trip_mode()), send(messages::trip_mode_prompt())],
    },
    Stage::AwaitingShelter => choose_shelter(session, text, ctx),
    Stage::AwaitingMonth => choose_month(session, text, ctx),
    Stage::AwaitingDate => choose_date(session, text, ctx),
    Stage::AwaitingDateForMonth { month } => choose_dated_shelter(session, month, text, ctx),
    Stage::AwaitingFirstTrip => {
      let answer = match text {
        messages::YES => true,
        messages::NO => false,
        _ => {
          return vec![
            send(messages::error(messages::YES_OR_NO_ONLY)),
            send(messages::first_trip_question()),
          ];
        },
      };
      match session.registration.as_mut() {
        Some(registration) => {
          registration.is_first_trip = Some(answer);
          session.stage = Stage::AwaitingPurposePoll;
          vec![Effect::Poll(PollKind::Purpose)]
        },
        None => lost_registration(session),
      }
    },
    // The poll is sent again with the reminder, in case the previous one never arrived.
    Stage::AwaitingPurposePoll => vec![
      send(messages::error(messages::PURPOSE_REMINDER)),
      Effect::Poll(PollKind::Purpose),
    ],
    Stage::AwaitingTravelPoll => vec![
      send(messages::error(messages::TRAVEL_REMINDER)),
      Effect::Poll(PollKind::TravelMode),
    ],
    Stage::AwaitingSourcePoll => vec![
      send(messages::error(messages::SOURCE_REMINDER)),
      Effect::Poll(PollKind::Source),
    ],
    Stage::AwaitingContact => {
      if text.is_empty() {
        return vec![send(messages::ask_contact())];
      }
      match session.registration.as_mut() {
        Some(registration) => {
          registration.username = text.to_string();
          complete(session)
        },
        None => lost_registration(session),
      }
    },
    Stage::AwaitingAuthCode => match util::extract_auth_code(text) {
      Some(code) => {
        session.reset();
        vec![Effect::Admin(AdminAction::ExchangeAuthCode(code))]
      },
      None => vec![send(messages::error(messages::AUTH_CODE_MISSING))],
    },
  }
}

fn choose_shelter(session: &mut Session, text: &str, ctx: &StepContext<'_>) -> Vec<Effect> {
  let shelter = match ctx.shelters.by_choice(text) {
    Ok(shelter) => shelter,
    Err(err) => {
      debug!(chat_id = session.chat_id, error = %err, "rejected shelter choice");
      return vec![
        send(messages::error(messages::WRONG_SHELTER)),
        send(messages::shelter_list(ctx.shelters)),
      ];
    },
  };

  let dates = schedule::dates_for_shelter(shelter, ctx.today);
  if dates.is_empty() {
    return vec![send(messages::shelter_guide(shelter))];
  }
  let Some(registration) = session.registration.as_mut() else {
    return lost_registration(session);
  };
  registration.shelter = Some(shelter.clone());
  session.stage = Stage::AwaitingDate;
  vec![send(messages::date_list(&dates))]
}

fn choose_month(session: &mut Session, text: &str, ctx: &StepContext<'_>) -> Vec<Effect> {
  let offered = schedule::upcoming_months(ctx.today, schedule::DEFAULT_HORIZON_MONTHS);
  let Some(month) = schedule::parse_month(text).filter(|month| offered.contains(month)) else {
    session.stage = Stage::AwaitingTripMode;
    return vec![send(messages::error(messages::WRONG_MONTH)), send(messages::trip_mode_prompt())];
  };
  let dates = schedule::dates_for_month(month, ctx.shelters, ctx.today);
  if dates.is_empty() {
    return vec![send(messages::no_trips_in_month()), send(messages::month_list(ctx.today))];
  }
  session.stage = Stage::AwaitingDateForMonth { month };
  vec![send(messages::date_list(&dates))]
}

fn choose_date(session: &mut Session, text: &str, ctx: &StepContext<'_>) -> Vec<Effect> {
  if schedule::is_trip_date_valid(text, session.registration.as_ref(), ctx.today) {
    if let Some(registration) = session.registration.as_mut() {
      registration.date = text.to_string();
    }
    session.stage = Stage::AwaitingFirstTrip;
    return vec![send(messages::first_trip_question())];
  }

  let shelter = session
    .registration
    .as_ref()
    .and_then(|registration| registration.shelter.as_ref());
  match shelter {
    Some(shelter) => vec![
      send(messages::error(messages::WRONG_DATE)),
      send(messages::date_list(&schedule::dates_for_shelter(shelter, ctx.today))),
    ],
    None => {
      session.stage = Stage::AwaitingTripMode;
      vec![send(messages::error(messages::WRONG_DATE)), send(messages::trip_mode_prompt())]
    },
  }
}

fn choose_dated_shelter(session: &mut Session, month: u32, text: &str, ctx: &StepContext<'_>) -> Vec<Effect> {
  let picked = util::split_dated_choice(text).and_then(|(label, title)| {
    let shelter = ctx.shelters.by_title(title)?;
    let candidate = Registration {
      shelter: Some(shelter.clone()),
      ..Registration::default()
    };
    schedule::is_trip_date_valid(label, Some(&candidate), ctx.today).then(|| (label.to_string(), shelter.clone()))
  });

  let Some((label, shelter)) = picked else {
    return vec![
      send(messages::error(messages::WRONG_DATE)),
      send(messages::date_list(&schedule::dates_for_month(month, ctx.shelters, ctx.today))),
    ];
  };
  let Some(registration) = session.registration.as_mut() else {
    return lost_registration(session);
  };
  registration.shelter = Some(shelter);
  registration.date = label;
  session.stage = Stage::AwaitingFirstTrip;
  vec![send(messages::first_trip_question())]
}

fn on_poll_answer(session: &mut Session, kind: PollKind, display_name: &str, options: &[usize]) -> Vec<Effect> {
  let expected = match session.stage {
    Stage::AwaitingPurposePoll => PollKind::Purpose,
    Stage::AwaitingTravelPoll => PollKind::TravelMode,
    Stage::AwaitingSourcePoll => PollKind::Source,
    _ => {
      debug!(chat_id = session.chat_id, stage = %session.stage, ?kind, "poll answer outside a poll stage");
      return Vec::new();
    },
  };
  if kind != expected {
    debug!(chat_id = session.chat_id, ?kind, ?expected, "answer to a stale poll");
    return Vec::new();
  }
  let labels = kind.labels(options);
  if labels.is_empty() {
    return Vec::new();
  }
  let Some(registration) = session.registration.as_mut() else {
    return lost_registration(session);
  };

  match kind {
    PollKind::Purpose => {
      registration.purposes.extend(labels);
      session.stage = Stage::AwaitingTravelPoll;
      vec![Effect::Poll(PollKind::TravelMode)]
    },
    PollKind::TravelMode => {
      registration.trip_by = labels.into_iter().next().unwrap_or_default();
      session.stage = Stage::AwaitingSourcePoll;
      vec![Effect::Poll(PollKind::Source)]
    },
    PollKind::Source => {
      registration.sources.extend(labels);
      if display_name.trim().is_empty() {
        session.stage = Stage::AwaitingContact;
        return vec![send(messages::ask_contact())];
      }
      registration.username = display_name.to_string();
      complete(session)
    },
  }
}

fn complete(session: &mut Session) -> Vec<Effect> {
  let Some(registration) = session.registration.take() else {
    return lost_registration(session);
  };
  if !registration.is_complete() {
    warn!(chat_id = session.chat_id, ?registration, "registration reached completion with missing answers");
    session.reset();
    return vec![send(messages::fallback())];
  }
  session.stage = Stage::Complete;
  let summary = messages::summary(&registration);
  vec![
    Effect::Complete(registration),
    send(summary),
    send(messages::donation()),
  ]
}

fn lost_registration(session: &mut Session) -> Vec<Effect> {
  warn!(chat_id = session.chat_id, stage = %session.stage, "no registration in progress");
  session.reset();
  vec![send(messages::fallback())]
}
