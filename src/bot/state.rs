use std::fmt;
use std::time::Instant;

use crate::models::Registration;

/// The last question the bot asked a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
  #[default]
  Idle,
  Started,
  AwaitingTripMode,
  AwaitingShelter,
  AwaitingMonth,
  AwaitingDate,
  /// Date list built for one month across all shelters; answers carry the shelter title.
  AwaitingDateForMonth {
    month: u32,
  },
  AwaitingFirstTrip,
  AwaitingPurposePoll,
  AwaitingTravelPoll,
  AwaitingSourcePoll,
  AwaitingContact,
  AwaitingAuthCode,
  Complete,
}

impl Stage {
  pub fn name(&self) -> &'static str {
    match self {
      Stage::Idle => "idle",
      Stage::Started => "started",
      Stage::AwaitingTripMode => "awaiting_trip_mode_choice",
      Stage::AwaitingShelter => "awaiting_shelter_choice",
      Stage::AwaitingMonth => "awaiting_month_choice",
      Stage::AwaitingDate => "awaiting_date_choice",
      Stage::AwaitingDateForMonth { .. } => "awaiting_date_choice_for_month",
      Stage::AwaitingFirstTrip => "awaiting_first_trip_answer",
      Stage::AwaitingPurposePoll => "awaiting_purpose_poll",
      Stage::AwaitingTravelPoll => "awaiting_travel_poll",
      Stage::AwaitingSourcePoll => "awaiting_source_poll",
      Stage::AwaitingContact => "awaiting_contact",
      Stage::AwaitingAuthCode => "awaiting_auth_code",
      Stage::Complete => "complete",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone)]
pub struct Session {
  pub chat_id: i64,
  pub stage: Stage,
  pub registration: Option<Registration>,
  pub last_activity: Instant,
}

impl Session {
  pub fn new(chat_id: i64) -> Self {
    Self {
      chat_id,
      stage: Stage::Idle,
      registration: None,
      last_activity: Instant::now(),
    }
  }

  pub fn touch(&mut self, now: Instant) {
    self.last_activity = now;
  }

  /// Drops the in-progress registration and returns to the main menu.
  pub fn reset(&mut self) {
    self.stage = Stage::Started;
    self.registration = None;
  }

  pub fn registration_mut(&mut self, display_name: &str) -> &mut Registration {
    self.registration.get_or_insert_with(|| Registration::new(display_name))
  }
}
