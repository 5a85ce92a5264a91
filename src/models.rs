use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::util;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
  Regularly,
  Everyday,
  #[default]
  None,
}

/// One recurrence rule: the `week`-th occurrence of ISO `weekday` (1 = Monday) in a month.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct WeekRule {
  pub week: u32,
  pub weekday: u32,
}

impl From<[u32; 2]> for WeekRule {
  fn from([week, weekday]: [u32; 2]) -> Self {
    Self { week, weekday }
  }
}

impl From<WeekRule> for [u32; 2] {
  fn from(rule: WeekRule) -> Self {
    [rule.week, rule.weekday]
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ShelterSchedule {
  #[serde(rename = "type", default)]
  pub kind: ScheduleKind,
  #[serde(default)]
  pub details: Vec<WeekRule>,
  #[serde(default)]
  pub dates_exceptions: Vec<String>,
  #[serde(default)]
  pub time_start: String,
  #[serde(default)]
  pub time_end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Shelter {
  pub id: u32,
  pub title: String,
  #[serde(default)]
  pub long_title: String,
  #[serde(default)]
  pub short_title: String,
  #[serde(default)]
  pub address: String,
  #[serde(default)]
  pub link: String,
  #[serde(default)]
  pub guide: String,
  #[serde(default)]
  pub donate_link: String,
  #[serde(default)]
  pub people_limit: u32,
  #[serde(default)]
  pub schedule: ShelterSchedule,
}

impl Shelter {
  /// Text of the keyboard button used to pick this shelter, `"<id>. <title>"`.
  pub fn choice_label(&self) -> String {
    let title = if self.long_title.is_empty() {
      &self.title
    } else {
      &self.long_title
    };
    format!("{}. {}", self.id, title)
  }

  pub fn is_listed(&self) -> bool {
    self.schedule.kind != ScheduleKind::None
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShelterChoiceError {
  #[error("не похоже на название приюта")]
  NotAChoice,
  #[error("приют #{0} не найден")]
  Unknown(u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
  #[error("shelter id {0} is used more than once")]
  DuplicateId(u32),
}

/// Immutable shelter catalog keyed by operator-assigned id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShelterList {
  shelters: BTreeMap<u32, Shelter>,
}

impl ShelterList {
  pub fn new(shelters: Vec<Shelter>) -> Result<Self, CatalogError> {
    let mut map = BTreeMap::new();
    for shelter in shelters {
      let id = shelter.id;
      if map.insert(id, shelter).is_some() {
        return Err(CatalogError::DuplicateId(id));
      }
    }
    Ok(Self { shelters: map })
  }

  pub fn len(&self) -> usize {
    self.shelters.len()
  }

  pub fn is_empty(&self) -> bool {
    self.shelters.is_empty()
  }

  pub fn get(&self, id: u32) -> Option<&Shelter> {
    self.shelters.get(&id)
  }

  /// All shelters ordered by id.
  pub fn iter(&self) -> impl Iterator<Item = &Shelter> {
    self.shelters.values()
  }

  /// Shelters offered in the "choose by shelter" menu.
  pub fn listed(&self) -> impl Iterator<Item = &Shelter> {
    self.iter().filter(|shelter| shelter.is_listed())
  }

  /// Resolves a `"<id>. <title>"` button text; only the id before the dot matters.
  pub fn by_choice(&self, text: &str) -> Result<&Shelter, ShelterChoiceError> {
    let id = util::parse_shelter_id(text).ok_or(ShelterChoiceError::NotAChoice)?;
    self.get(id).ok_or(ShelterChoiceError::Unknown(id))
  }

  pub fn by_title(&self, title: &str) -> Option<&Shelter> {
    let title = title.trim();
    self.iter().find(|shelter| shelter.title == title)
  }
}

/// One volunteer's answers for a shelter visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Registration {
  pub id: String,
  pub username: String,
  pub shelter: Option<Shelter>,
  pub date: String,
  pub is_first_trip: Option<bool>,
  pub purposes: Vec<String>,
  pub trip_by: String,
  pub sources: Vec<String>,
  /// Keys of the sheets this record has already been appended to.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub written_to: Vec<String>,
}

impl Registration {
  pub fn new(username: impl Into<String>) -> Self {
    Self {
      username: username.into(),
      ..Self::default()
    }
  }

  pub fn is_complete(&self) -> bool {
    !self.username.trim().is_empty()
      && self.shelter.is_some()
      && !self.date.is_empty()
      && self.is_first_trip.is_some()
      && !self.purposes.is_empty()
      && !self.trip_by.is_empty()
      && !self.sources.is_empty()
  }

  /// `<DD.MM.YYYY><short title>-<chat id>`; `None` until shelter and date are known.
  pub fn derive_id(&self, chat_id: i64) -> Option<String> {
    let shelter = self.shelter.as_ref()?;
    let date = util::extract_trip_date(&self.date)?;
    Some(format!("{date}{}-{chat_id}", shelter.short_title))
  }
}

#[cfg(test)]
pub(crate) mod fixtures {
  use super::ScheduleKind;
  use super::Shelter;
  use super::ShelterList;
  use super::ShelterSchedule;
  use super::WeekRule;

  pub fn saturday_shelter(id: u32, title: &str) -> Shelter {
    Shelter {
      id,
      title: title.to_string(),
      short_title: title.chars().take(4).collect(),
      link: format!("https://example.org/{id}"),
      guide: format!("{title} guide"),
      donate_link: format!("https://example.org/{id}/donate"),
      schedule: ShelterSchedule {
        kind: ScheduleKind::Regularly,
        details: (1 ..= 4).map(|week| WeekRule { week, weekday: 6 }).collect(),
        dates_exceptions: Vec::new(),
        time_start: "11:00".to_string(),
        time_end: "15:00".to_string(),
      },
      ..Shelter::default()
    }
  }

  pub fn unscheduled_shelter(id: u32, title: &str) -> Shelter {
    Shelter {
      id,
      title: title.to_string(),
      short_title: title.to_string(),
      guide: format!("{title} accepts visitors any day"),
      ..Shelter::default()
    }
  }

  pub fn catalog() -> ShelterList {
    ShelterList::new(vec![
      saturday_shelter(1, "Хаски Хелп"),
      saturday_shelter(2, "Шанс"),
      unscheduled_shelter(8, "Лемур"),
    ])
    .unwrap()
  }
}

#[cfg(test)]
mod tests {
  use super::CatalogError;
  use super::Registration;
  use super::ShelterChoiceError;
  use super::ShelterList;
  use super::fixtures;

  #[test]
  fn resolves_shelter_by_choice_label() {
    let catalog = fixtures::catalog();
    let shelter = catalog.by_choice("1. Хаски Хелп (Истра)").unwrap();
    assert_eq!(shelter.id, 1);
  }

  #[test]
  fn rejects_choice_without_dot_or_unknown_id() {
    let catalog = fixtures::catalog();
    assert_eq!(
      catalog.by_choice("Not A Shelter").unwrap_err(),
      ShelterChoiceError::NotAChoice
    );
    assert_eq!(
      catalog.by_choice("999. Non-existent Shelter").unwrap_err(),
      ShelterChoiceError::Unknown(999)
    );
  }

  #[test]
  fn rejects_duplicate_ids() {
    let err = ShelterList::new(vec![
      fixtures::saturday_shelter(3, "A"),
      fixtures::saturday_shelter(3, "B"),
    ])
    .unwrap_err();
    assert_eq!(err, CatalogError::DuplicateId(3));
  }

  #[test]
  fn unscheduled_shelters_are_not_listed() {
    let catalog = fixtures::catalog();
    let listed: Vec<u32> = catalog.listed().map(|shelter| shelter.id).collect();
    assert_eq!(listed, vec![1, 2]);
  }

  #[test]
  fn derives_id_only_with_shelter_and_date() {
    let mut registration = Registration::new("volunteer");
    assert_eq!(registration.derive_id(42), None);

    registration.shelter = Some(fixtures::saturday_shelter(2, "Шанс"));
    registration.date = "Суббота 14.09.2024 11:00".to_string();
    assert_eq!(registration.derive_id(42).as_deref(), Some("14.09.2024Шанс-42"));
  }

  #[test]
  fn completeness_requires_every_answer() {
    let mut registration = Registration::new("volunteer");
    registration.shelter = Some(fixtures::saturday_shelter(2, "Шанс"));
    registration.date = "Суббота 14.09.2024 11:00".to_string();
    registration.is_first_trip = Some(false);
    registration.purposes = vec!["walk".to_string()];
    registration.trip_by = "bus".to_string();
    assert!(!registration.is_complete());

    registration.sources = vec!["friends".to_string()];
    assert!(registration.is_complete());

    registration.username.clear();
    assert!(!registration.is_complete());
  }
}
