//! Delivery of completed registrations to the spreadsheet log.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::models::Registration;

pub mod oauth;
pub mod sheets;

pub use sheets::GoogleSheets;

const SUCCESS_STATUS: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
  /// Every answer, one column each.
  Detailed,
  /// Username, shelter short title, date, timestamp.
  Compact,
}

/// A sheet inside a spreadsheet together with the shape of rows written to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetTarget {
  pub spreadsheet_id: String,
  pub sheet: String,
  pub layout: RowLayout,
}

impl SheetTarget {
  pub fn range(&self) -> String {
    match self.layout {
      RowLayout::Detailed => format!("{}!A2:H", self.sheet),
      RowLayout::Compact => format!("{}!A1:D", self.sheet),
    }
  }

  /// Identifies the sheet in [`Registration::written_to`].
  pub fn key(&self) -> String {
    format!("{}/{}", self.spreadsheet_id, self.sheet)
  }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
  #[error("http request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("invalid url: {0}")]
  Url(#[from] url::ParseError),
  #[error("failed to access {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("malformed {what}: {source}")]
  Json {
    what: &'static str,
    #[source]
    source: serde_json::Error,
  },
  #[error("credentials file has neither an `installed` nor a `web` section")]
  MalformedCredentials,
  #[error("no authorization token stored yet, run /update_google_auth")]
  MissingToken,
  #[error("token endpoint returned {status}: {body}")]
  TokenEndpoint { status: u16, body: String },
  #[error("registration has no shelter")]
  IncompleteRecord,
  #[error("authorization is not supported by this backend")]
  Unsupported,
}

#[async_trait]
pub trait DeliverySink: Send + Sync {
  /// Appends one row for `record`; returns the backend's HTTP status.
  async fn append_record(&self, target: &SheetTarget, record: &Registration) -> Result<u16, DeliveryError>;

  async fn authorization_url(&self) -> Result<String, DeliveryError> {
    Err(DeliveryError::Unsupported)
  }

  async fn authorize(&self, _code: &str) -> Result<(), DeliveryError> {
    Err(DeliveryError::Unsupported)
  }
}

pub fn build_row(layout: RowLayout, record: &Registration, registered_at: NaiveDateTime) -> Option<Vec<String>> {
  let shelter = record.shelter.as_ref()?;
  let registered_at = registered_at.format("%d.%m.%Y %H:%M:%S").to_string();
  let row = match layout {
    RowLayout::Detailed => vec![
      record.username.clone(),
      shelter.title.clone(),
      record.date.clone(),
      record.is_first_trip.unwrap_or(false).to_string(),
      record.purposes.join(","),
      record.trip_by.clone(),
      record.sources.join(","),
      registered_at,
    ],
    RowLayout::Compact => vec![
      record.username.clone(),
      shelter.short_title.clone(),
      record.date.clone(),
      registered_at,
    ],
  };
  Some(row)
}

pub fn registration_row(layout: RowLayout, record: &Registration) -> Result<Vec<String>, DeliveryError> {
  build_row(layout, record, Local::now().naive_local()).ok_or(DeliveryError::IncompleteRecord)
}

/// Writes `record` to every target it has not reached yet, marking each sheet in
/// `written_to` as it succeeds, so a retry after a partial failure does not repeat rows.
/// Never panics: a missing record or shelter, a transport error, a non-200 status, or a
/// timeout all come back as `false`.
pub async fn deliver(
  sink: &dyn DeliverySink,
  targets: &[SheetTarget],
  record: Option<&mut Registration>,
  timeout: Duration,
) -> bool {
  let Some(record) = record else {
    warn!("delivery requested without a registration");
    return false;
  };
  if record.shelter.is_none() {
    warn!(registration_id = %record.id, "delivery requested for a registration without shelter");
    return false;
  }

  for target in targets {
    let key = target.key();
    if record.written_to.contains(&key) {
      debug!(registration_id = %record.id, sheet = %target.sheet, "already written, skipping");
      continue;
    }
    match tokio::time::timeout(timeout, sink.append_record(target, record)).await {
      Ok(Ok(SUCCESS_STATUS)) => record.written_to.push(key),
      Ok(Ok(status)) => {
        warn!(registration_id = %record.id, sheet = %target.sheet, status, "sheet rejected registration");
        return false;
      },
      Ok(Err(err)) => {
        warn!(registration_id = %record.id, sheet = %target.sheet, error = %err, "failed to write registration");
        return false;
      },
      Err(_) => {
        warn!(registration_id = %record.id, sheet = %target.sheet, ?timeout, "sheet write timed out");
        return false;
      },
    }
  }
  info!(registration_id = %record.id, "registration delivered");
  true
}


#[cfg(test)]
mod tests {
  use std::time::Duration;

  use chrono::NaiveDate;
  use pretty_assertions::assert_eq;

  use super::RowLayout;
  use super::SheetTarget;
  use super::build_row;
  use super::deliver;
  use super::fake::MemorySink;
  use crate::models::Registration;
  use crate::models::fixtures;

  fn targets() -> Vec<SheetTarget> {
    vec![
      SheetTarget {
        spreadsheet_id: "sheet".to_string(),
        sheet: "Trips".to_string(),
        layout: RowLayout::Detailed,
      },
      SheetTarget {
        spreadsheet_id: "sheet".to_string(),
        sheet: "System".to_string(),
        layout: RowLayout::Compact,
      },
    ]
  }

  fn registration() -> Registration {
    Registration {
      id: "14.09.2024Шанс-1".to_string(),
      username: "volunteer".to_string(),
      shelter: Some(fixtures::saturday_shelter(2, "Шанс")),
      date: "Суббота 14.09.2024 11:00".to_string(),
      is_first_trip: Some(true),
      purposes: vec!["walk".to_string(), "photo".to_string()],
      trip_by: "bus".to_string(),
      sources: vec!["Telegram".to_string(), "friends".to_string()],
      written_to: Vec::new(),
    }
  }

  #[test]
  fn builds_rows_for_both_layouts() {
    let at = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap().and_hms_opt(8, 5, 9).unwrap();
    let record = registration();

    assert_eq!(
      build_row(RowLayout::Detailed, &record, at).unwrap(),
      vec![
        "volunteer",
        "Шанс",
        "Суббота 14.09.2024 11:00",
        "true",
        "walk,photo",
        "bus",
        "Telegram,friends",
        "01.09.2024 08:05:09",
      ]
    );
    assert_eq!(
      build_row(RowLayout::Compact, &record, at).unwrap(),
      vec!["volunteer", "Шанс", "Суббота 14.09.2024 11:00", "01.09.2024 08:05:09"]
    );
  }

  #[test]
  fn ranges_match_layouts() {
    let targets = targets();
    assert_eq!(targets[0].range(), "Trips!A2:H");
    assert_eq!(targets[1].range(), "System!A1:D");
  }

  #[tokio::test]
  async fn missing_record_or_shelter_is_a_failure_not_a_panic() {
    let sink = MemorySink::default();
    assert!(!deliver(&sink, &targets(), None, Duration::from_secs(1)).await);

    let mut record = registration();
    record.shelter = None;
    assert!(!deliver(&sink, &targets(), Some(&mut record), Duration::from_secs(1)).await);
    assert_eq!(sink.row_count(), 0);
  }

  #[tokio::test]
  async fn writes_every_target_on_success() {
    let sink = MemorySink::default();
    let mut record = registration();
    assert!(deliver(&sink, &targets(), Some(&mut record), Duration::from_secs(1)).await);
    assert_eq!(sink.sheets(), vec!["Trips", "System"]);
    assert_eq!(record.written_to, vec!["sheet/Trips", "sheet/System"]);
  }

  #[tokio::test]
  async fn retry_after_partial_failure_skips_written_sheets() {
    let sink = MemorySink::default();
    sink.set_failing_sheet(Some("System"));
    let mut record = registration();

    assert!(!deliver(&sink, &targets(), Some(&mut record), Duration::from_secs(1)).await);
    assert!(!deliver(&sink, &targets(), Some(&mut record), Duration::from_secs(1)).await);
    assert_eq!(record.written_to, vec!["sheet/Trips"]);

    sink.set_failing_sheet(None);
    assert!(deliver(&sink, &targets(), Some(&mut record), Duration::from_secs(1)).await);
    assert_eq!(sink.sheets(), vec!["Trips", "System"]);
  }

  #[tokio::test]
  async fn non_success_status_fails_delivery() {
    let sink = MemorySink::default();
    sink.set_failing(true);
    assert!(!deliver(&sink, &targets(), Some(&mut registration()), Duration::from_secs(1)).await);
  }

  #[tokio::test(start_paused = true)]
  async fn hung_backend_times_out() {
    let sink = MemorySink::default();
    sink.set_hanging(true);
    assert!(!deliver(&sink, &targets(), Some(&mut registration()), Duration::from_secs(10)).await);
  }
}
