use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use tracing::instrument;
use url::Url;

use super::DeliveryError;
use super::DeliverySink;
use super::SheetTarget;
use super::oauth::OAuthClient;
use super::registration_row;
use crate::models::Registration;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

/// Google Sheets v4 `values:append` client.
pub struct GoogleSheets {
  client: reqwest::Client,
  api_base: String,
  oauth: OAuthClient,
}

impl GoogleSheets {
  pub fn new(client: reqwest::Client, oauth: OAuthClient) -> Self {
    Self {
      client,
      api_base: SHEETS_API_BASE.to_string(),
      oauth,
    }
  }

  #[cfg(test)]
  pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
    self.api_base = api_base.into();
    self
  }

  fn append_url(&self, target: &SheetTarget) -> Result<Url, DeliveryError> {
    let mut url = Url::parse(&self.api_base)?;
    url
      .path_segments_mut()
      .map_err(|()| DeliveryError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
      .pop_if_empty()
      .extend(["v4", "spreadsheets", target.spreadsheet_id.as_str(), "values"])
      .push(&format!("{}:append", target.range()));
    url.query_pairs_mut().append_pair("valueInputOption", "RAW");
    Ok(url)
  }
}

#[async_trait]
impl DeliverySink for GoogleSheets {
  #[instrument(skip(self, record), fields(sheet = %target.sheet, registration_id = %record.id))]
  async fn append_record(&self, target: &SheetTarget, record: &Registration) -> Result<u16, DeliveryError> {
    let row = registration_row(target.layout, record)?;
    let token = self.oauth.access_token().await?;
    let url = self.append_url(target)?;

    let response = self
      .client
      .post(url)
      .bearer_auth(token)
      .json(&json!({ "values": [row] }))
      .send()
      .await?;
    let status = response.status().as_u16();
    debug!(status, "sheet append finished");
    Ok(status)
  }

  async fn authorization_url(&self) -> Result<String, DeliveryError> {
    self.oauth.authorization_url().await
  }

  async fn authorize(&self, code: &str) -> Result<(), DeliveryError> {
    self.oauth.exchange_code(code).await.map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use chrono::Utc;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use wiremock::Mock;
  use wiremock::MockServer;
  use wiremock::ResponseTemplate;
  use wiremock::matchers::body_partial_json;
  use wiremock::matchers::header;
  use wiremock::matchers::method;
  use wiremock::matchers::path;
  use wiremock::matchers::query_param;

  use super::GoogleSheets;
  use crate::delivery::DeliveryError;
  use crate::delivery::DeliverySink;
  use crate::delivery::RowLayout;
  use crate::delivery::SheetTarget;
  use crate::delivery::oauth::OAuthClient;
  use crate::delivery::oauth::Token;
  use crate::delivery::oauth::test_support::write_credentials;
  use crate::models::Registration;
  use crate::models::fixtures;

  fn registration() -> Registration {
    Registration {
      id: "14.09.2024Шанс-1".to_string(),
      username: "volunteer".to_string(),
      shelter: Some(fixtures::saturday_shelter(2, "Шанс")),
      date: "Суббота 14.09.2024 11:00".to_string(),
      is_first_trip: Some(false),
      purposes: vec!["walk".to_string()],
      trip_by: "car".to_string(),
      sources: vec!["Telegram".to_string()],
      written_to: Vec::new(),
    }
  }

  fn trips_target() -> SheetTarget {
    SheetTarget {
      spreadsheet_id: "sheet-id".to_string(),
      sheet: "Trips".to_string(),
      layout: RowLayout::Detailed,
    }
  }

  fn sheets_with_token(dir: &std::path::Path, api_base: &str) -> GoogleSheets {
    let credentials = write_credentials(dir, "https://oauth.example.org/token");
    let token_path = dir.join("token.json");
    let token = Token {
      access_token: "live-token".to_string(),
      token_type: "Bearer".to_string(),
      refresh_token: Some("refresh".to_string()),
      expiry: Some(Utc::now() + Duration::hours(1)),
    };
    std::fs::write(&token_path, serde_json::to_vec(&token).unwrap()).unwrap();
    GoogleSheets::new(
      reqwest::Client::new(),
      OAuthClient::new(reqwest::Client::new(), credentials, token_path),
    )
    .with_api_base(api_base)
  }

  #[tokio::test]
  async fn appends_row_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v4/spreadsheets/sheet-id/values/Trips!A2:H:append"))
      .and(query_param("valueInputOption", "RAW"))
      .and(header("authorization", "Bearer live-token"))
      .and(body_partial_json(json!({ "values": [["volunteer", "Шанс", "Суббота 14.09.2024 11:00", "false", "walk", "car", "Telegram"]] })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "updates": { "updatedRows": 1 } })))
      .expect(1)
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let sheets = sheets_with_token(dir.path(), &server.uri());
    let status = sheets.append_record(&trips_target(), &registration()).await.unwrap();
    assert_eq!(status, 200);
  }

  #[tokio::test]
  async fn returns_backend_status_on_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(401))
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let sheets = sheets_with_token(dir.path(), &server.uri());
    let status = sheets.append_record(&trips_target(), &registration()).await.unwrap();
    assert_eq!(status, 401);
  }

  #[tokio::test]
  async fn record_without_shelter_is_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let sheets = sheets_with_token(dir.path(), &server.uri());
    let mut record = registration();
    record.shelter = None;
    assert!(matches!(
      sheets.append_record(&trips_target(), &record).await,
      Err(DeliveryError::IncompleteRecord)
    ));
  }
}
