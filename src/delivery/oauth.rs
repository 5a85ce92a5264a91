//! OAuth2 "installed application" flow for the spreadsheet backend.
//!
//! Client secrets come from the Google console JSON (`credentials.json`); the obtained token is
//! kept in `token.json` and refreshed with its refresh token when it expires.

use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use tracing::instrument;
use url::Url;

use super::DeliveryError;

const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientSecrets {
  pub client_id: String,
  pub client_secret: String,
  #[serde(default = "default_auth_uri")]
  pub auth_uri: String,
  #[serde(default = "default_token_uri")]
  pub token_uri: String,
  #[serde(default)]
  pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
  DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
  DEFAULT_TOKEN_URI.to_string()
}

impl ClientSecrets {
  fn redirect_uri(&self) -> &str {
    self.redirect_uris.first().map(String::as_str).unwrap_or("http://localhost")
  }
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
  installed: Option<ClientSecrets>,
  web: Option<ClientSecrets>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
  pub access_token: String,
  #[serde(default = "default_token_type")]
  pub token_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub refresh_token: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
  "Bearer".to_string()
}

impl Token {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self
      .expiry
      .is_some_and(|expiry| expiry - Duration::seconds(EXPIRY_MARGIN_SECS) <= now)
  }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
  #[serde(default)]
  token_type: Option<String>,
  #[serde(default)]
  refresh_token: Option<String>,
  #[serde(default)]
  expires_in: Option<i64>,
}

impl TokenResponse {
  fn into_token(self, previous_refresh: Option<String>) -> Token {
    Token {
      access_token: self.access_token,
      token_type: self.token_type.unwrap_or_else(default_token_type),
      refresh_token: self.refresh_token.or(previous_refresh),
      expiry: self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
    }
  }
}

pub struct OAuthClient {
  http: reqwest::Client,
  credentials_path: PathBuf,
  token_path: PathBuf,
  token: Mutex<Option<Token>>,
}

impl OAuthClient {
  pub fn new(http: reqwest::Client, credentials_path: impl Into<PathBuf>, token_path: impl Into<PathBuf>) -> Self {
    Self {
      http,
      credentials_path: credentials_path.into(),
      token_path: token_path.into(),
      token: Mutex::new(None),
    }
  }

  pub async fn secrets(&self) -> Result<ClientSecrets, DeliveryError> {
    let raw = read_file(&self.credentials_path).await?;
    let file: CredentialsFile = serde_json::from_slice(&raw).map_err(|source| DeliveryError::Json {
      what: "credentials file",
      source,
    })?;
    file.installed.or(file.web).ok_or(DeliveryError::MalformedCredentials)
  }

  /// Consent page URL the administrator opens to grant spreadsheet access.
  pub async fn authorization_url(&self) -> Result<String, DeliveryError> {
    let secrets = self.secrets().await?;
    let url = Url::parse_with_params(
      &secrets.auth_uri,
      &[
        ("client_id", secrets.client_id.as_str()),
        ("redirect_uri", secrets.redirect_uri()),
        ("response_type", "code"),
        ("scope", SPREADSHEETS_SCOPE),
        ("access_type", "offline"),
        ("state", "state-token"),
      ],
    )?;
    Ok(url.into())
  }

  /// Exchanges an authorization code and stores the resulting token.
  #[instrument(skip(self, code))]
  pub async fn exchange_code(&self, code: &str) -> Result<Token, DeliveryError> {
    let secrets = self.secrets().await?;
    let response = self
      .http
      .post(&secrets.token_uri)
      .form(&[
        ("code", code),
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("redirect_uri", secrets.redirect_uri()),
        ("grant_type", "authorization_code"),
      ])
      .send()
      .await?;
    let token = parse_token_response(response, None).await?;
    self.store(token.clone()).await?;
    info!(path = %self.token_path.display(), "stored new authorization token");
    Ok(token)
  }

  /// Current access token, refreshed first when it is about to expire.
  pub async fn access_token(&self) -> Result<String, DeliveryError> {
    let mut cached = self.token.lock().await;
    let token = match cached.take() {
      Some(token) => token,
      None => self.load().await?,
    };
    let token = if token.is_expired(Utc::now()) {
      self.refresh(token).await?
    } else {
      token
    };
    let access_token = token.access_token.clone();
    *cached = Some(token);
    Ok(access_token)
  }

  async fn refresh(&self, token: Token) -> Result<Token, DeliveryError> {
    let refresh_token = token.refresh_token.clone().ok_or(DeliveryError::MissingToken)?;
    let secrets = self.secrets().await?;
    let response = self
      .http
      .post(&secrets.token_uri)
      .form(&[
        ("refresh_token", refresh_token.as_str()),
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("grant_type", "refresh_token"),
      ])
      .send()
      .await?;
    let refreshed = parse_token_response(response, Some(refresh_token)).await?;
    write_token(&self.token_path, &refreshed).await?;
    info!("refreshed authorization token");
    Ok(refreshed)
  }

  async fn load(&self) -> Result<Token, DeliveryError> {
    let raw = match tokio::fs::read(&self.token_path).await {
      Ok(raw) => raw,
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(DeliveryError::MissingToken),
      Err(source) => {
        return Err(DeliveryError::Io {
          path: self.token_path.clone(),
          source,
        });
      },
    };
    serde_json::from_slice(&raw).map_err(|source| DeliveryError::Json {
      what: "token file",
      source,
    })
  }

  async fn store(&self, token: Token) -> Result<(), DeliveryError> {
    write_token(&self.token_path, &token).await?;
    *self.token.lock().await = Some(token);
    Ok(())
  }
}

async fn parse_token_response(
  response: reqwest::Response,
  previous_refresh: Option<String>,
) -> Result<Token, DeliveryError> {
  let status = response.status();
  let body = response.text().await?;
  if !status.is_success() {
    return Err(DeliveryError::TokenEndpoint {
      status: status.as_u16(),
      body,
    });
  }
  let parsed: TokenResponse = serde_json::from_str(&body).map_err(|source| DeliveryError::Json {
    what: "token response",
    source,
  })?;
  Ok(parsed.into_token(previous_refresh))
}

async fn read_file(path: &Path) -> Result<Vec<u8>, DeliveryError> {
  tokio::fs::read(path).await.map_err(|source| DeliveryError::Io {
    path: path.to_path_buf(),
    source,
  })
}

async fn write_token(path: &Path, token: &Token) -> Result<(), DeliveryError> {
  let encoded = serde_json::to_vec_pretty(token).map_err(|source| DeliveryError::Json {
    what: "token",
    source,
  })?;
  tokio::fs::write(path, encoded).await.map_err(|source| DeliveryError::Io {
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(test)]
pub(crate) mod test_support {
  use std::path::Path;

  use serde_json::json;

  pub fn write_credentials(dir: &Path, token_uri: &str) -> std::path::PathBuf {
    let path = dir.join("credentials.json");
    let body = json!({
      "installed": {
        "client_id": "client-id",
        "client_secret": "client-secret",
        "auth_uri": "https://accounts.example.org/o/oauth2/auth",
        "token_uri": token_uri,
        "redirect_uris": ["http://localhost"]
      }
    });
    std::fs::write(&path, body.to_string()).unwrap();
    path
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use chrono::Utc;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use url::Url;
  use wiremock::Mock;
  use wiremock::MockServer;
  use wiremock::ResponseTemplate;
  use wiremock::matchers::body_string_contains;
  use wiremock::matchers::method;
  use wiremock::matchers::path;

  use super::OAuthClient;
  use super::Token;
  use super::test_support::write_credentials;
  use crate::delivery::DeliveryError;

  #[tokio::test]
  async fn builds_offline_consent_url() {
    let dir = tempfile::tempdir().unwrap();
    let credentials = write_credentials(dir.path(), "https://oauth.example.org/token");
    let client = OAuthClient::new(reqwest::Client::new(), credentials, dir.path().join("token.json"));

    let url = Url::parse(&client.authorization_url().await.unwrap()).unwrap();
    let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert!(params.contains(&("client_id".to_string(), "client-id".to_string())));
    assert!(params.contains(&("access_type".to_string(), "offline".to_string())));
    assert!(params.contains(&(
      "scope".to_string(),
      "https://www.googleapis.com/auth/spreadsheets".to_string()
    )));
  }

  #[tokio::test]
  async fn missing_token_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let credentials = write_credentials(dir.path(), "https://oauth.example.org/token");
    let client = OAuthClient::new(reqwest::Client::new(), credentials, dir.path().join("token.json"));
    assert!(matches!(client.access_token().await, Err(DeliveryError::MissingToken)));
  }

  #[tokio::test]
  async fn exchanges_code_and_persists_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/token"))
      .and(body_string_contains("grant_type=authorization_code"))
      .and(body_string_contains("code=4%2Fabc"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "fresh",
        "refresh_token": "refresh-me",
        "expires_in": 3600,
        "token_type": "Bearer"
      })))
      .expect(1)
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let credentials = write_credentials(dir.path(), &format!("{}/token", server.uri()));
    let token_path = dir.path().join("token.json");
    let client = OAuthClient::new(reqwest::Client::new(), credentials, &token_path);

    let token = client.exchange_code("4/abc").await.unwrap();
    assert_eq!(token.refresh_token.as_deref(), Some("refresh-me"));
    assert_eq!(client.access_token().await.unwrap(), "fresh");

    let stored: Token = serde_json::from_slice(&std::fs::read(&token_path).unwrap()).unwrap();
    assert_eq!(stored.access_token, "fresh");
  }

  #[tokio::test]
  async fn refreshes_expired_token_keeping_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/token"))
      .and(body_string_contains("grant_type=refresh_token"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "renewed",
        "expires_in": 3600
      })))
      .expect(1)
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let credentials = write_credentials(dir.path(), &format!("{}/token", server.uri()));
    let token_path = dir.path().join("token.json");
    let expired = Token {
      access_token: "stale".to_string(),
      token_type: "Bearer".to_string(),
      refresh_token: Some("refresh-me".to_string()),
      expiry: Some(Utc::now() - Duration::hours(1)),
    };
    std::fs::write(&token_path, serde_json::to_vec(&expired).unwrap()).unwrap();

    let client = OAuthClient::new(reqwest::Client::new(), credentials, &token_path);
    assert_eq!(client.access_token().await.unwrap(), "renewed");

    let stored: Token = serde_json::from_slice(&std::fs::read(&token_path).unwrap()).unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-me"));
  }

  #[tokio::test]
  async fn rejected_code_surfaces_endpoint_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/token"))
      .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let credentials = write_credentials(dir.path(), &format!("{}/token", server.uri()));
    let client = OAuthClient::new(reqwest::Client::new(), credentials, dir.path().join("token.json"));

    match client.exchange_code("bad").await {
      Err(DeliveryError::TokenEndpoint { status, body }) => {
        assert_eq!(status, 400);
        assert_eq!(body, "invalid_grant");
      },
      other => panic!("unexpected result: {other:?}"),
    }
  }
}
