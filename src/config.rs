use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use figment::Figment;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Serialized;
use figment::providers::Yaml;
use serde::Deserialize;
use serde::Serialize;

use crate::delivery::RowLayout;
use crate::delivery::SheetTarget;
use crate::models::Shelter;
use crate::models::ShelterList;

pub const DEFAULT_CONFIG_PATH: &str = "configs/app.yml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
  pub telegram: TelegramConfig,
  pub administration: AdministrationConfig,
  pub google: GoogleConfig,
  pub cache: CacheConfig,
  pub sessions: SessionConfig,
  pub delivery: DeliveryConfig,
  pub shelters_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelegramConfig {
  pub environment: String,
  pub environments: BTreeMap<String, EnvironmentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
  pub api_token: String,
  /// Long-polling timeout, seconds.
  pub timeout: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdministrationConfig {
  pub admin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GoogleConfig {
  pub spreadsheet_id: String,
  pub trips_sheet: String,
  pub system_sheet: String,
  pub credentials_file: PathBuf,
  pub token_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
  pub database_url: String,
  pub snapshot_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
  pub idle_ttl_secs: u64,
  pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeliveryConfig {
  pub timeout_secs: u64,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      telegram: TelegramConfig::default(),
      administration: AdministrationConfig::default(),
      google: GoogleConfig::default(),
      cache: CacheConfig::default(),
      sessions: SessionConfig::default(),
      delivery: DeliveryConfig::default(),
      shelters_file: PathBuf::from("configs/shelters.yml"),
    }
  }
}

impl Default for TelegramConfig {
  fn default() -> Self {
    Self {
      environment: "production".to_string(),
      environments: BTreeMap::new(),
    }
  }
}

impl Default for EnvironmentConfig {
  fn default() -> Self {
    Self {
      api_token: String::new(),
      timeout: 10,
    }
  }
}

impl Default for GoogleConfig {
  fn default() -> Self {
    Self {
      spreadsheet_id: String::new(),
      trips_sheet: "Trips".to_string(),
      system_sheet: "System".to_string(),
      credentials_file: PathBuf::from("credentials.json"),
      token_file: PathBuf::from("token.json"),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      database_url: "sqlite://cache/cache.db".to_string(),
      snapshot_interval_secs: 60,
    }
  }
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      idle_ttl_secs: 24 * 60 * 60,
      sweep_interval_secs: 600,
    }
  }
}

impl Default for DeliveryConfig {
  fn default() -> Self {
    Self { timeout_secs: 10 }
  }
}

/// Settings the admin can reload at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
  pub admin_chat_id: Option<i64>,
  pub targets: Vec<SheetTarget>,
  pub delivery_timeout: Duration,
}

impl AppConfig {
  /// `APP_CONFIG` if set, otherwise [`DEFAULT_CONFIG_PATH`].
  pub fn path_from_env() -> PathBuf {
    env::var_os("APP_CONFIG")
      .map(PathBuf::from)
      .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
  }

  pub fn load(path: &Path) -> Result<Self> {
    if !path.is_file() {
      bail!("config file {} not found", path.display());
    }
    figment(path)
      .merge(env_provider())
      .extract()
      .with_context(|| format!("failed to parse config {}", path.display()))
  }

  fn environment(&self) -> Option<&EnvironmentConfig> {
    self.telegram.environments.get(&self.telegram.environment)
  }

  /// `BOT_TOKEN`/`TELOXIDE_TOKEN` first, then the active environment's `api_token`.
  pub fn bot_token(&self) -> Result<String> {
    let from_env = env::var("BOT_TOKEN").or_else(|_| env::var("TELOXIDE_TOKEN")).ok();
    let from_file = self
      .environment()
      .map(|environment| environment.api_token.clone())
      .filter(|token| !token.trim().is_empty());
    from_env.or(from_file).with_context(|| {
      format!(
        "no bot token for environment `{}`; set BOT_TOKEN or telegram.environments.{}.api_token",
        self.telegram.environment, self.telegram.environment
      )
    })
  }

  pub fn polling_timeout(&self) -> Duration {
    let secs = self.environment().map_or(EnvironmentConfig::default().timeout, |environment| environment.timeout);
    Duration::from_secs(u64::from(secs))
  }

  pub fn runtime_settings(&self) -> RuntimeSettings {
    let target = |sheet: &str, layout| SheetTarget {
      spreadsheet_id: self.google.spreadsheet_id.clone(),
      sheet: sheet.to_string(),
      layout,
    };
    RuntimeSettings {
      admin_chat_id: parse_admin(&self.administration.admin),
      targets: vec![
        target(&self.google.trips_sheet, RowLayout::Detailed),
        target(&self.google.system_sheet, RowLayout::Compact),
      ],
      delivery_timeout: Duration::from_secs(self.delivery.timeout_secs),
    }
  }
}

fn figment(path: &Path) -> Figment {
  Figment::new()
    .merge(Serialized::defaults(AppConfig::default()))
    .merge(Yaml::file(path))
}

/// `TRIPBOT_GOOGLE_SPREADSHEET_ID` becomes `google.spreadsheet_id`: only the section prefix is
/// split off, so field names keep their underscores.
fn env_provider() -> Env {
  Env::prefixed("TRIPBOT_").map(|key| {
    let key = key.as_str();
    let mapped = [
      "telegram_",
      "administration_",
      "google_",
      "cache_",
      "sessions_",
      "delivery_",
    ]
    .iter()
    .find_map(|section| {
      key
        .strip_prefix(section)
        .map(|field| format!("{}.{field}", section.trim_end_matches('_')))
    })
    .unwrap_or_else(|| key.to_string());
    mapped.into()
  })
}

fn parse_admin(raw: &str) -> Option<i64> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!("administration.admin is empty, admin commands are disabled");
    return None;
  }
  match trimmed.parse::<i64>() {
    Ok(value) => Some(value),
    Err(err) => {
      tracing::warn!(value = trimmed, error = %err, "invalid administration.admin, admin commands are disabled");
      None
    },
  }
}

#[derive(Debug, Deserialize)]
struct ShelterFile {
  #[serde(default)]
  shelters: Vec<Shelter>,
}

pub fn load_shelters(path: &Path) -> Result<ShelterList> {
  let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read shelters from {}", path.display()))?;
  parse_shelters(&raw).with_context(|| format!("invalid shelter catalog {}", path.display()))
}

fn parse_shelters(raw: &str) -> Result<ShelterList> {
  let file: ShelterFile = Figment::from(Yaml::string(raw)).extract()?;
  Ok(ShelterList::new(file.shelters)?)
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use figment::Figment;
  use figment::providers::Format;
  use figment::providers::Serialized;
  use figment::providers::Yaml;
  use pretty_assertions::assert_eq;

  use super::AppConfig;
  use super::parse_admin;
  use super::parse_shelters;
  use crate::delivery::RowLayout;
  use crate::models::ScheduleKind;
  use crate::models::WeekRule;

  const SAMPLE: &str = r#"
telegram:
  environment: staging
  environments:
    staging:
      api_token: "123:abc"
      timeout: 30
administration:
  admin: "4242"
google:
  spreadsheet_id: sheet-1
"#;

  fn from_yaml(yaml: &str) -> AppConfig {
    Figment::new()
      .merge(Serialized::defaults(AppConfig::default()))
      .merge(Yaml::string(yaml))
      .extract()
      .unwrap()
  }

  #[test]
  fn merges_file_over_defaults() {
    let config = from_yaml(SAMPLE);
    assert_eq!(config.telegram.environment, "staging");
    assert_eq!(config.polling_timeout(), Duration::from_secs(30));
    assert_eq!(config.google.trips_sheet, "Trips");
    assert_eq!(config.cache.snapshot_interval_secs, 60);
    assert_eq!(config.shelters_file.to_str(), Some("configs/shelters.yml"));
  }

  #[test]
  fn runtime_settings_target_both_sheets() {
    let settings = from_yaml(SAMPLE).runtime_settings();
    assert_eq!(settings.admin_chat_id, Some(4242));
    assert_eq!(settings.delivery_timeout, Duration::from_secs(10));
    let ranges: Vec<String> = settings.targets.iter().map(|target| target.range()).collect();
    assert_eq!(ranges, vec!["Trips!A2:H", "System!A1:D"]);
    assert_eq!(settings.targets[1].layout, RowLayout::Compact);
    assert!(settings.targets.iter().all(|target| target.spreadsheet_id == "sheet-1"));
  }

  #[test]
  fn dotted_override_reaches_nested_field() {
    let config: AppConfig = Figment::new()
      .merge(Serialized::defaults(AppConfig::default()))
      .merge(Yaml::string(SAMPLE))
      .merge(("google.spreadsheet_id", "from-env"))
      .extract()
      .unwrap();
    assert_eq!(config.google.spreadsheet_id, "from-env");
  }

  #[test]
  fn admin_id_must_be_numeric() {
    assert_eq!(parse_admin(" 17 "), Some(17));
    assert_eq!(parse_admin("admin"), None);
    assert_eq!(parse_admin(""), None);
  }

  #[test]
  fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(AppConfig::load(&dir.path().join("absent.yml")).is_err());
  }

  #[test]
  fn parses_shelter_catalog() {
    let shelters = parse_shelters(
      r#"
shelters:
  - id: 1
    title: Хаски Хелп
    short_title: ХХ
    guide: Ехать на электричке
    schedule:
      type: regularly
      details: [[1, 6], [3, 6]]
      dates_exceptions: ["14.09.2024"]
      time_start: "11:00"
  - id: 8
    title: Лемур
"#,
    )
    .unwrap();

    assert_eq!(shelters.len(), 2);
    let husky = shelters.get(1).unwrap();
    assert_eq!(husky.schedule.kind, ScheduleKind::Regularly);
    assert_eq!(husky.schedule.details[1], WeekRule { week: 3, weekday: 6 });
    assert_eq!(shelters.get(8).unwrap().schedule.kind, ScheduleKind::None);
  }

  #[test]
  fn duplicate_shelter_ids_are_rejected() {
    let err = parse_shelters("shelters:\n  - {id: 1, title: A}\n  - {id: 1, title: B}\n").unwrap_err();
    assert!(format!("{err:#}").contains("shelter id 1"));
  }
}
