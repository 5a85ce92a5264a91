use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static SHELTER_CHOICE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\.").expect("valid regex"));
static TRIP_DATE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{2}\.\d{2}\.\d{4}").expect("valid regex"));

/// Extracts the id from a `"<id>. <title>"` shelter button.
pub fn parse_shelter_id(input: &str) -> Option<u32> {
  SHELTER_CHOICE_PATTERN
    .captures(input.trim())
    .and_then(|captures| captures.get(1))
    .and_then(|id| id.as_str().parse().ok())
}

/// Pulls the `DD.MM.YYYY` part out of a date label such as `"Суббота 14.09.2024 11:00"`.
pub fn extract_trip_date(label: &str) -> Option<&str> {
  TRIP_DATE_PATTERN.find(label).map(|found| found.as_str())
}

/// Splits `"<date label>, <shelter title>"` at the last comma.
pub fn split_dated_choice(input: &str) -> Option<(&str, &str)> {
  let (label, title) = input.trim().rsplit_once(',')?;
  let (label, title) = (label.trim(), title.trim());
  if label.is_empty() || title.is_empty() {
    return None;
  }
  Some((label, title))
}

/// Accepts either the full OAuth redirect URL or a bare authorization code.
pub fn extract_auth_code(input: &str) -> Option<String> {
  let trimmed = input.trim();
  if trimmed.is_empty() {
    return None;
  }
  match Url::parse(trimmed) {
    Ok(url) => url
      .query_pairs()
      .find(|(key, _)| key == "code")
      .map(|(_, value)| value.into_owned())
      .filter(|code| !code.is_empty()),
    Err(_) if !trimmed.contains(char::is_whitespace) => Some(trimmed.to_string()),
    Err(_) => None,
  }
}
