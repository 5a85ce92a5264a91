//! Visit-date calculation for shelters.
//!
//! Dates are rendered as `"<weekday> DD.MM.YYYY <start time>"`, and those labels double as the
//! keyboard buttons a volunteer presses, so validation is a membership check on the same output.

use std::collections::BTreeMap;

use chrono::Datelike;
use chrono::NaiveDate;

use crate::models::Registration;
use crate::models::ScheduleKind;
use crate::models::Shelter;
use crate::models::ShelterList;

pub const DEFAULT_HORIZON_MONTHS: u32 = 6;

const WEEKDAYS_RU: [&str; 7] = [
  "Понедельник",
  "Вторник",
  "Среда",
  "Четверг",
  "Пятница",
  "Суббота",
  "Воскресенье",
];

const MONTHS_RU: [&str; 12] = [
  "Январь",
  "Февраль",
  "Март",
  "Апрель",
  "Май",
  "Июнь",
  "Июль",
  "Август",
  "Сентябрь",
  "Октябрь",
  "Ноябрь",
  "Декабрь",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripDate {
  pub date: NaiveDate,
  pub label: String,
}

pub fn weekday_name(date: NaiveDate) -> &'static str {
  WEEKDAYS_RU[date.weekday().num_days_from_monday() as usize]
}

/// `month` is 1-based.
pub fn month_name(month: u32) -> Option<&'static str> {
  MONTHS_RU.get(month.checked_sub(1)? as usize).copied()
}

pub fn parse_month(input: &str) -> Option<u32> {
  let needle = input.trim().to_lowercase();
  MONTHS_RU
    .iter()
    .position(|name| name.to_lowercase() == needle)
    .map(|index| index as u32 + 1)
}

/// The current month followed by the next `horizon - 1`, as 1-based month numbers.
pub fn upcoming_months(today: NaiveDate, horizon: u32) -> Vec<u32> {
  (0 .. horizon).map(|offset| month_after(today, offset).1).collect()
}

/// Date of the `week`-th `weekday` (ISO, 1 = Monday) of the month; `None` when the month is too short.
pub fn nth_weekday(year: i32, month: u32, weekday: u32, week: u32) -> Option<NaiveDate> {
  if !(1 ..= 7).contains(&weekday) || week == 0 {
    return None;
  }
  let first = NaiveDate::from_ymd_opt(year, month, 1)?;
  let first_weekday = first.weekday().number_from_monday();
  let offset = (weekday + 7 - first_weekday) % 7;
  NaiveDate::from_ymd_opt(year, month, 1 + offset + (week - 1) * 7)
}

fn month_after(today: NaiveDate, offset: u32) -> (i32, u32) {
  let index = today.month0() + offset;
  (today.year() + (index / 12) as i32, index % 12 + 1)
}

fn format_day(date: NaiveDate) -> String {
  date.format("%d.%m.%Y").to_string()
}

fn label(date: NaiveDate, shelter: &Shelter) -> String {
  format!(
    "{} {} {}",
    weekday_name(date),
    format_day(date),
    shelter.schedule.time_start
  )
}

/// Visit dates of one shelter within one calendar month, already filtered by exceptions.
fn dates_in_month(shelter: &Shelter, year: i32, month: u32, today: NaiveDate) -> Vec<NaiveDate> {
  if shelter.schedule.kind != ScheduleKind::Regularly {
    return Vec::new();
  }
  let is_current_month = year == today.year() && month == today.month();
  shelter
    .schedule
    .details
    .iter()
    .filter_map(|rule| nth_weekday(year, month, rule.weekday, rule.week))
    .filter(|date| !(is_current_month && *date < today))
    .filter(|date| {
      let formatted = format_day(*date);
      !shelter.schedule.dates_exceptions.iter().any(|exception| exception.trim() == formatted)
    })
    .collect()
}

/// Upcoming visit dates of a shelter over `horizon` months, de-duplicated and sorted.
pub fn trip_dates(shelter: &Shelter, today: NaiveDate, horizon: u32) -> Vec<TripDate> {
  let mut dates = BTreeMap::new();
  for offset in 0 .. horizon {
    let (year, month) = month_after(today, offset);
    for date in dates_in_month(shelter, year, month, today) {
      dates.entry(date).or_insert_with(|| label(date, shelter));
    }
  }
  dates.into_iter().map(|(date, label)| TripDate { date, label }).collect()
}

pub fn dates_for_shelter(shelter: &Shelter, today: NaiveDate) -> Vec<String> {
  trip_dates(shelter, today, DEFAULT_HORIZON_MONTHS)
    .into_iter()
    .map(|trip| trip.label)
    .collect()
}

/// Visit dates of every shelter in `month` (1-based), as `"<label>, <shelter title>"`.
///
/// A month earlier in the calendar than today's month refers to next year.
pub fn dates_for_month(month: u32, shelters: &ShelterList, today: NaiveDate) -> Vec<String> {
  if !(1 ..= 12).contains(&month) {
    return Vec::new();
  }
  let year = if month < today.month() {
    today.year() + 1
  } else {
    today.year()
  };
  let mut entries: Vec<(NaiveDate, u32, String)> = shelters
    .iter()
    .flat_map(|shelter| {
      dates_in_month(shelter, year, month, today)
        .into_iter()
        .map(move |date| (date, shelter.id, format!("{}, {}", label(date, shelter), shelter.title)))
    })
    .collect();
  entries.sort();
  entries.into_iter().map(|(_, _, label)| label).collect()
}

pub fn is_trip_date_valid(date: &str, registration: Option<&Registration>, today: NaiveDate) -> bool {
  let Some(shelter) = registration.and_then(|registration| registration.shelter.as_ref()) else {
    return false;
  };
  dates_for_shelter(shelter, today).iter().any(|candidate| candidate == date)
}
