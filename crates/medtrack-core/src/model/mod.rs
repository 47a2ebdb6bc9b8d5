// Domain records shared by the adherence engine, the store and the service layer.

pub mod dose;
pub mod frequency;
pub mod medication;
pub mod patient;
pub mod reminder;
pub mod stats;
pub mod user;

pub use dose::{DoseStatus, MedicationLog};
pub use frequency::{Frequency, FrequencyError};
pub use medication::{AssignmentStatus, InvalidTransition, Medication, PatientMedication};
pub use patient::Patient;
pub use reminder::{Reminder, ReminderChannel};
pub use stats::{AdherenceGoal, AdherenceStats, StatsPeriod};
pub use user::{ChatMessage, ChatSender, Role, User};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

pub type UserId = i64;
pub type PatientId = i64;
pub type MedicationId = i64;
pub type AssignmentId = i64;
pub type LogId = i64;
pub type ReminderId = i64;
pub type GoalId = i64;

/// Storage format for wall-clock timestamps. Fixed width, so lexicographic
/// order in SQLite matches chronological order.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// Error returned when a stored or user-supplied label does not name a known
/// enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Parse a timestamp in storage format. A space separator and trailing
/// fractional seconds are accepted as well.
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let trimmed = s.trim();
    NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M"))
}

pub fn format_date(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

pub fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
}

pub fn format_time(t: &NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse `HH:MM` (or `HH:MM:SS`) time of day.
pub fn parse_time(s: &str) -> Result<NaiveTime, chrono::ParseError> {
    let trimmed = s.trim();
    NaiveTime::parse_from_str(trimmed, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_round_trips_through_storage_format() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(8, 5, 0)
            .unwrap();
        let text = format_datetime(&dt);
        assert_eq!(text, "2024-03-09T08:05:00");
        assert_eq!(parse_datetime(&text).unwrap(), dt);
    }

    #[test]
    fn parse_datetime_accepts_space_and_minutes_only() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        assert_eq!(parse_datetime("2024-03-09 20:00:00").unwrap(), expected);
        assert_eq!(parse_datetime("2024-03-09T20:00").unwrap(), expected);
        assert_eq!(parse_datetime(" 2024-03-09 20:00 ").unwrap(), expected);
    }

    #[test]
    fn storage_format_sorts_chronologically() {
        let a = parse_datetime("2024-03-09T09:00:00").unwrap();
        let b = parse_datetime("2024-03-10T08:00:00").unwrap();
        assert!(format_datetime(&a) < format_datetime(&b));
    }

    #[test]
    fn parse_time_accepts_seconds() {
        assert_eq!(
            parse_time("07:30:00").unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
        assert!(parse_time("7.30").is_err());
    }
}
