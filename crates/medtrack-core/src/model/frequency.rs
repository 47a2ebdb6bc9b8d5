// Prescription frequency: parsing clinical shorthand and deriving default dose times.

use std::fmt;

use chrono::{Duration, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrequencyError {
    #[error("unrecognized frequency `{0}`")]
    Unknown(String),

    #[error("interval of {0} hours must divide a day evenly (1..=24)")]
    BadInterval(u32),
}

/// How often a medication is taken.
///
/// Serialized as its canonical text, and deserialized through
/// [`Frequency::parse`] so an interval that does not divide a day cannot be
/// built from data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Frequency {
    OnceDaily,
    TwiceDaily,
    ThreeTimesDaily,
    FourTimesDaily,
    /// One dose every `n` hours around the clock.
    EveryHours(u32),
    /// Once a week. `None` means the weekday of the assignment's start date.
    Weekly(Option<Weekday>),
    /// PRN: no scheduled slots, logs are free-standing.
    AsNeeded,
}

impl Frequency {
    /// Parse a frequency from clinical abbreviations (`bid`, `q8h`, `prn`) or
    /// plain phrases (`twice daily`, `every 8 hours`, `weekly on friday`).
    pub fn parse(input: &str) -> Result<Self, FrequencyError> {
        let normalized = input
            .trim()
            .to_lowercase()
            .replace('.', "")
            .replace(['-', '_'], " ");
        let words: Vec<&str> = normalized.split_whitespace().collect();
        let joined = words.join(" ");

        match joined.as_str() {
            "qd" | "od" | "daily" | "once daily" | "once a day" | "1x daily" => {
                return Ok(Frequency::OnceDaily)
            }
            "bid" | "twice daily" | "twice a day" | "2x daily" => {
                return Ok(Frequency::TwiceDaily)
            }
            "tid" | "three times daily" | "three times a day" | "3x daily" => {
                return Ok(Frequency::ThreeTimesDaily)
            }
            "qid" | "four times daily" | "four times a day" | "4x daily" => {
                return Ok(Frequency::FourTimesDaily)
            }
            "prn" | "as needed" => return Ok(Frequency::AsNeeded),
            "weekly" | "once weekly" | "once a week" | "qw" => {
                return Ok(Frequency::Weekly(None))
            }
            "every hour" | "hourly" => return Ok(Frequency::EveryHours(1)),
            _ => {}
        }

        // q8h / q 8h / q 8 h
        if let Some(rest) = joined.strip_prefix('q') {
            let compact: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
            if let Some(num) = compact.strip_suffix('h') {
                if let Ok(n) = num.parse::<u32>() {
                    return Self::every_hours(n);
                }
            }
        }

        // every 8 hours / every 8 hrs / every 8h
        if let ["every", amount, rest @ ..] = words.as_slice() {
            let (num, unit) = match rest {
                [] => match amount.strip_suffix('h') {
                    Some(num) => (num, "h"),
                    None => (*amount, ""),
                },
                [unit] => (*amount, *unit),
                _ => ("", ""),
            };
            if matches!(unit, "h" | "hr" | "hrs" | "hour" | "hours") {
                if let Ok(n) = num.parse::<u32>() {
                    return Self::every_hours(n);
                }
            }
        }

        // weekly on friday
        if let ["weekly", "on", day] | ["every", day] = words.as_slice() {
            if let Ok(weekday) = day.parse::<Weekday>() {
                return Ok(Frequency::Weekly(Some(weekday)));
            }
        }

        Err(FrequencyError::Unknown(input.trim().to_string()))
    }

    fn every_hours(n: u32) -> Result<Self, FrequencyError> {
        if n == 0 || n > 24 || 24 % n != 0 {
            return Err(FrequencyError::BadInterval(n));
        }
        Ok(if n == 24 {
            Frequency::OnceDaily
        } else {
            Frequency::EveryHours(n)
        })
    }

    /// Number of scheduled doses on a day the medication applies to.
    pub fn doses_per_day(&self) -> u32 {
        match self {
            Frequency::OnceDaily | Frequency::Weekly(_) => 1,
            Frequency::TwiceDaily => 2,
            Frequency::ThreeTimesDaily => 3,
            Frequency::FourTimesDaily => 4,
            Frequency::EveryHours(n) => 24 / (*n).max(1),
            Frequency::AsNeeded => 0,
        }
    }

    /// Default dose times when an assignment does not list explicit ones.
    ///
    /// N-times-daily doses are spread evenly across `day_start..=day_end`;
    /// interval dosing runs around the clock from `day_start`. The result is
    /// sorted and free of duplicates.
    pub fn default_times(&self, day_start: NaiveTime, day_end: NaiveTime) -> Vec<NaiveTime> {
        let mut times = match self {
            Frequency::AsNeeded => Vec::new(),
            Frequency::OnceDaily | Frequency::Weekly(_) => vec![day_start],
            Frequency::EveryHours(n) => {
                let n = (*n).max(1);
                (0..24 / n)
                    .map(|k| day_start.overflowing_add_signed(Duration::hours(i64::from(k * n))).0)
                    .collect()
            }
            _ => {
                let n = i64::from(self.doses_per_day());
                let span = (day_end - day_start).num_minutes().max(0);
                (0..n)
                    .map(|k| day_start + Duration::minutes(span * k / (n - 1)))
                    .collect()
            }
        };
        times.sort();
        times.dedup();
        times
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::OnceDaily => write!(f, "once daily"),
            Frequency::TwiceDaily => write!(f, "twice daily"),
            Frequency::ThreeTimesDaily => write!(f, "three times daily"),
            Frequency::FourTimesDaily => write!(f, "four times daily"),
            Frequency::EveryHours(1) => write!(f, "every hour"),
            Frequency::EveryHours(n) => write!(f, "every {n} hours"),
            Frequency::Weekly(None) => write!(f, "weekly"),
            Frequency::Weekly(Some(day)) => {
                write!(f, "weekly on {}", weekday_name(*day))
            }
            Frequency::AsNeeded => write!(f, "as needed"),
        }
    }
}

impl TryFrom<String> for Frequency {
    type Error = FrequencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Frequency::parse(&value)
    }
}

impl From<Frequency> for String {
    fn from(frequency: Frequency) -> Self {
        frequency.to_string()
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}
