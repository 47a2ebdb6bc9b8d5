// Adherence rollups and goals.

use std::fmt;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{AssignmentId, GoalId, PatientId, UnknownVariant};

/// Longest rolling window accepted, about ten years.
pub const MAX_ROLLING_DAYS: u32 = 3660;

/// Window an adherence rollup covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatsPeriod {
    Daily,
    /// Monday through Sunday.
    Weekly,
    /// Calendar month.
    Monthly,
    /// The last `n` days (at most [`MAX_ROLLING_DAYS`]), ending on the
    /// reference date.
    Rolling(u32),
}

impl StatsPeriod {
    /// Parse `daily`, `weekly`, `monthly`, `rolling:N` or `Nd`.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "daily" | "day" => return Ok(StatsPeriod::Daily),
            "weekly" | "week" => return Ok(StatsPeriod::Weekly),
            "monthly" | "month" => return Ok(StatsPeriod::Monthly),
            _ => {}
        }
        let days = lower
            .strip_prefix("rolling:")
            .or_else(|| lower.strip_suffix('d'))
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|n| (1..=MAX_ROLLING_DAYS).contains(n));
        days.map(StatsPeriod::Rolling)
            .ok_or_else(|| UnknownVariant::new("stats period", s))
    }

    /// First and last day (both inclusive) of the period containing `as_of`.
    /// Windows that would leave the calendar are cut at its edges.
    pub fn bounds(&self, as_of: NaiveDate) -> (NaiveDate, NaiveDate) {
        let back = |days: u64| as_of.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN);
        match self {
            StatsPeriod::Daily => (as_of, as_of),
            StatsPeriod::Weekly => {
                let start = back(u64::from(as_of.weekday().num_days_from_monday()));
                let end = start.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX);
                (start, end)
            }
            StatsPeriod::Monthly => {
                let start = as_of.with_day(1).unwrap_or(as_of);
                let next_month = if start.month() == 12 {
                    NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
                };
                let end = next_month.and_then(|d| d.pred_opt()).unwrap_or(NaiveDate::MAX);
                (start, end)
            }
            StatsPeriod::Rolling(n) => {
                let span = (*n).clamp(1, MAX_ROLLING_DAYS) - 1;
                (back(u64::from(span)), as_of)
            }
        }
    }
}

impl fmt::Display for StatsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsPeriod::Daily => f.write_str("daily"),
            StatsPeriod::Weekly => f.write_str("weekly"),
            StatsPeriod::Monthly => f.write_str("monthly"),
            StatsPeriod::Rolling(n) => write!(f, "rolling:{n}"),
        }
    }
}

/// Adherence rollup for one patient (optionally one assignment) over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdherenceStats {
    pub patient_id: PatientId,
    /// `None` aggregates every assignment of the patient.
    pub assignment_id: Option<AssignmentId>,
    pub period: StatsPeriod,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_scheduled: u32,
    pub total_taken: u32,
    pub total_skipped: u32,
    pub total_missed: u32,
    pub total_on_time: u32,
    pub total_late: u32,
    /// Percentage in `[0, 100]`.
    pub adherence_score: f64,
    /// Share of taken doses that were on time, in `[0, 100]`.
    pub on_time_rate: f64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub computed_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdherenceGoal {
    pub id: GoalId,
    pub patient_id: PatientId,
    /// Minimum adherence score to reach, `(0, 100]`.
    pub target_score: f64,
    pub period: StatsPeriod,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

impl AdherenceGoal {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.active && date >= self.start_date && self.end_date.map_or(true, |end| date <= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn rolling_window_is_capped() {
        assert_eq!(
            StatsPeriod::parse("rolling:3660"),
            Ok(StatsPeriod::Rolling(MAX_ROLLING_DAYS))
        );
        assert!(StatsPeriod::parse("rolling:4000000000").is_err());
        assert!(StatsPeriod::parse("3661d").is_err());
        assert!(StatsPeriod::parse("0d").is_err());

        // Built directly, an oversized window is clamped instead of overflowing.
        let (start, end) = StatsPeriod::Rolling(u32::MAX).bounds(d(2024, 5, 15));
        assert_eq!(end, d(2024, 5, 15));
        assert_eq!((end - start).num_days(), i64::from(MAX_ROLLING_DAYS) - 1);

        let (start, _) = StatsPeriod::Rolling(30).bounds(NaiveDate::MIN);
        assert_eq!(start, NaiveDate::MIN);
    }

    #[test]
    fn weekly_bounds_start_on_monday() {
        // 2024-05-15 is a Wednesday.
        let (start, end) = StatsPeriod::Weekly.bounds(d(2024, 5, 15));
        assert_eq!(start, d(2024, 5, 13));
        assert_eq!(end, d(2024, 5, 19));
    }

    #[test]
    fn monthly_bounds_handle_december_and_leap_years() {
        assert_eq!(
            StatsPeriod::Monthly.bounds(d(2024, 12, 20)),
            (d(2024, 12, 1), d(2024, 12, 31))
        );
        assert_eq!(
            StatsPeriod::Monthly.bounds(d(2024, 2, 10)),
            (d(2024, 2, 1), d(2024, 2, 29))
        );
    }

    #[test]
    fn rolling_bounds_end_on_reference_date() {
        assert_eq!(
            StatsPeriod::Rolling(7).bounds(d(2024, 5, 15)),
            (d(2024, 5, 9), d(2024, 5, 15))
        );
        assert_eq!(
            StatsPeriod::Rolling(1).bounds(d(2024, 5, 15)),
            (d(2024, 5, 15), d(2024, 5, 15))
        );
    }

    #[test]
    fn period_labels_round_trip() {
        for p in [
            StatsPeriod::Daily,
            StatsPeriod::Weekly,
            StatsPeriod::Monthly,
            StatsPeriod::Rolling(30),
        ] {
            assert_eq!(StatsPeriod::parse(&p.to_string()).unwrap(), p);
        }
        assert_eq!(StatsPeriod::parse("14d").unwrap(), StatsPeriod::Rolling(14));
        assert!(StatsPeriod::parse("0d").is_err());
        assert!(StatsPeriod::parse("yearly").is_err());
    }

    #[test]
    fn goal_applies_only_inside_its_range() {
        let goal = AdherenceGoal {
            id: 1,
            patient_id: 1,
            target_score: 90.0,
            period: StatsPeriod::Weekly,
            start_date: d(2024, 5, 1),
            end_date: Some(d(2024, 5, 31)),
            description: None,
            active: true,
            created_at: d(2024, 5, 1).and_hms_opt(0, 0, 0).unwrap(),
        };
        assert!(!goal.applies_on(d(2024, 4, 30)));
        assert!(goal.applies_on(d(2024, 5, 1)));
        assert!(goal.applies_on(d(2024, 5, 31)));
        assert!(!goal.applies_on(d(2024, 6, 1)));

        let inactive = AdherenceGoal { active: false, ..goal };
        assert!(!inactive.applies_on(d(2024, 5, 10)));
    }
}
