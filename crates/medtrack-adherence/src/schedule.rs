// Expands an assignment's frequency into concrete dose slots.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::Serialize;
use thiserror::Error;

use medtrack_core::config::ScheduleConfig;
use medtrack_core::model::{
    AssignmentId, AssignmentStatus, Frequency, FrequencyError, PatientId, PatientMedication,
};

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error(transparent)]
    Frequency(#[from] FrequencyError),

    #[error("schedule range starts {from} after it ends {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
}

/// One dose the patient is expected to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScheduledDose {
    pub scheduled_time: NaiveDateTime,
    pub assignment_id: AssignmentId,
    pub patient_id: PatientId,
}

impl ScheduledDose {
    pub fn date(&self) -> NaiveDate {
        self.scheduled_time.date()
    }
}

/// Parse free-text frequency input for a new prescription.
pub fn parse_frequency(input: &str) -> Result<Frequency, ScheduleError> {
    Ok(Frequency::parse(input)?)
}

/// Dose times for one applicable day. Explicit times on the assignment win
/// over the frequency's defaults; as-needed medication has none either way.
pub fn dose_times(assignment: &PatientMedication, config: &ScheduleConfig) -> Vec<NaiveTime> {
    if assignment.frequency == Frequency::AsNeeded {
        return Vec::new();
    }
    if assignment.dose_times.is_empty() {
        return assignment
            .frequency
            .default_times(config.day_start, config.day_end);
    }
    let mut times = assignment.dose_times.clone();
    times.sort();
    times.dedup();
    times
}

/// Weekday a weekly assignment is taken on.
fn weekly_day(assignment: &PatientMedication) -> Option<Weekday> {
    match assignment.frequency {
        Frequency::Weekly(day) => Some(day.unwrap_or_else(|| assignment.start_date.weekday())),
        _ => None,
    }
}

/// All dose slots of `assignment` on the days `from..=to`, sorted by time.
///
/// Slots are clipped to the assignment's start and end dates. A stopped
/// assignment yields nothing after the moment it was stopped, and a pending
/// one yields nothing at all.
pub fn expand(
    assignment: &PatientMedication,
    from: NaiveDate,
    to: NaiveDate,
    config: &ScheduleConfig,
) -> Result<Vec<ScheduledDose>, ScheduleError> {
    if from > to {
        return Err(ScheduleError::InvalidRange { from, to });
    }
    if assignment.status == AssignmentStatus::Pending {
        return Ok(Vec::new());
    }

    let times = dose_times(assignment, config);
    if times.is_empty() {
        return Ok(Vec::new());
    }

    let first = from.max(assignment.start_date);
    let last = match assignment.last_dosing_day() {
        Some(end) => to.min(end),
        None => to,
    };
    let weekday = weekly_day(assignment);

    let mut slots = Vec::new();
    let mut day = first;
    while day <= last {
        if weekday.map_or(true, |w| day.weekday() == w) {
            for time in &times {
                let scheduled_time = day.and_time(*time);
                if assignment.stopped_at.map_or(false, |stop| scheduled_time > stop) {
                    continue;
                }
                slots.push(ScheduledDose {
                    scheduled_time,
                    assignment_id: assignment.id,
                    patient_id: assignment.patient_id,
                });
            }
        }
        day += Duration::days(1);
    }
    Ok(slots)
}

/// Expand several assignments over the same range into one time-ordered list.
pub fn expand_all<'a>(
    assignments: impl IntoIterator<Item = &'a PatientMedication>,
    from: NaiveDate,
    to: NaiveDate,
    config: &ScheduleConfig,
) -> Result<Vec<ScheduledDose>, ScheduleError> {
    let mut slots = Vec::new();
    for assignment in assignments {
        slots.extend(expand(assignment, from, to, config)?);
    }
    slots.sort();
    Ok(slots)
}

/// The first slot strictly after `after`, looking at most `horizon_days` ahead.
pub fn next_dose(
    assignment: &PatientMedication,
    after: NaiveDateTime,
    horizon_days: i64,
    config: &ScheduleConfig,
) -> Option<ScheduledDose> {
    let from = after.date();
    let to = from + Duration::days(horizon_days.max(0));
    expand(assignment, from, to, config)
        .ok()?
        .into_iter()
        .find(|slot| slot.scheduled_time > after)
}
