// Adherence scores, on-time rates and day streaks.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use medtrack_core::model::{AdherenceStats, AssignmentId, PatientId, StatsPeriod};

use crate::matching::{DoseOutcome, DoseRecord};

/// Percentage of scheduled doses that were taken, clamped to `[0, 100]`.
/// Zero scheduled doses score zero.
pub fn adherence_score(taken: u32, scheduled: u32) -> f64 {
    if scheduled == 0 {
        return 0.0;
    }
    (100.0 * f64::from(taken) / f64::from(scheduled)).clamp(0.0, 100.0)
}

/// Counts over the resolved records of a set. Pending slots are left out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    pub scheduled: u32,
    pub taken: u32,
    pub skipped: u32,
    pub missed: u32,
    pub on_time: u32,
    pub late: u32,
    pub score: f64,
    pub on_time_rate: f64,
}

pub fn summarize<'a>(records: impl IntoIterator<Item = &'a DoseRecord>) -> Summary {
    let mut s = Summary::default();
    for record in records {
        match record.outcome {
            DoseOutcome::OnTime => s.on_time += 1,
            DoseOutcome::Late => s.late += 1,
            DoseOutcome::Skipped => s.skipped += 1,
            DoseOutcome::Missed => s.missed += 1,
            DoseOutcome::Pending => {}
        }
    }
    s.taken = s.on_time + s.late;
    s.scheduled = s.taken + s.skipped + s.missed;
    s.score = adherence_score(s.taken, s.scheduled);
    s.on_time_rate = adherence_score(s.on_time, s.taken);
    s
}

/// Running day-streak counter. Feed days in chronological order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreakTracker {
    pub current: u32,
    pub longest: u32,
}

impl StreakTracker {
    /// Record one day that had at least one resolved dose.
    pub fn record_day(&mut self, fully_adherent: bool) {
        if fully_adherent {
            self.current += 1;
            self.longest = self.longest.max(self.current);
        } else {
            self.current = 0;
        }
    }
}

/// Streaks over the days of `records`. A day counts when it has at least one
/// resolved dose; it extends the streak only if every resolved dose that day
/// was taken. Days with nothing resolved are skipped over.
pub fn streaks<'a>(records: impl IntoIterator<Item = &'a DoseRecord>) -> StreakTracker {
    let mut days: BTreeMap<NaiveDate, bool> = BTreeMap::new();
    for record in records {
        if !record.outcome.is_resolved() {
            continue;
        }
        let adherent = days.entry(record.slot.date()).or_insert(true);
        *adherent &= record.outcome.is_taken();
    }

    let mut tracker = StreakTracker::default();
    for adherent in days.into_values() {
        tracker.record_day(adherent);
    }
    tracker
}

/// Build the rollup of `period` containing `as_of` from classified records.
/// Records outside the period's dates are ignored.
pub fn compute(
    patient_id: PatientId,
    assignment_id: Option<AssignmentId>,
    period: StatsPeriod,
    as_of: NaiveDate,
    records: &[DoseRecord],
    computed_at: NaiveDateTime,
) -> AdherenceStats {
    let (start, end) = period.bounds(as_of);
    let in_period: Vec<&DoseRecord> = records
        .iter()
        .filter(|r| r.slot.patient_id == patient_id)
        .filter(|r| assignment_id.map_or(true, |id| r.slot.assignment_id == id))
        .filter(|r| (start..=end).contains(&r.slot.date()))
        .collect();

    let summary = summarize(in_period.iter().copied());
    let streak = streaks(in_period.iter().copied());

    AdherenceStats {
        patient_id,
        assignment_id,
        period,
        period_start: start,
        period_end: end,
        total_scheduled: summary.scheduled,
        total_taken: summary.taken,
        total_skipped: summary.skipped,
        total_missed: summary.missed,
        total_on_time: summary.on_time,
        total_late: summary.late,
        adherence_score: summary.score,
        on_time_rate: summary.on_time_rate,
        current_streak: streak.current,
        longest_streak: streak.longest,
        computed_at,
    }
}
