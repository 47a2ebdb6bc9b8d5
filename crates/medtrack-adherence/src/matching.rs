// Matches dose logs to scheduled slots and classifies every slot.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use medtrack_core::config::AdherenceConfig;
use medtrack_core::model::{AssignmentId, DoseStatus, MedicationLog};

use crate::schedule::ScheduledDose;

/// What became of one scheduled dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DoseOutcome {
    OnTime,
    /// Taken, but outside the on-time tolerance (early or late).
    Late,
    Skipped,
    Missed,
    /// Not logged yet and still inside the grace period.
    Pending,
}

impl DoseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoseOutcome::OnTime => "on_time",
            DoseOutcome::Late => "late",
            DoseOutcome::Skipped => "skipped",
            DoseOutcome::Missed => "missed",
            DoseOutcome::Pending => "pending",
        }
    }

    /// Resolved outcomes count towards adherence; pending ones do not yet.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, DoseOutcome::Pending)
    }

    pub fn is_taken(&self) -> bool {
        matches!(self, DoseOutcome::OnTime | DoseOutcome::Late)
    }
}

impl fmt::Display for DoseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A slot together with the log matched to it, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoseRecord {
    pub slot: ScheduledDose,
    pub log: Option<MedicationLog>,
    pub outcome: DoseOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// One record per slot, in slot order.
    pub records: Vec<DoseRecord>,
    /// Logs that matched no slot. Reported, never counted.
    pub extra_logs: Vec<MedicationLog>,
}

/// A dose is on time iff it was taken within `tolerance` of its slot, on
/// either side. The boundary itself counts as on time.
pub fn classify_log(scheduled: NaiveDateTime, actual: NaiveDateTime, tolerance: Duration) -> bool {
    (actual - scheduled).abs() <= tolerance
}

/// Index of the unclaimed slot closest to `actual`, provided it lies within
/// `window`. Equidistant slots resolve to the earlier one.
pub fn nearest_slot(
    actual: NaiveDateTime,
    slots: &[NaiveDateTime],
    claimed: &[bool],
    window: Duration,
) -> Option<usize> {
    slots
        .iter()
        .enumerate()
        .filter(|(i, _)| !claimed.get(*i).copied().unwrap_or(false))
        .map(|(i, slot)| (i, (actual - *slot).abs(), *slot))
        .filter(|(_, distance, _)| *distance <= window)
        .min_by_key(|(_, distance, slot)| (*distance, *slot))
        .map(|(i, _, _)| i)
}

/// Outcome of a slot given the log matched to it.
fn logged_outcome(slot: &ScheduledDose, log: &MedicationLog, tolerance: Duration) -> DoseOutcome {
    match log.status {
        DoseStatus::Skipped => DoseOutcome::Skipped,
        DoseStatus::Missed => DoseOutcome::Missed,
        DoseStatus::Taken => {
            let on_time = match log.actual_time {
                Some(actual) => classify_log(slot.scheduled_time, actual, tolerance),
                None => log.on_time,
            };
            if on_time {
                DoseOutcome::OnTime
            } else {
                DoseOutcome::Late
            }
        }
    }
}

/// Outcome of a slot nothing was logged for.
fn unlogged_outcome(slot: &ScheduledDose, now: NaiveDateTime, grace: Duration) -> DoseOutcome {
    if now > slot.scheduled_time + grace {
        DoseOutcome::Missed
    } else {
        DoseOutcome::Pending
    }
}

/// Pair every slot with at most one log and classify it as of `now`.
///
/// Logs are first matched on their exact `(assignment, scheduled_time)`.
/// A log whose scheduled time is not a slot falls back to the nearest
/// unclaimed slot of the same assignment, measured from its actual time,
/// within the match window.
pub fn classify(
    slots: &[ScheduledDose],
    logs: &[MedicationLog],
    now: NaiveDateTime,
    config: &AdherenceConfig,
) -> Classification {
    let tolerance = config.tolerance();
    let window = config.match_window();

    let mut ordered: Vec<ScheduledDose> = slots.to_vec();
    ordered.sort();

    let by_key: HashMap<(AssignmentId, NaiveDateTime), usize> = ordered
        .iter()
        .enumerate()
        .map(|(i, s)| ((s.assignment_id, s.scheduled_time), i))
        .collect();
    let mut by_assignment: BTreeMap<AssignmentId, Vec<usize>> = BTreeMap::new();
    for (i, slot) in ordered.iter().enumerate() {
        by_assignment.entry(slot.assignment_id).or_default().push(i);
    }

    let mut matched: Vec<Option<&MedicationLog>> = vec![None; ordered.len()];
    let mut leftovers = Vec::new();

    for log in logs {
        match by_key.get(&(log.assignment_id, log.scheduled_time)) {
            Some(&i) if matched[i].is_none() => matched[i] = Some(log),
            _ => leftovers.push(log),
        }
    }

    let mut extra_logs = Vec::new();
    for log in leftovers {
        let target = log.actual_time.unwrap_or(log.scheduled_time);
        let candidate = by_assignment.get(&log.assignment_id).and_then(|indices| {
            let times: Vec<NaiveDateTime> =
                indices.iter().map(|&i| ordered[i].scheduled_time).collect();
            let claimed: Vec<bool> = indices.iter().map(|&i| matched[i].is_some()).collect();
            nearest_slot(target, &times, &claimed, window).map(|k| indices[k])
        });
        match candidate {
            Some(i) => matched[i] = Some(log),
            None => {
                debug!(
                    log_id = log.id,
                    assignment_id = log.assignment_id,
                    "dose log matches no scheduled slot"
                );
                extra_logs.push(log.clone());
            }
        }
    }

    let records = ordered
        .into_iter()
        .zip(matched)
        .map(|(slot, log)| {
            let outcome = match log {
                Some(log) => logged_outcome(&slot, log, tolerance),
                None => unlogged_outcome(&slot, now, config.grace()),
            };
            DoseRecord {
                slot,
                log: log.cloned(),
                outcome,
            }
        })
        .collect();

    Classification {
        records,
        extra_logs,
    }
}
