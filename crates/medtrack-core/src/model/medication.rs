// Medications and their assignment to patients.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::{AssignmentId, Frequency, MedicationId, PatientId, UnknownVariant, UserId};

/// A drug in the formulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub id: MedicationId,
    pub name: String,
    pub generic_name: Option<String>,
    /// Dosage form, e.g. "tablet" or "inhaler".
    pub form: Option<String>,
    pub strength: Option<String>,
    pub description: Option<String>,
}

/// Lifecycle of a prescription assignment.
///
/// `Pending -> Active -> Stopped`, with no shortcuts and no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignmentStatus {
    /// Prescribed by a clinician, not yet confirmed by the patient.
    Pending,
    Active,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move assignment from {from} to {to}")]
pub struct InvalidTransition {
    pub from: AssignmentStatus,
    pub to: AssignmentStatus,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Active => "active",
            AssignmentStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "pending" => Ok(AssignmentStatus::Pending),
            "active" => Ok(AssignmentStatus::Active),
            "stopped" => Ok(AssignmentStatus::Stopped),
            _ => Err(UnknownVariant::new("assignment status", s)),
        }
    }

    /// The only state reachable from `self`, if any.
    pub fn next(&self) -> Option<AssignmentStatus> {
        match self {
            AssignmentStatus::Pending => Some(AssignmentStatus::Active),
            AssignmentStatus::Active => Some(AssignmentStatus::Stopped),
            AssignmentStatus::Stopped => None,
        }
    }

    pub fn transition(self, to: AssignmentStatus) -> Result<AssignmentStatus, InvalidTransition> {
        if self.next() == Some(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A medication prescribed to a patient (the "PatientMedication" record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientMedication {
    pub id: AssignmentId,
    pub patient_id: PatientId,
    pub medication_id: MedicationId,
    /// Free-text amount per dose, e.g. "500 mg".
    pub dosage: String,
    pub frequency: Frequency,
    /// Explicit dose times. Empty means "derive from frequency".
    pub dose_times: Vec<NaiveTime>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub status: AssignmentStatus,
    pub instructions: Option<String>,
    pub assigned_by: Option<UserId>,
    pub created_at: NaiveDateTime,
    pub confirmed_at: Option<NaiveDateTime>,
    pub stopped_at: Option<NaiveDateTime>,
    pub stop_reason: Option<String>,
}

impl PatientMedication {
    /// Patient accepted the prescription; dosing starts counting.
    pub fn confirm(&mut self, at: NaiveDateTime) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(AssignmentStatus::Active)?;
        self.confirmed_at = Some(at);
        Ok(())
    }

    pub fn stop(&mut self, at: NaiveDateTime, reason: Option<String>) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(AssignmentStatus::Stopped)?;
        self.stopped_at = Some(at);
        self.stop_reason = reason;
        Ok(())
    }

    /// Last calendar day (inclusive) on which doses are due, taking both the
    /// prescribed end date and an early stop into account.
    pub fn last_dosing_day(&self) -> Option<NaiveDate> {
        let stopped = self.stopped_at.map(|at| at.date());
        match (self.end_date, stopped) {
            (Some(end), Some(stop)) => Some(end.min(stop)),
            (end, stop) => end.or(stop),
        }
    }
}
