// Dose events recorded against an assignment.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{AssignmentId, LogId, PatientId, ReminderId, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoseStatus {
    Taken,
    /// Patient deliberately did not take the dose.
    Skipped,
    /// Nothing was logged before the grace period ran out.
    Missed,
}

impl DoseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoseStatus::Taken => "taken",
            DoseStatus::Skipped => "skipped",
            DoseStatus::Missed => "missed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s.trim().to_lowercase().as_str() {
            "taken" => Ok(DoseStatus::Taken),
            "skipped" => Ok(DoseStatus::Skipped),
            "missed" => Ok(DoseStatus::Missed),
            _ => Err(UnknownVariant::new("dose status", s)),
        }
    }
}

/// One logged dose (the "MedicationLog" record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationLog {
    pub id: LogId,
    pub assignment_id: AssignmentId,
    pub patient_id: PatientId,
    pub scheduled_time: NaiveDateTime,
    /// When the dose was actually taken. Only set for `Taken`.
    pub actual_time: Option<NaiveDateTime>,
    pub status: DoseStatus,
    pub on_time: bool,
    pub reminder_id: Option<ReminderId>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl MedicationLog {
    /// Signed offset of the actual dose from its slot. Positive means late.
    pub fn offset(&self) -> Option<chrono::Duration> {
        self.actual_time.map(|actual| actual - self.scheduled_time)
    }
}
