// Reminder schedules attached to an assignment.

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::{AssignmentId, PatientId, ReminderId, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderChannel {
    Push,
    Email,
    Sms,
}

impl ReminderChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderChannel::Push => "push",
            ReminderChannel::Email => "email",
            ReminderChannel::Sms => "sms",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s.trim().to_lowercase().as_str() {
            "push" => Ok(ReminderChannel::Push),
            "email" => Ok(ReminderChannel::Email),
            "sms" => Ok(ReminderChannel::Sms),
            _ => Err(UnknownVariant::new("reminder channel", s)),
        }
    }
}

/// Daily reminder for one dose time of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub assignment_id: AssignmentId,
    pub patient_id: PatientId,
    /// The dose time this reminder announces.
    pub time_of_day: NaiveTime,
    /// How many minutes before the dose the reminder goes out.
    pub lead_minutes: u32,
    pub channel: ReminderChannel,
    pub enabled: bool,
    pub last_sent_at: Option<NaiveDateTime>,
}
