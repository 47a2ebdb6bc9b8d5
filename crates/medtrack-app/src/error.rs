// Errors surfaced by the tracker service.

use chrono::NaiveDateTime;
use thiserror::Error;

use medtrack_adherence::{GoalError, ScheduleError};
use medtrack_core::model::{AssignmentId, AssignmentStatus, InvalidTransition};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("assignment {id} is {status}; doses can only be logged against an active assignment")]
    InactiveAssignment {
        id: AssignmentId,
        status: AssignmentStatus,
    },

    #[error("no scheduled dose within {window_minutes} minutes of {at}")]
    NoMatchingSlot {
        at: NaiveDateTime,
        window_minutes: u32,
    },

    #[error("dose scheduled at {scheduled_time} is already logged for assignment {assignment_id}")]
    DuplicateLog {
        assignment_id: AssignmentId,
        scheduled_time: NaiveDateTime,
    },

    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Goal(#[from] GoalError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl TrackerError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        TrackerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        TrackerError::Validation {
            field,
            message: message.into(),
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
