// Role-based access checks. Every service call names its actor explicitly.

use serde::Serialize;

use medtrack_core::model::{PatientId, Role, UserId};

use crate::error::{TrackerError, TrackerResult};

/// The user a service call is made on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
    /// Patient record linked to the user, if any.
    pub patient_id: Option<PatientId>,
}

impl Actor {
    pub fn admin(user_id: UserId) -> Self {
        Actor {
            user_id,
            role: Role::Admin,
            patient_id: None,
        }
    }

    pub fn patient(user_id: UserId, patient_id: PatientId) -> Self {
        Actor {
            user_id,
            role: Role::Patient,
            patient_id: Some(patient_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RegisterUser,
    CreatePatient,
    AddMedication,
    AssignMedication,
    ConfirmAssignment,
    StopAssignment,
    ViewAssignments,
    LogDose,
    ViewSchedule,
    ViewStats,
    ManageGoals,
    ManageReminders,
}

impl Action {
    fn admin_only(&self) -> bool {
        matches!(
            self,
            Action::RegisterUser
                | Action::CreatePatient
                | Action::AddMedication
                | Action::AssignMedication
        )
    }
}

/// Check that `actor` may perform `action` on records of `patient_id`.
///
/// Admins may do anything. Patients may only touch their own records and
/// never the admin-only actions.
pub fn authorize(actor: &Actor, action: Action, patient_id: Option<PatientId>) -> TrackerResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if action.admin_only() {
        return Err(TrackerError::Forbidden(format!(
            "{action:?} requires an admin"
        )));
    }
    match (actor.patient_id, patient_id) {
        (Some(own), Some(target)) if own == target => Ok(()),
        (None, _) => Err(TrackerError::Forbidden(format!(
            "user {} has no patient record",
            actor.user_id
        ))),
        _ => Err(TrackerError::Forbidden(format!(
            "{action:?} on another patient's records"
        ))),
    }
}

/// Check that `actor` may read or write data owned by user `user_id`.
pub fn authorize_user(actor: &Actor, user_id: UserId) -> TrackerResult<()> {
    if actor.is_admin() || actor.user_id == user_id {
        Ok(())
    } else {
        Err(TrackerError::Forbidden(format!(
            "user {} cannot access user {user_id}",
            actor.user_id
        )))
    }
}
