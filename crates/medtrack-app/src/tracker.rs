// Tracker service: the operations users and the reminder loop perform,
// with access checks, lifecycle rules and persistence in one place.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use medtrack_adherence::goals::validate_target;
use medtrack_adherence::schedule::{expand_all, next_dose};
use medtrack_adherence::{
    classify, classify_log, compute, dose_times, evaluate, expand, nearest_slot, Classification,
    GoalProgress, ScheduledDose,
};
use medtrack_core::config::Config;
use medtrack_core::db::{
    Database, NewAssignment, NewDoseLog, NewGoal, NewMedication, NewPatient, NewReminder,
};
use medtrack_core::model::{
    format_datetime, parse_datetime, AdherenceGoal, AdherenceStats, AssignmentId,
    AssignmentStatus, ChatMessage, ChatSender, DoseStatus, Frequency, GoalId, Medication,
    MedicationLog, Patient, PatientId, PatientMedication, Reminder, ReminderChannel, ReminderId,
    Role, StatsPeriod, User, UserId,
};

use crate::access::{authorize, authorize_user, Action, Actor};
use crate::error::{TrackerError, TrackerResult};
use crate::reminders::{self, DueReminder};

/// Key of the missed-dose sweep watermark in the `app_state` table.
pub const SWEEP_WATERMARK_KEY: &str = "missed_sweep_watermark";

/// How many days ahead `next_doses` looks.
const NEXT_DOSE_HORIZON_DAYS: i64 = 8;

/// A dose as reported by a patient (or imported).
#[derive(Debug, Clone, PartialEq)]
pub struct DoseEntry {
    pub assignment_id: AssignmentId,
    /// Slot the dose belongs to. `None` picks the nearest slot.
    pub scheduled_time: Option<NaiveDateTime>,
    /// When it was taken. `None` on a taken dose means "now".
    pub actual_time: Option<NaiveDateTime>,
    pub status: DoseStatus,
    pub notes: Option<String>,
    pub reminder_id: Option<ReminderId>,
}

impl DoseEntry {
    pub fn taken(assignment_id: AssignmentId, actual_time: NaiveDateTime) -> Self {
        DoseEntry {
            assignment_id,
            scheduled_time: None,
            actual_time: Some(actual_time),
            status: DoseStatus::Taken,
            notes: None,
            reminder_id: None,
        }
    }

    pub fn skipped(assignment_id: AssignmentId, scheduled_time: NaiveDateTime) -> Self {
        DoseEntry {
            assignment_id,
            scheduled_time: Some(scheduled_time),
            actual_time: None,
            status: DoseStatus::Skipped,
            notes: None,
            reminder_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderRequest {
    pub assignment_id: AssignmentId,
    pub time_of_day: NaiveTime,
    /// Falls back to `reminders.lead_minutes` from the configuration.
    pub lead_minutes: Option<u32>,
    pub channel: ReminderChannel,
}

/// A goal with its progress over the goal's period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalStatus {
    pub goal: AdherenceGoal,
    pub progress: GoalProgress,
}

pub struct Tracker {
    db: Database,
    config: Config,
}

impl Tracker {
    pub fn new(db: Database, config: Config) -> Self {
        Tracker { db, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // ------------------------------------------------------------------
    // Users and patients
    // ------------------------------------------------------------------

    /// Build the actor for a username, linking their patient record if any.
    pub fn resolve_actor(&self, username: &str) -> TrackerResult<Actor> {
        let user = self
            .db
            .find_user_by_username(username)?
            .ok_or_else(|| TrackerError::not_found("user", username))?;
        let patient_id = match user.role {
            Role::Patient => self.db.patient_for_user(user.id)?.map(|p| p.id),
            Role::Admin => None,
        };
        Ok(Actor {
            user_id: user.id,
            role: user.role,
            patient_id,
        })
    }

    /// Create the first admin of an empty database. Refused once any user
    /// exists.
    pub fn bootstrap_admin(&self, username: &str, now: NaiveDateTime) -> TrackerResult<User> {
        if self.db.count_users()? > 0 {
            return Err(TrackerError::Forbidden(
                "an admin already exists; use an admin account to add users".into(),
            ));
        }
        let user = self.insert_user(username, None, Role::Admin, now)?;
        info!("bootstrapped admin {}", user.username);
        Ok(user)
    }

    pub fn register_user(
        &self,
        actor: &Actor,
        username: &str,
        email: Option<&str>,
        role: Role,
        now: NaiveDateTime,
    ) -> TrackerResult<User> {
        authorize(actor, Action::RegisterUser, None)?;
        let user = self.insert_user(username, email, role, now)?;
        info!("registered {} user {}", role.as_str(), user.username);
        Ok(user)
    }

    fn insert_user(
        &self,
        username: &str,
        email: Option<&str>,
        role: Role,
        now: NaiveDateTime,
    ) -> TrackerResult<User> {
        let username = username.trim();
        if username.is_empty() || username.contains(char::is_whitespace) {
            return Err(TrackerError::validation(
                "username",
                "must be non-empty and contain no whitespace",
            ));
        }
        if self.db.find_user_by_username(username)?.is_some() {
            return Err(TrackerError::validation(
                "username",
                format!("`{username}` is already taken"),
            ));
        }
        Ok(self.db.create_user(username, email, role, now)?)
    }

    pub fn create_patient(
        &self,
        actor: &Actor,
        patient: &NewPatient,
        now: NaiveDateTime,
    ) -> TrackerResult<Patient> {
        authorize(actor, Action::CreatePatient, None)?;
        if patient.first_name.trim().is_empty() || patient.last_name.trim().is_empty() {
            return Err(TrackerError::validation("name", "first and last name are required"));
        }
        if let Some(user_id) = patient.user_id {
            let user = self
                .db
                .get_user(user_id)?
                .ok_or_else(|| TrackerError::not_found("user", user_id))?;
            if user.role != Role::Patient {
                return Err(TrackerError::validation(
                    "user_id",
                    format!("{} is not a patient account", user.username),
                ));
            }
            if self.db.patient_for_user(user_id)?.is_some() {
                return Err(TrackerError::validation(
                    "user_id",
                    format!("{} already has a patient record", user.username),
                ));
            }
        }
        let created = self.db.create_patient(patient, now)?;
        info!("created patient {} ({})", created.id, created.full_name());
        Ok(created)
    }

    fn load_patient(&self, id: PatientId) -> TrackerResult<Patient> {
        self.db
            .get_patient(id)?
            .ok_or_else(|| TrackerError::not_found("patient", id))
    }

    // ------------------------------------------------------------------
    // Medications and assignments
    // ------------------------------------------------------------------

    pub fn add_medication(&self, actor: &Actor, med: &NewMedication) -> TrackerResult<Medication> {
        authorize(actor, Action::AddMedication, None)?;
        let name = med.name.trim();
        if name.is_empty() {
            return Err(TrackerError::validation("name", "medication name is required"));
        }
        if self.db.find_medication_by_name(name)?.is_some() {
            return Err(TrackerError::validation(
                "name",
                format!("medication `{name}` already exists"),
            ));
        }
        let created = self.db.create_medication(&NewMedication {
            name: name.to_string(),
            ..med.clone()
        })?;
        info!("added medication {}", created.name);
        Ok(created)
    }

    pub fn find_medication(&self, name: &str) -> TrackerResult<Medication> {
        self.db
            .find_medication_by_name(name.trim())?
            .ok_or_else(|| TrackerError::not_found("medication", name))
    }

    /// The formulary, by name.
    pub fn medications(&self) -> TrackerResult<Vec<Medication>> {
        Ok(self.db.list_medications()?)
    }

    /// Prescribe a medication. The assignment starts out pending until the
    /// patient confirms it.
    pub fn assign_medication(
        &self,
        actor: &Actor,
        request: &NewAssignment,
        now: NaiveDateTime,
    ) -> TrackerResult<PatientMedication> {
        authorize(actor, Action::AssignMedication, Some(request.patient_id))?;
        self.load_patient(request.patient_id)?;
        let med = self
            .db
            .get_medication(request.medication_id)?
            .ok_or_else(|| TrackerError::not_found("medication", request.medication_id))?;
        if request.dosage.trim().is_empty() {
            return Err(TrackerError::validation("dosage", "dosage is required"));
        }
        if let Some(end) = request.end_date {
            if end < request.start_date {
                return Err(TrackerError::validation(
                    "end_date",
                    format!("{end} is before the start date {}", request.start_date),
                ));
            }
        }
        if request.frequency == Frequency::AsNeeded && !request.dose_times.is_empty() {
            return Err(TrackerError::validation(
                "dose_times",
                "as-needed medication has no fixed dose times",
            ));
        }

        let assignment = self.db.insert_assignment(
            &NewAssignment {
                assigned_by: Some(actor.user_id),
                ..request.clone()
            },
            now,
        )?;
        info!(
            "assigned {} ({}) to patient {} as assignment {}",
            med.name, assignment.frequency, assignment.patient_id, assignment.id
        );
        Ok(assignment)
    }

    fn load_assignment(&self, id: AssignmentId) -> TrackerResult<PatientMedication> {
        self.db
            .get_assignment(id)?
            .ok_or_else(|| TrackerError::not_found("assignment", id))
    }

    pub fn confirm_assignment(
        &self,
        actor: &Actor,
        id: AssignmentId,
        now: NaiveDateTime,
    ) -> TrackerResult<PatientMedication> {
        let mut assignment = self.load_assignment(id)?;
        authorize(actor, Action::ConfirmAssignment, Some(assignment.patient_id))?;
        let previous = assignment.status;
        assignment.confirm(now)?;
        self.db.save_assignment_status(&assignment, previous)?;
        info!("assignment {} confirmed", id);
        Ok(assignment)
    }

    pub fn stop_assignment(
        &self,
        actor: &Actor,
        id: AssignmentId,
        reason: Option<String>,
        now: NaiveDateTime,
    ) -> TrackerResult<PatientMedication> {
        let mut assignment = self.load_assignment(id)?;
        authorize(actor, Action::StopAssignment, Some(assignment.patient_id))?;
        let previous = assignment.status;
        assignment.stop(now, reason)?;
        self.db.save_assignment_status(&assignment, previous)?;
        info!(
            "assignment {} stopped ({})",
            id,
            assignment.stop_reason.as_deref().unwrap_or("no reason given")
        );
        Ok(assignment)
    }

    pub fn assignments_for(
        &self,
        actor: &Actor,
        patient_id: PatientId,
        status: Option<AssignmentStatus>,
    ) -> TrackerResult<Vec<PatientMedication>> {
        authorize(actor, Action::ViewAssignments, Some(patient_id))?;
        Ok(self.db.list_assignments(patient_id, status)?)
    }

    /// Medication name per assignment of a patient, for reports.
    pub fn medication_labels(
        &self,
        actor: &Actor,
        patient_id: PatientId,
    ) -> TrackerResult<HashMap<AssignmentId, String>> {
        authorize(actor, Action::ViewAssignments, Some(patient_id))?;
        let mut names: HashMap<i64, String> = HashMap::new();
        let mut labels = HashMap::new();
        for assignment in self.db.list_assignments(patient_id, None)? {
            let name = match names.get(&assignment.medication_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .db
                        .get_medication(assignment.medication_id)?
                        .map(|m| m.name)
                        .unwrap_or_else(|| format!("medication {}", assignment.medication_id));
                    names.insert(assignment.medication_id, name.clone());
                    name
                }
            };
            labels.insert(assignment.id, name);
        }
        Ok(labels)
    }

    // ------------------------------------------------------------------
    // Dose logging and schedules
    // ------------------------------------------------------------------

    /// Slot of `assignment` closest to `at` within the match window.
    /// As-needed medication has no slots, so the time is used as given.
    fn resolve_slot(
        &self,
        assignment: &PatientMedication,
        at: NaiveDateTime,
    ) -> TrackerResult<NaiveDateTime> {
        if assignment.frequency == Frequency::AsNeeded {
            return Ok(at);
        }
        let day = at.date();
        let slots = expand(
            assignment,
            day - Duration::days(1),
            day + Duration::days(1),
            &self.config.schedule,
        )?;
        let times: Vec<NaiveDateTime> = slots.iter().map(|s| s.scheduled_time).collect();
        let claimed = vec![false; times.len()];
        nearest_slot(at, &times, &claimed, self.config.adherence.match_window())
            .map(|i| times[i])
            .ok_or(TrackerError::NoMatchingSlot {
                at,
                window_minutes: self.config.adherence.match_window_minutes,
            })
    }

    /// Record a taken, skipped or missed dose against an active assignment.
    ///
    /// The dose is filed under the nearest slot within the match window; a
    /// given scheduled time is snapped to its slot the same way.
    pub fn log_dose(
        &self,
        actor: &Actor,
        entry: &DoseEntry,
        now: NaiveDateTime,
    ) -> TrackerResult<MedicationLog> {
        let assignment = self.load_assignment(entry.assignment_id)?;
        authorize(actor, Action::LogDose, Some(assignment.patient_id))?;
        if assignment.status != AssignmentStatus::Active {
            return Err(TrackerError::InactiveAssignment {
                id: assignment.id,
                status: assignment.status,
            });
        }
        if let Some(reminder_id) = entry.reminder_id {
            let reminder = self
                .db
                .get_reminder(reminder_id)?
                .ok_or_else(|| TrackerError::not_found("reminder", reminder_id))?;
            if reminder.assignment_id != assignment.id {
                return Err(TrackerError::validation(
                    "reminder_id",
                    format!("reminder {reminder_id} belongs to another assignment"),
                ));
            }
        }

        let actual_time = match entry.status {
            DoseStatus::Taken => Some(entry.actual_time.unwrap_or(now)),
            DoseStatus::Skipped | DoseStatus::Missed => None,
        };
        let reference = entry.scheduled_time.or(actual_time).unwrap_or(now);
        let scheduled_time = self.resolve_slot(&assignment, reference)?;
        let on_time = actual_time.map_or(false, |actual| {
            classify_log(scheduled_time, actual, self.config.adherence.tolerance())
        });

        let log = NewDoseLog {
            assignment_id: assignment.id,
            patient_id: assignment.patient_id,
            scheduled_time,
            actual_time,
            status: entry.status,
            on_time,
            reminder_id: entry.reminder_id,
            notes: entry.notes.clone(),
        };
        let mut stored = self.db.insert_log(&log)?;
        // A dose reported after the sweep marked its slot missed replaces
        // the sweep's entry.
        if stored.is_none() && entry.status != DoseStatus::Missed {
            stored = self.db.replace_unreported_missed(&log)?;
            if stored.is_some() {
                debug!(
                    "replaced unreported missed dose of assignment {} at {}",
                    assignment.id,
                    format_datetime(&scheduled_time)
                );
            }
        }
        match stored {
            Some(log) => {
                info!(
                    "logged {} dose for assignment {} at slot {} (on_time={})",
                    log.status.as_str(),
                    log.assignment_id,
                    format_datetime(&log.scheduled_time),
                    log.on_time
                );
                Ok(log)
            }
            None => Err(TrackerError::DuplicateLog {
                assignment_id: assignment.id,
                scheduled_time,
            }),
        }
    }

    /// Classify every slot of a patient's assignments over the days
    /// `from..=to` as of `now`.
    fn classify_range(
        &self,
        patient_id: PatientId,
        from: NaiveDate,
        to: NaiveDate,
        now: NaiveDateTime,
    ) -> TrackerResult<Classification> {
        let assignments = self.db.list_assignments(patient_id, None)?;
        let slots = expand_all(&assignments, from, to, &self.config.schedule)?;
        let logs = self.db.logs_for_patient(
            patient_id,
            from.and_time(NaiveTime::default()),
            (to + Duration::days(1)).and_time(NaiveTime::default()),
        )?;
        Ok(classify(&slots, &logs, now, &self.config.adherence))
    }

    /// Every dose slot of a patient over `from..=to` with its outcome.
    pub fn dose_schedule(
        &self,
        actor: &Actor,
        patient_id: PatientId,
        from: NaiveDate,
        to: NaiveDate,
        now: NaiveDateTime,
    ) -> TrackerResult<Classification> {
        authorize(actor, Action::ViewSchedule, Some(patient_id))?;
        self.load_patient(patient_id)?;
        let classification = self.classify_range(patient_id, from, to, now)?;
        if !classification.extra_logs.is_empty() {
            debug!(
                "{} dose logs of patient {} match no slot between {} and {}",
                classification.extra_logs.len(),
                patient_id,
                from,
                to
            );
        }
        Ok(classification)
    }

    /// The next slot of each active assignment of a patient after `now`,
    /// soonest first. As-needed medication has none.
    pub fn next_doses(
        &self,
        actor: &Actor,
        patient_id: PatientId,
        now: NaiveDateTime,
    ) -> TrackerResult<Vec<ScheduledDose>> {
        authorize(actor, Action::ViewSchedule, Some(patient_id))?;
        self.load_patient(patient_id)?;
        let mut upcoming: Vec<ScheduledDose> = self
            .db
            .list_assignments(patient_id, Some(AssignmentStatus::Active))?
            .iter()
            .filter_map(|a| next_dose(a, now, NEXT_DOSE_HORIZON_DAYS, &self.config.schedule))
            .collect();
        upcoming.sort();
        Ok(upcoming)
    }

    // ------------------------------------------------------------------
    // Statistics and goals
    // ------------------------------------------------------------------

    /// Recompute and store the rollups of the period containing `as_of`:
    /// first the patient-wide one, then one per assignment with slots.
    pub fn refresh_stats(
        &self,
        actor: &Actor,
        patient_id: PatientId,
        period: StatsPeriod,
        as_of: NaiveDate,
        now: NaiveDateTime,
    ) -> TrackerResult<Vec<AdherenceStats>> {
        authorize(actor, Action::ViewStats, Some(patient_id))?;
        self.load_patient(patient_id)?;
        let (start, end) = period.bounds(as_of);
        let classification = self.classify_range(patient_id, start, end, now)?;
        let records = &classification.records;

        let mut rollups = vec![compute(patient_id, None, period, as_of, records, now)];
        let assignment_ids: BTreeSet<AssignmentId> =
            records.iter().map(|r| r.slot.assignment_id).collect();
        for id in assignment_ids {
            rollups.push(compute(patient_id, Some(id), period, as_of, records, now));
        }
        for stats in &rollups {
            self.db.save_stats(stats)?;
        }

        let overall = &rollups[0];
        info!(
            "patient {} {} adherence {:.1}% ({} of {} doses), streak {}",
            patient_id,
            period,
            overall.adherence_score,
            overall.total_taken,
            overall.total_scheduled,
            overall.current_streak
        );
        Ok(rollups)
    }

    pub fn set_goal(
        &self,
        actor: &Actor,
        goal: &NewGoal,
        now: NaiveDateTime,
    ) -> TrackerResult<AdherenceGoal> {
        authorize(actor, Action::ManageGoals, Some(goal.patient_id))?;
        self.load_patient(goal.patient_id)?;
        validate_target(goal.target_score)?;
        if let Some(end) = goal.end_date {
            if end < goal.start_date {
                return Err(TrackerError::validation(
                    "end_date",
                    format!("{end} is before the start date {}", goal.start_date),
                ));
            }
        }
        let created = self.db.insert_goal(goal, now)?;
        info!(
            "patient {} goal {}: {}% {}",
            created.patient_id, created.id, created.target_score, created.period
        );
        Ok(created)
    }

    /// Progress of every active goal of a patient, each over its own period.
    pub fn goal_progress(
        &self,
        actor: &Actor,
        patient_id: PatientId,
        as_of: NaiveDate,
        now: NaiveDateTime,
    ) -> TrackerResult<Vec<GoalStatus>> {
        authorize(actor, Action::ViewStats, Some(patient_id))?;
        self.load_patient(patient_id)?;
        let mut by_period: HashMap<StatsPeriod, AdherenceStats> = HashMap::new();
        let mut out = Vec::new();
        for goal in self.db.active_goals(patient_id)? {
            let stats = match by_period.get(&goal.period) {
                Some(stats) => stats.clone(),
                None => {
                    let (start, end) = goal.period.bounds(as_of);
                    let classification = self.classify_range(patient_id, start, end, now)?;
                    let stats =
                        compute(patient_id, None, goal.period, as_of, &classification.records, now);
                    by_period.insert(goal.period, stats.clone());
                    stats
                }
            };
            let progress = evaluate(&goal, &stats);
            out.push(GoalStatus { goal, progress });
        }
        Ok(out)
    }

    /// Stored patient-wide rollups of `period`, newest first.
    pub fn stats_history(
        &self,
        actor: &Actor,
        patient_id: PatientId,
        period: StatsPeriod,
        limit: usize,
    ) -> TrackerResult<Vec<AdherenceStats>> {
        authorize(actor, Action::ViewStats, Some(patient_id))?;
        Ok(self.db.stats_history(patient_id, period, limit)?)
    }

    pub fn deactivate_goal(
        &self,
        actor: &Actor,
        patient_id: PatientId,
        goal_id: GoalId,
    ) -> TrackerResult<()> {
        authorize(actor, Action::ManageGoals, Some(patient_id))?;
        let owned = self
            .db
            .active_goals(patient_id)?
            .iter()
            .any(|goal| goal.id == goal_id);
        if !owned || !self.db.deactivate_goal(goal_id)? {
            return Err(TrackerError::not_found("goal", goal_id));
        }
        info!("deactivated goal {} of patient {}", goal_id, patient_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reminders
    // ------------------------------------------------------------------

    /// Attach a reminder to one of the assignment's dose times.
    pub fn create_reminder(
        &self,
        actor: &Actor,
        request: &ReminderRequest,
    ) -> TrackerResult<Reminder> {
        let assignment = self.load_assignment(request.assignment_id)?;
        authorize(actor, Action::ManageReminders, Some(assignment.patient_id))?;
        if assignment.status == AssignmentStatus::Stopped {
            return Err(TrackerError::InactiveAssignment {
                id: assignment.id,
                status: assignment.status,
            });
        }
        let times = dose_times(&assignment, &self.config.schedule);
        if !times.contains(&request.time_of_day) {
            return Err(TrackerError::validation(
                "time_of_day",
                format!(
                    "{} is not a dose time of assignment {}",
                    request.time_of_day.format("%H:%M"),
                    assignment.id
                ),
            ));
        }
        let lead_minutes = request
            .lead_minutes
            .unwrap_or(self.config.reminders.lead_minutes);
        if lead_minutes > 24 * 60 {
            return Err(TrackerError::validation(
                "lead_minutes",
                "must be at most one day",
            ));
        }
        let reminder = self.db.insert_reminder(&NewReminder {
            assignment_id: assignment.id,
            patient_id: assignment.patient_id,
            time_of_day: request.time_of_day,
            lead_minutes,
            channel: request.channel,
        })?;
        info!(
            "reminder {} for assignment {} at {} via {}",
            reminder.id,
            reminder.assignment_id,
            reminder.time_of_day.format("%H:%M"),
            reminder.channel.as_str()
        );
        Ok(reminder)
    }

    pub fn set_reminder_enabled(
        &self,
        actor: &Actor,
        reminder_id: ReminderId,
        enabled: bool,
    ) -> TrackerResult<()> {
        let reminder = self
            .db
            .get_reminder(reminder_id)?
            .ok_or_else(|| TrackerError::not_found("reminder", reminder_id))?;
        authorize(actor, Action::ManageReminders, Some(reminder.patient_id))?;
        self.db.set_reminder_enabled(reminder_id, enabled)?;
        Ok(())
    }

    pub fn reminders_for(
        &self,
        actor: &Actor,
        patient_id: PatientId,
    ) -> TrackerResult<Vec<Reminder>> {
        authorize(actor, Action::ManageReminders, Some(patient_id))?;
        Ok(self.db.reminders_for_patient(patient_id)?)
    }

    /// Reminders that should go out at `now`, for doses the schedule
    /// actually holds on the day before, of, or after `now`.
    pub fn due_reminders(&self, now: NaiveDateTime) -> TrackerResult<Vec<DueReminder>> {
        let enabled = self.db.enabled_reminders()?;
        let assignment_ids: BTreeSet<AssignmentId> =
            enabled.iter().map(|r| r.assignment_id).collect();
        let today = now.date();
        let mut slots = Vec::new();
        let mut logs = Vec::new();
        for id in assignment_ids {
            let assignment = self.load_assignment(id)?;
            slots.extend(expand(
                &assignment,
                today - Duration::days(1),
                today + Duration::days(1),
                &self.config.schedule,
            )?);
            logs.extend(self.db.logs_for_assignment(
                id,
                now - Duration::days(2),
                now + Duration::days(2),
            )?);
        }
        Ok(reminders::due_reminders(
            &enabled,
            &slots,
            &logs,
            now,
            self.config.adherence.grace(),
        ))
    }

    pub fn mark_reminder_sent(&self, reminder_id: ReminderId, at: NaiveDateTime) -> TrackerResult<()> {
        Ok(self.db.mark_reminder_sent(reminder_id, at)?)
    }

    // ------------------------------------------------------------------
    // Missed-dose sweep
    // ------------------------------------------------------------------

    fn sweep_watermark(&self) -> TrackerResult<Option<NaiveDateTime>> {
        let Some(value) = self.db.load_state(SWEEP_WATERMARK_KEY)? else {
            return Ok(None);
        };
        match value.as_str().map(parse_datetime) {
            Some(Ok(at)) => Ok(Some(at)),
            _ => {
                warn!("ignoring unreadable sweep watermark {}", value);
                Ok(None)
            }
        }
    }

    /// Store a `missed` log for every slot whose grace period ended since
    /// the previous sweep without anything being logged. Returns how many
    /// logs were written.
    pub fn sweep_missed(&self, now: NaiveDateTime) -> TrackerResult<usize> {
        let cutoff = now - self.config.adherence.grace();
        let watermark = self.sweep_watermark()?;
        if watermark.map_or(false, |w| cutoff <= w) {
            return Ok(0);
        }

        let mut created = 0;
        for patient in self.db.list_patients()? {
            for assignment in self.db.list_assignments(patient.id, None)? {
                if assignment.status == AssignmentStatus::Pending {
                    continue;
                }
                let from = watermark.map_or(assignment.start_date, |w| {
                    w.date().max(assignment.start_date)
                });
                if from > cutoff.date() {
                    continue;
                }
                let slots = expand(&assignment, from, cutoff.date(), &self.config.schedule)?;
                let logged: HashSet<NaiveDateTime> = self
                    .db
                    .logs_for_assignment(
                        assignment.id,
                        from.and_time(NaiveTime::default()),
                        cutoff + Duration::seconds(1),
                    )?
                    .into_iter()
                    .map(|log| log.scheduled_time)
                    .collect();

                let overdue = slots.iter().filter(|slot| {
                    slot.scheduled_time <= cutoff
                        && watermark.map_or(true, |w| slot.scheduled_time > w)
                        && !logged.contains(&slot.scheduled_time)
                });
                for slot in overdue {
                    let inserted = self.db.insert_log(&NewDoseLog {
                        assignment_id: slot.assignment_id,
                        patient_id: slot.patient_id,
                        scheduled_time: slot.scheduled_time,
                        actual_time: None,
                        status: DoseStatus::Missed,
                        on_time: false,
                        reminder_id: None,
                        notes: None,
                    })?;
                    if inserted.is_some() {
                        created += 1;
                    }
                }
            }
        }

        self.db.save_state(
            SWEEP_WATERMARK_KEY,
            &serde_json::Value::String(format_datetime(&cutoff)),
        )?;
        if created > 0 {
            info!("marked {} overdue doses as missed (through {})", created, cutoff);
        }
        Ok(created)
    }

    // ------------------------------------------------------------------
    // Chat history
    // ------------------------------------------------------------------

    pub fn record_chat_message(
        &self,
        actor: &Actor,
        sender: ChatSender,
        content: &str,
        now: NaiveDateTime,
    ) -> TrackerResult<ChatMessage> {
        if sender == ChatSender::Assistant && !actor.is_admin() {
            return Err(TrackerError::Forbidden(
                "only the system may store assistant messages".into(),
            ));
        }
        if content.trim().is_empty() {
            return Err(TrackerError::validation("content", "message is empty"));
        }
        Ok(self
            .db
            .append_chat_message(actor.user_id, sender, content, now)?)
    }

    pub fn chat_history(
        &self,
        actor: &Actor,
        user_id: UserId,
        limit: usize,
    ) -> TrackerResult<Vec<ChatMessage>> {
        authorize_user(actor, user_id)?;
        Ok(self.db.chat_history(user_id, limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medtrack_adherence::DoseOutcome;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    struct Fixture {
        tracker: Tracker,
        admin: Actor,
        patient: Actor,
        patient_id: PatientId,
        assignment_id: AssignmentId,
    }

    /// Admin, one linked patient, and an active twice-daily assignment
    /// (08:00 / 20:00) starting 2024-05-06.
    fn fixture() -> Fixture {
        let tracker = Tracker::new(Database::open(":memory:").unwrap(), Config::default());
        let admin_user = tracker.bootstrap_admin("admin", at(1, 8, 0)).unwrap();
        let admin = Actor::admin(admin_user.id);

        let user = tracker
            .register_user(&admin, "pat", None, Role::Patient, at(1, 8, 0))
            .unwrap();
        let patient = tracker
            .create_patient(
                &admin,
                &NewPatient {
                    user_id: Some(user.id),
                    first_name: "Pat".into(),
                    last_name: "Doe".into(),
                    date_of_birth: None,
                },
                at(1, 8, 0),
            )
            .unwrap();
        let med = tracker
            .add_medication(
                &admin,
                &NewMedication {
                    name: "Metformin".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let assignment = tracker
            .assign_medication(
                &admin,
                &NewAssignment {
                    patient_id: patient.id,
                    medication_id: med.id,
                    dosage: "500 mg".into(),
                    frequency: Frequency::TwiceDaily,
                    dose_times: vec![],
                    start_date: at(6, 0, 0).date(),
                    end_date: None,
                    instructions: None,
                    assigned_by: None,
                },
                at(5, 9, 0),
            )
            .unwrap();
        let actor = tracker.resolve_actor("pat").unwrap();
        tracker
            .confirm_assignment(&actor, assignment.id, at(5, 10, 0))
            .unwrap();

        Fixture {
            tracker,
            admin,
            patient: actor,
            patient_id: patient.id,
            assignment_id: assignment.id,
        }
    }

    #[test]
    fn resolve_actor_links_patient_record() {
        let f = fixture();
        assert_eq!(f.patient.role, Role::Patient);
        assert_eq!(f.patient.patient_id, Some(f.patient_id));
        assert!(f.tracker.resolve_actor("admin").unwrap().is_admin());
        assert!(matches!(
            f.tracker.resolve_actor("nobody"),
            Err(TrackerError::NotFound { .. })
        ));
    }

    #[test]
    fn bootstrap_only_on_empty_database() {
        let f = fixture();
        assert!(matches!(
            f.tracker.bootstrap_admin("second", at(1, 8, 0)),
            Err(TrackerError::Forbidden(_))
        ));
    }

    #[test]
    fn assignment_records_prescriber() {
        let f = fixture();
        let list = f
            .tracker
            .assignments_for(&f.patient, f.patient_id, Some(AssignmentStatus::Active))
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].assigned_by, Some(f.admin.user_id));
    }

    #[test]
    fn patient_cannot_prescribe_or_read_others() {
        let f = fixture();
        let err = f
            .tracker
            .add_medication(
                &f.patient,
                &NewMedication {
                    name: "Aspirin".into(),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, TrackerError::Forbidden(_)));

        let err = f
            .tracker
            .assignments_for(&f.patient, f.patient_id + 1, None)
            .unwrap_err();
        assert!(matches!(err, TrackerError::Forbidden(_)));
    }

    #[test]
    fn confirm_twice_is_an_invalid_transition() {
        let f = fixture();
        let err = f
            .tracker
            .confirm_assignment(&f.patient, f.assignment_id, at(6, 8, 0))
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidTransition(_)));
    }

    #[test]
    fn log_dose_snaps_to_nearest_slot_and_flags_on_time() {
        let f = fixture();
        let log = f
            .tracker
            .log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(6, 8, 25)), at(6, 8, 25))
            .unwrap();
        assert_eq!(log.scheduled_time, at(6, 8, 0));
        assert!(log.on_time);

        let late = f
            .tracker
            .log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(6, 21, 10)), at(6, 21, 10))
            .unwrap();
        assert_eq!(late.scheduled_time, at(6, 20, 0));
        assert!(!late.on_time);
    }

    #[test]
    fn second_log_for_slot_is_duplicate() {
        let f = fixture();
        f.tracker
            .log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(6, 8, 0)), at(6, 8, 0))
            .unwrap();
        let err = f
            .tracker
            .log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(6, 8, 10)), at(6, 8, 10))
            .unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateLog { .. }));
    }

    #[test]
    fn log_far_from_any_slot_is_rejected() {
        let f = fixture();
        // 14:00 is 6 hours from both slots; the window is 3 hours.
        let err = f
            .tracker
            .log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(6, 14, 0)), at(6, 14, 0))
            .unwrap_err();
        assert!(matches!(err, TrackerError::NoMatchingSlot { .. }));
    }

    #[test]
    fn skipped_dose_is_never_on_time() {
        let f = fixture();
        let log = f
            .tracker
            .log_dose(&f.patient, &DoseEntry::skipped(f.assignment_id, at(6, 8, 0)), at(6, 8, 0))
            .unwrap();
        assert_eq!(log.status, DoseStatus::Skipped);
        assert!(!log.on_time);
        assert!(log.actual_time.is_none());
    }

    #[test]
    fn cannot_log_against_stopped_assignment() {
        let f = fixture();
        f.tracker
            .stop_assignment(&f.patient, f.assignment_id, Some("nausea".into()), at(7, 9, 0))
            .unwrap();
        let err = f
            .tracker
            .log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(7, 20, 0)), at(7, 20, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            TrackerError::InactiveAssignment {
                status: AssignmentStatus::Stopped,
                ..
            }
        ));
    }

    #[test]
    fn schedule_and_stats_reflect_logs() {
        let f = fixture();
        let tr = &f.tracker;
        tr.log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(6, 8, 5)), at(6, 8, 5))
            .unwrap();
        tr.log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(6, 20, 0)), at(6, 20, 0))
            .unwrap();
        tr.log_dose(&f.patient, &DoseEntry::skipped(f.assignment_id, at(7, 8, 0)), at(7, 8, 0))
            .unwrap();

        let now = at(7, 21, 0);
        let schedule = tr
            .dose_schedule(&f.patient, f.patient_id, at(6, 0, 0).date(), at(7, 0, 0).date(), now)
            .unwrap();
        let outcomes: Vec<_> = schedule.records.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                DoseOutcome::OnTime,
                DoseOutcome::OnTime,
                DoseOutcome::Skipped,
                DoseOutcome::Pending,
            ]
        );

        let rollups = tr
            .refresh_stats(&f.patient, f.patient_id, StatsPeriod::Rolling(2), now.date(), now)
            .unwrap();
        assert_eq!(rollups.len(), 2);
        let overall = &rollups[0];
        assert_eq!(overall.total_scheduled, 3);
        assert_eq!(overall.total_taken, 2);
        assert_eq!(overall.current_streak, 0);
        assert_eq!(overall.longest_streak, 1);
        let stored = tr
            .db()
            .load_stats(f.patient_id, None, StatsPeriod::Rolling(2), overall.period_start)
            .unwrap();
        assert_eq!(stored.as_ref(), Some(overall));
        assert_eq!(rollups[1].assignment_id, Some(f.assignment_id));
    }

    #[test]
    fn goal_progress_uses_goal_period() {
        let f = fixture();
        let tr = &f.tracker;
        tr.log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(6, 8, 0)), at(6, 8, 0))
            .unwrap();
        tr.log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(6, 20, 0)), at(6, 20, 0))
            .unwrap();

        let goal = tr
            .set_goal(
                &f.patient,
                &NewGoal {
                    patient_id: f.patient_id,
                    target_score: 90.0,
                    period: StatsPeriod::Daily,
                    start_date: at(1, 0, 0).date(),
                    end_date: None,
                    description: None,
                },
                at(6, 7, 0),
            )
            .unwrap();
        let statuses = tr
            .goal_progress(&f.patient, f.patient_id, at(6, 0, 0).date(), at(6, 23, 0))
            .unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].goal.id, goal.id);
        assert!(statuses[0].progress.met);
        assert_eq!(statuses[0].progress.score, 100.0);

        let err = tr
            .set_goal(
                &f.patient,
                &NewGoal {
                    patient_id: f.patient_id,
                    target_score: 120.0,
                    period: StatsPeriod::Weekly,
                    start_date: at(1, 0, 0).date(),
                    end_date: None,
                    description: None,
                },
                at(6, 7, 0),
            )
            .unwrap_err();
        assert!(matches!(err, TrackerError::Goal(_)));
    }

    #[test]
    fn reminder_must_match_a_dose_time() {
        let f = fixture();
        let request = ReminderRequest {
            assignment_id: f.assignment_id,
            time_of_day: t(9, 0),
            lead_minutes: None,
            channel: ReminderChannel::Push,
        };
        assert!(matches!(
            f.tracker.create_reminder(&f.patient, &request),
            Err(TrackerError::Validation { field: "time_of_day", .. })
        ));

        let reminder = f
            .tracker
            .create_reminder(
                &f.patient,
                &ReminderRequest {
                    time_of_day: t(8, 0),
                    ..request
                },
            )
            .unwrap();
        assert_eq!(reminder.lead_minutes, 15);
    }

    #[test]
    fn sweep_marks_overdue_slots_once() {
        let f = fixture();
        let tr = &f.tracker;
        tr.log_dose(&f.patient, &DoseEntry::taken(f.assignment_id, at(6, 8, 0)), at(6, 8, 0))
            .unwrap();

        // Grace is two hours: at 21:00 on the 6th the cutoff is 19:00 and
        // the only earlier slot was logged.
        assert_eq!(tr.sweep_missed(at(6, 21, 0)).unwrap(), 0);
        // By 22:00 on the 7th: 6th 20:00 and 7th 08:00 are overdue, and the
        // 7th 20:00 sits exactly on the cutoff.
        assert_eq!(tr.sweep_missed(at(7, 22, 0)).unwrap(), 3);
        assert_eq!(tr.sweep_missed(at(7, 22, 0)).unwrap(), 0);

        let logs = tr
            .db()
            .logs_for_assignment(f.assignment_id, at(6, 0, 0), at(8, 0, 0))
            .unwrap();
        let missed = logs.iter().filter(|l| l.status == DoseStatus::Missed).count();
        assert_eq!(missed, 3);
        let watermark = tr.db().load_state(SWEEP_WATERMARK_KEY).unwrap();
        assert_eq!(watermark, Some(serde_json::json!("2024-05-07T20:00:00")));
    }

    #[test]
    fn chat_history_is_private() {
        let f = fixture();
        f.tracker
            .record_chat_message(&f.patient, ChatSender::User, "missed my dose?", at(6, 9, 0))
            .unwrap();
        assert_eq!(
            f.tracker
                .chat_history(&f.patient, f.patient.user_id, 10)
                .unwrap()
                .len(),
            1
        );
        assert!(f.tracker.chat_history(&f.admin, f.patient.user_id, 10).is_ok());
        let other = Actor::patient(f.patient.user_id + 100, f.patient_id + 100);
        assert!(f.tracker.chat_history(&other, f.patient.user_id, 10).is_err());
    }

    /// A second, confirmed assignment for the fixture patient.
    fn prescribe(
        f: &Fixture,
        name: &str,
        frequency: Frequency,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
    ) -> AssignmentId {
        let med = f
            .tracker
            .add_medication(
                &f.admin,
                &NewMedication {
                    name: name.into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let assignment = f
            .tracker
            .assign_medication(
                &f.admin,
                &NewAssignment {
                    patient_id: f.patient_id,
                    medication_id: med.id,
                    dosage: "1 tablet".into(),
                    frequency,
                    dose_times: vec![],
                    start_date,
                    end_date,
                    instructions: None,
                    assigned_by: None,
                },
                at(5, 9, 0),
            )
            .unwrap();
        f.tracker
            .confirm_assignment(&f.patient, assignment.id, at(5, 9, 30))
            .unwrap();
        assignment.id
    }

    fn remind_at_eight(f: &Fixture, assignment_id: AssignmentId) -> Reminder {
        f.tracker
            .create_reminder(
                &f.patient,
                &ReminderRequest {
                    assignment_id,
                    time_of_day: t(8, 0),
                    lead_minutes: Some(15),
                    channel: ReminderChannel::Push,
                },
            )
            .unwrap()
    }

    #[test]
    fn weekly_reminder_fires_on_its_weekday_only() {
        let f = fixture();
        // 2024-05-09 is a Thursday.
        let weekly = prescribe(
            &f,
            "Alendronate",
            Frequency::Weekly(Some(chrono::Weekday::Thu)),
            at(6, 0, 0).date(),
            None,
        );
        let reminder = remind_at_eight(&f, weekly);

        assert!(f.tracker.due_reminders(at(7, 7, 50)).unwrap().is_empty());
        let due = f.tracker.due_reminders(at(9, 7, 50)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].reminder.id, reminder.id);
        assert_eq!(due[0].dose_time, at(9, 8, 0));
    }

    #[test]
    fn reminders_stay_quiet_outside_prescription_dates() {
        let f = fixture();
        let later = prescribe(
            &f,
            "Amoxicillin",
            Frequency::OnceDaily,
            at(20, 0, 0).date(),
            Some(at(22, 0, 0).date()),
        );
        remind_at_eight(&f, later);

        assert!(f.tracker.due_reminders(at(7, 7, 50)).unwrap().is_empty());
        assert_eq!(f.tracker.due_reminders(at(20, 7, 50)).unwrap().len(), 1);
        assert!(f.tracker.due_reminders(at(23, 7, 50)).unwrap().is_empty());
    }

    #[test]
    fn dose_reported_after_sweep_replaces_missed_entry() {
        let f = fixture();
        let tr = &f.tracker;
        // Cutoff 08:30: the 08:00 slot is swept as missed.
        assert_eq!(tr.sweep_missed(at(6, 10, 30)).unwrap(), 1);

        // Still inside the three-hour match window.
        let late = DoseEntry::taken(f.assignment_id, at(6, 10, 40));
        let log = tr.log_dose(&f.patient, &late, at(6, 10, 40)).unwrap();
        assert_eq!(log.scheduled_time, at(6, 8, 0));
        assert_eq!(log.status, DoseStatus::Taken);
        assert_eq!(log.actual_time, Some(at(6, 10, 40)));
        assert!(!log.on_time);

        // Once reported, the slot is taken for good.
        let again = DoseEntry::taken(f.assignment_id, at(6, 10, 50));
        assert!(matches!(
            tr.log_dose(&f.patient, &again, at(6, 10, 50)),
            Err(TrackerError::DuplicateLog { .. })
        ));
        let logs = tr
            .db()
            .logs_for_assignment(f.assignment_id, at(6, 0, 0), at(7, 0, 0))
            .unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn swept_slot_rejects_a_second_missed_report() {
        let f = fixture();
        f.tracker.sweep_missed(at(6, 10, 30)).unwrap();
        let entry = DoseEntry {
            status: DoseStatus::Missed,
            ..DoseEntry::skipped(f.assignment_id, at(6, 8, 0))
        };
        assert!(matches!(
            f.tracker.log_dose(&f.patient, &entry, at(6, 10, 45)),
            Err(TrackerError::DuplicateLog { .. })
        ));
    }

    #[test]
    fn next_doses_soonest_first() {
        let f = fixture();
        let weekly = prescribe(
            &f,
            "Alendronate",
            Frequency::Weekly(Some(chrono::Weekday::Thu)),
            at(6, 0, 0).date(),
            None,
        );
        prescribe(&f, "Ibuprofen", Frequency::AsNeeded, at(6, 0, 0).date(), None);

        let next = f.tracker.next_doses(&f.patient, f.patient_id, at(7, 9, 0)).unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(next[0].assignment_id, f.assignment_id);
        assert_eq!(next[0].scheduled_time, at(7, 20, 0));
        assert_eq!(next[1].assignment_id, weekly);
        assert_eq!(next[1].scheduled_time, at(9, 8, 0));
    }

    #[test]
    fn goals_can_be_retired() {
        let f = fixture();
        let goal = f
            .tracker
            .set_goal(
                &f.patient,
                &NewGoal {
                    patient_id: f.patient_id,
                    target_score: 90.0,
                    period: StatsPeriod::Weekly,
                    start_date: at(6, 0, 0).date(),
                    end_date: None,
                    description: None,
                },
                at(6, 7, 0),
            )
            .unwrap();
        let stranger = Actor::patient(f.patient.user_id + 100, f.patient_id + 100);
        assert!(matches!(
            f.tracker.deactivate_goal(&stranger, f.patient_id, goal.id),
            Err(TrackerError::Forbidden(_))
        ));

        f.tracker.deactivate_goal(&f.patient, f.patient_id, goal.id).unwrap();
        assert!(f
            .tracker
            .goal_progress(&f.patient, f.patient_id, at(7, 0, 0).date(), at(7, 21, 0))
            .unwrap()
            .is_empty());
        assert!(matches!(
            f.tracker.deactivate_goal(&f.patient, f.patient_id, goal.id),
            Err(TrackerError::NotFound { .. })
        ));
    }

    #[test]
    fn stats_history_lists_saved_rollups() {
        let f = fixture();
        let week = StatsPeriod::Weekly;
        f.tracker
            .refresh_stats(&f.patient, f.patient_id, week, at(8, 0, 0).date(), at(8, 21, 0))
            .unwrap();
        f.tracker
            .refresh_stats(&f.patient, f.patient_id, week, at(15, 0, 0).date(), at(15, 21, 0))
            .unwrap();

        let history = f.tracker.stats_history(&f.patient, f.patient_id, week, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].period_start, at(13, 0, 0).date());
        assert_eq!(history[1].period_start, at(6, 0, 0).date());
        assert!(history.iter().all(|s| s.assignment_id.is_none()));
    }

    #[test]
    fn reminders_listed_and_toggled_by_owner() {
        let f = fixture();
        let reminder = remind_at_eight(&f, f.assignment_id);
        assert_eq!(f.tracker.reminders_for(&f.patient, f.patient_id).unwrap().len(), 1);

        f.tracker.set_reminder_enabled(&f.patient, reminder.id, false).unwrap();
        assert!(f.tracker.due_reminders(at(6, 7, 50)).unwrap().is_empty());
        let listed = f.tracker.reminders_for(&f.admin, f.patient_id).unwrap();
        assert!(!listed[0].enabled);
    }

    #[test]
    fn patients_cannot_speak_for_the_assistant() {
        let f = fixture();
        assert!(matches!(
            f.tracker
                .record_chat_message(&f.patient, ChatSender::Assistant, "take two", at(6, 9, 0)),
            Err(TrackerError::Forbidden(_))
        ));
        let stored = f
            .tracker
            .record_chat_message(&f.admin, ChatSender::Assistant, "noted", at(6, 9, 1))
            .unwrap();
        assert_eq!(stored.sender, ChatSender::Assistant);
    }
}
