// SQLite persistence layer for users, prescriptions, dose logs and rollups.

use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::model::{
    format_date, format_datetime, format_time, parse_date, parse_datetime, parse_time,
    AdherenceGoal, AdherenceStats, AssignmentId, AssignmentStatus, ChatMessage, ChatSender,
    DoseStatus, Frequency, GoalId, Medication, MedicationId, MedicationLog, Patient, PatientId,
    PatientMedication, Reminder, ReminderChannel, ReminderId, Role, StatsPeriod, User, UserId,
};

// ---------------------------------------------------------------------------
// Insert payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewPatient {
    pub user_id: Option<UserId>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct NewMedication {
    pub name: String,
    pub generic_name: Option<String>,
    pub form: Option<String>,
    pub strength: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub patient_id: PatientId,
    pub medication_id: MedicationId,
    pub dosage: String,
    pub frequency: Frequency,
    pub dose_times: Vec<NaiveTime>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub instructions: Option<String>,
    pub assigned_by: Option<UserId>,
}

#[derive(Debug, Clone)]
pub struct NewDoseLog {
    pub assignment_id: AssignmentId,
    pub patient_id: PatientId,
    pub scheduled_time: NaiveDateTime,
    pub actual_time: Option<NaiveDateTime>,
    pub status: DoseStatus,
    pub on_time: bool,
    pub reminder_id: Option<ReminderId>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewReminder {
    pub assignment_id: AssignmentId,
    pub patient_id: PatientId,
    pub time_of_day: NaiveTime,
    pub lead_minutes: u32,
    pub channel: ReminderChannel,
}

#[derive(Debug, Clone)]
pub struct NewGoal {
    pub patient_id: PatientId,
    pub target_score: f64,
    pub period: StatsPeriod,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Column lists shared by the SELECTs and their row mappers
// ---------------------------------------------------------------------------

const USER_COLUMNS: &str = "id, username, email, role, created_at";
const PATIENT_COLUMNS: &str = "id, user_id, first_name, last_name, date_of_birth, created_at";
const MEDICATION_COLUMNS: &str = "id, name, generic_name, form, strength, description";
const ASSIGNMENT_COLUMNS: &str = "id, patient_id, medication_id, dosage, frequency, dose_times, \
     start_date, end_date, status, instructions, assigned_by, created_at, confirmed_at, \
     stopped_at, stop_reason";
const LOG_COLUMNS: &str = "id, assignment_id, patient_id, scheduled_time, actual_time, status, \
     on_time, reminder_id, notes, created_at";
const REMINDER_COLUMNS: &str =
    "id, assignment_id, patient_id, time_of_day, lead_minutes, channel, enabled, last_sent_at";
const STATS_COLUMNS: &str = "patient_id, assignment_id, period, period_start, period_end, \
     total_scheduled, total_taken, total_skipped, total_missed, total_on_time, total_late, \
     adherence_score, on_time_rate, current_streak, longest_streak, computed_at";
const GOAL_COLUMNS: &str =
    "id, patient_id, target_score, period, start_date, end_date, description, active, created_at";

/// SQLite-backed store for every record the tracker keeps, plus a small
/// key-value table for bookkeeping such as the missed-dose sweep watermark.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                username   TEXT NOT NULL UNIQUE,
                email      TEXT,
                role       TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS patients (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id       INTEGER UNIQUE REFERENCES users(id),
                first_name    TEXT NOT NULL,
                last_name     TEXT NOT NULL,
                date_of_birth TEXT,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS medications (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                name         TEXT NOT NULL UNIQUE COLLATE NOCASE,
                generic_name TEXT,
                form         TEXT,
                strength     TEXT,
                description  TEXT
            );

            CREATE TABLE IF NOT EXISTS patient_medications (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id    INTEGER NOT NULL REFERENCES patients(id),
                medication_id INTEGER NOT NULL REFERENCES medications(id),
                dosage        TEXT NOT NULL,
                frequency     TEXT NOT NULL,
                dose_times    TEXT NOT NULL DEFAULT '[]',
                start_date    TEXT NOT NULL,
                end_date      TEXT,
                status        TEXT NOT NULL DEFAULT 'pending',
                instructions  TEXT,
                assigned_by   INTEGER REFERENCES users(id),
                created_at    TEXT NOT NULL,
                confirmed_at  TEXT,
                stopped_at    TEXT,
                stop_reason   TEXT,
                UNIQUE (id, patient_id)
            );

            CREATE TABLE IF NOT EXISTS reminders (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                assignment_id INTEGER NOT NULL,
                patient_id    INTEGER NOT NULL REFERENCES patients(id),
                time_of_day   TEXT NOT NULL,
                lead_minutes  INTEGER NOT NULL,
                channel       TEXT NOT NULL,
                enabled       INTEGER NOT NULL DEFAULT 1,
                last_sent_at  TEXT,
                FOREIGN KEY (assignment_id, patient_id)
                    REFERENCES patient_medications(id, patient_id)
            );

            CREATE TABLE IF NOT EXISTS medication_logs (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                assignment_id  INTEGER NOT NULL,
                patient_id     INTEGER NOT NULL REFERENCES patients(id),
                scheduled_time TEXT NOT NULL,
                actual_time    TEXT,
                status         TEXT NOT NULL,
                on_time        INTEGER NOT NULL DEFAULT 0,
                reminder_id    INTEGER REFERENCES reminders(id),
                notes          TEXT,
                created_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%S', 'now')),
                UNIQUE (assignment_id, scheduled_time),
                FOREIGN KEY (assignment_id, patient_id)
                    REFERENCES patient_medications(id, patient_id)
            );

            CREATE TABLE IF NOT EXISTS adherence_stats (
                patient_id      INTEGER NOT NULL REFERENCES patients(id),
                assignment_id   INTEGER REFERENCES patient_medications(id),
                period          TEXT NOT NULL,
                period_start    TEXT NOT NULL,
                period_end      TEXT NOT NULL,
                total_scheduled INTEGER NOT NULL,
                total_taken     INTEGER NOT NULL,
                total_skipped   INTEGER NOT NULL,
                total_missed    INTEGER NOT NULL,
                total_on_time   INTEGER NOT NULL,
                total_late      INTEGER NOT NULL,
                adherence_score REAL NOT NULL,
                on_time_rate    REAL NOT NULL,
                current_streak  INTEGER NOT NULL,
                longest_streak  INTEGER NOT NULL,
                computed_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS adherence_goals (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id   INTEGER NOT NULL REFERENCES patients(id),
                target_score REAL NOT NULL,
                period       TEXT NOT NULL,
                start_date   TEXT NOT NULL,
                end_date     TEXT,
                description  TEXT,
                active       INTEGER NOT NULL DEFAULT 1,
                created_at   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    INTEGER NOT NULL REFERENCES users(id),
                sender     TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS app_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        // A NULL assignment_id would defeat a plain UNIQUE constraint, so the
        // rollup key is indexed on an expression instead.
        conn.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_adherence_stats_key
                ON adherence_stats(patient_id, IFNULL(assignment_id, 0), period, period_start);
             CREATE INDEX IF NOT EXISTS idx_logs_patient_time
                ON medication_logs(patient_id, scheduled_time);
             CREATE INDEX IF NOT EXISTS idx_assignments_patient
                ON patient_medications(patient_id, status);",
        )
        .context("failed to create indexes")?;
        debug!("database schema ready at {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        role: Role,
        now: NaiveDateTime,
    ) -> Result<User> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO users (username, email, role, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING {USER_COLUMNS}"
            ),
            params![username, email, role.as_str(), format_datetime(&now)],
            user_from_row,
        )
        .with_context(|| format!("failed to create user {username}"))
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .context("failed to load user")
    }

    pub fn count_users(&self) -> Result<i64> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("failed to count users")
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            user_from_row,
        )
        .optional()
        .context("failed to look up user by username")
    }

    // ------------------------------------------------------------------
    // Patients
    // ------------------------------------------------------------------

    pub fn create_patient(&self, patient: &NewPatient, now: NaiveDateTime) -> Result<Patient> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO patients (user_id, first_name, last_name, date_of_birth, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING {PATIENT_COLUMNS}"
            ),
            params![
                patient.user_id,
                patient.first_name,
                patient.last_name,
                patient.date_of_birth.as_ref().map(format_date),
                format_datetime(&now),
            ],
            patient_from_row,
        )
        .context("failed to create patient")
    }

    pub fn get_patient(&self, id: PatientId) -> Result<Option<Patient>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1"),
            params![id],
            patient_from_row,
        )
        .optional()
        .context("failed to load patient")
    }

    /// The patient record linked to a user account, if any.
    pub fn patient_for_user(&self, user_id: UserId) -> Result<Option<Patient>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE user_id = ?1"),
            params![user_id],
            patient_from_row,
        )
        .optional()
        .context("failed to load patient for user")
    }

    pub fn list_patients(&self) -> Result<Vec<Patient>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PATIENT_COLUMNS} FROM patients ORDER BY last_name, first_name, id"
            ))
            .context("failed to prepare list_patients query")?;
        let patients = stmt
            .query_map([], patient_from_row)
            .context("failed to query patients")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map patient rows")?;
        Ok(patients)
    }

    // ------------------------------------------------------------------
    // Medications
    // ------------------------------------------------------------------

    pub fn create_medication(&self, med: &NewMedication) -> Result<Medication> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO medications (name, generic_name, form, strength, description)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING {MEDICATION_COLUMNS}"
            ),
            params![
                med.name,
                med.generic_name,
                med.form,
                med.strength,
                med.description
            ],
            medication_from_row,
        )
        .with_context(|| format!("failed to create medication {}", med.name))
    }

    pub fn get_medication(&self, id: MedicationId) -> Result<Option<Medication>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1"),
            params![id],
            medication_from_row,
        )
        .optional()
        .context("failed to load medication")
    }

    /// Case-insensitive lookup by brand name.
    pub fn find_medication_by_name(&self, name: &str) -> Result<Option<Medication>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE name = ?1"),
            params![name],
            medication_from_row,
        )
        .optional()
        .context("failed to look up medication by name")
    }

    pub fn list_medications(&self) -> Result<Vec<Medication>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MEDICATION_COLUMNS} FROM medications ORDER BY name"
            ))
            .context("failed to prepare list_medications query")?;
        let meds = stmt
            .query_map([], medication_from_row)
            .context("failed to query medications")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map medication rows")?;
        Ok(meds)
    }

    // ------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------

    /// Create an assignment in the `pending` state.
    pub fn insert_assignment(
        &self,
        assignment: &NewAssignment,
        now: NaiveDateTime,
    ) -> Result<PatientMedication> {
        let conn = self.conn();
        let dose_times_json = encode_times(&assignment.dose_times)?;
        conn.query_row(
            &format!(
                "INSERT INTO patient_medications
                    (patient_id, medication_id, dosage, frequency, dose_times, start_date,
                     end_date, status, instructions, assigned_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?10)
                 RETURNING {ASSIGNMENT_COLUMNS}"
            ),
            params![
                assignment.patient_id,
                assignment.medication_id,
                assignment.dosage,
                assignment.frequency.to_string(),
                dose_times_json,
                format_date(&assignment.start_date),
                assignment.end_date.as_ref().map(format_date),
                assignment.instructions,
                assignment.assigned_by,
                format_datetime(&now),
            ],
            assignment_from_row,
        )
        .context("failed to insert assignment")
    }

    pub fn get_assignment(&self, id: AssignmentId) -> Result<Option<PatientMedication>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ASSIGNMENT_COLUMNS} FROM patient_medications WHERE id = ?1"),
            params![id],
            assignment_from_row,
        )
        .optional()
        .context("failed to load assignment")
    }

    /// Assignments of a patient, optionally filtered by status, oldest first.
    pub fn list_assignments(
        &self,
        patient_id: PatientId,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<PatientMedication>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ASSIGNMENT_COLUMNS} FROM patient_medications
                 WHERE patient_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY id"
            ))
            .context("failed to prepare list_assignments query")?;
        let rows = stmt
            .query_map(
                params![patient_id, status.map(|s| s.as_str())],
                assignment_from_row,
            )
            .context("failed to query assignments")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map assignment rows")?;
        Ok(rows)
    }

    /// Persist a lifecycle change. The row is only updated while it is still
    /// in `expected`, so two racing transitions cannot both succeed.
    pub fn save_assignment_status(
        &self,
        assignment: &PatientMedication,
        expected: AssignmentStatus,
    ) -> Result<()> {
        let conn = self.conn();
        let updated = conn
            .execute(
                "UPDATE patient_medications
                 SET status = ?1, confirmed_at = ?2, stopped_at = ?3, stop_reason = ?4
                 WHERE id = ?5 AND status = ?6",
                params![
                    assignment.status.as_str(),
                    assignment.confirmed_at.as_ref().map(format_datetime),
                    assignment.stopped_at.as_ref().map(format_datetime),
                    assignment.stop_reason,
                    assignment.id,
                    expected.as_str(),
                ],
            )
            .context("failed to update assignment status")?;
        if updated == 0 {
            bail!(
                "assignment {} is no longer {}; status not updated",
                assignment.id,
                expected
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dose logs
    // ------------------------------------------------------------------

    /// Record a dose. Uses INSERT OR IGNORE so a second log for the same
    /// `(assignment, scheduled_time)` slot is a no-op; returns `None` then.
    ///
    /// The `(assignment_id, patient_id)` pair must match an existing
    /// assignment, which the composite foreign key enforces.
    pub fn insert_log(&self, log: &NewDoseLog) -> Result<Option<MedicationLog>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT OR IGNORE INTO medication_logs
                    (assignment_id, patient_id, scheduled_time, actual_time, status, on_time,
                     reminder_id, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 RETURNING {LOG_COLUMNS}"
            ),
            params![
                log.assignment_id,
                log.patient_id,
                format_datetime(&log.scheduled_time),
                log.actual_time.as_ref().map(format_datetime),
                log.status.as_str(),
                log.on_time,
                log.reminder_id,
                log.notes,
            ],
            log_from_row,
        )
        .optional()
        .context("failed to insert dose log")
    }

    /// Fill in a `missed` log that nobody reported (no actual time) with
    /// `log`. Returns `None` when the slot holds anything else.
    pub fn replace_unreported_missed(&self, log: &NewDoseLog) -> Result<Option<MedicationLog>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "UPDATE medication_logs
                 SET actual_time = ?3, status = ?4, on_time = ?5, reminder_id = ?6, notes = ?7
                 WHERE assignment_id = ?1 AND scheduled_time = ?2
                   AND status = 'missed' AND actual_time IS NULL
                 RETURNING {LOG_COLUMNS}"
            ),
            params![
                log.assignment_id,
                format_datetime(&log.scheduled_time),
                log.actual_time.as_ref().map(format_datetime),
                log.status.as_str(),
                log.on_time,
                log.reminder_id,
                log.notes,
            ],
            log_from_row,
        )
        .optional()
        .context("failed to replace missed dose log")
    }

    /// Logs of a patient whose scheduled time falls in `[from, to)`, ordered
    /// by scheduled time.
    pub fn logs_for_patient(
        &self,
        patient_id: PatientId,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<MedicationLog>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LOG_COLUMNS} FROM medication_logs
                 WHERE patient_id = ?1 AND scheduled_time >= ?2 AND scheduled_time < ?3
                 ORDER BY scheduled_time, id"
            ))
            .context("failed to prepare logs_for_patient query")?;
        let rows = stmt
            .query_map(
                params![patient_id, format_datetime(&from), format_datetime(&to)],
                log_from_row,
            )
            .context("failed to query dose logs")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map dose log rows")?;
        Ok(rows)
    }

    pub fn logs_for_assignment(
        &self,
        assignment_id: AssignmentId,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<MedicationLog>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LOG_COLUMNS} FROM medication_logs
                 WHERE assignment_id = ?1 AND scheduled_time >= ?2 AND scheduled_time < ?3
                 ORDER BY scheduled_time, id"
            ))
            .context("failed to prepare logs_for_assignment query")?;
        let rows = stmt
            .query_map(
                params![assignment_id, format_datetime(&from), format_datetime(&to)],
                log_from_row,
            )
            .context("failed to query dose logs")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map dose log rows")?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Reminders
    // ------------------------------------------------------------------

    pub fn insert_reminder(&self, reminder: &NewReminder) -> Result<Reminder> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO reminders (assignment_id, patient_id, time_of_day, lead_minutes, channel)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING {REMINDER_COLUMNS}"
            ),
            params![
                reminder.assignment_id,
                reminder.patient_id,
                format_time(&reminder.time_of_day),
                reminder.lead_minutes,
                reminder.channel.as_str(),
            ],
            reminder_from_row,
        )
        .context("failed to insert reminder")
    }

    pub fn get_reminder(&self, id: ReminderId) -> Result<Option<Reminder>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"),
            params![id],
            reminder_from_row,
        )
        .optional()
        .context("failed to load reminder")
    }

    /// Enabled reminders whose assignment is active.
    pub fn enabled_reminders(&self) -> Result<Vec<Reminder>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT r.id, r.assignment_id, r.patient_id, r.time_of_day, r.lead_minutes,
                        r.channel, r.enabled, r.last_sent_at
                 FROM reminders r
                 JOIN patient_medications pm ON pm.id = r.assignment_id
                 WHERE r.enabled = 1 AND pm.status = 'active'
                 ORDER BY r.time_of_day, r.id",
            )
            .context("failed to prepare enabled_reminders query")?;
        let rows = stmt
            .query_map([], reminder_from_row)
            .context("failed to query reminders")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map reminder rows")?;
        Ok(rows)
    }

    pub fn reminders_for_patient(&self, patient_id: PatientId) -> Result<Vec<Reminder>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders WHERE patient_id = ?1
                 ORDER BY time_of_day, id"
            ))
            .context("failed to prepare reminders_for_patient query")?;
        let rows = stmt
            .query_map(params![patient_id], reminder_from_row)
            .context("failed to query reminders")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map reminder rows")?;
        Ok(rows)
    }

    pub fn mark_reminder_sent(&self, id: ReminderId, at: NaiveDateTime) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE reminders SET last_sent_at = ?1 WHERE id = ?2",
            params![format_datetime(&at), id],
        )
        .context("failed to mark reminder sent")?;
        Ok(())
    }

    pub fn set_reminder_enabled(&self, id: ReminderId, enabled: bool) -> Result<bool> {
        let conn = self.conn();
        let updated = conn
            .execute(
                "UPDATE reminders SET enabled = ?1 WHERE id = ?2",
                params![enabled, id],
            )
            .context("failed to toggle reminder")?;
        Ok(updated > 0)
    }

    // ------------------------------------------------------------------
    // Adherence rollups
    // ------------------------------------------------------------------

    /// Insert or replace the rollup identified by
    /// `(patient, assignment, period, period_start)`.
    pub fn save_stats(&self, stats: &AdherenceStats) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let period = stats.period.to_string();
        let start = format_date(&stats.period_start);
        tx.execute(
            "DELETE FROM adherence_stats
             WHERE patient_id = ?1 AND IFNULL(assignment_id, 0) = IFNULL(?2, 0)
               AND period = ?3 AND period_start = ?4",
            params![stats.patient_id, stats.assignment_id, period, start],
        )
        .context("failed to clear previous rollup")?;
        tx.execute(
            &format!(
                "INSERT INTO adherence_stats ({STATS_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                stats.patient_id,
                stats.assignment_id,
                period,
                start,
                format_date(&stats.period_end),
                stats.total_scheduled,
                stats.total_taken,
                stats.total_skipped,
                stats.total_missed,
                stats.total_on_time,
                stats.total_late,
                stats.adherence_score,
                stats.on_time_rate,
                stats.current_streak,
                stats.longest_streak,
                format_datetime(&stats.computed_at),
            ],
        )
        .context("failed to insert rollup")?;
        tx.commit().context("failed to commit rollup")?;
        Ok(())
    }

    pub fn load_stats(
        &self,
        patient_id: PatientId,
        assignment_id: Option<AssignmentId>,
        period: StatsPeriod,
        period_start: NaiveDate,
    ) -> Result<Option<AdherenceStats>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {STATS_COLUMNS} FROM adherence_stats
                 WHERE patient_id = ?1 AND IFNULL(assignment_id, 0) = IFNULL(?2, 0)
                   AND period = ?3 AND period_start = ?4"
            ),
            params![
                patient_id,
                assignment_id,
                period.to_string(),
                format_date(&period_start)
            ],
            stats_from_row,
        )
        .optional()
        .context("failed to load rollup")
    }

    /// Stored rollups for a patient and period kind, newest period first.
    pub fn stats_history(
        &self,
        patient_id: PatientId,
        period: StatsPeriod,
        limit: usize,
    ) -> Result<Vec<AdherenceStats>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {STATS_COLUMNS} FROM adherence_stats
                 WHERE patient_id = ?1 AND assignment_id IS NULL AND period = ?2
                 ORDER BY period_start DESC LIMIT ?3"
            ))
            .context("failed to prepare stats_history query")?;
        let rows = stmt
            .query_map(
                params![patient_id, period.to_string(), limit as i64],
                stats_from_row,
            )
            .context("failed to query rollups")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map rollup rows")?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Goals
    // ------------------------------------------------------------------

    pub fn insert_goal(&self, goal: &NewGoal, now: NaiveDateTime) -> Result<AdherenceGoal> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO adherence_goals
                    (patient_id, target_score, period, start_date, end_date, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 RETURNING {GOAL_COLUMNS}"
            ),
            params![
                goal.patient_id,
                goal.target_score,
                goal.period.to_string(),
                format_date(&goal.start_date),
                goal.end_date.as_ref().map(format_date),
                goal.description,
                format_datetime(&now),
            ],
            goal_from_row,
        )
        .context("failed to insert goal")
    }

    pub fn active_goals(&self, patient_id: PatientId) -> Result<Vec<AdherenceGoal>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {GOAL_COLUMNS} FROM adherence_goals
                 WHERE patient_id = ?1 AND active = 1 ORDER BY id"
            ))
            .context("failed to prepare active_goals query")?;
        let rows = stmt
            .query_map(params![patient_id], goal_from_row)
            .context("failed to query goals")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map goal rows")?;
        Ok(rows)
    }

    pub fn deactivate_goal(&self, id: GoalId) -> Result<bool> {
        let conn = self.conn();
        let updated = conn
            .execute(
                "UPDATE adherence_goals SET active = 0 WHERE id = ?1 AND active = 1",
                params![id],
            )
            .context("failed to deactivate goal")?;
        Ok(updated > 0)
    }

    // ------------------------------------------------------------------
    // Chat history
    // ------------------------------------------------------------------

    pub fn append_chat_message(
        &self,
        user_id: UserId,
        sender: ChatSender,
        content: &str,
        now: NaiveDateTime,
    ) -> Result<ChatMessage> {
        let conn = self.conn();
        conn.query_row(
            "INSERT INTO chat_messages (user_id, sender, content, created_at)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING id, user_id, sender, content, created_at",
            params![user_id, sender.as_str(), content, format_datetime(&now)],
            chat_from_row,
        )
        .context("failed to append chat message")
    }

    /// The most recent `limit` messages of a user, oldest first.
    pub fn chat_history(&self, user_id: UserId, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, sender, content, created_at FROM (
                     SELECT * FROM chat_messages WHERE user_id = ?1
                     ORDER BY id DESC LIMIT ?2
                 ) ORDER BY id",
            )
            .context("failed to prepare chat_history query")?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], chat_from_row)
            .context("failed to query chat history")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map chat rows")?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Key-value state
    // ------------------------------------------------------------------

    /// Persist an arbitrary JSON value under `key`. Uses INSERT OR REPLACE so
    /// repeated saves overwrite the previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str =
            serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO app_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json_str: Option<String> = conn
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query app state")?;

        json_str
            .map(|s| serde_json::from_str(&s).context("failed to deserialize state value"))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let text: String = row.get(idx)?;
    parse_datetime(&text).map_err(|e| conversion_error(idx, e))
}

fn get_opt_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_datetime(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn get_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    parse_date(&text).map_err(|e| conversion_error(idx, e))
}

fn get_opt_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_date(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn encode_times(times: &[NaiveTime]) -> Result<String> {
    let labels: Vec<String> = times.iter().map(format_time).collect();
    serde_json::to_string(&labels).context("failed to serialize dose times")
}

fn get_times(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<NaiveTime>> {
    let json: String = row.get(idx)?;
    let labels: Vec<String> = serde_json::from_str(&json).map_err(|e| conversion_error(idx, e))?;
    labels
        .iter()
        .map(|l| parse_time(l).map_err(|e| conversion_error(idx, e)))
        .collect()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        role: Role::parse(&role).map_err(|e| conversion_error(3, e))?,
        created_at: get_datetime(row, 4)?,
    })
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        user_id: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        date_of_birth: get_opt_date(row, 4)?,
        created_at: get_datetime(row, 5)?,
    })
}

fn medication_from_row(row: &Row<'_>) -> rusqlite::Result<Medication> {
    Ok(Medication {
        id: row.get(0)?,
        name: row.get(1)?,
        generic_name: row.get(2)?,
        form: row.get(3)?,
        strength: row.get(4)?,
        description: row.get(5)?,
    })
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<PatientMedication> {
    let frequency: String = row.get(4)?;
    let status: String = row.get(8)?;
    Ok(PatientMedication {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        medication_id: row.get(2)?,
        dosage: row.get(3)?,
        frequency: Frequency::parse(&frequency).map_err(|e| conversion_error(4, e))?,
        dose_times: get_times(row, 5)?,
        start_date: get_date(row, 6)?,
        end_date: get_opt_date(row, 7)?,
        status: AssignmentStatus::parse(&status).map_err(|e| conversion_error(8, e))?,
        instructions: row.get(9)?,
        assigned_by: row.get(10)?,
        created_at: get_datetime(row, 11)?,
        confirmed_at: get_opt_datetime(row, 12)?,
        stopped_at: get_opt_datetime(row, 13)?,
        stop_reason: row.get(14)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<MedicationLog> {
    let status: String = row.get(5)?;
    Ok(MedicationLog {
        id: row.get(0)?,
        assignment_id: row.get(1)?,
        patient_id: row.get(2)?,
        scheduled_time: get_datetime(row, 3)?,
        actual_time: get_opt_datetime(row, 4)?,
        status: DoseStatus::parse(&status).map_err(|e| conversion_error(5, e))?,
        on_time: row.get(6)?,
        reminder_id: row.get(7)?,
        notes: row.get(8)?,
        created_at: get_datetime(row, 9)?,
    })
}

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    let time: String = row.get(3)?;
    let channel: String = row.get(5)?;
    Ok(Reminder {
        id: row.get(0)?,
        assignment_id: row.get(1)?,
        patient_id: row.get(2)?,
        time_of_day: parse_time(&time).map_err(|e| conversion_error(3, e))?,
        lead_minutes: row.get(4)?,
        channel: ReminderChannel::parse(&channel).map_err(|e| conversion_error(5, e))?,
        enabled: row.get(6)?,
        last_sent_at: get_opt_datetime(row, 7)?,
    })
}

fn stats_from_row(row: &Row<'_>) -> rusqlite::Result<AdherenceStats> {
    let period: String = row.get(2)?;
    Ok(AdherenceStats {
        patient_id: row.get(0)?,
        assignment_id: row.get(1)?,
        period: StatsPeriod::parse(&period).map_err(|e| conversion_error(2, e))?,
        period_start: get_date(row, 3)?,
        period_end: get_date(row, 4)?,
        total_scheduled: row.get(5)?,
        total_taken: row.get(6)?,
        total_skipped: row.get(7)?,
        total_missed: row.get(8)?,
        total_on_time: row.get(9)?,
        total_late: row.get(10)?,
        adherence_score: row.get(11)?,
        on_time_rate: row.get(12)?,
        current_streak: row.get(13)?,
        longest_streak: row.get(14)?,
        computed_at: get_datetime(row, 15)?,
    })
}

fn goal_from_row(row: &Row<'_>) -> rusqlite::Result<AdherenceGoal> {
    let period: String = row.get(3)?;
    Ok(AdherenceGoal {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        target_score: row.get(2)?,
        period: StatsPeriod::parse(&period).map_err(|e| conversion_error(3, e))?,
        start_date: get_date(row, 4)?,
        end_date: get_opt_date(row, 5)?,
        description: row.get(6)?,
        active: row.get(7)?,
        created_at: get_datetime(row, 8)?,
    })
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let sender: String = row.get(2)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        sender: ChatSender::parse(&sender).map_err(|e| conversion_error(2, e))?,
        content: row.get(3)?,
        created_at: get_datetime(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    /// Helper: a patient with one pending once-daily assignment.
    fn seed(db: &Database) -> (Patient, PatientMedication) {
        let patient = db
            .create_patient(
                &NewPatient {
                    user_id: None,
                    first_name: "Ada".into(),
                    last_name: "Byron".into(),
                    date_of_birth: NaiveDate::from_ymd_opt(1980, 12, 10),
                },
                at(1, 9, 0),
            )
            .unwrap();
        let med = db
            .create_medication(&NewMedication {
                name: "Lisinopril".into(),
                strength: Some("10 mg".into()),
                ..Default::default()
            })
            .unwrap();
        let assignment = db
            .insert_assignment(
                &NewAssignment {
                    patient_id: patient.id,
                    medication_id: med.id,
                    dosage: "1 tablet".into(),
                    frequency: Frequency::TwiceDaily,
                    dose_times: vec![
                        NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
                        NaiveTime::from_hms_opt(19, 30, 0).unwrap(),
                    ],
                    start_date: at(1, 0, 0).date(),
                    end_date: None,
                    instructions: Some("with food".into()),
                    assigned_by: None,
                },
                at(1, 9, 0),
            )
            .unwrap();
        (patient, assignment)
    }

    fn taken(assignment: &PatientMedication, scheduled: NaiveDateTime) -> NewDoseLog {
        NewDoseLog {
            assignment_id: assignment.id,
            patient_id: assignment.patient_id,
            scheduled_time: scheduled,
            actual_time: Some(scheduled),
            status: DoseStatus::Taken,
            on_time: true,
            reminder_id: None,
            notes: None,
        }
    }

    // ------------------------------------------------------------------
    // Schema / open
    // ------------------------------------------------------------------

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "users",
            "patients",
            "medications",
            "patient_medications",
            "medication_logs",
            "reminders",
            "adherence_stats",
            "adherence_goals",
            "chat_messages",
            "app_state",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn reopening_a_file_database_keeps_data() {
        let path = std::env::temp_dir().join(format!("medtrack_reopen_{}.db", std::process::id()));
        let path_str = path.to_str().unwrap();
        let _ = std::fs::remove_file(&path);

        {
            let db = Database::open(path_str).unwrap();
            db.create_user("nurse", None, Role::Admin, at(1, 8, 0)).unwrap();
        }
        let db = Database::open(path_str).expect("schema creation is idempotent");
        assert!(db.find_user_by_username("nurse").unwrap().is_some());

        drop(db);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(format!("{path_str}-wal"));
        let _ = std::fs::remove_file(format!("{path_str}-shm"));
    }

    // ------------------------------------------------------------------
    // Users / patients / medications
    // ------------------------------------------------------------------

    #[test]
    fn usernames_are_unique() {
        let db = test_db();
        let user = db
            .create_user("ada", Some("ada@example.org"), Role::Patient, at(1, 8, 0))
            .unwrap();
        assert_eq!(user.role, Role::Patient);
        assert_eq!(db.get_user(user.id).unwrap(), Some(user.clone()));
        assert!(db.create_user("ada", None, Role::Admin, at(1, 8, 0)).is_err());
    }

    #[test]
    fn patient_links_to_user() {
        let db = test_db();
        let user = db.create_user("ada", None, Role::Patient, at(1, 8, 0)).unwrap();
        let patient = db
            .create_patient(
                &NewPatient {
                    user_id: Some(user.id),
                    first_name: "Ada".into(),
                    last_name: "Byron".into(),
                    date_of_birth: None,
                },
                at(1, 8, 0),
            )
            .unwrap();

        assert_eq!(db.patient_for_user(user.id).unwrap(), Some(patient.clone()));
        assert_eq!(db.get_patient(patient.id).unwrap(), Some(patient));
        assert!(db.patient_for_user(user.id + 1).unwrap().is_none());
    }

    #[test]
    fn medication_lookup_ignores_case() {
        let db = test_db();
        let med = db
            .create_medication(&NewMedication {
                name: "Metformin".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(db.find_medication_by_name("metformin").unwrap(), Some(med));
        assert!(db
            .create_medication(&NewMedication {
                name: "METFORMIN".into(),
                ..Default::default()
            })
            .is_err());
    }

    // ------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------

    #[test]
    fn assignment_round_trips_with_dose_times() {
        let db = test_db();
        let (_, assignment) = seed(&db);

        let loaded = db.get_assignment(assignment.id).unwrap().unwrap();
        assert_eq!(loaded, assignment);
        assert_eq!(loaded.status, AssignmentStatus::Pending);
        assert_eq!(loaded.frequency, Frequency::TwiceDaily);
        assert_eq!(loaded.dose_times.len(), 2);
    }

    #[test]
    fn status_update_is_guarded_by_expected_state() {
        let db = test_db();
        let (patient, mut assignment) = seed(&db);

        assignment.confirm(at(1, 10, 0)).unwrap();
        db.save_assignment_status(&assignment, AssignmentStatus::Pending)
            .unwrap();

        // A stale writer that still believes the row is pending loses.
        assert!(db
            .save_assignment_status(&assignment, AssignmentStatus::Pending)
            .is_err());

        let active = db
            .list_assignments(patient.id, Some(AssignmentStatus::Active))
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].confirmed_at, Some(at(1, 10, 0)));
        assert!(db
            .list_assignments(patient.id, Some(AssignmentStatus::Pending))
            .unwrap()
            .is_empty());
        assert_eq!(db.list_assignments(patient.id, None).unwrap().len(), 1);
    }

    // ------------------------------------------------------------------
    // Dose logs
    // ------------------------------------------------------------------

    #[test]
    fn insert_log_is_idempotent_per_slot() {
        let db = test_db();
        let (_, assignment) = seed(&db);

        let first = db.insert_log(&taken(&assignment, at(2, 7, 30))).unwrap();
        assert!(first.is_some());
        let second = db.insert_log(&taken(&assignment, at(2, 7, 30))).unwrap();
        assert!(second.is_none());

        let logs = db
            .logs_for_assignment(assignment.id, at(2, 0, 0), at(3, 0, 0))
            .unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn unreported_missed_log_can_be_filled_in() {
        let db = test_db();
        let (_, assignment) = seed(&db);

        let swept = NewDoseLog {
            actual_time: None,
            status: DoseStatus::Missed,
            on_time: false,
            ..taken(&assignment, at(2, 7, 30))
        };
        db.insert_log(&swept).unwrap().unwrap();

        let late = taken(&assignment, at(2, 7, 30));
        let filled = db.replace_unreported_missed(&late).unwrap().unwrap();
        assert_eq!(filled.status, DoseStatus::Taken);
        assert_eq!(filled.actual_time, late.actual_time);

        // A reported dose is never overwritten.
        assert!(db.replace_unreported_missed(&late).unwrap().is_none());
        let logs = db
            .logs_for_assignment(assignment.id, at(2, 0, 0), at(3, 0, 0))
            .unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn log_must_match_assignment_patient() {
        let db = test_db();
        let (_, assignment) = seed(&db);
        let other = db
            .create_patient(
                &NewPatient {
                    user_id: None,
                    first_name: "Grace".into(),
                    last_name: "Hopper".into(),
                    date_of_birth: None,
                },
                at(1, 9, 0),
            )
            .unwrap();

        let mut log = taken(&assignment, at(2, 7, 30));
        log.patient_id = other.id;
        assert!(db.insert_log(&log).is_err());

        let mut log = taken(&assignment, at(2, 7, 30));
        log.assignment_id = 9999;
        assert!(db.insert_log(&log).is_err());
    }

    #[test]
    fn logs_for_patient_filters_half_open_range() {
        let db = test_db();
        let (patient, assignment) = seed(&db);

        db.insert_log(&taken(&assignment, at(2, 7, 30))).unwrap();
        db.insert_log(&taken(&assignment, at(2, 19, 30))).unwrap();
        db.insert_log(&NewDoseLog {
            actual_time: None,
            status: DoseStatus::Skipped,
            on_time: false,
            notes: Some("nausea".into()),
            ..taken(&assignment, at(3, 7, 30))
        })
        .unwrap();

        let day2 = db.logs_for_patient(patient.id, at(2, 0, 0), at(3, 0, 0)).unwrap();
        assert_eq!(day2.len(), 2);
        assert!(day2[0].scheduled_time < day2[1].scheduled_time);

        let day3 = db.logs_for_patient(patient.id, at(3, 0, 0), at(4, 0, 0)).unwrap();
        assert_eq!(day3.len(), 1);
        assert_eq!(day3[0].status, DoseStatus::Skipped);
        assert_eq!(day3[0].actual_time, None);
        assert_eq!(day3[0].notes.as_deref(), Some("nausea"));
    }

    // ------------------------------------------------------------------
    // Reminders
    // ------------------------------------------------------------------

    #[test]
    fn enabled_reminders_only_for_active_assignments() {
        let db = test_db();
        let (_, mut assignment) = seed(&db);
        let reminder = db
            .insert_reminder(&NewReminder {
                assignment_id: assignment.id,
                patient_id: assignment.patient_id,
                time_of_day: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
                lead_minutes: 10,
                channel: ReminderChannel::Push,
            })
            .unwrap();
        assert!(reminder.enabled);

        // Pending assignment: nothing to remind about yet.
        assert!(db.enabled_reminders().unwrap().is_empty());

        assignment.confirm(at(1, 10, 0)).unwrap();
        db.save_assignment_status(&assignment, AssignmentStatus::Pending)
            .unwrap();
        assert_eq!(db.enabled_reminders().unwrap().len(), 1);

        assert!(db.set_reminder_enabled(reminder.id, false).unwrap());
        assert!(db.enabled_reminders().unwrap().is_empty());
    }

    #[test]
    fn mark_reminder_sent_records_time() {
        let db = test_db();
        let (_, assignment) = seed(&db);
        let reminder = db
            .insert_reminder(&NewReminder {
                assignment_id: assignment.id,
                patient_id: assignment.patient_id,
                time_of_day: NaiveTime::from_hms_opt(19, 30, 0).unwrap(),
                lead_minutes: 15,
                channel: ReminderChannel::Sms,
            })
            .unwrap();

        db.mark_reminder_sent(reminder.id, at(2, 19, 15)).unwrap();
        let loaded = db.get_reminder(reminder.id).unwrap().unwrap();
        assert_eq!(loaded.last_sent_at, Some(at(2, 19, 15)));
        assert_eq!(loaded.channel, ReminderChannel::Sms);
    }

    // ------------------------------------------------------------------
    // Rollups and goals
    // ------------------------------------------------------------------

    fn sample_stats(patient_id: PatientId, assignment_id: Option<AssignmentId>) -> AdherenceStats {
        AdherenceStats {
            patient_id,
            assignment_id,
            period: StatsPeriod::Weekly,
            period_start: at(13, 0, 0).date(),
            period_end: at(19, 0, 0).date(),
            total_scheduled: 14,
            total_taken: 12,
            total_skipped: 1,
            total_missed: 1,
            total_on_time: 10,
            total_late: 2,
            adherence_score: 12.0 / 14.0 * 100.0,
            on_time_rate: 10.0 / 12.0 * 100.0,
            current_streak: 2,
            longest_streak: 4,
            computed_at: at(19, 23, 0),
        }
    }

    #[test]
    fn save_stats_replaces_same_key() {
        let db = test_db();
        let (patient, assignment) = seed(&db);

        let overall = sample_stats(patient.id, None);
        db.save_stats(&overall).unwrap();
        let updated = AdherenceStats {
            total_taken: 13,
            ..overall.clone()
        };
        db.save_stats(&updated).unwrap();

        let per_assignment = sample_stats(patient.id, Some(assignment.id));
        db.save_stats(&per_assignment).unwrap();

        let loaded = db
            .load_stats(patient.id, None, StatsPeriod::Weekly, overall.period_start)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, updated);

        let loaded = db
            .load_stats(
                patient.id,
                Some(assignment.id),
                StatsPeriod::Weekly,
                overall.period_start,
            )
            .unwrap()
            .unwrap();
        assert_eq!(loaded, per_assignment);

        let history = db.stats_history(patient.id, StatsPeriod::Weekly, 10).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn goals_can_be_deactivated() {
        let db = test_db();
        let (patient, _) = seed(&db);
        let goal = db
            .insert_goal(
                &NewGoal {
                    patient_id: patient.id,
                    target_score: 90.0,
                    period: StatsPeriod::Rolling(7),
                    start_date: at(1, 0, 0).date(),
                    end_date: None,
                    description: Some("steady week".into()),
                },
                at(1, 9, 0),
            )
            .unwrap();
        assert_eq!(goal.period, StatsPeriod::Rolling(7));
        assert_eq!(db.active_goals(patient.id).unwrap(), vec![goal.clone()]);

        assert!(db.deactivate_goal(goal.id).unwrap());
        assert!(!db.deactivate_goal(goal.id).unwrap());
        assert!(db.active_goals(patient.id).unwrap().is_empty());
    }

    // ------------------------------------------------------------------
    // Chat history / key-value state
    // ------------------------------------------------------------------

    #[test]
    fn chat_history_returns_latest_in_order() {
        let db = test_db();
        let user = db.create_user("ada", None, Role::Patient, at(1, 8, 0)).unwrap();
        for i in 0..5 {
            let sender = if i % 2 == 0 {
                ChatSender::User
            } else {
                ChatSender::Assistant
            };
            db.append_chat_message(user.id, sender, &format!("msg {i}"), at(1, 9, i))
                .unwrap();
        }

        let history = db.chat_history(user.id, 3).unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 2", "msg 3", "msg 4"]);
        assert_eq!(history[1].sender, ChatSender::Assistant);
    }

    #[test]
    fn save_and_load_state_round_trip() {
        let db = test_db();
        assert!(db.load_state("missing").unwrap().is_none());

        db.save_state("sweep", &json!("2024-05-02T08:00:00")).unwrap();
        db.save_state("sweep", &json!("2024-05-03T08:00:00")).unwrap();
        assert_eq!(
            db.load_state("sweep").unwrap(),
            Some(json!("2024-05-03T08:00:00"))
        );
    }

    #[test]
    fn foreign_keys_enforced() {
        let db = test_db();
        let result = db.insert_goal(
            &NewGoal {
                patient_id: 9999,
                target_score: 80.0,
                period: StatsPeriod::Daily,
                start_date: at(1, 0, 0).date(),
                end_date: None,
                description: None,
            },
            at(1, 0, 0),
        );
        assert!(result.is_err());
    }
}
