// Command-line interface: argument parsing and command dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Args, Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::info;

use medtrack_adherence::schedule::parse_frequency;
use medtrack_core::db::{NewAssignment, NewGoal, NewMedication, NewPatient};
use medtrack_core::model::{
    format_datetime, parse_date, parse_datetime, parse_time, DoseStatus, PatientId,
    ReminderChannel, Role, StatsPeriod,
};

use crate::access::Actor;
use crate::csv_io;
use crate::reminders::{self, LogNotifier, SystemClock};
use crate::tracker::{DoseEntry, ReminderRequest, Tracker};

#[derive(Parser, Debug)]
#[command(name = "medtrack", version, about = "Medication adherence tracker.")]
pub struct Cli {
    /// Directory holding config/ and logs/ (defaults to the working directory).
    #[arg(long, env = "MEDTRACK_DIR", global = true)]
    pub dir: Option<PathBuf>,

    /// Username to act as.
    #[arg(long = "as", env = "MEDTRACK_USER", global = true)]
    pub as_user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database and the first admin account.
    Init {
        #[arg(long)]
        admin: String,
    },
    #[command(subcommand)]
    User(UserCommand),
    #[command(subcommand)]
    Patient(PatientCommand),
    #[command(subcommand)]
    Med(MedCommand),
    /// Prescribe a medication to a patient.
    Assign(AssignArgs),
    /// Confirm a pending assignment.
    Confirm { assignment: i64 },
    /// Stop an active assignment.
    Stop {
        assignment: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Log a dose.
    Log(LogArgs),
    /// Show dose slots and their outcomes.
    Schedule(RangeArgs),
    /// Show the next dose of each active medication.
    Next {
        #[arg(long)]
        patient: Option<PatientId>,
    },
    /// Recompute and show adherence statistics.
    Stats {
        #[arg(long)]
        patient: Option<PatientId>,
        #[arg(long, default_value = "weekly", value_parser = parse_period_arg)]
        period: StatsPeriod,
        #[arg(long, value_parser = parse_date_arg)]
        as_of: Option<NaiveDate>,
        /// List up to N stored periods instead of recomputing.
        #[arg(long, value_name = "N", conflicts_with = "as_of")]
        history: Option<usize>,
    },
    #[command(subcommand)]
    Goal(GoalCommand),
    #[command(subcommand)]
    Reminder(ReminderCommand),
    /// Send due reminders and sweep missed doses until Ctrl+C.
    Remind,
    /// Import dose logs from a CSV file.
    Import { file: PathBuf },
    /// Export a dose report as CSV.
    Export {
        #[command(flatten)]
        range: RangeArgs,
        /// Output file (stdout when omitted).
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    Add {
        username: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value = "patient", value_parser = parse_role_arg)]
        role: Role,
    },
}

#[derive(Subcommand, Debug)]
pub enum PatientCommand {
    Add {
        #[arg(long)]
        first: String,
        #[arg(long)]
        last: String,
        #[arg(long, value_parser = parse_date_arg)]
        dob: Option<NaiveDate>,
        /// Link the record to this patient account.
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum MedCommand {
    Add {
        name: String,
        #[arg(long)]
        generic: Option<String>,
        #[arg(long)]
        form: Option<String>,
        #[arg(long)]
        strength: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    List,
}

#[derive(Args, Debug)]
pub struct AssignArgs {
    #[arg(long)]
    pub patient: PatientId,
    /// Medication name.
    #[arg(long)]
    pub med: String,
    #[arg(long)]
    pub dosage: String,
    /// e.g. `bid`, `q8h`, `weekly on monday`, `prn`.
    #[arg(long)]
    pub frequency: String,
    /// Explicit dose times, comma separated (`08:00,20:00`).
    #[arg(long, value_delimiter = ',', value_parser = parse_time_arg)]
    pub times: Vec<NaiveTime>,
    #[arg(long, value_parser = parse_date_arg)]
    pub start: Option<NaiveDate>,
    #[arg(long, value_parser = parse_date_arg)]
    pub end: Option<NaiveDate>,
    #[arg(long)]
    pub instructions: Option<String>,
}

#[derive(Args, Debug)]
pub struct LogArgs {
    pub assignment: i64,
    #[arg(long, default_value = "taken", value_parser = parse_status_arg)]
    pub status: DoseStatus,
    /// When the dose was taken (defaults to now).
    #[arg(long, value_parser = parse_datetime_arg)]
    pub at: Option<NaiveDateTime>,
    /// Slot the dose belongs to (defaults to the nearest one).
    #[arg(long, value_parser = parse_datetime_arg)]
    pub scheduled: Option<NaiveDateTime>,
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Args, Debug)]
pub struct RangeArgs {
    #[arg(long)]
    pub patient: Option<PatientId>,
    #[arg(long, value_parser = parse_date_arg)]
    pub from: Option<NaiveDate>,
    #[arg(long, value_parser = parse_date_arg)]
    pub to: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
pub enum GoalCommand {
    Set {
        #[arg(long)]
        patient: Option<PatientId>,
        #[arg(long)]
        target: f64,
        #[arg(long, default_value = "weekly", value_parser = parse_period_arg)]
        period: StatsPeriod,
        #[arg(long, value_parser = parse_date_arg)]
        start: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date_arg)]
        end: Option<NaiveDate>,
        #[arg(long)]
        description: Option<String>,
    },
    Show {
        #[arg(long)]
        patient: Option<PatientId>,
    },
    /// Retire an active goal.
    Deactivate {
        goal: i64,
        #[arg(long)]
        patient: Option<PatientId>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ReminderCommand {
    Add {
        assignment: i64,
        #[arg(long, value_parser = parse_time_arg)]
        time: NaiveTime,
        #[arg(long)]
        lead: Option<u32>,
        #[arg(long, default_value = "push", value_parser = parse_channel_arg)]
        channel: ReminderChannel,
    },
    List {
        #[arg(long)]
        patient: Option<PatientId>,
    },
    Enable { reminder: i64 },
    Disable { reminder: i64 },
}

fn parse_date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn parse_datetime_arg(s: &str) -> Result<NaiveDateTime, String> {
    parse_datetime(s).map_err(|e| format!("expected YYYY-MM-DDTHH:MM[:SS]: {e}"))
}

fn parse_time_arg(s: &str) -> Result<NaiveTime, String> {
    parse_time(s).map_err(|e| format!("expected HH:MM: {e}"))
}

fn parse_period_arg(s: &str) -> Result<StatsPeriod, String> {
    StatsPeriod::parse(s).map_err(|e| e.to_string())
}

fn parse_role_arg(s: &str) -> Result<Role, String> {
    Role::parse(s).map_err(|e| e.to_string())
}

fn parse_status_arg(s: &str) -> Result<DoseStatus, String> {
    DoseStatus::parse(s).map_err(|e| e.to_string())
}

fn parse_channel_arg(s: &str) -> Result<ReminderChannel, String> {
    ReminderChannel::parse(s).map_err(|e| e.to_string())
}

/// Patient a command targets: the explicit `--patient`, else the actor's own.
fn target_patient(actor: &Actor, explicit: Option<PatientId>) -> anyhow::Result<PatientId> {
    match explicit.or(actor.patient_id) {
        Some(id) => Ok(id),
        None => bail!("--patient is required"),
    }
}

fn require_actor(tracker: &Tracker, as_user: Option<&str>) -> anyhow::Result<Actor> {
    let Some(username) = as_user else {
        bail!("--as <username> (or MEDTRACK_USER) is required for this command");
    };
    Ok(tracker.resolve_actor(username)?)
}

/// Run one parsed command against `tracker` at wall-clock time `now`.
pub async fn execute(tracker: Arc<Tracker>, cli: Cli, now: NaiveDateTime) -> anyhow::Result<()> {
    if let Command::Init { admin } = &cli.command {
        let user = tracker.bootstrap_admin(admin, now)?;
        println!("created admin {} (id {})", user.username, user.id);
        return Ok(());
    }

    let actor = require_actor(&tracker, cli.as_user.as_deref())?;
    let today = now.date();

    match cli.command {
        Command::Init { .. } => unreachable!("handled above"),

        Command::User(UserCommand::Add {
            username,
            email,
            role,
        }) => {
            let user = tracker.register_user(&actor, &username, email.as_deref(), role, now)?;
            println!("created {} user {} (id {})", user.role.as_str(), user.username, user.id);
        }

        Command::Patient(PatientCommand::Add {
            first,
            last,
            dob,
            user,
        }) => {
            let user_id = match user {
                Some(name) => Some(tracker.resolve_actor(&name)?.user_id),
                None => None,
            };
            let patient = tracker.create_patient(
                &actor,
                &NewPatient {
                    user_id,
                    first_name: first,
                    last_name: last,
                    date_of_birth: dob,
                },
                now,
            )?;
            println!("created patient {} (id {})", patient.full_name(), patient.id);
        }

        Command::Med(MedCommand::Add {
            name,
            generic,
            form,
            strength,
            description,
        }) => {
            let med = tracker.add_medication(
                &actor,
                &NewMedication {
                    name,
                    generic_name: generic,
                    form,
                    strength,
                    description,
                },
            )?;
            println!("added medication {} (id {})", med.name, med.id);
        }

        Command::Med(MedCommand::List) => {
            for med in tracker.medications()? {
                let generic = med
                    .generic_name
                    .map(|g| format!(" ({g})"))
                    .unwrap_or_default();
                println!(
                    "{:>4}  {}{} {}",
                    med.id,
                    med.name,
                    generic,
                    med.strength.unwrap_or_default()
                );
            }
        }

        Command::Assign(args) => {
            let med = tracker.find_medication(&args.med)?;
            let frequency = parse_frequency(&args.frequency)?;
            let assignment = tracker.assign_medication(
                &actor,
                &NewAssignment {
                    patient_id: args.patient,
                    medication_id: med.id,
                    dosage: args.dosage,
                    frequency,
                    dose_times: args.times,
                    start_date: args.start.unwrap_or(today),
                    end_date: args.end,
                    instructions: args.instructions,
                    assigned_by: None,
                },
                now,
            )?;
            println!(
                "assignment {}: {} {} ({}), pending confirmation",
                assignment.id, med.name, assignment.dosage, assignment.frequency
            );
        }

        Command::Confirm { assignment } => {
            let a = tracker.confirm_assignment(&actor, assignment, now)?;
            println!("assignment {} is {}", a.id, a.status);
        }

        Command::Stop { assignment, reason } => {
            let a = tracker.stop_assignment(&actor, assignment, reason, now)?;
            println!("assignment {} is {}", a.id, a.status);
        }

        Command::Log(args) => {
            let entry = DoseEntry {
                assignment_id: args.assignment,
                scheduled_time: args.scheduled,
                actual_time: args.at,
                status: args.status,
                notes: args.notes,
                reminder_id: None,
            };
            let log = tracker.log_dose(&actor, &entry, now)?;
            println!(
                "logged {} for {}{}",
                log.status.as_str(),
                format_datetime(&log.scheduled_time),
                if log.on_time { " (on time)" } else { "" }
            );
        }

        Command::Schedule(range) => {
            let patient = target_patient(&actor, range.patient)?;
            let from = range.from.unwrap_or(today);
            let to = range.to.unwrap_or(from);
            let labels = tracker.medication_labels(&actor, patient)?;
            let schedule = tracker.dose_schedule(&actor, patient, from, to, now)?;
            for record in &schedule.records {
                let name = labels
                    .get(&record.slot.assignment_id)
                    .map(String::as_str)
                    .unwrap_or("?");
                let taken = record
                    .log
                    .as_ref()
                    .and_then(|l| l.actual_time)
                    .map(|t| format!("  taken {}", t.format("%H:%M")))
                    .unwrap_or_default();
                println!(
                    "{}  {:<20} {:<8}{}",
                    record.slot.scheduled_time.format("%Y-%m-%d %H:%M"),
                    name,
                    record.outcome,
                    taken
                );
            }
            if !schedule.extra_logs.is_empty() {
                println!("{} logs outside any slot", schedule.extra_logs.len());
            }
        }

        Command::Next { patient } => {
            let patient = target_patient(&actor, patient)?;
            let labels = tracker.medication_labels(&actor, patient)?;
            for dose in tracker.next_doses(&actor, patient, now)? {
                let name = labels
                    .get(&dose.assignment_id)
                    .map(String::as_str)
                    .unwrap_or("?");
                println!("{}  {}", dose.scheduled_time.format("%Y-%m-%d %H:%M"), name);
            }
        }

        Command::Stats {
            patient,
            period,
            as_of,
            history,
        } => {
            let patient = target_patient(&actor, patient)?;
            let rollups = match history {
                Some(limit) => tracker.stats_history(&actor, patient, period, limit)?,
                None => {
                    tracker.refresh_stats(&actor, patient, period, as_of.unwrap_or(today), now)?
                }
            };
            for stats in &rollups {
                let scope = match stats.assignment_id {
                    Some(id) => format!("assignment {id}"),
                    None => "all medications".to_string(),
                };
                println!(
                    "{} {}..{} {}: {:.1}% ({}/{} taken, {} skipped, {} missed), on time {:.1}%, streak {} (best {})",
                    stats.period,
                    stats.period_start,
                    stats.period_end,
                    scope,
                    stats.adherence_score,
                    stats.total_taken,
                    stats.total_scheduled,
                    stats.total_skipped,
                    stats.total_missed,
                    stats.on_time_rate,
                    stats.current_streak,
                    stats.longest_streak
                );
            }
        }

        Command::Goal(GoalCommand::Set {
            patient,
            target,
            period,
            start,
            end,
            description,
        }) => {
            let patient = target_patient(&actor, patient)?;
            let goal = tracker.set_goal(
                &actor,
                &NewGoal {
                    patient_id: patient,
                    target_score: target,
                    period,
                    start_date: start.unwrap_or(today),
                    end_date: end,
                    description,
                },
                now,
            )?;
            println!("goal {}: {}% {}", goal.id, goal.target_score, goal.period);
        }

        Command::Goal(GoalCommand::Show { patient }) => {
            let patient = target_patient(&actor, patient)?;
            for status in tracker.goal_progress(&actor, patient, today, now)? {
                println!(
                    "goal {} ({}): {:.1}% of {:.1}% {}",
                    status.goal.id,
                    status.goal.period,
                    status.progress.score,
                    status.progress.target,
                    if status.progress.met {
                        "met".to_string()
                    } else {
                        format!("({:.1} to go)", status.progress.gap)
                    }
                );
            }
        }

        Command::Goal(GoalCommand::Deactivate { goal, patient }) => {
            let patient = target_patient(&actor, patient)?;
            tracker.deactivate_goal(&actor, patient, goal)?;
            println!("goal {goal} deactivated");
        }

        Command::Reminder(ReminderCommand::Add {
            assignment,
            time,
            lead,
            channel,
        }) => {
            let reminder = tracker.create_reminder(
                &actor,
                &ReminderRequest {
                    assignment_id: assignment,
                    time_of_day: time,
                    lead_minutes: lead,
                    channel,
                },
            )?;
            println!(
                "reminder {} at {} ({} min ahead, {})",
                reminder.id,
                reminder.time_of_day.format("%H:%M"),
                reminder.lead_minutes,
                reminder.channel.as_str()
            );
        }

        Command::Reminder(ReminderCommand::List { patient }) => {
            let patient = target_patient(&actor, patient)?;
            for reminder in tracker.reminders_for(&actor, patient)? {
                println!(
                    "{:>4}  assignment {} at {} ({} min ahead, {}){}",
                    reminder.id,
                    reminder.assignment_id,
                    reminder.time_of_day.format("%H:%M"),
                    reminder.lead_minutes,
                    reminder.channel.as_str(),
                    if reminder.enabled { "" } else { " disabled" }
                );
            }
        }

        Command::Reminder(ReminderCommand::Enable { reminder }) => {
            tracker.set_reminder_enabled(&actor, reminder, true)?;
            println!("reminder {reminder} enabled");
        }

        Command::Reminder(ReminderCommand::Disable { reminder }) => {
            tracker.set_reminder_enabled(&actor, reminder, false)?;
            println!("reminder {reminder} disabled");
        }

        Command::Remind => {
            if !actor.is_admin() {
                bail!("the reminder loop runs for every patient and needs an admin");
            }
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let handle = tokio::spawn(reminders::run(
                tracker.clone(),
                Arc::new(LogNotifier),
                Arc::new(SystemClock),
                shutdown_rx,
            ));
            println!("sending reminders; press Ctrl+C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl+C")?;
            info!("Ctrl+C received, stopping reminder loop");
            let _ = shutdown_tx.send(());
            handle.await.context("reminder loop panicked")??;
        }

        Command::Import { file } => {
            let reader = std::fs::File::open(&file)
                .with_context(|| format!("failed to open {}", file.display()))?;
            let summary = csv_io::import_logs(&tracker, &actor, reader, now)?;
            println!("imported {} logs", summary.imported);
            for (line, reason) in &summary.rejected {
                println!("line {line}: {reason}");
            }
        }

        Command::Export { range, out } => {
            let patient = target_patient(&actor, range.patient)?;
            let to = range.to.unwrap_or(today);
            let from = range.from.unwrap_or(to - Duration::days(6));
            let labels = tracker.medication_labels(&actor, patient)?;
            let schedule = tracker.dose_schedule(&actor, patient, from, to, now)?;
            let rows = match out {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    csv_io::export_report(file, &schedule.records, &labels)?
                }
                None => csv_io::export_report(std::io::stdout().lock(), &schedule.records, &labels)?,
            };
            info!("exported {} dose records for patient {}", rows, patient);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assign_with_times() {
        let cli = Cli::try_parse_from([
            "medtrack",
            "--as",
            "nurse",
            "assign",
            "--patient",
            "3",
            "--med",
            "Metformin",
            "--dosage",
            "500 mg",
            "--frequency",
            "bid",
            "--times",
            "07:30,19:30",
        ])
        .unwrap();
        assert_eq!(cli.as_user.as_deref(), Some("nurse"));
        match cli.command {
            Command::Assign(args) => {
                assert_eq!(args.patient, 3);
                assert_eq!(args.times.len(), 2);
                assert_eq!(args.times[0], NaiveTime::from_hms_opt(7, 30, 0).unwrap());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_stats_period() {
        let cli =
            Cli::try_parse_from(["medtrack", "stats", "--period", "30d", "--as", "pat"]).unwrap();
        match cli.command {
            Command::Stats { period, .. } => assert_eq!(period, StatsPeriod::Rolling(30)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_rolling_window() {
        let parsed = Cli::try_parse_from([
            "medtrack",
            "stats",
            "--period",
            "rolling:4000000000",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn stats_history_excludes_as_of() {
        let cli = Cli::try_parse_from(["medtrack", "stats", "--history", "4"]).unwrap();
        match cli.command {
            Command::Stats { history, .. } => assert_eq!(history, Some(4)),
            other => panic!("unexpected command {other:?}"),
        }
        let both = Cli::try_parse_from([
            "medtrack",
            "stats",
            "--history",
            "4",
            "--as-of",
            "2024-05-06",
        ]);
        assert!(both.is_err());
    }

    #[test]
    fn parses_reminder_toggles_and_goal_deactivation() {
        let cli = Cli::try_parse_from(["medtrack", "reminder", "disable", "7"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Reminder(ReminderCommand::Disable { reminder: 7 })
        ));
        let cli =
            Cli::try_parse_from(["medtrack", "goal", "deactivate", "2", "--patient", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Goal(GoalCommand::Deactivate {
                goal: 2,
                patient: Some(5)
            })
        ));
    }

    #[test]
    fn rejects_bad_status() {
        assert!(Cli::try_parse_from(["medtrack", "log", "4", "--status", "forgot"]).is_err());
    }
}
