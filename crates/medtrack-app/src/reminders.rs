// Reminder delivery: which reminders are due, how they are sent, and the
// background loop that sends them and sweeps up missed doses.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use medtrack_adherence::ScheduledDose;
use medtrack_core::model::{AssignmentId, MedicationLog, Reminder};

use crate::tracker::Tracker;

/// A reminder to send now, for the dose at `dose_time`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DueReminder {
    pub reminder: Reminder,
    pub dose_time: NaiveDateTime,
}

/// Reminders that should fire at `now`.
///
/// A reminder fires for a dose in `slots` of its assignment at its
/// `time_of_day` when `dose - lead <= now <= dose + grace`, it has not been
/// sent since the window opened, and nothing has been logged for that dose
/// yet. Days without such a slot (a weekly medication off its weekday, or
/// outside the prescription's dates) never fire. Pass the slots of the day
/// before and after `now` as well so windows may cross midnight.
pub fn due_reminders(
    reminders: &[Reminder],
    slots: &[ScheduledDose],
    logs: &[MedicationLog],
    now: NaiveDateTime,
    grace: Duration,
) -> Vec<DueReminder> {
    let logged: HashSet<(AssignmentId, NaiveDateTime)> = logs
        .iter()
        .map(|log| (log.assignment_id, log.scheduled_time))
        .collect();

    let mut due = Vec::new();
    for reminder in reminders.iter().filter(|r| r.enabled) {
        let lead = Duration::minutes(i64::from(reminder.lead_minutes));
        let doses = slots.iter().filter(|slot| {
            slot.assignment_id == reminder.assignment_id
                && slot.scheduled_time.time() == reminder.time_of_day
        });
        for slot in doses {
            let dose_time = slot.scheduled_time;
            let opens = dose_time - lead;
            if now < opens || now > dose_time + grace {
                continue;
            }
            if reminder.last_sent_at.map_or(false, |sent| sent >= opens) {
                continue;
            }
            if logged.contains(&(reminder.assignment_id, dose_time)) {
                continue;
            }
            due.push(DueReminder {
                reminder: reminder.clone(),
                dose_time,
            });
            break;
        }
    }
    due
}

/// Delivery channel for due reminders.
#[async_trait]
pub trait ReminderNotifier: Send + Sync {
    async fn notify(&self, due: &DueReminder) -> anyhow::Result<()>;
}

/// Writes reminders to the log. Used when no delivery backend is set up.
pub struct LogNotifier;

#[async_trait]
impl ReminderNotifier for LogNotifier {
    async fn notify(&self, due: &DueReminder) -> anyhow::Result<()> {
        info!(
            "reminder {} ({}) for patient {}: dose of assignment {} at {}",
            due.reminder.id,
            due.reminder.channel.as_str(),
            due.reminder.patient_id,
            due.reminder.assignment_id,
            due.dose_time.format("%Y-%m-%d %H:%M")
        );
        Ok(())
    }
}

/// Forwards reminders into a tokio channel.
pub struct ChannelNotifier {
    tx: mpsc::Sender<DueReminder>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<DueReminder>) -> Self {
        ChannelNotifier { tx }
    }
}

#[async_trait]
impl ReminderNotifier for ChannelNotifier {
    async fn notify(&self, due: &DueReminder) -> anyhow::Result<()> {
        self.tx
            .send(due.clone())
            .await
            .map_err(|_| anyhow::anyhow!("reminder channel closed"))
    }
}

/// Source of the patient-local wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sent: usize,
    pub failed: usize,
    pub swept: usize,
}

/// One pass of the reminder loop: send what is due, then sweep missed doses.
/// A reminder is only marked sent once the notifier accepted it.
pub async fn process_tick(
    tracker: &Tracker,
    notifier: &dyn ReminderNotifier,
    now: NaiveDateTime,
) -> anyhow::Result<TickReport> {
    let mut report = TickReport::default();
    for due in tracker.due_reminders(now)? {
        match notifier.notify(&due).await {
            Ok(()) => {
                tracker.mark_reminder_sent(due.reminder.id, now)?;
                report.sent += 1;
            }
            Err(e) => {
                warn!("failed to deliver reminder {}: {}", due.reminder.id, e);
                report.failed += 1;
            }
        }
    }
    report.swept = tracker.sweep_missed(now)?;
    Ok(report)
}

/// Run the reminder loop until `shutdown` fires (or its sender is dropped).
///
/// Ticks every `reminders.poll_interval_secs`, starting immediately. A
/// failing tick is logged and the loop carries on.
pub async fn run(
    tracker: Arc<Tracker>,
    notifier: Arc<dyn ReminderNotifier>,
    clock: Arc<dyn Clock>,
    mut shutdown: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let period = StdDuration::from_secs(tracker.config().reminders.poll_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("Reminder loop started (every {:?})", period);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                break;
            }
            _ = interval.tick() => {
                let now = clock.now();
                match process_tick(&tracker, notifier.as_ref(), now).await {
                    Ok(report) if report.sent > 0 || report.swept > 0 || report.failed > 0 => {
                        info!(
                            "reminder tick at {}: {} sent, {} failed, {} marked missed",
                            now, report.sent, report.failed, report.swept
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!("reminder tick failed: {:#}", e),
                }
            }
        }
    }

    info!("Reminder loop exiting");
    Ok(())
}
