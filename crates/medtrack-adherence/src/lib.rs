// Adherence engine: dose schedules, log matching, classification, rollups
// and goal progress. Pure functions over medtrack-core records; nothing here
// touches the database or the clock.

pub mod goals;
pub mod matching;
pub mod schedule;
pub mod stats;

pub use goals::{evaluate, GoalError, GoalProgress};
pub use matching::{classify, classify_log, nearest_slot, Classification, DoseOutcome, DoseRecord};
pub use schedule::{dose_times, expand, ScheduleError, ScheduledDose};
pub use stats::{adherence_score, compute, streaks, summarize, StreakTracker, Summary};
