// Library root: the service layer behind the `medtrack` binary, exposed so
// integration tests can drive it directly.

pub mod access;
pub mod cli;
pub mod csv_io;
pub mod error;
pub mod reminders;
pub mod tracker;

pub use access::{Action, Actor};
pub use error::{TrackerError, TrackerResult};
pub use tracker::{DoseEntry, ReminderRequest, Tracker};
