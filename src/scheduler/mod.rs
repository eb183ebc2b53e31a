//! Trigger scheduling for one-shot and recurring recordings

pub mod recurrence;
pub mod service;
pub mod trigger;

pub use recurrence::RecurrenceRule;
pub use service::{DueFiring, RestoreSummary, Scheduler, TriggerHandler};
pub use trigger::Trigger;
