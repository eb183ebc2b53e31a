use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::recurrence::RecurrenceRule;

/// Activation rule bound to a job id
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Fire once at an absolute instant, then drop out of the scheduler
    OneShot { at: DateTime<Utc> },
    /// Fire on every match of the rule
    Recurring { rule: RecurrenceRule },
}

impl Trigger {
    pub fn one_shot(at: DateTime<Utc>) -> Self {
        Trigger::OneShot { at }
    }

    pub fn recurring(rule: RecurrenceRule) -> Self {
        Trigger::Recurring { rule }
    }

    /// First fire time for a freshly registered trigger.
    ///
    /// A one-shot whose instant has already passed is still armed and
    /// fires on the next tick.
    pub fn first_fire(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Trigger::OneShot { at } => Some(*at),
            Trigger::Recurring { rule } => rule.next_after(now, tz),
        }
    }

    /// Fire time following a firing at `now`; `None` retires the trigger
    pub fn rearm(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Trigger::OneShot { .. } => None,
            Trigger::Recurring { rule } => rule.next_after(now, tz),
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Trigger::Recurring { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::OneShot { .. } => "one-shot",
            Trigger::Recurring { .. } => "recurring",
        }
    }
}
