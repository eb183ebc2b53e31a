//! Five-field recurrence rules (`minute hour day month weekday`).
//!
//! Rules are validated here and then handed to the `cron` crate for fire
//! time computation. Day-of-month and day-of-week restrictions are both
//! applied when both are present.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::ScheduleError;
use crate::models::RecurrencePreset;

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Clone, Copy)]
struct FieldBounds {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldBounds = FieldBounds { name: "minute", min: 0, max: 59 };
const HOUR: FieldBounds = FieldBounds { name: "hour", min: 0, max: 23 };
const DAY: FieldBounds = FieldBounds { name: "day", min: 1, max: 31 };
const MONTH: FieldBounds = FieldBounds { name: "month", min: 1, max: 12 };
const WEEKDAY: FieldBounds = FieldBounds { name: "day-of-week", min: 0, max: 7 };

/// Parsed field: `None` is an unrestricted wildcard
type FieldValues = Option<BTreeSet<u32>>;

#[derive(Debug, Clone)]
pub struct RecurrenceRule {
    source: String,
    minute: FieldValues,
    hour: FieldValues,
    day: FieldValues,
    month: FieldValues,
    weekday: FieldValues,
    schedule: Schedule,
}

impl PartialEq for RecurrenceRule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl RecurrenceRule {
    pub fn parse(rule: &str) -> Result<Self, ScheduleError> {
        let malformed = |reason: String| ScheduleError::MalformedRule {
            rule: rule.to_string(),
            reason,
        };

        let fields: Vec<&str> = rule.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(malformed(format!("expected 5 fields, found {}", fields.len())));
        }

        let minute = parse_field(fields[0], MINUTE).map_err(&malformed)?;
        let hour = parse_field(fields[1], HOUR).map_err(&malformed)?;
        let day = parse_field(fields[2], DAY).map_err(&malformed)?;
        let month = parse_field(fields[3], MONTH).map_err(&malformed)?;
        // 7 is an alias for Sunday
        let weekday = parse_field(fields[4], WEEKDAY)
            .map_err(&malformed)?
            .map(|values| values.into_iter().map(|d| d % 7).collect());

        let expression = format!(
            "0 {} {} {} {} {}",
            render_numeric(&minute),
            render_numeric(&hour),
            render_numeric(&day),
            render_numeric(&month),
            render_weekdays(&weekday),
        );
        let schedule = Schedule::from_str(&expression)
            .map_err(|e| malformed(format!("rejected by cron: {e}")))?;

        Ok(Self {
            source: fields.join(" "),
            minute,
            hour,
            day,
            month,
            weekday,
            schedule,
        })
    }

    /// Rule equivalent to a request preset, anchored on the requested start.
    ///
    /// Returns `None` for `once`, which is a plain one-shot.
    pub fn from_preset(preset: RecurrencePreset, start: DateTime<Utc>, tz: Tz) -> Option<Self> {
        let local = start.with_timezone(&tz);
        let (minute, hour) = (local.minute(), local.hour());
        let rule = match preset {
            RecurrencePreset::Once => return None,
            RecurrencePreset::Daily => format!("{minute} {hour} * * *"),
            RecurrencePreset::Weekly => {
                format!("{minute} {hour} * * {}", local.weekday().num_days_from_sunday())
            }
            RecurrencePreset::Weekdays => format!("{minute} {hour} * * 1-5"),
            RecurrencePreset::Weekends => format!("{minute} {hour} * * 0,6"),
            RecurrencePreset::Monthly => format!("{minute} {hour} {} * *", local.day()),
        };
        Self::parse(&rule).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The six-field expression handed to the `cron` crate
    pub fn to_cron(&self) -> String {
        self.schedule.to_string()
    }

    /// First fire time strictly after `after`, evaluated in `tz`
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&tz))
            .next()
            .map(|fire| fire.with_timezone(&Utc))
    }

    /// Whether a local wall-clock minute satisfies every field
    pub fn matches<Z: TimeZone>(&self, at: &DateTime<Z>) -> bool {
        let allowed = |field: &FieldValues, value: u32| {
            field.as_ref().map_or(true, |values| values.contains(&value))
        };
        allowed(&self.minute, at.minute())
            && allowed(&self.hour, at.hour())
            && allowed(&self.day, at.day())
            && allowed(&self.month, at.month())
            && allowed(&self.weekday, at.weekday().num_days_from_sunday())
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for RecurrenceRule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_field(field: &str, bounds: FieldBounds) -> Result<FieldValues, String> {
    if field == "*" {
        return Ok(None);
    }

    let mut values = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("{}: invalid step '{}'", bounds.name, step))?;
                if step == 0 {
                    return Err(format!("{}: step must be positive", bounds.name));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (bounds.min, bounds.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, bounds)?, parse_value(b, bounds)?)
        } else {
            let value = parse_value(range, bounds)?;
            // `a/n` runs from a to the top of the field
            (value, if step.is_some() { bounds.max } else { value })
        };

        if start > end {
            return Err(format!("{}: range {}-{} is reversed", bounds.name, start, end));
        }

        values.extend((start..=end).step_by(step.unwrap_or(1) as usize));
    }

    Ok(Some(values))
}

fn parse_value(value: &str, bounds: FieldBounds) -> Result<u32, String> {
    let parsed: u32 = value
        .trim()
        .parse()
        .map_err(|_| format!("{}: '{}' is not a number", bounds.name, value))?;
    if parsed < bounds.min || parsed > bounds.max {
        return Err(format!(
            "{}: {} outside {}-{}",
            bounds.name, parsed, bounds.min, bounds.max
        ));
    }
    Ok(parsed)
}

fn render_numeric(field: &FieldValues) -> String {
    match field {
        None => "*".to_string(),
        Some(values) => values
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn render_weekdays(field: &FieldValues) -> String {
    match field {
        None => "*".to_string(),
        Some(values) => values
            .iter()
            .map(|d| WEEKDAY_NAMES[*d as usize])
            .collect::<Vec<_>>()
            .join(","),
    }
}
