use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

pub mod requests;

pub use requests::*;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Station {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a recording job.
///
/// Transitions only move forward (`scheduled → in_progress → completed|failed`),
/// except for the watchdog's requeue of a stuck `in_progress` job back to
/// `scheduled`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Scheduled,
    InProgress,
    Completed,
    Failed,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Scheduled => "scheduled",
            RecordingStatus::InProgress => "in_progress",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordingStatus::Completed | RecordingStatus::Failed)
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(RecordingStatus::Scheduled),
            "in_progress" => Ok(RecordingStatus::InProgress),
            "completed" => Ok(RecordingStatus::Completed),
            "failed" => Ok(RecordingStatus::Failed),
            other => Err(format!("unknown recording status '{other}'")),
        }
    }
}

/// Outcome of a single post-processing step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "success" => Ok(DeliveryStatus::Success),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status '{other}'")),
        }
    }
}

/// Post-processing steps that carry their own sub-status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    Copy,
    Upload,
    Notify,
}

impl DeliveryKind {
    /// Column prefix in the recordings table
    pub fn column_prefix(&self) -> &'static str {
        match self {
            DeliveryKind::Copy => "copy",
            DeliveryKind::Upload => "upload",
            DeliveryKind::Notify => "notify",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryTarget {
    pub enabled: bool,
    pub status: Option<DeliveryStatus>,
    pub message: Option<String>,
}

impl DeliveryTarget {
    /// An enabled step starts out `pending`; a disabled one carries no status
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled,
            status: enabled.then_some(DeliveryStatus::Pending),
            message: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordingDelivery {
    pub copy: DeliveryTarget,
    pub upload: DeliveryTarget,
    pub notify: DeliveryTarget,
}

impl RecordingDelivery {
    pub fn from_flags(copy: bool, upload: bool, notify: bool) -> Self {
        Self {
            copy: DeliveryTarget::enabled(copy),
            upload: DeliveryTarget::enabled(upload),
            notify: DeliveryTarget::enabled(notify),
        }
    }
}

/// Feed metadata carried by recurring templates and copied onto each episode
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PodcastInfo {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub explicit: bool,
    pub image: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_category() -> String {
    "Music".to_string()
}

impl PodcastInfo {
    pub fn for_station(station_name: &str) -> Self {
        Self {
            title: format!("{station_name} Recordings"),
            description: format!("Recordings from {station_name}"),
            language: default_language(),
            category: default_category(),
            ..Default::default()
        }
    }
}

/// A persisted recording request: a one-shot capture, a recurring
/// template, or an episode spawned by a template firing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingJob {
    pub id: Uuid,
    pub station_id: Option<Uuid>,
    pub station_name: String,
    pub stream_url: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    /// For templates this is the path template (directory + extension)
    pub output_file: String,
    pub status: RecordingStatus,
    /// 5-field recurrence rule; present only on templates
    pub recurrence: Option<String>,
    pub recurrence_preset: Option<RecurrencePreset>,
    /// Set on episodes, pointing at the template that produced them
    pub template_id: Option<Uuid>,
    pub podcast_group: Option<String>,
    /// Maximum retained episodes for a template, 0 keeps everything
    pub max_episodes: i64,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub file_size: Option<i64>,
    pub error: Option<String>,
    pub attempts: i64,
    pub delivery: RecordingDelivery,
    pub podcast: Option<PodcastInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordingJob {
    pub fn is_template(&self) -> bool {
        self.recurrence.is_some()
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_file)
    }

    /// End of the capture window measured from the scheduled start
    pub fn window_end(&self) -> DateTime<Utc> {
        offset_by_seconds(self.start_time, self.duration_seconds)
    }

    /// When a running capture is expected to have finished
    pub fn expected_end(&self) -> Option<DateTime<Utc>> {
        self.actual_start_time
            .map(|started| offset_by_seconds(started, self.duration_seconds))
    }
}

/// `start + seconds`, saturating at the last representable instant
pub fn offset_by_seconds(start: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    TimeDelta::try_seconds(seconds)
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Convenience presets that expand into a recurrence rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecurrencePreset {
    Once,
    Daily,
    Weekly,
    Weekdays,
    Weekends,
    Monthly,
}

impl RecurrencePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePreset::Once => "once",
            RecurrencePreset::Daily => "daily",
            RecurrencePreset::Weekly => "weekly",
            RecurrencePreset::Weekdays => "weekdays",
            RecurrencePreset::Weekends => "weekends",
            RecurrencePreset::Monthly => "monthly",
        }
    }
}

impl FromStr for RecurrencePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(RecurrencePreset::Once),
            "daily" => Ok(RecurrencePreset::Daily),
            "weekly" => Ok(RecurrencePreset::Weekly),
            "weekdays" => Ok(RecurrencePreset::Weekdays),
            "weekends" => Ok(RecurrencePreset::Weekends),
            "monthly" => Ok(RecurrencePreset::Monthly),
            other => Err(format!("unknown recurrence preset '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            RecordingStatus::Scheduled,
            RecordingStatus::InProgress,
            RecordingStatus::Completed,
            RecordingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RecordingStatus>(), Ok(status));
        }
        // legacy capitalised values are accepted
        assert_eq!(
            "Completed".parse::<RecordingStatus>(),
            Ok(RecordingStatus::Completed)
        );
        assert!("missing".parse::<RecordingStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RecordingStatus::Completed.is_terminal());
        assert!(RecordingStatus::Failed.is_terminal());
        assert!(!RecordingStatus::Scheduled.is_terminal());
        assert!(!RecordingStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_enabled_delivery_starts_pending() {
        let delivery = RecordingDelivery::from_flags(true, false, true);
        assert_eq!(delivery.copy.status, Some(DeliveryStatus::Pending));
        assert_eq!(delivery.upload.status, None);
        assert!(!delivery.upload.enabled);
        assert_eq!(delivery.notify.status, Some(DeliveryStatus::Pending));
    }

    #[test]
    fn test_window_end_saturates_instead_of_overflowing() {
        let start = Utc::now();
        assert_eq!(offset_by_seconds(start, 90), start + TimeDelta::seconds(90));
        assert_eq!(offset_by_seconds(start, i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(offset_by_seconds(start, i64::MAX / 2), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_podcast_defaults_for_station() {
        let info = PodcastInfo::for_station("Jazz 24");
        assert_eq!(info.title, "Jazz 24 Recordings");
        assert_eq!(info.language, "en");
        assert_eq!(info.category, "Music");
        assert!(!info.explicit);
    }
}
