use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{PodcastInfo, RecordingJob, RecurrencePreset};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationCreateRequest {
    pub name: String,
    pub url: String,
}

/// A request to record a station once or on a recurring rule.
///
/// `recurrence` takes precedence over `preset`; a preset other than
/// `once` expands into a rule anchored on `start_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRecordingRequest {
    pub station_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    #[serde(default)]
    pub recurrence: Option<String>,
    #[serde(default)]
    pub preset: Option<RecurrencePreset>,
    #[serde(default)]
    pub max_episodes: i64,
    #[serde(default)]
    pub copy_to_secondary: bool,
    #[serde(default)]
    pub upload_remote: bool,
    #[serde(default)]
    pub notify: bool,
    #[serde(default)]
    pub podcast: Option<PodcastInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingView {
    #[serde(flatten)]
    pub job: RecordingJob,
    pub next_run_time: Option<DateTime<Utc>>,
    /// Completed recording whose artifact is gone from disk
    pub file_missing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingListResponse {
    pub upcoming: Vec<RecordingView>,
    pub past: Vec<RecordingView>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecorderStats {
    pub stations: i64,
    pub recordings: i64,
    pub scheduled: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub live_triggers: usize,
}
