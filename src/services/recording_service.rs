//! Request boundary for stations and recordings.
//!
//! Validates requests before anything is persisted, keeps the job table
//! and the scheduler's trigger table in step, and builds the listing
//! views served by the API.

use chrono::{DateTime, TimeDelta, Utc};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use ulid::Ulid;
use url::Url;
use uuid::Uuid;

use crate::config::{RecorderConfig, StorageConfig};
use crate::database::Database;
use crate::errors::{AppError, AppResult, ScheduleError};
use crate::models::*;
use crate::recorder::naming;
use crate::scheduler::{RecurrenceRule, Scheduler, Trigger};

const DEFAULT_STATIONS: [(&str, &str); 3] = [
    ("BBC Radio 1", "https://stream.live.vc.bbcmedia.co.uk/bbc_radio_one"),
    ("Classical Music", "https://live.musopen.org:8085/streamvbr0"),
    ("Jazz 24", "https://live.wostreaming.net/direct/ppm-jazz24aac-ibc1"),
];

/// Reject anything that is not an absolute http(s) URL
pub fn validate_stream_url(raw: &str) -> Result<Url, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidStreamUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

#[derive(Clone)]
pub struct RecordingService {
    database: Database,
    scheduler: Scheduler,
    recordings_path: PathBuf,
    default_extension: String,
    max_duration_seconds: i64,
}

impl RecordingService {
    pub fn new(database: Database, scheduler: Scheduler, storage: &StorageConfig, recorder: &RecorderConfig) -> Self {
        Self {
            database,
            scheduler,
            recordings_path: storage.recordings_path.clone(),
            default_extension: storage.default_extension.clone(),
            max_duration_seconds: recorder.max_duration_seconds,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn create_station(&self, request: StationCreateRequest) -> AppResult<Station> {
        if request.name.trim().is_empty() {
            return Err(AppError::validation("station name must not be empty"));
        }
        validate_stream_url(&request.url)?;

        let station = self.database.create_station(&request).await?;
        info!("Created station {} ({})", station.name, station.id);
        Ok(station)
    }

    pub async fn list_stations(&self) -> AppResult<Vec<Station>> {
        self.database.list_stations().await
    }

    pub async fn delete_station(&self, id: Uuid) -> AppResult<()> {
        if !self.database.delete_station(id).await? {
            return Err(AppError::not_found("Station", id));
        }
        info!("Deleted station {}", id);
        Ok(())
    }

    /// Add the stock stations when the table is empty; returns how many were added
    pub async fn seed_default_stations(&self) -> AppResult<usize> {
        if !self.database.list_stations().await?.is_empty() {
            return Ok(0);
        }
        for (name, url) in DEFAULT_STATIONS {
            self.database
                .create_station(&StationCreateRequest {
                    name: name.to_string(),
                    url: url.to_string(),
                })
                .await?;
        }
        info!("Seeded {} default stations", DEFAULT_STATIONS.len());
        Ok(DEFAULT_STATIONS.len())
    }

    /// Persist a recording request and register its trigger.
    ///
    /// Every validation runs before the row is written. If the trigger
    /// cannot be registered the row is removed again, so a `scheduled` job
    /// always has a live trigger.
    pub async fn schedule_recording(&self, request: ScheduleRecordingRequest) -> AppResult<RecordingView> {
        let station = self
            .database
            .get_station(request.station_id)
            .await?
            .ok_or_else(|| ScheduleError::MissingStation {
                station_id: request.station_id.to_string(),
            })?;
        validate_stream_url(&station.url)?;

        let invalid_duration = ScheduleError::InvalidDuration {
            seconds: request.duration_seconds,
        };
        if request.duration_seconds <= 0 || request.duration_seconds > self.max_duration_seconds {
            return Err(invalid_duration.into());
        }
        if request.max_episodes < 0 {
            return Err(AppError::validation("max_episodes must not be negative"));
        }

        let now = Utc::now();
        let rule = self.resolve_rule(&request)?;
        let trigger = match &rule {
            Some(rule) => {
                if rule.next_after(now, self.scheduler.timezone()).is_none() {
                    return Err(ScheduleError::NoUpcomingFireTime {
                        rule: rule.to_string(),
                    }
                    .into());
                }
                Trigger::recurring(rule.clone())
            }
            None => {
                let window_end = TimeDelta::try_seconds(request.duration_seconds)
                    .and_then(|duration| request.start_time.checked_add_signed(duration))
                    .ok_or(invalid_duration)?;
                if window_end <= now {
                    return Err(ScheduleError::WindowClosed {
                        window_end: window_end.to_rfc3339(),
                    }
                    .into());
                }
                Trigger::one_shot(request.start_time)
            }
        };

        let base = naming::one_shot_path(
            &self.recordings_path,
            &station.name,
            &request.start_time.with_timezone(&self.scheduler.timezone()),
            &self.default_extension,
        );
        let output_file = naming::unclaimed_path(&self.database, &base)
            .await?
            .display()
            .to_string();

        let recurring = rule.is_some();
        let job = RecordingJob {
            id: Uuid::new_v4(),
            station_id: Some(station.id),
            station_name: station.name.clone(),
            stream_url: station.url.clone(),
            start_time: request.start_time,
            duration_seconds: request.duration_seconds,
            output_file,
            status: RecordingStatus::Scheduled,
            recurrence: rule.as_ref().map(|r| r.as_str().to_string()),
            recurrence_preset: if recurring { request.preset } else { None },
            template_id: None,
            podcast_group: recurring.then(|| Ulid::new().to_string()),
            max_episodes: if recurring { request.max_episodes } else { 0 },
            actual_start_time: None,
            end_time: None,
            file_size: None,
            error: None,
            attempts: 0,
            delivery: RecordingDelivery::from_flags(
                request.copy_to_secondary,
                request.upload_remote,
                request.notify,
            ),
            podcast: match request.podcast {
                Some(podcast) => Some(podcast),
                None if recurring => Some(PodcastInfo::for_station(&station.name)),
                None => None,
            },
            created_at: now,
            updated_at: now,
        };

        self.database.insert_recording(&job).await?;

        let next_run_time = match self.scheduler.schedule(job.id, trigger).await {
            Ok(next) => next,
            Err(e) => {
                if let Err(cleanup) = self.database.delete_recording(job.id).await {
                    warn!("Failed to remove unscheduled job {}: {}", job.id, cleanup);
                }
                return Err(e.into());
            }
        };

        info!(
            "Scheduled {} recording {} of {} at {} for {}s",
            if recurring { "recurring" } else { "one-shot" },
            job.id,
            job.station_name,
            next_run_time,
            job.duration_seconds
        );

        Ok(RecordingView {
            job,
            next_run_time: Some(next_run_time),
            file_missing: false,
        })
    }

    /// Explicit rule first, then a non-`once` preset anchored on the start time
    fn resolve_rule(&self, request: &ScheduleRecordingRequest) -> Result<Option<RecurrenceRule>, ScheduleError> {
        if let Some(rule) = request.recurrence.as_deref().map(str::trim) {
            if !rule.is_empty() {
                return RecurrenceRule::parse(rule).map(Some);
            }
        }

        match request.preset {
            None | Some(RecurrencePreset::Once) => Ok(None),
            Some(preset) => RecurrenceRule::from_preset(preset, request.start_time, self.scheduler.timezone())
                .map(Some)
                .ok_or_else(|| ScheduleError::MalformedRule {
                    rule: preset.as_str().to_string(),
                    reason: "preset did not produce a valid rule".to_string(),
                }),
        }
    }

    /// Register the trigger of a `scheduled` job again, replacing any existing one
    pub async fn reschedule(&self, id: Uuid) -> AppResult<DateTime<Utc>> {
        let job = self.require(id).await?;
        if job.status != RecordingStatus::Scheduled {
            return Err(AppError::validation(format!(
                "recording {} is {}, only scheduled recordings can be rescheduled",
                id, job.status
            )));
        }

        let trigger = match &job.recurrence {
            Some(rule) => Trigger::recurring(RecurrenceRule::parse(rule)?),
            None => {
                if job.window_end() <= Utc::now() {
                    return Err(ScheduleError::WindowClosed {
                        window_end: job.window_end().to_rfc3339(),
                    }
                    .into());
                }
                Trigger::one_shot(job.start_time)
            }
        };

        Ok(self.scheduler.schedule(id, trigger).await?)
    }

    /// Cancel the trigger, remove the record, then remove the artifact.
    ///
    /// Templates have no artifact of their own; their episodes are kept.
    pub async fn delete_recording(&self, id: Uuid) -> AppResult<()> {
        let job = self.require(id).await?;

        self.scheduler.cancel(id).await;
        if !self.database.delete_recording(id).await? {
            return Err(AppError::not_found("Recording", id));
        }

        if !job.is_template() {
            match tokio::fs::remove_file(job.output_path()).await {
                Ok(()) => debug!("Removed {}", job.output_file),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Recording {} deleted but {} remains: {}", id, job.output_file, e),
            }
        }

        info!("Deleted recording {} ({})", id, job.station_name);
        Ok(())
    }

    pub async fn get_recording(&self, id: Uuid) -> AppResult<RecordingView> {
        let job = self.require(id).await?;
        let next_run_time = self.scheduler.next_fire_time(id).await;
        Ok(self.view(job, next_run_time).await)
    }

    /// Pending jobs (including templates) and finished ones
    pub async fn list_recordings(&self) -> AppResult<RecordingListResponse> {
        let next_fire_times = self.scheduler.next_fire_times().await;
        let mut upcoming = Vec::new();
        let mut past = Vec::new();

        for job in self.database.list_recordings().await? {
            let next_run_time = next_fire_times.get(&job.id).copied();
            let terminal = job.status.is_terminal();
            let view = self.view(job, next_run_time).await;
            if terminal {
                past.push(view);
            } else {
                upcoming.push(view);
            }
        }

        upcoming.sort_by_key(|v| v.next_run_time.unwrap_or(v.job.start_time));
        past.sort_by(|a, b| {
            let a = a.job.end_time.unwrap_or(a.job.start_time);
            let b = b.job.end_time.unwrap_or(b.job.start_time);
            b.cmp(&a)
        });

        Ok(RecordingListResponse { upcoming, past })
    }

    pub async fn stats(&self) -> AppResult<RecorderStats> {
        let counts = self.database.count_recordings_by_status().await?;
        let count = |status: RecordingStatus| counts.get(&status).copied().unwrap_or(0);

        Ok(RecorderStats {
            stations: self.database.list_stations().await?.len() as i64,
            recordings: counts.values().sum(),
            scheduled: count(RecordingStatus::Scheduled),
            in_progress: count(RecordingStatus::InProgress),
            completed: count(RecordingStatus::Completed),
            failed: count(RecordingStatus::Failed),
            live_triggers: self.scheduler.trigger_count().await,
        })
    }

    async fn require(&self, id: Uuid) -> AppResult<RecordingJob> {
        self.database
            .get_recording(id)
            .await?
            .ok_or_else(|| AppError::not_found("Recording", id))
    }

    async fn view(&self, job: RecordingJob, next_run_time: Option<DateTime<Utc>>) -> RecordingView {
        let file_missing = job.status == RecordingStatus::Completed
            && !tokio::fs::try_exists(job.output_path()).await.unwrap_or(false);
        RecordingView {
            job,
            next_run_time,
            file_missing,
        }
    }
}
