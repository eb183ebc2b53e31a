use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::capture::CaptureBackend;
use super::naming;
use super::probe::{probe_or_zero, DurationProbe};
use crate::config::{RecorderConfig, StorageConfig};
use crate::database::Database;
use crate::errors::{AppResult, CaptureResult};
use crate::models::{RecordingDelivery, RecordingJob, RecordingStatus};
use crate::scheduler::TriggerHandler;
use crate::services::PostProcessor;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub max_error_length: usize,
    pub default_extension: String,
    pub timezone: Tz,
}

impl ExecutorSettings {
    pub fn new(recorder: &RecorderConfig, storage: &StorageConfig, timezone: Tz) -> Self {
        Self {
            max_attempts: recorder.max_attempts.max(1),
            retry_backoff: recorder.retry_backoff(),
            max_error_length: recorder.max_error_length,
            default_extension: storage.default_extension.clone(),
            timezone,
        }
    }
}

/// How a single attempt ended up capturing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePlan {
    /// Nothing on disk yet, capture the full duration
    Fresh { seconds: u64 },
    /// A partial file exists, capture only what is missing and join
    Resume { seconds: u64 },
    /// The partial file already covers the requested duration
    AlreadyComplete,
}

/// Decide what an attempt has to capture given what is already on disk
pub fn plan_capture(requested_seconds: i64, existing_bytes: u64, recorded_seconds: f64) -> CapturePlan {
    let requested = requested_seconds.max(0) as u64;
    if existing_bytes == 0 {
        return CapturePlan::Fresh { seconds: requested };
    }
    let remaining = (requested_seconds as f64 - recorded_seconds).floor();
    if remaining <= 0.0 {
        CapturePlan::AlreadyComplete
    } else {
        CapturePlan::Resume {
            seconds: remaining as u64,
        }
    }
}

/// Keep the last `max_chars` characters, where ffmpeg puts the actual cause
pub fn truncate_error(message: &str, max_chars: usize) -> String {
    let message = message.trim();
    let count = message.chars().count();
    if count <= max_chars {
        return message.to_string();
    }
    message.chars().skip(count - max_chars).collect()
}

/// Runs trigger firings: spawns episodes for templates, captures with
/// retry and resume, then persists the terminal status.
pub struct RecordingExecutor {
    database: Database,
    capture: Arc<dyn CaptureBackend>,
    probe: Arc<dyn DurationProbe>,
    post_processor: Arc<PostProcessor>,
    settings: ExecutorSettings,
}

impl RecordingExecutor {
    pub fn new(
        database: Database,
        capture: Arc<dyn CaptureBackend>,
        probe: Arc<dyn DurationProbe>,
        post_processor: Arc<PostProcessor>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            database,
            capture,
            probe,
            post_processor,
            settings,
        }
    }

    /// Execute whatever the job id refers to right now
    pub async fn execute(&self, job_id: Uuid, fired_at: DateTime<Utc>) -> AppResult<()> {
        let Some(job) = self.database.get_recording(job_id).await? else {
            warn!("Trigger fired for job {} which no longer exists", job_id);
            return Ok(());
        };

        if job.is_template() {
            let episode = self.create_episode(&job, fired_at).await?;
            info!(
                "Template {} ({}) spawned episode {} -> {}",
                job.id, job.station_name, episode.id, episode.output_file
            );
            return self.run(episode).await;
        }

        if job.status != RecordingStatus::Scheduled {
            warn!(
                "Skipping job {} ({}): status is {}, expected scheduled",
                job.id, job.station_name, job.status
            );
            return Ok(());
        }

        self.run(job).await
    }

    /// Persist a new episode record for one firing of a template
    pub async fn create_episode(&self, template: &RecordingJob, fired_at: DateTime<Utc>) -> AppResult<RecordingJob> {
        let output = self.unique_episode_path(template, fired_at).await?;
        let now = Utc::now();

        let episode = RecordingJob {
            id: Uuid::new_v4(),
            station_id: template.station_id,
            station_name: template.station_name.clone(),
            stream_url: template.stream_url.clone(),
            start_time: fired_at,
            duration_seconds: template.duration_seconds,
            output_file: output.display().to_string(),
            status: RecordingStatus::Scheduled,
            recurrence: None,
            recurrence_preset: None,
            template_id: Some(template.id),
            podcast_group: template.podcast_group.clone(),
            max_episodes: 0,
            actual_start_time: None,
            end_time: None,
            file_size: None,
            error: None,
            attempts: 0,
            delivery: RecordingDelivery::from_flags(
                template.delivery.copy.enabled,
                template.delivery.upload.enabled,
                template.delivery.notify.enabled,
            ),
            podcast: template.podcast.clone(),
            created_at: now,
            updated_at: now,
        };

        self.database.insert_recording(&episode).await?;
        Ok(episode)
    }

    /// Episode filename for the firing date, suffixed `-2`, `-3`, ... when
    /// an earlier firing on the same day already owns the name.
    async fn unique_episode_path(&self, template: &RecordingJob, fired_at: DateTime<Utc>) -> AppResult<PathBuf> {
        let base = naming::episode_path(
            &template.output_path(),
            &template.station_name,
            &fired_at.with_timezone(&self.settings.timezone),
            &self.settings.default_extension,
        );
        naming::unclaimed_path(&self.database, &base).await
    }

    async fn run(&self, job: RecordingJob) -> AppResult<()> {
        let output = job.output_path();
        let started_at = Utc::now();
        if !self
            .database
            .mark_in_progress(job.id, &job.output_file, started_at)
            .await?
        {
            info!("Job {} was claimed or removed before it could start", job.id);
            return Ok(());
        }

        info!(
            "Recording started: job {} ({}) for {}s -> {}",
            job.id,
            job.station_name,
            job.duration_seconds,
            output.display()
        );

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                let message = format!("cannot create {}: {}", parent.display(), e);
                self.finish_failed(&job, &message).await;
                return Ok(());
            }
        }

        match self.capture_with_retries(&job).await {
            Ok(()) => self.finish_completed(&job).await,
            Err(message) => self.finish_failed(&job, &message).await,
        }

        Ok(())
    }

    async fn capture_with_retries(&self, job: &RecordingJob) -> Result<(), String> {
        let mut last_error = String::new();

        for attempt in 1..=self.settings.max_attempts {
            let result = self.attempt(job).await;
            let error_text = result
                .as_ref()
                .err()
                .map(|e| truncate_error(&e.to_string(), self.settings.max_error_length));

            if let Err(e) = self
                .database
                .record_attempt(job.id, attempt as i64, error_text.as_deref())
                .await
            {
                warn!("Failed to persist attempt {} for job {}: {}", attempt, job.id, e);
            }

            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            last_error = error_text.unwrap_or_default();

            if !err.is_transient() {
                error!("Recording job {} cannot be retried: {}", job.id, err);
                break;
            }

            if attempt < self.settings.max_attempts {
                warn!(
                    "Recording attempt {}/{} for job {} failed: {}; retrying in {:?}",
                    attempt, self.settings.max_attempts, job.id, err, self.settings.retry_backoff
                );
                tokio::time::sleep(self.settings.retry_backoff).await;
            } else {
                warn!(
                    "Recording attempt {}/{} for job {} failed: {}",
                    attempt, self.settings.max_attempts, job.id, err
                );
            }
        }

        Err(last_error)
    }

    /// One capture attempt, re-planned from whatever is on disk
    async fn attempt(&self, job: &RecordingJob) -> CaptureResult<()> {
        let output = job.output_path();
        let existing_bytes = file_size(&output).await;
        let recorded = if existing_bytes > 0 {
            probe_or_zero(self.probe.as_ref(), &output).await
        } else {
            0.0
        };

        match plan_capture(job.duration_seconds, existing_bytes, recorded) {
            CapturePlan::Fresh { seconds } => {
                self.capture.capture(&job.stream_url, &output, seconds).await
            }
            CapturePlan::AlreadyComplete => {
                info!(
                    "Job {} already has {:.0}s of {}s on disk, nothing left to capture",
                    job.id, recorded, job.duration_seconds
                );
                Ok(())
            }
            CapturePlan::Resume { seconds } => {
                info!(
                    "Resuming job {}: {:.0}s on disk, capturing remaining {}s",
                    job.id, recorded, seconds
                );
                self.resume(job, &output, seconds).await
            }
        }
    }

    async fn resume(&self, job: &RecordingJob, output: &Path, seconds: u64) -> CaptureResult<()> {
        let segment = naming::resume_segment_path(output);
        if let Err(e) = self.capture.capture(&job.stream_url, &segment, seconds).await {
            remove_quietly(&segment).await;
            return Err(e);
        }

        let joined = naming::joined_path(output);
        if let Err(e) = self.capture.concat(output, &segment, &joined).await {
            remove_quietly(&joined).await;
            let part = naming::part_path(output);
            match tokio::fs::rename(&segment, &part).await {
                Ok(()) => warn!(
                    "Could not join resumed segment for job {}; kept it as {}",
                    job.id,
                    part.display()
                ),
                Err(rename_err) => warn!(
                    "Could not join or preserve resumed segment {} for job {}: {}",
                    segment.display(),
                    job.id,
                    rename_err
                ),
            }
            return Err(e);
        }

        tokio::fs::remove_file(output).await?;
        tokio::fs::rename(&joined, output).await?;
        remove_quietly(&segment).await;
        Ok(())
    }

    async fn finish_completed(&self, job: &RecordingJob) {
        let size = file_size(&job.output_path()).await as i64;
        let end_time = Utc::now();

        match self.database.mark_completed(job.id, end_time, size).await {
            Ok(true) => {
                info!(
                    "Recording completed: job {} ({}) {} bytes -> {}",
                    job.id, job.station_name, size, job.output_file
                );
            }
            Ok(false) => {
                warn!("Job {} left in_progress before completion could be recorded", job.id);
                return;
            }
            Err(e) => {
                error!("Failed to record completion of job {}: {}", job.id, e);
                self.finish_failed(job, &format!("failed to record completion: {e}"))
                    .await;
                return;
            }
        }

        match self.database.get_recording(job.id).await {
            Ok(Some(completed)) => self.post_processor.process(&completed).await,
            Ok(None) => debug!("Job {} deleted before post-processing", job.id),
            Err(e) => error!("Could not load job {} for post-processing: {}", job.id, e),
        }
    }

    async fn finish_failed(&self, job: &RecordingJob, message: &str) {
        let message = if message.is_empty() {
            "recording failed"
        } else {
            message
        };
        let message = truncate_error(message, self.settings.max_error_length);

        for _ in 0..2 {
            match self.database.mark_failed(job.id, Utc::now(), &message).await {
                Ok(updated) => {
                    if updated {
                        error!(
                            "Recording failed: job {} ({}): {}",
                            job.id, job.station_name, message
                        );
                    }
                    return;
                }
                Err(e) => error!("Failed to record failure of job {}: {}", job.id, e),
            }
        }
        error!(
            "Job {} may remain in_progress until the recovery watchdog sweeps it",
            job.id
        );
    }
}

#[async_trait]
impl TriggerHandler for RecordingExecutor {
    async fn fire(&self, job_id: Uuid, fired_at: DateTime<Utc>) -> AppResult<()> {
        self.execute(job_id, fired_at).await
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}
