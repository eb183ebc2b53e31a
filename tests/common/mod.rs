#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use radio_recorder::config::DatabaseConfig;
use radio_recorder::database::Database;
use radio_recorder::errors::{CaptureError, CaptureResult, DeliveryError, DeliveryResult};
use radio_recorder::models::*;
use radio_recorder::recorder::{CaptureBackend, DurationProbe, ExecutorSettings, RecordingExecutor};
use radio_recorder::services::{LocalCopier, Notifier, PostProcessor, RemoteUploader};

/// Fake audio is this many bytes per captured second
pub const BYTES_PER_SECOND: u64 = 100;

pub struct TestEnv {
    pub dir: TempDir,
    pub database: Database,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("recorder.db").display());
        let database = Database::new(&DatabaseConfig {
            url,
            max_connections: Some(4),
        })
        .await
        .unwrap();
        database.migrate().await.unwrap();
        Self { dir, database }
    }

    pub fn recordings_path(&self) -> PathBuf {
        self.dir.path().join("recordings")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.recordings_path().join(name)
    }
}

pub fn settings() -> ExecutorSettings {
    ExecutorSettings {
        max_attempts: 3,
        retry_backoff: Duration::from_millis(5),
        max_error_length: 500,
        default_extension: ".mp3".to_string(),
        timezone: Tz::UTC,
    }
}

pub fn job(output: &Path, start_time: DateTime<Utc>, duration_seconds: i64) -> RecordingJob {
    let now = Utc::now();
    RecordingJob {
        id: Uuid::new_v4(),
        station_id: None,
        station_name: "KEXP".to_string(),
        stream_url: "http://radio.example/live".to_string(),
        start_time,
        duration_seconds,
        output_file: output.display().to_string(),
        status: RecordingStatus::Scheduled,
        recurrence: None,
        recurrence_preset: None,
        template_id: None,
        podcast_group: None,
        max_episodes: 0,
        actual_start_time: None,
        end_time: None,
        file_size: None,
        error: None,
        attempts: 0,
        delivery: RecordingDelivery::default(),
        podcast: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn template(output: &Path, rule: &str, max_episodes: i64) -> RecordingJob {
    let mut template = job(output, Utc::now(), 60);
    template.recurrence = Some(rule.to_string());
    template.podcast_group = Some("01HZXTEMPLATEGROUP".to_string());
    template.max_episodes = max_episodes;
    template.podcast = Some(PodcastInfo::for_station("KEXP"));
    template
}

pub async fn write_audio(path: &Path, seconds: u64) {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(path, vec![0u8; (seconds * BYTES_PER_SECOND) as usize])
        .await
        .unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureCall {
    pub url: String,
    pub output: PathBuf,
    pub seconds: u64,
}

/// Capture backend that writes fake audio instead of running ffmpeg
#[derive(Default)]
pub struct FakeCapture {
    pub calls: Mutex<Vec<CaptureCall>>,
    pub failures_remaining: AtomicUsize,
    pub fail_concat: bool,
    /// Fraction of the requested duration actually written (1.0 when unset)
    pub write_ratio: Option<f64>,
}

impl FakeCapture {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(times),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<CaptureCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureBackend for FakeCapture {
    async fn capture(&self, stream_url: &str, output: &Path, duration_seconds: u64) -> CaptureResult<()> {
        self.calls.lock().unwrap().push(CaptureCall {
            url: stream_url.to_string(),
            output: output.to_path_buf(),
            seconds: duration_seconds,
        });

        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CaptureError::ExitStatus {
                command: "ffmpeg".to_string(),
                code: Some(1),
                stderr: "Connection refused".to_string(),
            });
        }

        let seconds = (duration_seconds as f64 * self.write_ratio.unwrap_or(1.0)) as u64;
        write_audio(output, seconds).await;
        Ok(())
    }

    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> CaptureResult<()> {
        if self.fail_concat {
            return Err(CaptureError::Concat {
                message: "Invalid data found when processing input".to_string(),
            });
        }
        let mut joined = tokio::fs::read(first).await?;
        joined.extend(tokio::fs::read(second).await?);
        tokio::fs::write(output, joined).await?;
        Ok(())
    }
}

/// Duration probe derived from file size
pub struct FakeProbe;

#[async_trait]
impl DurationProbe for FakeProbe {
    async fn duration_seconds(&self, path: &Path) -> CaptureResult<f64> {
        let len = tokio::fs::metadata(path).await?.len();
        Ok(len as f64 / BYTES_PER_SECOND as f64)
    }
}

#[derive(Default)]
pub struct FakeUploader {
    pub uploads: Mutex<Vec<String>>,
    pub fail: bool,
}

#[async_trait]
impl RemoteUploader for FakeUploader {
    async fn upload(&self, _local: &Path, remote_name: &str) -> DeliveryResult<String> {
        if self.fail {
            return Err(DeliveryError::UploadStatus {
                target: format!("https://dav.example/{remote_name}"),
                status: 507,
            });
        }
        self.uploads.lock().unwrap().push(remote_name.to_string());
        Ok(format!("https://dav.example/{remote_name}"))
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub messages: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, title: &str, message: &str) -> DeliveryResult<()> {
        self.messages
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        Ok(())
    }
}

pub fn post_processor(database: &Database) -> Arc<PostProcessor> {
    Arc::new(PostProcessor::new(database.clone(), None, None, None))
}

pub fn post_processor_with(
    database: &Database,
    copier: Option<LocalCopier>,
    uploader: Option<Arc<dyn RemoteUploader>>,
    notifier: Option<Arc<dyn Notifier>>,
) -> Arc<PostProcessor> {
    Arc::new(PostProcessor::new(database.clone(), copier, uploader, notifier))
}

pub fn executor(env: &TestEnv, capture: Arc<FakeCapture>) -> RecordingExecutor {
    RecordingExecutor::new(
        env.database.clone(),
        capture,
        Arc::new(FakeProbe),
        post_processor(&env.database),
        settings(),
    )
}
