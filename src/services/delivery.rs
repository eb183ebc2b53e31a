//! Post-processing after a capture completes: retention pruning, secondary
//! copy, remote upload and completion notification.
//!
//! Each step records its own delivery sub-status. None of them can move a
//! completed recording back to `failed`.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retention::RetentionService;
use crate::config::{DeliveryConfig, NotificationConfig, WebDavConfig};
use crate::database::Database;
use crate::errors::{DeliveryError, DeliveryResult};
use crate::models::{DeliveryKind, DeliveryStatus, RecordingJob};

/// Copies finished recordings into a secondary local directory
#[derive(Debug, Clone)]
pub struct LocalCopier {
    destination: PathBuf,
}

impl LocalCopier {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub async fn copy(&self, source: &Path) -> DeliveryResult<PathBuf> {
        let copy_error = |message: String| DeliveryError::Copy {
            destination: self.destination.display().to_string(),
            message,
        };

        let file_name = source
            .file_name()
            .ok_or_else(|| copy_error(format!("{} has no file name", source.display())))?;
        tokio::fs::create_dir_all(&self.destination)
            .await
            .map_err(|e| copy_error(e.to_string()))?;

        let target = self.destination.join(file_name);
        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| copy_error(e.to_string()))?;
        Ok(target)
    }
}

/// Pushes a local file to a remote store, creating remote directories as needed
#[async_trait]
pub trait RemoteUploader: Send + Sync {
    /// Returns the remote location of the uploaded file
    async fn upload(&self, local: &Path, remote_name: &str) -> DeliveryResult<String>;
}

/// Sends a short completion message to the configured endpoint
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> DeliveryResult<()>;
}

pub struct WebDavUploader {
    client: Client,
    base_url: String,
    remote_path: String,
    username: Option<String>,
    password: Option<String>,
}

impl WebDavUploader {
    pub fn new(config: &WebDavConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .user_agent(concat!("radio-recorder/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            remote_path: config.remote_path.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, url);
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }

    /// `MKCOL` every directory level; 405 means it already exists
    async fn ensure_directories(&self, directories: &[String]) -> DeliveryResult<()> {
        let mkcol = Method::from_bytes(b"MKCOL").map_err(|_| DeliveryError::NotConfigured {
            target: "WebDAV MKCOL method".to_string(),
        })?;

        let mut url = self.base_url.clone();
        for directory in directories {
            url = format!("{}/{}", url, urlencoding::encode(directory));
            let response = self.request(mkcol.clone(), &format!("{url}/")).send().await?;
            let status = response.status();
            if !(status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED) {
                return Err(DeliveryError::UploadStatus {
                    target: url,
                    status: status.as_u16(),
                });
            }
            debug!("MKCOL {} -> {}", url, status);
        }
        Ok(())
    }
}

/// Split a remote directory path into non-empty segments
fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl RemoteUploader for WebDavUploader {
    async fn upload(&self, local: &Path, remote_name: &str) -> DeliveryResult<String> {
        let directories = path_segments(&self.remote_path);
        self.ensure_directories(&directories).await?;

        let mut url = self.base_url.clone();
        for segment in directories.iter().map(String::as_str).chain([remote_name]) {
            url = format!("{}/{}", url, urlencoding::encode(segment));
        }

        let file = tokio::fs::File::open(local).await?;
        let response = self.request(Method::PUT, &url).body(file).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::UploadStatus {
                target: url,
                status: status.as_u16(),
            });
        }
        Ok(url)
    }
}

pub struct HttpNotifier {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            url: url.into(),
            token,
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, title: &str, message: &str) -> DeliveryResult<()> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Title", title)
            .body(message.to_string());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let status = request.send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::NotifyStatus {
                status: status.as_u16(),
            })
        }
    }
}

/// Runs every post-completion step for a recording
pub struct PostProcessor {
    database: Database,
    retention: RetentionService,
    copier: Option<LocalCopier>,
    uploader: Option<Arc<dyn RemoteUploader>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl PostProcessor {
    pub fn new(
        database: Database,
        copier: Option<LocalCopier>,
        uploader: Option<Arc<dyn RemoteUploader>>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            retention: RetentionService::new(database.clone()),
            database,
            copier,
            uploader,
            notifier,
        }
    }

    pub fn from_config(database: Database, delivery: &DeliveryConfig, notifications: &NotificationConfig) -> Self {
        let copier = delivery.copy_path.as_ref().map(LocalCopier::new);
        let uploader = delivery
            .webdav
            .as_ref()
            .map(|config| Arc::new(WebDavUploader::new(config)) as Arc<dyn RemoteUploader>);
        let notifier = notifications.url.as_ref().map(|url| {
            Arc::new(HttpNotifier::new(url.clone(), notifications.token.clone())) as Arc<dyn Notifier>
        });
        Self::new(database, copier, uploader, notifier)
    }

    pub async fn process(&self, job: &RecordingJob) {
        self.apply_retention(job).await;

        if job.delivery.copy.enabled {
            let outcome = match &self.copier {
                Some(copier) => copier
                    .copy(&job.output_path())
                    .await
                    .map(|target| format!("copied to {}", target.display())),
                None => Err(DeliveryError::NotConfigured {
                    target: "delivery.copy_path".to_string(),
                }),
            };
            self.record(job, DeliveryKind::Copy, outcome).await;
        }

        if job.delivery.upload.enabled {
            let outcome = match &self.uploader {
                Some(uploader) => {
                    let remote_name = job
                        .output_path()
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| job.id.to_string());
                    uploader
                        .upload(&job.output_path(), &remote_name)
                        .await
                        .map(|url| format!("uploaded to {url}"))
                }
                None => Err(DeliveryError::NotConfigured {
                    target: "delivery.webdav".to_string(),
                }),
            };
            self.record(job, DeliveryKind::Upload, outcome).await;
        }

        if job.delivery.notify.enabled {
            let outcome = match &self.notifier {
                Some(notifier) => {
                    let (title, message) = completion_message(job);
                    notifier
                        .notify(&title, &message)
                        .await
                        .map(|()| "notification sent".to_string())
                }
                None => Err(DeliveryError::NotConfigured {
                    target: "notifications.url".to_string(),
                }),
            };
            self.record(job, DeliveryKind::Notify, outcome).await;
        }
    }

    async fn apply_retention(&self, job: &RecordingJob) {
        let Some(template_id) = job.template_id else {
            return;
        };

        let template = match self.database.get_recording(template_id).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                debug!("Template {} of episode {} is gone, skipping retention", template_id, job.id);
                return;
            }
            Err(e) => {
                warn!("Could not load template {} for retention: {}", template_id, e);
                return;
            }
        };

        let max_keep = template.max_episodes.max(0) as usize;
        if let Err(e) = self.retention.prune(template_id, max_keep).await {
            warn!("Retention for template {} failed: {}", template_id, e);
        }
    }

    async fn record(&self, job: &RecordingJob, kind: DeliveryKind, outcome: DeliveryResult<String>) {
        let (status, message) = match outcome {
            Ok(message) => {
                info!("{:?} delivery for job {} succeeded: {}", kind, job.id, message);
                (DeliveryStatus::Success, message)
            }
            Err(e) => {
                warn!("{:?} delivery for job {} failed: {}", kind, job.id, e);
                (DeliveryStatus::Failed, e.to_string())
            }
        };

        if let Err(e) = self
            .database
            .set_delivery_status(job.id, kind, status, Some(&message))
            .await
        {
            warn!("Failed to persist {:?} delivery status for job {}: {}", kind, job.id, e);
        }
    }
}

fn completion_message(job: &RecordingJob) -> (String, String) {
    let title = format!("Recording completed: {}", job.station_name);
    let file_name = job
        .output_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| job.output_file.clone());
    let size_mb = job.file_size.unwrap_or(0) as f64 / (1024.0 * 1024.0);
    let message = format!(
        "{} finished recording {} ({:.1} MB, {} min)",
        job.station_name,
        file_name,
        size_mb,
        job.duration_seconds / 60
    );
    (title, message)
}
