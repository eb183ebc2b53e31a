//! Recovery watchdog.
//!
//! Periodically reconciles the job table against the filesystem. Jobs
//! left `in_progress` past their expected end (for example after a crash)
//! are finalized from what was actually captured, or requeued for the
//! missing remainder. Scheduled one-shots that lost their trigger are
//! failed once they are well overdue.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::delivery::PostProcessor;
use crate::config::WatchdogConfig;
use crate::database::{recordings, Database};
use crate::errors::AppResult;
use crate::models::{RecordingJob, RecordingStatus};
use crate::recorder::probe::{probe_or_zero, DurationProbe};
use crate::scheduler::{RecurrenceRule, Scheduler, Trigger};

/// What a sweep decided for one stuck `in_progress` job
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    /// Still inside its expected window plus grace
    StillRunning,
    Complete,
    Requeue { remaining_seconds: i64 },
    Fail { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchdogReport {
    pub completed: Vec<Uuid>,
    pub requeued: Vec<Uuid>,
    pub failed: Vec<Uuid>,
    /// Templates whose missing trigger was registered again
    pub rearmed: Vec<Uuid>,
    pub skipped: usize,
    pub errors: usize,
}

impl WatchdogReport {
    pub fn changed(&self) -> usize {
        self.completed.len() + self.requeued.len() + self.failed.len() + self.rearmed.len()
    }
}

/// Whether `now` is still inside the job's expected end plus grace
fn within_grace(expected_end: DateTime<Utc>, now: DateTime<Utc>, config: &WatchdogConfig) -> bool {
    TimeDelta::try_seconds(config.grace_seconds as i64)
        .and_then(|grace| expected_end.checked_add_signed(grace))
        .map_or(true, |deadline| now <= deadline)
}

/// Decide the fate of an `in_progress` job from what is on disk
pub fn assess(
    job: &RecordingJob,
    now: DateTime<Utc>,
    file_bytes: u64,
    recorded_seconds: f64,
    config: &WatchdogConfig,
) -> Assessment {
    let Some(expected_end) = job.expected_end() else {
        return Assessment::Fail {
            reason: "recording never recorded an actual start time".to_string(),
        };
    };

    if within_grace(expected_end, now, config) {
        return Assessment::StillRunning;
    }

    let requested = job.duration_seconds as f64;
    if recorded_seconds >= requested * config.completion_ratio || file_bytes >= config.completion_min_bytes {
        return Assessment::Complete;
    }

    let remaining_seconds = (requested - recorded_seconds).floor() as i64;
    if remaining_seconds > config.min_remaining_seconds {
        return Assessment::Requeue { remaining_seconds };
    }

    if file_bytes > 0 {
        Assessment::Complete
    } else {
        Assessment::Fail {
            reason: "recording was interrupted and no audio was captured".to_string(),
        }
    }
}

pub struct RecoveryWatchdog {
    database: Database,
    scheduler: Scheduler,
    probe: Arc<dyn DurationProbe>,
    post_processor: Arc<PostProcessor>,
    config: WatchdogConfig,
}

impl RecoveryWatchdog {
    pub fn new(
        database: Database,
        scheduler: Scheduler,
        probe: Arc<dyn DurationProbe>,
        post_processor: Arc<PostProcessor>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            database,
            scheduler,
            probe,
            post_processor,
            config,
        }
    }

    /// Sweep on the configured interval until cancelled; the first sweep runs immediately
    pub async fn run(&self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        info!(
            "Starting recovery watchdog (every {:?}, grace {}s)",
            self.config.interval(),
            self.config.grace_seconds
        );
        let mut ticker = interval(self.config.interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(report) if report.changed() > 0 || report.errors > 0 => info!(
                            "Watchdog sweep: {} completed, {} requeued, {} failed, {} rearmed, {} errors",
                            report.completed.len(),
                            report.requeued.len(),
                            report.failed.len(),
                            report.rearmed.len(),
                            report.errors
                        ),
                        Ok(report) => debug!("Watchdog sweep found nothing to fix ({} skipped)", report.skipped),
                        Err(e) => error!("Watchdog sweep failed: {}", e),
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Recovery watchdog received cancellation signal, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<WatchdogReport> {
        let mut report = WatchdogReport::default();

        for job in self
            .database
            .list_recordings_by_status(RecordingStatus::InProgress)
            .await?
        {
            if let Err(e) = self.recover_in_progress(&job, now, &mut report).await {
                error!("Watchdog could not recover job {} ({}): {}", job.id, job.station_name, e);
                report.errors += 1;
            }
        }

        for job in self
            .database
            .list_recordings_by_status(RecordingStatus::Scheduled)
            .await?
        {
            if let Err(e) = self.check_scheduled(&job, now, &mut report).await {
                error!("Watchdog could not check job {} ({}): {}", job.id, job.station_name, e);
                report.errors += 1;
            }
        }

        Ok(report)
    }

    async fn recover_in_progress(
        &self,
        job: &RecordingJob,
        now: DateTime<Utc>,
        report: &mut WatchdogReport,
    ) -> AppResult<()> {
        // cheap check before touching the file
        if let Some(expected_end) = job.expected_end() {
            if within_grace(expected_end, now, &self.config) {
                report.skipped += 1;
                return Ok(());
            }
        }

        let output = job.output_path();
        let file_bytes = tokio::fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);
        let recorded = if file_bytes > 0 {
            probe_or_zero(self.probe.as_ref(), &output).await
        } else {
            0.0
        };

        let assessment = assess(job, now, file_bytes, recorded, &self.config);
        let mut tx = self.database.begin().await?;

        match assessment {
            Assessment::StillRunning => {
                report.skipped += 1;
                return Ok(());
            }
            Assessment::Complete => {
                if recordings::mark_completed(&mut *tx, job.id, now, file_bytes as i64).await? {
                    tx.commit().await?;
                    info!(
                        "Watchdog finalized job {} ({}) as completed: {:.0}s of {}s, {} bytes",
                        job.id, job.station_name, recorded, job.duration_seconds, file_bytes
                    );
                    report.completed.push(job.id);
                    if let Some(completed) = self.database.get_recording(job.id).await? {
                        self.post_processor.process(&completed).await;
                    }
                }
            }
            Assessment::Requeue { remaining_seconds } => {
                if recordings::requeue(&mut *tx, job.id, now).await? {
                    // commit first so the firing sees the row as scheduled
                    tx.commit().await?;
                    self.scheduler.schedule_at(job.id, Trigger::one_shot(now), now).await?;
                    warn!(
                        "Watchdog requeued job {} ({}): {}s still missing",
                        job.id, job.station_name, remaining_seconds
                    );
                    report.requeued.push(job.id);
                }
            }
            Assessment::Fail { reason } => {
                if recordings::mark_failed(&mut *tx, job.id, now, &reason).await? {
                    tx.commit().await?;
                    warn!("Watchdog failed job {} ({}): {}", job.id, job.station_name, reason);
                    report.failed.push(job.id);
                }
            }
        }

        Ok(())
    }

    async fn check_scheduled(
        &self,
        job: &RecordingJob,
        now: DateTime<Utc>,
        report: &mut WatchdogReport,
    ) -> AppResult<()> {
        if self.scheduler.has_trigger(job.id).await {
            return Ok(());
        }

        if let Some(rule) = &job.recurrence {
            let rule = RecurrenceRule::parse(rule)?;
            let next = self.scheduler.schedule_at(job.id, Trigger::recurring(rule), now).await?;
            warn!(
                "Template {} ({}) had no trigger, rearmed for {}",
                job.id, job.station_name, next
            );
            report.rearmed.push(job.id);
            return Ok(());
        }

        let overdue_by = now - job.start_time;
        let allowance = TimeDelta::try_seconds(self.config.overdue_seconds);
        if allowance.map_or(true, |allowance| overdue_by <= allowance) {
            return Ok(());
        }

        let reason = format!(
            "missed scheduled start at {} (no trigger registered)",
            job.start_time.to_rfc3339()
        );
        let mut tx = self.database.begin().await?;
        if recordings::mark_failed(&mut *tx, job.id, now, &reason).await? {
            tx.commit().await?;
            warn!("Watchdog failed overdue job {} ({}): {}", job.id, job.station_name, reason);
            report.failed.push(job.id);
        }
        Ok(())
    }
}
