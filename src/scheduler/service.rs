use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::recurrence::RecurrenceRule;
use super::trigger::Trigger;
use crate::config::SchedulerConfig;
use crate::database::Database;
use crate::errors::{AppResult, ScheduleError};
use crate::models::{RecordingJob, RecordingStatus};

/// Receives trigger firings. Implemented by the recording executor.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    /// Run the job to completion. Errors are expected to be persisted by
    /// the handler itself; anything returned here is only logged.
    async fn fire(&self, job_id: Uuid, fired_at: DateTime<Utc>) -> AppResult<()>;
}

#[derive(Debug, Clone)]
struct RegisteredTrigger {
    trigger: Trigger,
    next_fire: DateTime<Utc>,
}

/// A firing selected by [`Scheduler::take_due`]
#[derive(Debug, Clone, PartialEq)]
pub struct DueFiring {
    pub job_id: Uuid,
    pub fire_time: DateTime<Utc>,
    pub recurring: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreSummary {
    pub recurring: usize,
    pub one_shot: usize,
    /// One-shots whose capture window already closed
    pub expired: usize,
    pub invalid: usize,
}

/// In-memory trigger table with a polling loop.
///
/// Cloning yields another handle onto the same table.
#[derive(Clone)]
pub struct Scheduler {
    triggers: Arc<RwLock<HashMap<Uuid, RegisteredTrigger>>>,
    timezone: Tz,
    tick_interval: Duration,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> AppResult<Self> {
        Ok(Self::with_timezone(config.timezone()?, config.tick_interval()))
    }

    pub fn with_timezone(timezone: Tz, tick_interval: Duration) -> Self {
        Self {
            triggers: Arc::new(RwLock::new(HashMap::new())),
            timezone,
            tick_interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a trigger for `job_id`, replacing any existing one.
    ///
    /// Returns the first fire time.
    pub async fn schedule(&self, job_id: Uuid, trigger: Trigger) -> Result<DateTime<Utc>, ScheduleError> {
        self.schedule_at(job_id, trigger, Utc::now()).await
    }

    pub async fn schedule_at(
        &self,
        job_id: Uuid,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let next_fire = trigger.first_fire(now, self.timezone).ok_or_else(|| match &trigger {
            Trigger::Recurring { rule } => ScheduleError::NoUpcomingFireTime {
                rule: rule.to_string(),
            },
            Trigger::OneShot { at } => ScheduleError::WindowClosed {
                window_end: at.to_rfc3339(),
            },
        })?;

        let kind = trigger.kind();
        let replaced = self
            .triggers
            .write()
            .await
            .insert(job_id, RegisteredTrigger { trigger, next_fire })
            .is_some();

        debug!(
            "Registered {} trigger for job {} (next fire {}, replaced: {})",
            kind, job_id, next_fire, replaced
        );
        Ok(next_fire)
    }

    /// Remove the trigger for `job_id`; returns whether one existed
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let removed = self.triggers.write().await.remove(&job_id).is_some();
        if removed {
            debug!("Cancelled trigger for job {}", job_id);
        }
        removed
    }

    pub async fn has_trigger(&self, job_id: Uuid) -> bool {
        self.triggers.read().await.contains_key(&job_id)
    }

    pub async fn next_fire_time(&self, job_id: Uuid) -> Option<DateTime<Utc>> {
        self.triggers.read().await.get(&job_id).map(|t| t.next_fire)
    }

    pub async fn next_fire_times(&self) -> HashMap<Uuid, DateTime<Utc>> {
        self.triggers
            .read()
            .await
            .iter()
            .map(|(id, t)| (*id, t.next_fire))
            .collect()
    }

    pub async fn trigger_count(&self) -> usize {
        self.triggers.read().await.len()
    }

    /// Collect every trigger due at `now`.
    ///
    /// One-shots are removed. Recurring triggers are re-armed to their next
    /// fire time after `now`, so a tick that arrives late fires a missed
    /// occurrence once rather than once per missed match.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<DueFiring> {
        let mut triggers = self.triggers.write().await;
        let mut due = Vec::new();
        let mut retired = Vec::new();

        for (job_id, registered) in triggers.iter_mut() {
            if registered.next_fire > now {
                continue;
            }

            due.push(DueFiring {
                job_id: *job_id,
                fire_time: registered.next_fire,
                recurring: registered.trigger.is_recurring(),
            });

            match registered.trigger.rearm(now, self.timezone) {
                Some(next) => registered.next_fire = next,
                None => retired.push(*job_id),
            }
        }

        for job_id in retired {
            triggers.remove(&job_id);
        }

        due.sort_by_key(|firing| firing.fire_time);
        due
    }

    /// Tick until cancelled, spawning one task per due firing
    pub async fn run(
        &self,
        handler: Arc<dyn TriggerHandler>,
        cancellation_token: CancellationToken,
    ) -> anyhow::Result<()> {
        info!(
            "Starting recording scheduler ({} triggers, tick {:?}, timezone {})",
            self.trigger_count().await,
            self.tick_interval,
            self.timezone
        );
        self.running.store(true, Ordering::SeqCst);

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    trace!("Scheduler tick");
                    for firing in self.take_due(Utc::now()).await {
                        self.dispatch(firing, handler.clone());
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Scheduler received cancellation signal, shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Recording scheduler stopped");
        Ok(())
    }

    fn dispatch(&self, firing: DueFiring, handler: Arc<dyn TriggerHandler>) {
        info!(
            "Firing {} trigger for job {} (scheduled {})",
            if firing.recurring { "recurring" } else { "one-shot" },
            firing.job_id,
            firing.fire_time
        );
        tokio::spawn(async move {
            if let Err(e) = handler.fire(firing.job_id, firing.fire_time).await {
                error!("Trigger for job {} failed: {}", firing.job_id, e);
            }
        });
    }

    /// Rebuild triggers from every `scheduled` job in the store
    pub async fn restore(&self, database: &Database) -> AppResult<RestoreSummary> {
        let jobs = database
            .list_recordings_by_status(RecordingStatus::Scheduled)
            .await?;
        let now = Utc::now();
        let mut summary = RestoreSummary::default();

        for job in jobs {
            match self.restore_job(&job, now).await {
                Ok(Some(true)) => summary.recurring += 1,
                Ok(Some(false)) => summary.one_shot += 1,
                Ok(None) => {
                    debug!(
                        "Not restoring job {} ({}): window closed at {}",
                        job.id,
                        job.station_name,
                        job.window_end()
                    );
                    summary.expired += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to restore trigger for job {} ({}): {}",
                        job.id, job.station_name, e
                    );
                    summary.invalid += 1;
                }
            }
        }

        info!(
            "Restored triggers: {} recurring, {} one-shot, {} expired, {} invalid",
            summary.recurring, summary.one_shot, summary.expired, summary.invalid
        );
        Ok(summary)
    }

    /// `Some(recurring)` when a trigger was registered
    async fn restore_job(&self, job: &RecordingJob, now: DateTime<Utc>) -> Result<Option<bool>, ScheduleError> {
        if let Some(rule) = &job.recurrence {
            let rule = RecurrenceRule::parse(rule)?;
            self.schedule_at(job.id, Trigger::recurring(rule), now).await?;
            return Ok(Some(true));
        }

        if job.window_end() <= now {
            return Ok(None);
        }

        self.schedule_at(job.id, Trigger::one_shot(job.start_time), now).await?;
        Ok(Some(false))
    }
}
