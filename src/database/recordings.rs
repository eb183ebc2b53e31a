//! Recording job persistence.
//!
//! Status transitions are exposed as free functions generic over the sqlx
//! executor so they can run either directly on the pool or inside a
//! caller-owned transaction (the watchdog processes each job in one).
//! Every transition carries a `WHERE status ...` guard; a `false` return
//! means the row was gone or had already moved on.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};
use std::collections::HashMap;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, Database};
use crate::errors::{AppResult, RepositoryError};
use crate::models::*;

const RECORDING_COLUMNS: &str = "id, station_id, station_name, stream_url, start_time, \
    duration_seconds, output_file, status, recurrence, recurrence_preset, template_id, \
    podcast_group, max_episodes, actual_start_time, end_time, file_size, error, attempts, \
    copy_enabled, copy_status, copy_message, upload_enabled, upload_status, upload_message, \
    notify_enabled, notify_status, notify_message, podcast, created_at, updated_at";

fn parse_uuid(column: &str, value: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(value).map_err(|_| RepositoryError::invalid_value(column, value))
}

fn parse_optional_datetime(value: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(parse_datetime).transpose()
}

fn delivery_target(row: &SqliteRow, prefix: &str) -> AppResult<DeliveryTarget> {
    let status: Option<String> = row.try_get(format!("{prefix}_status").as_str())?;
    let status = status
        .map(|s| {
            s.parse::<DeliveryStatus>()
                .map_err(|_| RepositoryError::invalid_value(format!("{prefix}_status"), s))
        })
        .transpose()?;

    Ok(DeliveryTarget {
        enabled: row.try_get(format!("{prefix}_enabled").as_str())?,
        status,
        message: row.try_get(format!("{prefix}_message").as_str())?,
    })
}

fn row_to_recording(row: &SqliteRow) -> AppResult<RecordingJob> {
    let id: String = row.try_get("id")?;
    let station_id: Option<String> = row.try_get("station_id")?;
    let template_id: Option<String> = row.try_get("template_id")?;
    let status: String = row.try_get("status")?;
    let preset: Option<String> = row.try_get("recurrence_preset")?;
    let podcast: Option<String> = row.try_get("podcast")?;
    let start_time: String = row.try_get("start_time")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(RecordingJob {
        id: parse_uuid("id", &id)?,
        station_id: station_id
            .as_deref()
            .map(|s| parse_uuid("station_id", s))
            .transpose()?,
        station_name: row.try_get("station_name")?,
        stream_url: row.try_get("stream_url")?,
        start_time: parse_datetime(&start_time)?,
        duration_seconds: row.try_get("duration_seconds")?,
        output_file: row.try_get("output_file")?,
        status: status
            .parse()
            .map_err(|_| RepositoryError::invalid_value("status", &status))?,
        recurrence: row.try_get("recurrence")?,
        recurrence_preset: preset
            .map(|p| {
                p.parse::<RecurrencePreset>()
                    .map_err(|_| RepositoryError::invalid_value("recurrence_preset", p))
            })
            .transpose()?,
        template_id: template_id
            .as_deref()
            .map(|s| parse_uuid("template_id", s))
            .transpose()?,
        podcast_group: row.try_get("podcast_group")?,
        max_episodes: row.try_get("max_episodes")?,
        actual_start_time: parse_optional_datetime(row.try_get("actual_start_time")?)?,
        end_time: parse_optional_datetime(row.try_get("end_time")?)?,
        file_size: row.try_get("file_size")?,
        error: row.try_get("error")?,
        attempts: row.try_get("attempts")?,
        delivery: RecordingDelivery {
            copy: delivery_target(row, "copy")?,
            upload: delivery_target(row, "upload")?,
            notify: delivery_target(row, "notify")?,
        },
        podcast: podcast
            .as_deref()
            .map(serde_json::from_str::<PodcastInfo>)
            .transpose()
            .map_err(RepositoryError::from)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

/// Move a scheduled one-shot or episode into `in_progress`.
///
/// Templates never run themselves, so they are excluded by the guard.
pub async fn mark_in_progress<'e, E>(
    executor: E,
    id: Uuid,
    output_file: &str,
    started_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE recordings
         SET status = 'in_progress', output_file = ?, actual_start_time = ?,
             end_time = NULL, error = NULL, updated_at = ?
         WHERE id = ? AND status = 'scheduled' AND recurrence IS NULL",
    )
    .bind(output_file)
    .bind(format_datetime(&started_at))
    .bind(format_datetime(&Utc::now()))
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Persist the attempt counter and the last attempt's error text
pub async fn record_attempt<'e, E>(
    executor: E,
    id: Uuid,
    attempts: i64,
    error: Option<&str>,
) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE recordings SET attempts = ?, error = ?, updated_at = ?
         WHERE id = ? AND status = 'in_progress'",
    )
    .bind(attempts)
    .bind(error)
    .bind(format_datetime(&Utc::now()))
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn mark_completed<'e, E>(
    executor: E,
    id: Uuid,
    end_time: DateTime<Utc>,
    file_size: i64,
) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE recordings
         SET status = 'completed', end_time = ?, file_size = ?, error = NULL, updated_at = ?
         WHERE id = ? AND status IN ('scheduled', 'in_progress') AND recurrence IS NULL",
    )
    .bind(format_datetime(&end_time))
    .bind(file_size)
    .bind(format_datetime(&Utc::now()))
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn mark_failed<'e, E>(
    executor: E,
    id: Uuid,
    end_time: DateTime<Utc>,
    error: &str,
) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE recordings
         SET status = 'failed', end_time = ?, error = ?, updated_at = ?
         WHERE id = ? AND status IN ('scheduled', 'in_progress') AND recurrence IS NULL",
    )
    .bind(format_datetime(&end_time))
    .bind(error)
    .bind(format_datetime(&Utc::now()))
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Watchdog recovery: put a stuck capture back to `scheduled` starting now.
///
/// The actual start is cleared; the next claim sets it again.
pub async fn requeue<'e, E>(executor: E, id: Uuid, start_time: DateTime<Utc>) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE recordings
         SET status = 'scheduled', start_time = ?, actual_start_time = NULL, updated_at = ?
         WHERE id = ? AND status = 'in_progress'",
    )
    .bind(format_datetime(&start_time))
    .bind(format_datetime(&Utc::now()))
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_delivery_status<'e, E>(
    executor: E,
    id: Uuid,
    kind: DeliveryKind,
    status: DeliveryStatus,
    message: Option<&str>,
) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let prefix = kind.column_prefix();
    let sql = format!(
        "UPDATE recordings SET {prefix}_status = ?, {prefix}_message = ?, updated_at = ? WHERE id = ?"
    );
    let result = sqlx::query(&sql)
        .bind(status.as_str())
        .bind(message)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

impl Database {
    pub async fn insert_recording(&self, job: &RecordingJob) -> AppResult<()> {
        let podcast = job
            .podcast
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(RepositoryError::from)?;

        let sql = format!(
            "INSERT INTO recordings ({RECORDING_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );

        sqlx::query(&sql)
            .bind(job.id.to_string())
            .bind(job.station_id.map(|id| id.to_string()))
            .bind(&job.station_name)
            .bind(&job.stream_url)
            .bind(format_datetime(&job.start_time))
            .bind(job.duration_seconds)
            .bind(&job.output_file)
            .bind(job.status.as_str())
            .bind(&job.recurrence)
            .bind(job.recurrence_preset.map(|p| p.as_str()))
            .bind(job.template_id.map(|id| id.to_string()))
            .bind(&job.podcast_group)
            .bind(job.max_episodes)
            .bind(job.actual_start_time.as_ref().map(format_datetime))
            .bind(job.end_time.as_ref().map(format_datetime))
            .bind(job.file_size)
            .bind(&job.error)
            .bind(job.attempts)
            .bind(job.delivery.copy.enabled)
            .bind(job.delivery.copy.status.map(|s| s.as_str()))
            .bind(&job.delivery.copy.message)
            .bind(job.delivery.upload.enabled)
            .bind(job.delivery.upload.status.map(|s| s.as_str()))
            .bind(&job.delivery.upload.message)
            .bind(job.delivery.notify.enabled)
            .bind(job.delivery.notify.status.map(|s| s.as_str()))
            .bind(&job.delivery.notify.message)
            .bind(podcast)
            .bind(format_datetime(&job.created_at))
            .bind(format_datetime(&job.updated_at))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_recording(&self, id: Uuid) -> AppResult<Option<RecordingJob>> {
        let sql = format!("SELECT {RECORDING_COLUMNS} FROM recordings WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_recording).transpose()
    }

    /// Like `get_recording` but treats absence as an error
    pub async fn require_recording(&self, id: Uuid) -> AppResult<RecordingJob> {
        self.get_recording(id).await?.ok_or_else(|| {
            RepositoryError::RecordNotFound {
                table: "recordings".to_string(),
                field: "id".to_string(),
                value: id.to_string(),
            }
            .into()
        })
    }

    pub async fn list_recordings(&self) -> AppResult<Vec<RecordingJob>> {
        let sql = format!("SELECT {RECORDING_COLUMNS} FROM recordings ORDER BY start_time DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_recording).collect()
    }

    pub async fn list_recordings_by_status(
        &self,
        status: RecordingStatus,
    ) -> AppResult<Vec<RecordingJob>> {
        let sql = format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings WHERE status = ? ORDER BY start_time"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_recording).collect()
    }

    /// Terminal episodes of a recurring template, newest completion first
    pub async fn list_terminal_episodes(&self, template_id: Uuid) -> AppResult<Vec<RecordingJob>> {
        let sql = format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings
             WHERE template_id = ? AND recurrence IS NULL
               AND status IN ('completed', 'failed')
             ORDER BY COALESCE(end_time, actual_start_time, start_time) DESC, created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(template_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_recording).collect()
    }

    /// Whether some recording other than `exclude` already owns this path
    pub async fn output_path_claimed(&self, output_file: &str, exclude: Option<Uuid>) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM recordings
             WHERE output_file = ? AND recurrence IS NULL AND id != ?",
        )
        .bind(output_file)
        .bind(exclude.map(|id| id.to_string()).unwrap_or_default())
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn delete_recording(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM recordings WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_recordings_by_status(&self) -> AppResult<HashMap<RecordingStatus, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM recordings GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            match status.parse::<RecordingStatus>() {
                Ok(status) => {
                    *counts.entry(status).or_insert(0) += count;
                }
                Err(_) => tracing::warn!("Ignoring recordings with unknown status '{}'", status),
            }
        }
        Ok(counts)
    }

    pub async fn mark_in_progress(
        &self,
        id: Uuid,
        output_file: &str,
        started_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(mark_in_progress(&self.pool, id, output_file, started_at).await?)
    }

    pub async fn record_attempt(&self, id: Uuid, attempts: i64, error: Option<&str>) -> AppResult<bool> {
        Ok(record_attempt(&self.pool, id, attempts, error).await?)
    }

    pub async fn mark_completed(&self, id: Uuid, end_time: DateTime<Utc>, file_size: i64) -> AppResult<bool> {
        Ok(mark_completed(&self.pool, id, end_time, file_size).await?)
    }

    pub async fn mark_failed(&self, id: Uuid, end_time: DateTime<Utc>, error: &str) -> AppResult<bool> {
        Ok(mark_failed(&self.pool, id, end_time, error).await?)
    }

    pub async fn set_delivery_status(
        &self,
        id: Uuid,
        kind: DeliveryKind,
        status: DeliveryStatus,
        message: Option<&str>,
    ) -> AppResult<bool> {
        Ok(set_delivery_status(&self.pool, id, kind, status, message).await?)
    }
}
