use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, Database};
use crate::errors::{AppResult, RepositoryError};
use crate::models::{Station, StationCreateRequest};

fn row_to_station(row: &SqliteRow) -> AppResult<Station> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Station {
        id: Uuid::parse_str(&id).map_err(|_| RepositoryError::invalid_value("stations.id", &id))?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        created_at: parse_datetime(&created_at)?,
    })
}

impl Database {
    pub async fn create_station(&self, request: &StationCreateRequest) -> AppResult<Station> {
        let station = Station {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            url: request.url.trim().to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO stations (id, name, url, created_at) VALUES (?, ?, ?, ?)")
            .bind(station.id.to_string())
            .bind(&station.name)
            .bind(&station.url)
            .bind(format_datetime(&station.created_at))
            .execute(&self.pool)
            .await?;

        Ok(station)
    }

    pub async fn get_station(&self, id: Uuid) -> AppResult<Option<Station>> {
        let row = sqlx::query("SELECT id, name, url, created_at FROM stations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_station).transpose()
    }

    pub async fn list_stations(&self) -> AppResult<Vec<Station>> {
        let rows = sqlx::query("SELECT id, name, url, created_at FROM stations ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_station).collect()
    }

    pub async fn delete_station(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM stations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
