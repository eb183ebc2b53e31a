//! Episode retention for recurring templates

use std::io::ErrorKind;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::errors::AppResult;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneReport {
    pub kept: usize,
    pub removed: Vec<Uuid>,
    /// Episodes whose file could not be deleted; their records are still removed
    pub file_errors: usize,
}

#[derive(Clone)]
pub struct RetentionService {
    database: Database,
}

impl RetentionService {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Keep the newest `max_keep` terminal episodes of a template, delete the rest.
    ///
    /// `max_keep == 0` means unbounded retention.
    pub async fn prune(&self, template_id: Uuid, max_keep: usize) -> AppResult<PruneReport> {
        if max_keep == 0 {
            return Ok(PruneReport::default());
        }

        let episodes = self.database.list_terminal_episodes(template_id).await?;
        let mut report = PruneReport {
            kept: episodes.len().min(max_keep),
            ..Default::default()
        };

        if episodes.len() <= max_keep {
            debug!(
                "Template {} has {} episodes, within limit of {}",
                template_id,
                episodes.len(),
                max_keep
            );
            return Ok(report);
        }

        for episode in episodes.into_iter().skip(max_keep) {
            match tokio::fs::remove_file(episode.output_path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Episode file {} already gone", episode.output_file);
                }
                Err(e) => {
                    warn!(
                        "Failed to delete episode file {} for job {}: {}",
                        episode.output_file, episode.id, e
                    );
                    report.file_errors += 1;
                }
            }

            match self.database.delete_recording(episode.id).await {
                Ok(_) => report.removed.push(episode.id),
                Err(e) => warn!("Failed to delete episode record {}: {}", episode.id, e),
            }
        }

        info!(
            "Pruned {} episodes of template {} (keeping {})",
            report.removed.len(),
            template_id,
            report.kept
        );
        Ok(report)
    }
}
