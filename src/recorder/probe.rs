use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{CaptureError, CaptureResult};

/// Measures how much audio a media file actually contains
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration_seconds(&self, path: &Path) -> CaptureResult<f64>;
}

pub struct FfprobeDuration {
    ffprobe_command: String,
    probe_timeout: Duration,
}

impl FfprobeDuration {
    pub fn new(ffprobe_command: impl Into<String>) -> Self {
        Self {
            ffprobe_command: ffprobe_command.into(),
            probe_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl DurationProbe for FfprobeDuration {
    async fn duration_seconds(&self, path: &Path) -> CaptureResult<f64> {
        let probe_error = |message: String| CaptureError::Probe {
            path: path.display().to_string(),
            message,
        };

        let mut cmd = Command::new(&self.ffprobe_command);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let output = tokio::time::timeout(self.probe_timeout, cmd.output())
            .await
            .map_err(|_| probe_error(format!("timed out after {:?}", self.probe_timeout)))?
            .map_err(|e| CaptureError::Spawn {
                command: self.ffprobe_command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(probe_error(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let seconds = parse_duration_output(&stdout)
            .ok_or_else(|| probe_error(format!("unparseable duration '{}'", stdout.trim())))?;
        debug!("Probed {}: {:.1}s", path.display(), seconds);
        Ok(seconds)
    }
}

/// First non-empty line as a non-negative number of seconds
fn parse_duration_output(output: &str) -> Option<f64> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
}

/// Probe that treats any failure as an empty file
pub async fn probe_or_zero(probe: &dyn DurationProbe, path: &Path) -> f64 {
    match probe.duration_seconds(path).await {
        Ok(seconds) => seconds,
        Err(e) => {
            debug!("Treating {} as empty: {}", path.display(), e);
            0.0
        }
    }
}
