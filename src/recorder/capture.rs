use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::RecorderConfig;
use crate::errors::{CaptureError, CaptureResult};

/// Bounded-duration stream capture and segment joining
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Record `duration_seconds` of `stream_url` into `output`
    async fn capture(&self, stream_url: &str, output: &Path, duration_seconds: u64) -> CaptureResult<()>;

    /// Join `first` and `second` into `output` without re-encoding
    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> CaptureResult<()>;
}

pub struct FfmpegCapture {
    ffmpeg_command: String,
    reconnect_delay_max: u64,
    timeout_grace: Duration,
}

impl FfmpegCapture {
    pub fn new(config: &RecorderConfig) -> Self {
        Self {
            ffmpeg_command: config.ffmpeg_command.clone(),
            reconnect_delay_max: config.reconnect_delay_max_seconds,
            timeout_grace: Duration::from_secs(config.timeout_grace_seconds),
        }
    }

    fn capture_args(&self, stream_url: &str, output: &Path, duration_seconds: u64) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_at_eof",
            "1",
            "-reconnect_on_network_error",
            "1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.extend([
            "-reconnect_delay_max".to_string(),
            self.reconnect_delay_max.to_string(),
            "-i".to_string(),
            stream_url.to_string(),
            "-t".to_string(),
            duration_seconds.to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.display().to_string(),
        ]);
        args
    }

    /// Run ffmpeg to completion, killing it once `limit` elapses
    async fn run(&self, args: &[String], limit: Duration) -> CaptureResult<()> {
        debug!("Running {} {}", self.ffmpeg_command, args.join(" "));

        let child = Command::new(&self.ffmpeg_command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Spawn {
                command: self.ffmpeg_command.clone(),
                message: e.to_string(),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("{} exceeded {:?}, killed", self.ffmpeg_command, limit);
                return Err(CaptureError::Timeout {
                    command: self.ffmpeg_command.clone(),
                    limit_seconds: limit.as_secs(),
                });
            }
        };

        if output.status.success() {
            return Ok(());
        }

        Err(CaptureError::ExitStatus {
            command: self.ffmpeg_command.clone(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl CaptureBackend for FfmpegCapture {
    async fn capture(&self, stream_url: &str, output: &Path, duration_seconds: u64) -> CaptureResult<()> {
        let args = self.capture_args(stream_url, output, duration_seconds);
        let limit = Duration::from_secs(duration_seconds) + self.timeout_grace;
        self.run(&args, limit).await
    }

    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> CaptureResult<()> {
        let list_path = concat_list_path(output);
        tokio::fs::write(&list_path, concat_list(&[first, second])).await?;

        let args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain([
            list_path.display().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.display().to_string(),
        ])
        .collect();

        let result = self.run(&args, self.timeout_grace).await;
        if let Err(e) = tokio::fs::remove_file(&list_path).await {
            debug!("Could not remove concat list {}: {}", list_path.display(), e);
        }

        result.map_err(|e| CaptureError::Concat {
            message: e.to_string(),
        })
    }
}

fn concat_list_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".concat.txt");
    PathBuf::from(name)
}

/// Concat demuxer input listing each segment in order
fn concat_list(segments: &[&Path]) -> String {
    segments
        .iter()
        .map(|path| {
            let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
            format!("file '{}'\n", absolute.display().to_string().replace('\'', r"'\''"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_args_enable_reconnect_and_copy() {
        let capture = FfmpegCapture::new(&RecorderConfig::default());
        let args = capture.capture_args("http://radio.example/live", Path::new("/rec/out.mp3"), 3600);
        let joined = args.join(" ");

        assert!(joined.starts_with("-y -hide_banner -loglevel error -reconnect 1"));
        assert!(joined.contains("-reconnect_on_network_error 1"));
        assert!(joined.contains("-reconnect_delay_max 30"));
        assert!(joined.contains("-i http://radio.example/live -t 3600 -c copy /rec/out.mp3"));
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[Path::new("/rec/a.mp3"), Path::new("/rec/it's.mp3")]);
        assert_eq!(list, "file '/rec/a.mp3'\nfile '/rec/it'\\''s.mp3'\n");
        assert_eq!(
            concat_list_path(Path::new("/rec/joined.mp3")),
            PathBuf::from("/rec/joined.mp3.concat.txt")
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_transient() {
        let config = RecorderConfig {
            ffmpeg_command: "/nonexistent/ffmpeg-binary".to_string(),
            ..RecorderConfig::default()
        };
        let err = FfmpegCapture::new(&config)
            .capture("http://radio.example/live", Path::new("/tmp/never.mp3"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Spawn { .. }));
        assert!(!err.is_transient());
    }
}
