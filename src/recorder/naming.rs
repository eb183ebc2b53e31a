//! Output path derivation for captures and their temporary artifacts

use chrono::{DateTime, TimeZone};
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::database::Database;
use crate::errors::{AppError, AppResult};

const MAX_SEQUENCE_SUFFIX: u32 = 100;

fn unsafe_filename_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("filename pattern is valid"))
}

/// Reduce a station name to characters safe in a filename
pub fn sanitize_station_name(name: &str) -> String {
    let cleaned = unsafe_filename_chars().replace_all(name.trim(), "_");
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "recording".to_string()
    } else {
        cleaned.to_string()
    }
}

/// First of `base`, `base-2`, `base-3`, ... that no recording owns and
/// nothing occupies on disk.
pub async fn unclaimed_path(database: &Database, base: &Path) -> AppResult<PathBuf> {
    for sequence in 1..=MAX_SEQUENCE_SUFFIX {
        let candidate = if sequence == 1 {
            base.to_path_buf()
        } else {
            with_sequence_suffix(base, sequence)
        };
        let claimed = database
            .output_path_claimed(&candidate.display().to_string(), None)
            .await?;
        if !claimed && !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            if sequence > 1 {
                debug!("Output {} taken, using {}", base.display(), candidate.display());
            }
            return Ok(candidate);
        }
    }

    Err(AppError::internal(format!(
        "no free output filename for {} after {} attempts",
        base.display(),
        MAX_SEQUENCE_SUFFIX
    )))
}

/// `{station}_{YYYYmmdd_HHMM}{ext}` under `root`
pub fn one_shot_path<Tz: TimeZone>(root: &Path, station_name: &str, start: &DateTime<Tz>, extension: &str) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    root.join(format!(
        "{}_{}{}",
        sanitize_station_name(station_name),
        start.format("%Y%m%d_%H%M"),
        extension
    ))
}

/// `{station}{yyMMdd}-{Ddd}{ext}` next to the template's own output path.
///
/// The template path only contributes its directory and extension.
pub fn episode_path<Tz: TimeZone>(
    template_output: &Path,
    station_name: &str,
    fired_at: &DateTime<Tz>,
    default_extension: &str,
) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    let directory = template_output.parent().unwrap_or_else(|| Path::new(""));
    let extension = template_output
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_else(|| default_extension.to_string());

    directory.join(format!(
        "{}{}{}",
        sanitize_station_name(station_name),
        fired_at.format("%y%m%d-%a"),
        extension
    ))
}

/// `name.ext` -> `name-{n}.ext`
pub fn with_sequence_suffix(path: &Path, sequence: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, sequence, ext.to_string_lossy()),
        None => format!("{}-{}", stem, sequence),
    };
    path.with_file_name(file_name)
}

fn with_stem_tag(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}.{}", stem, tag),
    };
    path.with_file_name(file_name)
}

/// Side file receiving the remainder of an interrupted capture
pub fn resume_segment_path(output: &Path) -> PathBuf {
    with_stem_tag(output, &format!("resume-{:08x}", fastrand::u32(..)))
}

/// Concatenation target before it replaces the original
pub fn joined_path(output: &Path) -> PathBuf {
    with_stem_tag(output, "joined")
}

/// Where an unjoinable resumed segment is kept for manual recovery
pub fn part_path(output: &Path) -> PathBuf {
    let mut name: OsString = output.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
