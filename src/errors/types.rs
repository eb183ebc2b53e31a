//! Error type definitions for the radio recorder
//!
//! A top-level `AppError` wraps layer-specific errors so that callers at
//! the request boundary can map any failure to a status code, while the
//! executor and watchdog can turn them into persisted error text.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Scheduling and request validation errors
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Capture process errors
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Post-processing delivery errors
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// A stored value could not be decoded into its model type
    #[error("Invalid stored value in {column}: {value}")]
    InvalidValue { column: String, value: String },

    /// Data serialization/deserialization failures
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Record not found
    #[error("Record not found: {table} with {field} = {value}")]
    RecordNotFound { table: String, field: String, value: String },

    /// Migration failures
    #[error("Migration failed: {version} - {message}")]
    MigrationFailed { version: String, message: String },
}

/// Errors raised while turning a recording request into a trigger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Recurrence rule could not be parsed
    #[error("Malformed recurrence rule '{rule}': {reason}")]
    MalformedRule { rule: String, reason: String },

    /// Rule is valid but never fires again
    #[error("Recurrence rule '{rule}' has no upcoming fire time")]
    NoUpcomingFireTime { rule: String },

    /// One-shot request whose capture window has already passed
    #[error("Recording window already closed at {window_end}")]
    WindowClosed { window_end: String },

    /// Stream address is not a usable URL
    #[error("Invalid stream URL '{url}': {reason}")]
    InvalidStreamUrl { url: String, reason: String },

    /// Referenced station does not exist
    #[error("Station {station_id} not found")]
    MissingStation { station_id: String },

    /// Duration must be positive
    #[error("Invalid duration: {seconds} seconds")]
    InvalidDuration { seconds: i64 },
}

/// Capture and probe failures
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The external process could not be started
    #[error("Failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },

    /// The external process exited unsuccessfully
    #[error("{command} exited with status {code:?}: {stderr}")]
    ExitStatus {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The process outlived its supervisory wall-clock limit
    #[error("{command} did not finish within {limit_seconds}s and was killed")]
    Timeout { command: String, limit_seconds: u64 },

    /// Joining a resumed segment onto the partial file failed
    #[error("Concatenation failed: {message}")]
    Concat { message: String },

    /// Duration probe failed or returned unparseable output
    #[error("Duration probe failed for {path}: {message}")]
    Probe { path: String, message: String },

    /// Filesystem errors around the capture artifacts
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Post-processing delivery failures
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Local copy failed
    #[error("Copy to {destination} failed: {message}")]
    Copy { destination: String, message: String },

    /// Remote store returned an unexpected status
    #[error("Remote upload to {target} failed: HTTP {status}")]
    UploadStatus { target: String, status: u16 },

    /// Notification endpoint returned an unexpected status
    #[error("Notification failed: HTTP {status}")]
    NotifyStatus { status: u16 },

    /// Delivery target is not configured
    #[error("{target} is not configured")]
    NotConfigured { target: String },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: ToString>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. } | AppError::Schedule(_) | AppError::NotFound { .. }
        )
    }
}

impl RepositoryError {
    /// Create an invalid value error for a column
    pub fn invalid_value<C: Into<String>, V: Into<String>>(column: C, value: V) -> Self {
        Self::InvalidValue {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl CaptureError {
    /// Whether a retry of the same capture could plausibly succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, CaptureError::Spawn { .. })
    }
}
