//! Centralized error handling for the radio recorder
//!
//! # Error Categories
//!
//! - **Database Errors**: SQLite operations, migrations, connection issues
//! - **Schedule Errors**: Requests rejected before any trigger exists
//! - **Capture Errors**: ffmpeg/ffprobe failures, retried by the executor
//! - **Delivery Errors**: Post-processing failures, recorded in sub-statuses
//!
//! Capture and delivery errors never escape the executor; they are
//! converted to persisted status and error text.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for capture Results
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Convenience type alias for delivery Results
pub type DeliveryResult<T> = Result<T, DeliveryError>;
