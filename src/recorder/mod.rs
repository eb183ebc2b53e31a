//! Stream capture: external process backends, output naming and the
//! retrying executor that drives a job from `scheduled` to a terminal
//! status.

pub mod capture;
pub mod executor;
pub mod naming;
pub mod probe;

pub use capture::{CaptureBackend, FfmpegCapture};
pub use executor::{ExecutorSettings, RecordingExecutor};
pub use probe::{DurationProbe, FfprobeDuration};
