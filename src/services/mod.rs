pub mod delivery;
pub mod recording_service;
pub mod retention;
pub mod watchdog;

pub use delivery::{HttpNotifier, LocalCopier, Notifier, PostProcessor, RemoteUploader, WebDavUploader};
pub use recording_service::RecordingService;
pub use retention::{PruneReport, RetentionService};
pub use watchdog::{RecoveryWatchdog, WatchdogReport};
