pub mod app;
pub mod bridge;
pub mod config;
pub mod logging;
pub mod models;
pub mod playback;
pub mod prefs;
pub mod probe;
pub mod progress;
pub mod reconciler;
pub mod tracker;
pub mod worker;

/// Convenient re-exports for front ends.
pub mod prelude {
    pub use crate::app::{display_folder, format_duration, App, AppError, DragRequest, FolderPicker};
    pub use crate::bridge::{Display, Notification, NotificationKind};
    pub use crate::config::AppConfig;
    pub use crate::models::{ConnectionState, JobOutcome, JobState, MediaFile, ProgressEvent, ProgressStatus};
}
