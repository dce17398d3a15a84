pub mod compress;
pub mod execute;
pub mod materialize;
pub mod orchestrator;
pub mod plan;
pub mod scan;
pub mod verify;

pub use orchestrator::{BackupMode, BackupOutcome, BackupRequest, run_backup};
