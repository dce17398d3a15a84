pub mod model;
pub mod orchestrator;
pub mod plan;
pub mod promote;
pub mod stage;
pub mod verify;

pub use model::{CandidateOperation, RestoreCandidate, RestoreMode, RestorePlan, VerificationMode};
pub use orchestrator::{RestoreOutcome, RestoreRequest, run_restore};
