use std::fmt;

/// A closed set of error kinds (strings, not a Rust enum hierarchy) so that
/// call sites branch on `kind()` rather than matching message text, and so
/// new kinds never require touching every intermediate `From` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SafetyViolation,
    InvariantViolation,
    IoError,
    LockError,
    MaterializationError,
    ExecutionFailed,
    VerifyFailed,
    RestoreManifestError,
    RestoreConflictError,
    RestoreStageError,
    RestoreVerificationError,
    PromotionError,
    RestoreArtifactError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SafetyViolation => "safety_violation",
            Self::InvariantViolation => "invariant_violation",
            Self::IoError => "io_error",
            Self::LockError => "lock_error",
            Self::MaterializationError => "materialization_error",
            Self::ExecutionFailed => "execution_failed",
            Self::VerifyFailed => "verify_failed",
            Self::RestoreManifestError => "restore_manifest_error",
            Self::RestoreConflictError => "restore_conflict_error",
            Self::RestoreStageError => "restore_stage_error",
            Self::RestoreVerificationError => "restore_verification_error",
            Self::PromotionError => "promotion_error",
            Self::RestoreArtifactError => "restore_artifact_error",
        }
    }

    /// Exit code this kind maps to on the CLI surface (see spec §6).
    pub fn exit_code(self) -> i32 {
        match self {
            Self::RestoreStageError
            | Self::RestoreVerificationError
            | Self::PromotionError
            | Self::RestoreArtifactError => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine's application error type. Carries a [`ErrorKind`] so that the
/// CLI and tests can branch on the failure mode without parsing `message`.
#[derive(Debug, Clone)]
pub struct EngineError {
    kind: ErrorKind,
    message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EngineError {}

macro_rules! engine_error_ctor {
    ($name:ident, $kind:expr) => {
        pub fn $name(message: impl Into<String>) -> EngineError {
            EngineError::new($kind, message)
        }
    };
}

engine_error_ctor!(safety_violation, ErrorKind::SafetyViolation);
engine_error_ctor!(invariant_violation, ErrorKind::InvariantViolation);
engine_error_ctor!(io_error, ErrorKind::IoError);
engine_error_ctor!(lock_error, ErrorKind::LockError);
engine_error_ctor!(materialization_error, ErrorKind::MaterializationError);
engine_error_ctor!(execution_failed, ErrorKind::ExecutionFailed);
engine_error_ctor!(verify_failed, ErrorKind::VerifyFailed);
engine_error_ctor!(restore_manifest_error, ErrorKind::RestoreManifestError);
engine_error_ctor!(restore_conflict_error, ErrorKind::RestoreConflictError);
engine_error_ctor!(restore_stage_error, ErrorKind::RestoreStageError);
engine_error_ctor!(
    restore_verification_error,
    ErrorKind::RestoreVerificationError
);
engine_error_ctor!(promotion_error, ErrorKind::PromotionError);
engine_error_ctor!(restore_artifact_error, ErrorKind::RestoreArtifactError);

/// Downcasts an [`anyhow::Error`] chain to [`EngineError`], if present anywhere in it.
pub fn downcast_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EngineError>())
        .map(EngineError::kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_match_taxonomy() {
        assert_eq!(ErrorKind::SafetyViolation.as_str(), "safety_violation");
        assert_eq!(ErrorKind::VerifyFailed.as_str(), "verify_failed");
        assert_eq!(
            ErrorKind::RestoreConflictError.as_str(),
            "restore_conflict_error"
        );
    }

    #[test]
    fn downcast_kind_finds_engine_error_in_anyhow_chain() {
        let base: anyhow::Error = lock_error("held by pid 1").into();
        let wrapped = base.context("acquiring profile lock");
        assert_eq!(downcast_kind(&wrapped), Some(ErrorKind::LockError));
    }

    #[test]
    fn downcast_kind_returns_none_for_unrelated_error() {
        let err = anyhow::anyhow!("plain failure");
        assert_eq!(downcast_kind(&err), None);
    }
}
