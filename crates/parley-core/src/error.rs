//! Resolution error taxonomy

use thiserror::Error;

use crate::store::StoreError;

/// Errors raised inside a resolution attempt
///
/// Only `Configuration` and `UserDeclined` surface as terminal `Failure`
/// outcomes; everything else is caught at the resolution boundary and
/// converted into a retry prompt so a single field's failure never aborts
/// the hosting workflow.
///
/// A no-match search is not an error: it comes back as `Option::None` and
/// drives the creation flow. Ambiguity is not an error either: duplicate
/// candidates park in `FieldResolutionState::AwaitingDuplicateChoice` and
/// are resolved by user choice, never silently.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Missing or inconsistent configuration; fatal, not retried
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Completion/store provider failed; falls back to heuristics
    #[error("provider error: {0}")]
    Provider(String),

    /// Explicit user decline; cleared state is committed, surfaced as
    /// cancellation
    #[error("declined: {0}")]
    UserDeclined(String),

    /// Entity store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}
