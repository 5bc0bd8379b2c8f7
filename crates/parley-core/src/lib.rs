//! parley-core - entity resolution and subworkflow orchestration
//!
//! Config-driven resolution of entity references inside multi-turn
//! conversational workflows. A host workflow hands the engine a field name,
//! a per-field [`types::ResolutionConfig`], a raw identifier, and the
//! session's [`types::WorkflowContext`]; the engine searches the entity
//! store, detects fuzzy duplicates, asks the user when it must, creates
//! missing entities (directly or through a nested creation subflow), and
//! reports back with a [`types::ResolveOutcome`].
//!
//! Everything conversational is resumable: no resolution state lives in
//! local memory between turns, and a failed turn never leaves partial
//! writes behind.

pub mod completer;
pub mod error;
pub mod intent;
pub mod resolver;
pub mod similarity;
pub mod store;
pub mod subflow;
#[cfg(test)]
pub(crate) mod testutil;
pub mod types;

pub use error::ResolveError;
pub use resolver::{BatchEntityResolver, EntityResolver};
pub use similarity::{Candidate, CandidateReranker, DuplicateRanker};
pub use store::{EntityRecord, EntityStore, Filter, FilterOp, Query, SessionStore, StoreError};
pub use subflow::{SubflowOrchestrator, SubflowRegistry, SubflowSpec, SubflowStep};
pub use types::{
    DisplayNames, FieldResolutionState, ResolutionConfig, ResolveOutcome, WorkflowContext,
};

/// Common imports for engine hosts
pub mod prelude {
    pub use crate::error::ResolveError;
    pub use crate::intent::{DuplicateChoice, IntentInterpreter, UserIntent};
    pub use crate::resolver::{BatchEntityResolver, EntityResolver};
    pub use crate::store::{EntityStore, SessionStore};
    pub use crate::subflow::{SubflowOrchestrator, SubflowRegistry};
    pub use crate::types::{
        DisplayNames, ResolutionConfig, ResolveOutcome, WorkflowContext,
    };
}
