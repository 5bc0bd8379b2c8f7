//! Core data model: session context, per-field policy, turn outcomes

mod config;
mod context;
mod outcome;

pub use config::{DisplayNames, ResolutionConfig};
pub use context::{
    BatchState, ChatMessage, ChatRole, FieldResolutionState, StackFrame, SubflowHandle,
    SubflowState, WorkflowContext, MAX_SUBFLOW_DEPTH,
};
pub use outcome::ResolveOutcome;
