//! WorkflowContext - per-session conversational state
//!
//! The context is the single source of truth carried across turns. Nothing
//! survives between turns in local memory; every pending decision is encoded
//! as a typed per-field resolution state, and nested creation subflows save
//! the parent's position on an explicit bounded stack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::similarity::Candidate;

/// Maximum nesting depth for creation subflows
pub const MAX_SUBFLOW_DEPTH: usize = 8;

/// Role of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// One conversation history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-field resolution state machine position
///
/// Replaces the stringly-typed `"{field}_creation_step"` / `"{field}_found_duplicates"`
/// slot scheme with one tagged union per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum FieldResolutionState {
    /// No resolution in progress
    #[default]
    Idle,
    /// Duplicate candidates were presented; waiting for the user to pick
    AwaitingDuplicateChoice {
        identifier: String,
        candidates: Vec<Candidate>,
    },
    /// Asked "would you like to create it?"; waiting for confirm/decline
    AwaitingCreateConfirm { identifier: String },
    /// A nested creation subflow owns the current step
    CreatingViaSubflow { index: usize },
    /// Resolution completed for this field
    Done,
}

/// Marker for an active nested subflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubflowHandle {
    /// Subflow workflow identifier
    pub workflow_id: String,
    /// Parent field being resolved through this subflow
    pub parent_field: String,
    /// Entity kind being created (e.g. "product")
    pub entity_name: String,
    /// Namespacing prefix applied to the subflow's step names
    pub step_prefix: String,
}

/// Whether a nested subflow currently owns `current_step`
///
/// A sum type rather than an optional map entry, so the single-active-subflow
/// invariant holds by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubflowState {
    #[default]
    None,
    Active(SubflowHandle),
}

impl SubflowState {
    /// Get the active handle, if any
    pub fn active(&self) -> Option<&SubflowHandle> {
        match self {
            Self::None => None,
            Self::Active(handle) => Some(handle),
        }
    }

    /// Check whether a subflow is active
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

/// Saved parent position, pushed when a subflow starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrame {
    /// Parent workflow identifier
    pub workflow: String,
    /// Parent step to resume at
    pub step: String,
    /// Parent's own subflow marker (for nested depth > 1)
    pub subflow: SubflowState,
    /// Snapshot of the parent's collected data, restored on completion
    pub collected_data: HashMap<String, Value>,
}

/// Per-field batch resolution bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchState {
    /// Items matched to existing entities
    #[serde(default)]
    pub validated: Vec<Map<String, Value>>,
    /// Items with no existing entity, preserving user-supplied fields
    #[serde(default)]
    pub missing: Vec<Map<String, Value>>,
    /// Index into `missing` of the item currently being created
    #[serde(default)]
    pub creation_index: usize,
    /// Whether the batch "create them?" prompt is pending an answer
    #[serde(default)]
    pub awaiting_create_confirm: bool,
}

/// Per-session mutable workflow state
///
/// Created once per conversation and persisted by the host between turns.
/// Resolvers mutate a staged clone and commit it only on a successful return,
/// so an abandoned turn leaves the pre-turn state intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Session identifier (host-supplied)
    pub session_id: String,
    /// Active workflow identifier
    pub current_workflow: String,
    /// Cursor into the active workflow/subflow
    pub current_step: String,
    /// Residual untyped slots (well-known: `created_entity_id`)
    #[serde(default)]
    pub state: HashMap<String, Value>,
    /// The workflow's accumulating output record
    #[serde(default)]
    pub collected_data: HashMap<String, Value>,
    /// Read-only input for intent interpretation
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    /// Typed per-field resolution states
    #[serde(default)]
    pub fields: HashMap<String, FieldResolutionState>,
    /// Per-field structured identifier payloads, merged across turns
    #[serde(default)]
    pub extracted: HashMap<String, Map<String, Value>>,
    /// Per-field batch bookkeeping
    #[serde(default)]
    pub batches: HashMap<String, BatchState>,
    /// Saved parent frames, pushed when subflows start
    #[serde(default)]
    pub workflow_stack: Vec<StackFrame>,
    /// Active nested subflow marker
    #[serde(default)]
    pub subflow: SubflowState,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl WorkflowContext {
    /// Create a fresh context for a session
    pub fn new(session_id: impl Into<String>, workflow: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            current_workflow: workflow.into(),
            current_step: String::new(),
            state: HashMap::new(),
            collected_data: HashMap::new(),
            conversation_history: Vec::new(),
            fields: HashMap::new(),
            extracted: HashMap::new(),
            batches: HashMap::new(),
            workflow_stack: Vec::new(),
            subflow: SubflowState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the last-mutation timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Append a user message to the history
    pub fn push_user_message(&mut self, content: impl Into<String>) {
        self.conversation_history.push(ChatMessage::user(content));
        self.touch();
    }

    /// Append an assistant message to the history
    pub fn push_assistant_message(&mut self, content: impl Into<String>) {
        self.conversation_history
            .push(ChatMessage::assistant(content));
        self.touch();
    }

    /// Latest user message content, if any
    pub fn latest_user_message(&self) -> Option<&str> {
        self.conversation_history
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
    }

    /// Resolution state for a field (`Idle` when never touched)
    pub fn field_state(&self, field: &str) -> FieldResolutionState {
        self.fields.get(field).cloned().unwrap_or_default()
    }

    /// Set the resolution state for a field
    pub fn set_field_state(&mut self, field: impl Into<String>, state: FieldResolutionState) {
        self.fields.insert(field.into(), state);
        self.touch();
    }

    /// Clear the resolution state and extracted payload for a field
    pub fn clear_field(&mut self, field: &str) {
        self.fields.remove(field);
        self.extracted.remove(field);
        self.touch();
    }

    /// Merge a structured identifier payload for a field
    ///
    /// Previously captured keys are kept unless the new payload overrides
    /// them with a non-null value.
    pub fn merge_extracted(&mut self, field: &str, payload: &Map<String, Value>) {
        let entry = self.extracted.entry(field.to_string()).or_default();
        for (key, value) in payload {
            if !value.is_null() {
                entry.insert(key.clone(), value.clone());
            }
        }
        self.touch();
    }

    /// Check the step-prefix invariant: either no subflow is active, or
    /// `current_step` carries the active subflow's prefix. Losing the prefix
    /// while a handle is still recorded is how subflow completion is detected.
    pub fn subflow_step_owned(&self) -> bool {
        match self.subflow.active() {
            None => false,
            Some(handle) => self.current_step.starts_with(&handle.step_prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_latest_user_message_skips_assistant_replies() {
        let mut ctx = WorkflowContext::new("s1", "create_invoice");
        ctx.push_user_message("add a customer");
        ctx.push_assistant_message("which customer?");
        ctx.push_user_message("John Smith");

        assert_eq!(ctx.latest_user_message(), Some("John Smith"));
    }

    #[test]
    fn test_merge_extracted_keeps_previous_values() {
        let mut ctx = WorkflowContext::new("s1", "create_invoice");
        let mut first = Map::new();
        first.insert("email".to_string(), json!("john@x.com"));
        ctx.merge_extracted("customer", &first);

        let mut second = Map::new();
        second.insert("name".to_string(), json!("John Smith"));
        second.insert("email".to_string(), Value::Null);
        ctx.merge_extracted("customer", &second);

        let merged = ctx.extracted.get("customer").unwrap();
        assert_eq!(merged.get("email"), Some(&json!("john@x.com")));
        assert_eq!(merged.get("name"), Some(&json!("John Smith")));
    }

    #[test]
    fn test_field_state_defaults_to_idle() {
        let ctx = WorkflowContext::new("s1", "create_invoice");
        assert_eq!(ctx.field_state("customer"), FieldResolutionState::Idle);
    }

    #[test]
    fn test_subflow_step_ownership_tracks_prefix() {
        let mut ctx = WorkflowContext::new("s1", "create_invoice");
        ctx.subflow = SubflowState::Active(SubflowHandle {
            workflow_id: "create_product".to_string(),
            parent_field: "items".to_string(),
            entity_name: "product".to_string(),
            step_prefix: "product_create_invoice".to_string(),
        });

        ctx.current_step = "product_create_invoice_name".to_string();
        assert!(ctx.subflow_step_owned());

        ctx.current_step = "items".to_string();
        assert!(!ctx.subflow_step_owned());
    }
}
