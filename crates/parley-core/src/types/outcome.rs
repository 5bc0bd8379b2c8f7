//! ResolveOutcome type definition

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of one resolution attempt within a conversational turn
///
/// `Success` and `Failure` are terminal; `NeedsUserInput` is the only
/// variant that requires another turn. Outcomes are not persisted — only
/// the context mutations they caused survive to the next turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// Resolution completed; the entity is bound into collected data
    Success {
        /// Human-readable confirmation message
        message: String,
        /// Resolved entity payload (id plus projected fields)
        #[serde(default)]
        data: Value,
    },

    /// Resolution terminated without a bound entity
    Failure {
        /// Error or cancellation message
        error: String,
    },

    /// Another conversational turn is required
    NeedsUserInput {
        /// The exact string to surface to the end user
        message: String,
        /// Machine-readable hints for the client (e.g. {"field": ..})
        #[serde(default)]
        metadata: Value,
    },
}

impl ResolveOutcome {
    /// Convenience: create a success outcome with no payload
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Convenience: create a success outcome with a payload
    pub fn success_with(message: impl Into<String>, data: Value) -> Self {
        Self::Success {
            message: message.into(),
            data,
        }
    }

    /// Convenience: create a failure outcome
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    /// Convenience: create a needs-user-input outcome
    pub fn need_input(message: impl Into<String>) -> Self {
        Self::NeedsUserInput {
            message: message.into(),
            metadata: Value::Null,
        }
    }

    /// Convenience: create a needs-user-input outcome with metadata
    pub fn need_input_with(message: impl Into<String>, metadata: Value) -> Self {
        Self::NeedsUserInput {
            message: message.into(),
            metadata,
        }
    }

    /// Check if the outcome is successful
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Check if the outcome is a terminal failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Check if the outcome requires another turn
    pub fn needs_user_input(&self) -> bool {
        matches!(self, Self::NeedsUserInput { .. })
    }

    /// Check if the outcome is terminal (no further turns expected)
    pub fn is_terminal(&self) -> bool {
        !self.needs_user_input()
    }

    /// The user-facing message carried by this outcome
    pub fn message(&self) -> &str {
        match self {
            Self::Success { message, .. } => message,
            Self::Failure { error } => error,
            Self::NeedsUserInput { message, .. } => message,
        }
    }
}
