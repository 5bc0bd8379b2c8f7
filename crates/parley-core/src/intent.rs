//! Intent interpretation abstractions
//!
//! Free-text user replies are classified into a small fixed set of intents.
//! Every classification has a deterministic, AI-independent implementation
//! so the state machine stays testable without a live completion provider;
//! AI-backed interpreters must return one of the same fixed labels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ChatMessage;

/// Classified user intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum UserIntent {
    /// Affirmative answer
    Confirm,
    /// Negative answer / cancellation
    Decline,
    /// The user wants to change what was proposed
    Modify,
    /// The user picked a presented option (0-based)
    Select { index: usize },
    /// The user explicitly asked to create a new record
    Create,
    /// No confident classification
    Unclear,
}

impl UserIntent {
    /// The fixed label set AI classifiers are validated against
    pub const LABELS: [&'static str; 5] = ["confirm", "decline", "modify", "create", "unclear"];

    /// Parse a bare classifier label (`select` arrives as `use[N]`)
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        match label.as_str() {
            "confirm" => Some(Self::Confirm),
            "decline" => Some(Self::Decline),
            "modify" => Some(Self::Modify),
            "create" => Some(Self::Create),
            "unclear" => Some(Self::Unclear),
            _ => {
                let inner = label.strip_prefix("use[")?.strip_suffix(']')?;
                let index: usize = inner.trim().parse().ok()?;
                Some(Self::Select {
                    index: index.checked_sub(1)?,
                })
            }
        }
    }
}

/// Outcome of interpreting a pending duplicate choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateChoice {
    /// Adopt the candidate at this 0-based index
    UseCandidate(usize),
    /// Create a new record instead
    CreateNew,
    /// Could not parse; re-prompt, never guess
    Unclear,
}

/// Interpretation errors
#[derive(Debug, Error)]
pub enum InterpretError {
    /// Completion provider failed; callers fall back to heuristics
    #[error("provider error: {0}")]
    Provider(String),
}

/// Classifies free text into structured intents
#[async_trait]
pub trait IntentInterpreter: Send + Sync {
    /// Classify a free-text reply
    async fn interpret(
        &self,
        text: &str,
        history: &[ChatMessage],
    ) -> Result<UserIntent, InterpretError>;

    /// Interpret a reply to a presented duplicate-candidate list
    ///
    /// The selected index is validated against `candidate_count`; anything
    /// unparseable is `Unclear` so the caller re-prompts.
    async fn interpret_duplicate_choice(
        &self,
        text: &str,
        candidate_count: usize,
    ) -> Result<DuplicateChoice, InterpretError> {
        match self.interpret(text, &[]).await? {
            UserIntent::Select { index } if index < candidate_count => {
                Ok(DuplicateChoice::UseCandidate(index))
            }
            UserIntent::Create => Ok(DuplicateChoice::CreateNew),
            // A bare "yes" to a single candidate adopts it.
            UserIntent::Confirm if candidate_count == 1 => Ok(DuplicateChoice::UseCandidate(0)),
            _ => Ok(DuplicateChoice::Unclear),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parsing_covers_fixed_set() {
        assert_eq!(UserIntent::from_label("confirm"), Some(UserIntent::Confirm));
        assert_eq!(UserIntent::from_label(" Decline "), Some(UserIntent::Decline));
        assert_eq!(
            UserIntent::from_label("use[2]"),
            Some(UserIntent::Select { index: 1 })
        );
        assert_eq!(UserIntent::from_label("use[0]"), None);
        assert_eq!(UserIntent::from_label("purchase"), None);
    }
}
