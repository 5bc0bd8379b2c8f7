//! Deterministic keyword and ordinal intent matching.

use async_trait::async_trait;

use parley_core::intent::{IntentInterpreter, InterpretError, UserIntent};
use parley_core::types::ChatMessage;

const CONFIRM_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "sure", "ok", "okay", "correct", "right", "confirm", "proceed",
    "please",
];
const DECLINE_WORDS: &[&str] = &["no", "nope", "nah", "cancel", "stop", "never", "negative"];
const CREATE_WORDS: &[&str] = &["create", "new", "make", "add"];
const MODIFY_WORDS: &[&str] = &[
    "modify", "change", "replace", "instead", "actually", "different", "swap", "update",
];
const ORDINALS: &[&str] = &[
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

/// Keyword-based interpreter
///
/// Fully deterministic and dependency-free; the baseline every AI-backed
/// interpreter falls back to. Classification never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicInterpreter;

impl HeuristicInterpreter {
    /// Create an interpreter
    pub fn new() -> Self {
        Self
    }

    /// Classify a reply without the async trait machinery
    pub fn classify(&self, text: &str) -> UserIntent {
        let lowered = text.trim().to_lowercase();
        if lowered.is_empty() {
            return UserIntent::Unclear;
        }
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if let Some(index) = selection_index(&lowered, &words) {
            return UserIntent::Select { index };
        }
        if words.iter().any(|w| DECLINE_WORDS.contains(w)) || lowered.contains("don't") {
            return UserIntent::Decline;
        }
        if words.iter().any(|w| MODIFY_WORDS.contains(w)) {
            return UserIntent::Modify;
        }
        if words.iter().any(|w| CREATE_WORDS.contains(w)) {
            return UserIntent::Create;
        }
        if words.iter().any(|w| CONFIRM_WORDS.contains(w)) {
            return UserIntent::Confirm;
        }
        UserIntent::Unclear
    }
}

/// Parse an explicit option selection: a bare number, "option 2",
/// "use 1", "the first one". 1-based input, 0-based output.
fn selection_index(lowered: &str, words: &[&str]) -> Option<usize> {
    if let Ok(n) = lowered.parse::<usize>() {
        return n.checked_sub(1);
    }
    for (i, word) in words.iter().enumerate() {
        if let Some(pos) = ORDINALS.iter().position(|o| o == word) {
            return Some(pos);
        }
        if matches!(*word, "option" | "use" | "number" | "pick" | "choose") {
            if let Some(next) = words.get(i + 1) {
                if let Ok(n) = next.parse::<usize>() {
                    return n.checked_sub(1);
                }
            }
        }
    }
    None
}

#[async_trait]
impl IntentInterpreter for HeuristicInterpreter {
    async fn interpret(
        &self,
        text: &str,
        _history: &[ChatMessage],
    ) -> Result<UserIntent, InterpretError> {
        Ok(self.classify(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> UserIntent {
        HeuristicInterpreter::new().classify(text)
    }

    #[test]
    fn test_confirmations() {
        assert_eq!(classify("yes"), UserIntent::Confirm);
        assert_eq!(classify("Sure, go ahead"), UserIntent::Confirm);
        assert_eq!(classify("ok!"), UserIntent::Confirm);
    }

    #[test]
    fn test_declines_beat_confirmations() {
        assert_eq!(classify("no"), UserIntent::Decline);
        assert_eq!(classify("no thanks, cancel it"), UserIntent::Decline);
        assert_eq!(classify("don't do that"), UserIntent::Decline);
    }

    #[test]
    fn test_selection_variants() {
        assert_eq!(classify("1"), UserIntent::Select { index: 0 });
        assert_eq!(classify("option 2"), UserIntent::Select { index: 1 });
        assert_eq!(classify("the first one"), UserIntent::Select { index: 0 });
        assert_eq!(classify("use 3"), UserIntent::Select { index: 2 });
        assert_eq!(classify("0"), UserIntent::Unclear);
    }

    #[test]
    fn test_create_and_modify() {
        assert_eq!(classify("create a brand one please"), UserIntent::Create);
        assert_eq!(classify("make it"), UserIntent::Create);
        assert_eq!(
            classify("replace the ipad with a keyboard"),
            UserIntent::Modify
        );
        assert_eq!(classify("actually I meant John"), UserIntent::Modify);
    }

    #[test]
    fn test_unrelated_text_is_unclear() {
        assert_eq!(classify("what's the weather"), UserIntent::Unclear);
        assert_eq!(classify(""), UserIntent::Unclear);
    }
}
