//! Completer-backed intent classification.

use async_trait::async_trait;
use tracing::{debug, warn};

use parley_core::completer::{CompletionRequest, TextCompleter};
use parley_core::intent::{IntentInterpreter, InterpretError, UserIntent};
use parley_core::types::{ChatMessage, ChatRole};

const MAX_HISTORY: usize = 6;

/// AI-backed interpreter
///
/// Prompts the completer for exactly one label out of the fixed set
/// (`confirm` / `decline` / `modify` / `create` / `unclear`, or `use[N]`
/// for a selection). Any output outside that set is a provider error so
/// callers fall back to the heuristics; the model is never trusted to
/// invent intents.
pub struct AiInterpreter<C: TextCompleter> {
    completer: C,
}

impl<C: TextCompleter> AiInterpreter<C> {
    /// Create an interpreter over a completer
    pub fn new(completer: C) -> Self {
        Self { completer }
    }

    fn build_prompt(&self, text: &str, history: &[ChatMessage]) -> CompletionRequest {
        let system = format!(
            "You classify one user reply in a business conversation. \
             Respond with exactly one label and nothing else: {}, \
             or use[N] where N is the 1-based option the user picked.",
            UserIntent::LABELS.join(", ")
        );

        let mut user = String::new();
        if !history.is_empty() {
            user.push_str("Recent conversation:\n");
            for message in history.iter().rev().take(MAX_HISTORY).rev() {
                let role = match message.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::System => "system",
                };
                user.push_str(&format!("- {}: {}\n", role, message.content));
            }
            user.push('\n');
        }
        user.push_str(&format!("Reply to classify: {}\n", text));

        CompletionRequest::classification(system, user)
    }
}

#[async_trait]
impl<C: TextCompleter> IntentInterpreter for AiInterpreter<C> {
    async fn interpret(
        &self,
        text: &str,
        history: &[ChatMessage],
    ) -> Result<UserIntent, InterpretError> {
        let request = self.build_prompt(text, history);
        let output = self
            .completer
            .complete(request)
            .await
            .map_err(|e| InterpretError::Provider(e.to_string()))?;

        match UserIntent::from_label(&output) {
            Some(intent) => {
                debug!(label = %output.trim(), "classifier label accepted");
                Ok(intent)
            }
            None => {
                warn!(label = %output.trim(), "classifier returned an unknown label");
                Err(InterpretError::Provider(format!(
                    "unknown classifier label '{}'",
                    output.trim()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTextCompleter;

    #[test]
    fn test_valid_labels_are_accepted() {
        tokio_test::block_on(async {
            let interpreter = AiInterpreter::new(MockTextCompleter::replying("confirm"));
            let intent = interpreter.interpret("yes", &[]).await.unwrap();
            assert_eq!(intent, UserIntent::Confirm);

            let interpreter = AiInterpreter::new(MockTextCompleter::replying(" use[2] "));
            let intent = interpreter.interpret("the second", &[]).await.unwrap();
            assert_eq!(intent, UserIntent::Select { index: 1 });
        });
    }

    #[test]
    fn test_invented_labels_are_rejected() {
        tokio_test::block_on(async {
            let interpreter = AiInterpreter::new(MockTextCompleter::replying("purchase"));
            let err = interpreter.interpret("buy it", &[]).await.unwrap_err();
            assert!(matches!(err, InterpretError::Provider(_)));
        });
    }
}
