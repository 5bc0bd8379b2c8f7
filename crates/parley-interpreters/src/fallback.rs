//! AI interpretation with a deterministic safety net.

use async_trait::async_trait;
use tracing::warn;

use parley_core::intent::{IntentInterpreter, InterpretError, UserIntent};
use parley_core::types::ChatMessage;

use crate::heuristic::HeuristicInterpreter;

/// Composes an AI interpreter with the heuristic baseline
///
/// The primary interpreter is consulted first; a provider error or an
/// `Unclear` classification hands the reply to the heuristics. The result
/// is infallible, which is what the resolution state machines rely on.
pub struct FallbackInterpreter<P: IntentInterpreter> {
    primary: P,
    heuristic: HeuristicInterpreter,
}

impl<P: IntentInterpreter> FallbackInterpreter<P> {
    /// Create a composed interpreter
    pub fn new(primary: P) -> Self {
        Self {
            primary,
            heuristic: HeuristicInterpreter::new(),
        }
    }
}

#[async_trait]
impl<P: IntentInterpreter> IntentInterpreter for FallbackInterpreter<P> {
    async fn interpret(
        &self,
        text: &str,
        history: &[ChatMessage],
    ) -> Result<UserIntent, InterpretError> {
        match self.primary.interpret(text, history).await {
            Ok(UserIntent::Unclear) => Ok(self.heuristic.classify(text)),
            Ok(intent) => Ok(intent),
            Err(err) => {
                warn!(error = %err, "primary interpreter failed; using heuristics");
                Ok(self.heuristic.classify(text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiInterpreter;
    use crate::http::MockTextCompleter;

    #[test]
    fn test_primary_result_wins_when_confident() {
        tokio_test::block_on(async {
            let interpreter =
                FallbackInterpreter::new(AiInterpreter::new(MockTextCompleter::replying("modify")));
            let intent = interpreter.interpret("hmm", &[]).await.unwrap();
            assert_eq!(intent, UserIntent::Modify);
        });
    }

    #[test]
    fn test_invalid_label_falls_back_to_heuristics() {
        tokio_test::block_on(async {
            let interpreter = FallbackInterpreter::new(AiInterpreter::new(
                MockTextCompleter::replying("affirmative!"),
            ));
            let intent = interpreter.interpret("yes please", &[]).await.unwrap();
            assert_eq!(intent, UserIntent::Confirm);
        });
    }

    #[test]
    fn test_unclear_primary_defers_to_heuristics() {
        tokio_test::block_on(async {
            let interpreter = FallbackInterpreter::new(AiInterpreter::new(
                MockTextCompleter::replying("unclear"),
            ));
            let intent = interpreter.interpret("option 2", &[]).await.unwrap();
            assert_eq!(intent, UserIntent::Select { index: 1 });
        });
    }
}
