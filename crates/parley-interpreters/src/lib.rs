//! parley-interpreters - intent interpretation implementations
//!
//! Three interpreters share the `IntentInterpreter` trait from the core:
//! the deterministic `HeuristicInterpreter` (the authoritative baseline),
//! the completer-backed `AiInterpreter` whose output is validated against
//! the fixed label set, and the `FallbackInterpreter` that composes the
//! two so a provider failure can never break a conversation.

mod ai;
mod fallback;
mod heuristic;
mod http;

pub use ai::AiInterpreter;
pub use fallback::FallbackInterpreter;
pub use heuristic::HeuristicInterpreter;
pub use http::{HttpTextCompleter, HttpTextCompleterConfig, MockTextCompleter};
