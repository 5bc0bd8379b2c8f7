//! parley-runtime - host-facing turn runtime
//!
//! One `TurnRuntime` per host application. Each turn: acquire the session's
//! gate, load the persisted context, append the user's message, run the
//! requested resolution, append the engine's reply, persist. Turns for the
//! same session are strictly serialized; different sessions run in parallel.

mod gate;
mod turn;

pub use gate::SessionGate;
pub use turn::{TurnRuntime, RuntimeError};
