//! parley-stores - in-memory store implementations
//!
//! Development and testing backends for the engine's store traits. Both
//! stores are bounded; production deployments provide their own durable
//! implementations of `EntityStore` and `SessionStore`.

mod entity_store;
mod session_store;

pub use entity_store::{InMemoryEntityStore, ModelSchema};
pub use session_store::InMemorySessionStore;
