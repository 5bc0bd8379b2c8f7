//! SessionStore in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;

use parley_core::store::{SessionStore, StoreError};
use parley_core::types::WorkflowContext;

const DEFAULT_IN_MEMORY_SESSION_LIMIT: usize = 5_000;

/// In-memory implementation for development and testing.
///
/// Evicts the least recently saved session once the capacity limit is hit.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, WorkflowContext>>,
    order: RwLock<VecDeque<String>>,
    max_sessions: usize,
}

impl InMemorySessionStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::with_max_sessions(DEFAULT_IN_MEMORY_SESSION_LIMIT)
    }

    /// Create a new in-memory store with a hard capacity limit.
    pub fn with_max_sessions(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    fn touch_order(order: &mut VecDeque<String>, session_id: &str) {
        order.retain(|id| id != session_id);
        order.push_back(session_id.to_string());
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<WorkflowContext>, StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(sessions.get(session_id).cloned())
    }

    async fn save(&self, ctx: &WorkflowContext) -> Result<(), StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut order = self
            .order
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        if !sessions.contains_key(&ctx.session_id) && sessions.len() >= self.max_sessions {
            if let Some(oldest_id) = order.pop_front() {
                sessions.remove(&oldest_id);
            }
        }
        sessions.insert(ctx.session_id.clone(), ctx.clone());
        Self::touch_order(&mut order, &ctx.session_id);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let removed = sessions.remove(session_id).is_some();
        if removed {
            let mut order = self
                .order
                .write()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            order.retain(|id| id != session_id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_session_store_limit() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::with_max_sessions(2);
            let c1 = WorkflowContext::new("s1", "create_invoice");
            let c2 = WorkflowContext::new("s2", "create_invoice");
            let c3 = WorkflowContext::new("s3", "create_invoice");
            store.save(&c1).await.unwrap();
            store.save(&c2).await.unwrap();
            store.save(&c3).await.unwrap();

            assert!(store.load("s1").await.unwrap().is_none());
            assert!(store.load("s2").await.unwrap().is_some());
            assert!(store.load("s3").await.unwrap().is_some());
        });
    }

    #[test]
    fn test_save_then_load_round_trips_state() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let mut ctx = WorkflowContext::new("s1", "create_invoice");
            ctx.push_user_message("add a customer");
            store.save(&ctx).await.unwrap();

            let loaded = store.load("s1").await.unwrap().unwrap();
            assert_eq!(loaded.latest_user_message(), Some("add a customer"));
            assert!(store.delete("s1").await.unwrap());
            assert!(!store.delete("s1").await.unwrap());
        });
    }
}
