//! Per-session turn serialization.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hands out one mutex per session so turns for a session never interleave
///
/// Gates are created lazily and kept for the process lifetime; the map is
/// tiny (one `Arc<Mutex<()>>` per live session).
#[derive(Default)]
pub struct SessionGate {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionGate {
    /// Create a gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the turn lock for a session, waiting behind any in-flight turn
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry for an ended session
    pub async fn forget(&self, session_id: &str) {
        self.locks.lock().await.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_turns_for_one_session_are_serialized() {
        tokio_test::block_on(async {
            let gate = Arc::new(SessionGate::new());
            let running = Arc::new(AtomicUsize::new(0));

            let mut handles = Vec::new();
            for _ in 0..8 {
                let gate = gate.clone();
                let running = running.clone();
                handles.push(tokio::spawn(async move {
                    let _guard = gate.acquire("s1").await;
                    let concurrent = running.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(concurrent, 0, "another turn ran inside the gate");
                    tokio::task::yield_now().await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }
        });
    }
}
