//! TurnRuntime - one resolution turn end to end.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use parley_core::resolver::{BatchEntityResolver, EntityResolver};
use parley_core::store::{SessionStore, StoreError};
use parley_core::types::{ResolutionConfig, ResolveOutcome, WorkflowContext};

use crate::gate::SessionGate;

/// Runtime errors
///
/// Resolution itself never errors (failures surface inside the outcome);
/// only session persistence can fail a turn.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives complete resolution turns against persisted sessions
pub struct TurnRuntime {
    sessions: Arc<dyn SessionStore>,
    resolver: Arc<EntityResolver>,
    batch: BatchEntityResolver,
    gate: SessionGate,
}

impl TurnRuntime {
    /// Create a runtime
    pub fn new(sessions: Arc<dyn SessionStore>, resolver: Arc<EntityResolver>) -> Self {
        Self {
            sessions,
            batch: BatchEntityResolver::new(resolver.clone()),
            resolver,
            gate: SessionGate::new(),
        }
    }

    /// Start (or restart) a session for a workflow
    pub async fn start_session(
        &self,
        session_id: &str,
        workflow: &str,
    ) -> Result<WorkflowContext, RuntimeError> {
        let _guard = self.gate.acquire(session_id).await;
        let ctx = WorkflowContext::new(session_id, workflow);
        self.sessions.save(&ctx).await?;
        info!(session_id = %session_id, workflow = %workflow, "session started");
        Ok(ctx)
    }

    /// End a session and drop its gate
    pub async fn end_session(&self, session_id: &str) -> Result<bool, RuntimeError> {
        let removed = {
            let _guard = self.gate.acquire(session_id).await;
            self.sessions.delete(session_id).await?
        };
        self.gate.forget(session_id).await;
        Ok(removed)
    }

    /// Run one single-entity resolution turn
    pub async fn resolve_turn(
        &self,
        session_id: &str,
        field: &str,
        config: &ResolutionConfig,
        identifier: &Value,
        user_message: Option<&str>,
    ) -> Result<ResolveOutcome, RuntimeError> {
        let _guard = self.gate.acquire(session_id).await;
        let mut ctx = self.load(session_id).await?;
        if let Some(message) = user_message {
            ctx.push_user_message(message);
        }

        let outcome = self
            .resolver
            .resolve(field, config, identifier, &mut ctx)
            .await;

        ctx.push_assistant_message(outcome.message());
        self.sessions.save(&ctx).await?;
        info!(
            session_id = %session_id,
            field = %field,
            terminal = outcome.is_terminal(),
            "turn completed"
        );
        Ok(outcome)
    }

    /// Run one batch resolution turn
    pub async fn resolve_batch_turn(
        &self,
        session_id: &str,
        field: &str,
        config: &ResolutionConfig,
        items: &[Value],
        user_message: Option<&str>,
    ) -> Result<ResolveOutcome, RuntimeError> {
        let _guard = self.gate.acquire(session_id).await;
        let mut ctx = self.load(session_id).await?;
        if let Some(message) = user_message {
            ctx.push_user_message(message);
        }

        let outcome = self.batch.resolve_batch(field, config, items, &mut ctx).await;

        ctx.push_assistant_message(outcome.message());
        self.sessions.save(&ctx).await?;
        info!(
            session_id = %session_id,
            field = %field,
            terminal = outcome.is_terminal(),
            "batch turn completed"
        );
        Ok(outcome)
    }

    /// Current persisted context for a session
    pub async fn context(&self, session_id: &str) -> Result<WorkflowContext, RuntimeError> {
        self.load(session_id).await
    }

    async fn load(&self, session_id: &str) -> Result<WorkflowContext, RuntimeError> {
        self.sessions
            .load(session_id)
            .await?
            .ok_or_else(|| RuntimeError::UnknownSession(session_id.to_string()))
    }
}
