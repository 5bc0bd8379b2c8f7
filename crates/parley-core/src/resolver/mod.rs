//! Entity resolution state machines
//!
//! `EntityResolver` drives resolution of a single entity reference across
//! turns: search, exact match, duplicate check, interactive creation,
//! completion. `BatchEntityResolver` loops the same semantics over an
//! ordered item list.
//!
//! Resolvers are re-entrant: the branch to execute is derived from the
//! field's typed resolution state left by the previous turn, never from
//! local memory. All mutations go to a staged clone of the context that is
//! committed only on a successful return, so a failed turn leaves no
//! partial writes behind.

mod batch;

pub use batch::BatchEntityResolver;

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::ResolveError;
use crate::intent::{DuplicateChoice, IntentInterpreter, UserIntent};
use crate::similarity::{Candidate, DuplicateRanker, WIDE_NET_LIMIT};
use crate::store::{EntityRecord, EntityStore, Filter, Query};
use crate::subflow::{StartOptions, SubflowOrchestrator, SubflowProgress};
use crate::types::{
    DisplayNames, FieldResolutionState, ResolutionConfig, ResolveOutcome, WorkflowContext,
};

/// Single-entity resolution state machine
pub struct EntityResolver {
    store: Arc<dyn EntityStore>,
    interpreter: Arc<dyn IntentInterpreter>,
    ranker: DuplicateRanker,
    orchestrator: Arc<SubflowOrchestrator>,
    display_names: DisplayNames,
}

impl EntityResolver {
    /// Create a resolver
    pub fn new(
        store: Arc<dyn EntityStore>,
        interpreter: Arc<dyn IntentInterpreter>,
        orchestrator: Arc<SubflowOrchestrator>,
    ) -> Self {
        Self {
            store,
            interpreter,
            ranker: DuplicateRanker::new(),
            orchestrator,
            display_names: DisplayNames::new(),
        }
    }

    /// Replace the duplicate ranker (custom threshold or AI hook)
    pub fn with_ranker(mut self, ranker: DuplicateRanker) -> Self {
        self.ranker = ranker;
        self
    }

    /// Inject a friendly-name lookup table
    pub fn with_display_names(mut self, names: DisplayNames) -> Self {
        self.display_names = names;
        self
    }

    /// Resolve one entity reference for a field
    ///
    /// Never panics and never returns an unexpected error: internal
    /// failures surface as a retry prompt with the staged context dropped.
    pub async fn resolve(
        &self,
        field: &str,
        config: &ResolutionConfig,
        identifier: &Value,
        ctx: &mut WorkflowContext,
    ) -> ResolveOutcome {
        let mut draft = ctx.clone();
        match self.resolve_inner(field, config, identifier, &mut draft).await {
            Ok(outcome) => {
                draft.touch();
                *ctx = draft;
                outcome
            }
            Err(ResolveError::UserDeclined(msg)) => {
                // A decline is terminal but its cleared field state must
                // still land, so the draft commits like a success.
                draft.touch();
                *ctx = draft;
                ResolveOutcome::failure(msg)
            }
            Err(ResolveError::Configuration(msg)) => {
                warn!(field = %field, error = %msg, "resolution configuration error");
                ResolveOutcome::failure(format!("Configuration error: {}", msg))
            }
            Err(err) => {
                warn!(field = %field, error = %err, "resolution failed; prompting for retry");
                ResolveOutcome::need_input_with(
                    format!(
                        "Something went wrong while resolving the {}. Would you like to try again?",
                        self.display_names.display_for(config)
                    ),
                    json!({ "error": err.to_string(), "field": field }),
                )
            }
        }
    }

    async fn resolve_inner(
        &self,
        field: &str,
        config: &ResolutionConfig,
        identifier: &Value,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        // Structured payloads merge into the field's extracted data in
        // every state, so fields arriving mid-confirmation still reach
        // creation.
        if let Value::Object(payload) = identifier {
            draft.merge_extracted(field, payload);
        }

        let state = draft.field_state(field);
        debug!(field = %field, state = ?state, "resolving field");

        match state {
            FieldResolutionState::AwaitingDuplicateChoice {
                identifier: pending,
                candidates,
            } => {
                self.handle_duplicate_choice(field, config, &pending, candidates, draft)
                    .await
            }
            FieldResolutionState::AwaitingCreateConfirm { identifier: pending } => {
                self.continue_creation(field, config, &pending, draft).await
            }
            FieldResolutionState::CreatingViaSubflow { .. } => {
                self.continue_subflow(field, config, draft).await
            }
            FieldResolutionState::Idle | FieldResolutionState::Done => {
                let ident = self.identifier_text(field, config, identifier)?;
                self.fresh_resolution(field, config, &ident, draft).await
            }
        }
    }

    /// Resolve the search value from a raw identifier
    ///
    /// Structured identifiers pick the value by `search_fields` priority
    /// order, falling back to the first present value.
    fn identifier_text(
        &self,
        field: &str,
        config: &ResolutionConfig,
        identifier: &Value,
    ) -> Result<String, ResolveError> {
        match identifier {
            Value::Object(payload) => {
                for search_field in config.search_priority() {
                    if let Some(text) = payload.get(search_field).and_then(value_text) {
                        return Ok(text);
                    }
                }
                payload
                    .values()
                    .find_map(value_text)
                    .ok_or_else(|| {
                        ResolveError::Configuration(format!(
                            "structured identifier for '{}' has no usable value",
                            field
                        ))
                    })
            }
            Value::String(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(ResolveError::Configuration(format!(
                "missing identifier for field '{}'",
                field
            ))),
        }
    }

    /// Turn-one resolution: search, duplicate-check, or head into creation
    async fn fresh_resolution(
        &self,
        field: &str,
        config: &ResolutionConfig,
        identifier: &str,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        if config.model.trim().is_empty() {
            return Err(ResolveError::Configuration(format!(
                "field '{}' has no model configured",
                field
            )));
        }

        // Exact match always wins, with or without duplicate checking.
        if let Some(record) = self.exact_search(config, identifier).await? {
            return Ok(self.adopt(field, config, &record, draft, Adoption::Existing));
        }

        if config.check_duplicates && config.ask_on_duplicate {
            let records = self.wide_net(config, identifier).await?;
            let candidates = self
                .ranker
                .rank_with_hook(identifier, &records, &self.search_fields(config))
                .await;
            if !candidates.is_empty() {
                let message = present_candidates(
                    &self.display_names.display_for(config),
                    identifier,
                    &candidates,
                );
                let count = candidates.len();
                draft.set_field_state(
                    field,
                    FieldResolutionState::AwaitingDuplicateChoice {
                        identifier: identifier.to_string(),
                        candidates,
                    },
                );
                info!(field = %field, count, "presenting duplicate candidates");
                return Ok(ResolveOutcome::need_input_with(
                    message,
                    json!({ "field": field, "candidate_count": count }),
                ));
            }
        }

        self.start_creation(field, config, identifier, draft).await
    }

    /// Interpret the reply to a presented candidate list
    async fn handle_duplicate_choice(
        &self,
        field: &str,
        config: &ResolutionConfig,
        identifier: &str,
        candidates: Vec<Candidate>,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        let Some(reply) = draft.latest_user_message().map(ToString::to_string) else {
            return Ok(self.reprompt_candidates(field, config, identifier, &candidates));
        };

        let choice = match self
            .interpreter
            .interpret_duplicate_choice(&reply, candidates.len())
            .await
        {
            Ok(choice) => choice,
            Err(err) => {
                // Provider failure degrades to a re-prompt, never a crash.
                warn!(field = %field, error = %err, "duplicate choice interpretation failed");
                DuplicateChoice::Unclear
            }
        };

        match choice {
            DuplicateChoice::UseCandidate(index) => {
                let candidate = candidates.get(index).ok_or_else(|| {
                    ResolveError::Provider(format!("candidate index {} out of range", index))
                })?;
                let record = EntityRecord::new(candidate.id.clone(), candidate.fields.clone());
                Ok(self.adopt(field, config, &record, draft, Adoption::Existing))
            }
            DuplicateChoice::CreateNew => {
                draft.clear_field(field);
                self.start_creation(field, config, identifier, draft).await
            }
            DuplicateChoice::Unclear => {
                Ok(self.reprompt_candidates(field, config, identifier, &candidates))
            }
        }
    }

    fn reprompt_candidates(
        &self,
        field: &str,
        config: &ResolutionConfig,
        identifier: &str,
        candidates: &[Candidate],
    ) -> ResolveOutcome {
        ResolveOutcome::need_input_with(
            present_candidates(&self.display_names.display_for(config), identifier, candidates),
            json!({ "field": field, "candidate_count": candidates.len() }),
        )
    }

    /// Head into creation: confirm-gated, subflow-driven, or automatic
    async fn start_creation(
        &self,
        field: &str,
        config: &ResolutionConfig,
        identifier: &str,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        let display = self.display_names.display_for(config);
        if config.confirm_before_create || config.interactive {
            draft.set_field_state(
                field,
                FieldResolutionState::AwaitingCreateConfirm {
                    identifier: identifier.to_string(),
                },
            );
            return Ok(ResolveOutcome::need_input_with(
                format!(
                    "I couldn't find a {} matching '{}'. Would you like to create it?",
                    display, identifier
                ),
                json!({ "field": field }),
            ));
        }
        self.create_auto(field, config, identifier, draft).await
    }

    /// Continuation turn for a pending "create it?" question
    async fn continue_creation(
        &self,
        field: &str,
        config: &ResolutionConfig,
        identifier: &str,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        let display = self.display_names.display_for(config);
        let reply = draft
            .latest_user_message()
            .map(ToString::to_string)
            .unwrap_or_default();

        let intent = match self
            .interpreter
            .interpret(&reply, &draft.conversation_history)
            .await
        {
            Ok(intent) => intent,
            Err(err) => {
                warn!(field = %field, error = %err, "create confirmation interpretation failed");
                UserIntent::Unclear
            }
        };

        match intent {
            UserIntent::Confirm | UserIntent::Create => {
                if config.subflow.is_some() {
                    let progress = self
                        .orchestrator
                        .start(draft, field, config, identifier, StartOptions::default())
                        .await?;
                    draft.set_field_state(
                        field,
                        FieldResolutionState::CreatingViaSubflow { index: 0 },
                    );
                    match progress {
                        SubflowProgress::Prompt { prompt, .. } => {
                            Ok(ResolveOutcome::need_input_with(
                                prompt,
                                json!({ "field": field, "subflow": config.subflow }),
                            ))
                        }
                        SubflowProgress::Finished => {
                            self.finish_subflow(field, config, draft).await
                        }
                    }
                } else {
                    self.create_auto(field, config, identifier, draft).await
                }
            }
            UserIntent::Decline => {
                draft.clear_field(field);
                info!(field = %field, "user declined creation");
                Err(ResolveError::UserDeclined(format!(
                    "Creation of {} '{}' was declined.",
                    display, identifier
                )))
            }
            _ => Ok(ResolveOutcome::need_input_with(
                format!(
                    "Should I create a new {} named '{}'? Please answer yes or no.",
                    display, identifier
                ),
                json!({ "field": field }),
            )),
        }
    }

    /// Continuation turn while a creation subflow owns the current step
    async fn continue_subflow(
        &self,
        field: &str,
        config: &ResolutionConfig,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        let handle = draft.subflow.active().cloned().ok_or_else(|| {
            ResolveError::Provider(format!(
                "field '{}' marked as creating via subflow but none is active",
                field
            ))
        })?;
        if handle.parent_field != field {
            return Err(ResolveError::Provider(format!(
                "subflow for '{}' is active while resolving '{}'",
                handle.parent_field, field
            )));
        }

        if draft.subflow_step_owned() {
            let reply = draft
                .latest_user_message()
                .map(ToString::to_string)
                .unwrap_or_default();
            match self.orchestrator.step(draft, config, &reply).await? {
                SubflowProgress::Prompt { prompt, .. } => {
                    return Ok(ResolveOutcome::need_input_with(
                        prompt,
                        json!({ "field": field, "subflow": handle.workflow_id }),
                    ));
                }
                SubflowProgress::Finished => {}
            }
        }

        // Step prefix is gone: the subflow has completed.
        self.finish_subflow(field, config, draft).await
    }

    /// Merge a completed subflow's result and finish the field
    async fn finish_subflow(
        &self,
        field: &str,
        config: &ResolutionConfig,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        let item = self.orchestrator.complete(draft, field, config).await?;
        let label = item
            .get(&config.identifier_field)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        draft
            .collected_data
            .insert(field.to_string(), Value::Object(item.clone()));
        draft.set_field_state(field, FieldResolutionState::Done);
        Ok(ResolveOutcome::success_with(
            format!(
                "Created {} '{}'.",
                self.display_names.display_for(config),
                label
            ),
            Value::Object(item),
        ))
    }

    /// Non-interactive creation from the identifier, scope, and defaults,
    /// restricted to the model's declared writable fields
    async fn create_auto(
        &self,
        field: &str,
        config: &ResolutionConfig,
        identifier: &str,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        let writable = self.store.writable_fields(&config.model).await?;
        let mut fields = Map::new();
        if writable.iter().any(|f| f == &config.identifier_field) {
            fields.insert(
                config.identifier_field.clone(),
                Value::String(identifier.to_string()),
            );
        }
        if let Some(extracted) = draft.extracted.get(field) {
            for (key, value) in extracted {
                if writable.contains(key) {
                    fields.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        for (key, value) in &config.filters {
            if writable.contains(key) {
                fields.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        for (key, value) in &config.defaults {
            if writable.contains(key) {
                fields.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let record = self.store.create(&config.model, fields).await?;
        info!(field = %field, model = %config.model, id = %record.id, "auto-created entity");
        Ok(self.adopt(field, config, &record, draft, Adoption::Created))
    }

    /// Bind a record into collected data and finish the field
    fn adopt(
        &self,
        field: &str,
        config: &ResolutionConfig,
        record: &EntityRecord,
        draft: &mut WorkflowContext,
        adoption: Adoption,
    ) -> ResolveOutcome {
        let item = project_record(record, config);
        let label = record
            .field_str(&config.identifier_field)
            .unwrap_or(&record.id)
            .to_string();
        draft
            .collected_data
            .insert(field.to_string(), Value::Object(item.clone()));
        draft.set_field_state(field, FieldResolutionState::Done);

        let display = self.display_names.display_for(config);
        let message = match adoption {
            Adoption::Existing => format!("Using existing {} '{}'.", display, label),
            Adoption::Created => format!("Created {} '{}'.", display, label),
        };
        info!(field = %field, id = %record.id, "field resolved");
        ResolveOutcome::success_with(message, Value::Object(item))
    }

    /// Case-insensitive exact search over the search fields, in priority order
    pub(crate) async fn exact_search(
        &self,
        config: &ResolutionConfig,
        identifier: &str,
    ) -> Result<Option<EntityRecord>, ResolveError> {
        for search_field in self.search_fields(config) {
            let query = Query::scoped(config.filters.clone())
                .with_filter(Filter::eq_ci(search_field, identifier))
                .with_limit(1);
            if let Some(record) = self.store.find_one(&config.model, &query).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Phase-one duplicate search: bounded substring net over all fields
    async fn wide_net(
        &self,
        config: &ResolutionConfig,
        identifier: &str,
    ) -> Result<Vec<EntityRecord>, ResolveError> {
        let mut query = Query::scoped(config.filters.clone()).with_limit(WIDE_NET_LIMIT);
        for search_field in self.search_fields(config) {
            query = query.with_filter(Filter::contains(search_field, identifier));
        }
        Ok(self.store.find_many(&config.model, &query).await?)
    }

    pub(crate) fn search_fields(&self, config: &ResolutionConfig) -> Vec<String> {
        if config.search_fields.is_empty() {
            vec![config.identifier_field.clone()]
        } else {
            config.search_fields.clone()
        }
    }

    pub(crate) fn display(&self, config: &ResolutionConfig) -> String {
        self.display_names.display_for(config)
    }

    pub(crate) fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub(crate) fn interpreter(&self) -> &Arc<dyn IntentInterpreter> {
        &self.interpreter
    }

    pub(crate) fn orchestrator(&self) -> &Arc<SubflowOrchestrator> {
        &self.orchestrator
    }
}

enum Adoption {
    Existing,
    Created,
}

/// Project a record into an item map: base fields plus `include_fields`
pub(crate) fn project_record(record: &EntityRecord, config: &ResolutionConfig) -> Map<String, Value> {
    let mut item = Map::new();
    for key in config.effective_base_fields() {
        if key == "id" {
            item.insert("id".to_string(), Value::String(record.id.clone()));
        } else if let Some(value) = record.fields.get(&key) {
            item.insert(key, value.clone());
        }
    }
    for key in &config.include_fields {
        if let Some(value) = record.fields.get(key) {
            item.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    item
}

fn present_candidates(display: &str, identifier: &str, candidates: &[Candidate]) -> String {
    let mut message = format!(
        "I found {} existing {} record(s) similar to '{}':\n",
        candidates.len(),
        display,
        identifier
    );
    for (i, candidate) in candidates.iter().enumerate() {
        message.push_str(&format!(
            "{}. {} ({}% match)\n",
            i + 1,
            candidate.label(),
            candidate.score
        ));
    }
    message.push_str("Reply with a number to use one, or say 'create' to make a new one.");
    message
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subflow::{SubflowRegistry, SubflowSpec, SubflowStep};
    use crate::testutil::{arc_mem_store, FailingStore, KeywordIntents, MemStore};

    fn product_subflow() -> SubflowSpec {
        SubflowSpec {
            id: "create_product".to_string(),
            entity_name: "product".to_string(),
            model: "product".to_string(),
            identifier_field: "name".to_string(),
            steps: vec![SubflowStep {
                name: "price".to_string(),
                field: "price".to_string(),
                prompt: "What is the price?".to_string(),
                required: true,
            }],
        }
    }

    fn resolver_over(store: Arc<MemStore>) -> EntityResolver {
        let mut registry = SubflowRegistry::new();
        registry.register(product_subflow());
        let orchestrator = Arc::new(SubflowOrchestrator::new(
            store.clone(),
            Arc::new(registry),
        ));
        EntityResolver::new(store, Arc::new(KeywordIntents), orchestrator)
    }

    #[test]
    fn test_exact_match_wins_over_duplicate_checking() {
        tokio_test::block_on(async {
            let store = arc_mem_store();
            store.seed("product", "1", json!({ "name": "MacBook Pro" }));
            store.seed("product", "2", json!({ "name": "MacBook Pro M4" }));
            let resolver = resolver_over(store);

            let config = ResolutionConfig::new("product")
                .with_search_fields(["name"])
                .with_duplicate_check();
            let mut ctx = WorkflowContext::new("s1", "create_invoice");

            let outcome = resolver
                .resolve("product", &config, &json!("macbook pro"), &mut ctx)
                .await;
            assert!(outcome.is_success(), "expected success, got {:?}", outcome);
            assert_eq!(
                ctx.collected_data["product"]["id"],
                json!("1"),
                "case-insensitive exact match must short-circuit"
            );
            assert_eq!(ctx.field_state("product"), FieldResolutionState::Done);
        });
    }

    #[test]
    fn test_duplicate_candidates_then_selection() {
        tokio_test::block_on(async {
            let store = arc_mem_store();
            store.seed("product", "1", json!({ "name": "MacBook Pro M4" }));
            let resolver = resolver_over(store);

            let config = ResolutionConfig::new("product")
                .with_search_fields(["name"])
                .with_duplicate_check();
            let mut ctx = WorkflowContext::new("s1", "create_invoice");

            let outcome = resolver
                .resolve("product", &config, &json!("MacBook Pro"), &mut ctx)
                .await;
            assert!(outcome.needs_user_input());
            assert!(matches!(
                ctx.field_state("product"),
                FieldResolutionState::AwaitingDuplicateChoice { .. }
            ));

            ctx.push_user_message("1");
            let outcome = resolver
                .resolve("product", &config, &json!("MacBook Pro"), &mut ctx)
                .await;
            assert!(outcome.is_success());
            assert_eq!(ctx.collected_data["product"]["id"], json!("1"));
        });
    }

    #[test]
    fn test_decline_clears_resolution_state() {
        tokio_test::block_on(async {
            let store = arc_mem_store();
            let resolver = resolver_over(store);

            let config = ResolutionConfig::new("customer").with_interactive_create();
            let mut ctx = WorkflowContext::new("s1", "create_invoice");

            let outcome = resolver
                .resolve("customer", &config, &json!("Nobody Known"), &mut ctx)
                .await;
            assert!(outcome.needs_user_input());

            ctx.push_user_message("no");
            let outcome = resolver
                .resolve("customer", &config, &json!("Nobody Known"), &mut ctx)
                .await;
            assert!(outcome.is_failure());
            assert!(
                outcome.message().contains("declined"),
                "cancellation must be spelled out: {:?}",
                outcome
            );
            assert_eq!(ctx.field_state("customer"), FieldResolutionState::Idle);
            assert!(!ctx.collected_data.contains_key("customer"));
        });
    }

    #[test]
    fn test_structured_payload_merges_while_awaiting_confirm() {
        tokio_test::block_on(async {
            let store = arc_mem_store();
            let resolver = resolver_over(store);

            let config = ResolutionConfig::new("customer")
                .with_interactive_create()
                .with_include_fields(["email"]);
            let mut ctx = WorkflowContext::new("s1", "create_invoice");

            let outcome = resolver
                .resolve("customer", &config, &json!("Ghost Writer"), &mut ctx)
                .await;
            assert!(outcome.needs_user_input());

            // The confirmation turn carries a structured payload with a
            // field the first turn never saw.
            ctx.push_user_message("yes");
            let outcome = resolver
                .resolve(
                    "customer",
                    &config,
                    &json!({ "name": "Ghost Writer", "email": "ghost@x.com" }),
                    &mut ctx,
                )
                .await;
            assert!(outcome.is_success(), "expected success, got {:?}", outcome);
            assert_eq!(
                ctx.collected_data["customer"]["email"],
                json!("ghost@x.com"),
                "late-arriving extracted fields must reach creation"
            );
        });
    }

    #[test]
    fn test_subflow_isolates_and_restores_parent_data() {
        tokio_test::block_on(async {
            let store = arc_mem_store();
            let resolver = resolver_over(store.clone());

            let config = ResolutionConfig::new("product")
                .with_interactive_create()
                .with_subflow("create_product")
                .with_include_fields(["price"]);
            let mut ctx = WorkflowContext::new("s1", "create_invoice");
            ctx.current_step = "items".to_string();
            ctx.collected_data
                .insert("customer".to_string(), json!({ "id": "c1" }));

            let outcome = resolver
                .resolve("product", &config, &json!("Gizmo"), &mut ctx)
                .await;
            assert!(outcome.needs_user_input());

            ctx.push_user_message("yes");
            let outcome = resolver
                .resolve("product", &config, &json!("Gizmo"), &mut ctx)
                .await;
            assert!(outcome.needs_user_input(), "subflow should prompt for price");
            assert!(ctx.subflow.is_active());
            assert_eq!(ctx.current_step, "product_create_invoice_price");
            assert!(
                !ctx.collected_data.contains_key("customer"),
                "parent data must be invisible inside the subflow"
            );
            assert_eq!(ctx.collected_data["name"], json!("Gizmo"));

            ctx.push_user_message("42");
            let outcome = resolver
                .resolve("product", &config, &json!("Gizmo"), &mut ctx)
                .await;
            assert!(outcome.is_success(), "expected success, got {:?}", outcome);
            assert!(!ctx.subflow.is_active());
            assert!(ctx.workflow_stack.is_empty());
            assert_eq!(ctx.current_step, "items");
            assert_eq!(ctx.collected_data["customer"], json!({ "id": "c1" }));
            assert_eq!(ctx.collected_data["product"]["name"], json!("Gizmo"));
            assert_eq!(ctx.collected_data["product"]["price"], json!(42));
            assert_eq!(store.count("product"), 1);
        });
    }

    #[test]
    fn test_store_failure_leaves_context_untouched() {
        tokio_test::block_on(async {
            let mut registry = SubflowRegistry::new();
            registry.register(product_subflow());
            let store = Arc::new(FailingStore);
            let orchestrator = Arc::new(SubflowOrchestrator::new(
                store.clone(),
                Arc::new(registry),
            ));
            let resolver = EntityResolver::new(store, Arc::new(KeywordIntents), orchestrator);

            let config = ResolutionConfig::new("product");
            let mut ctx = WorkflowContext::new("s1", "create_invoice");
            let before = ctx.updated_at;

            let outcome = resolver
                .resolve("product", &config, &json!("Gizmo"), &mut ctx)
                .await;
            assert!(outcome.needs_user_input(), "failures become retry prompts");
            assert!(ctx.fields.is_empty(), "staged writes must be dropped");
            assert_eq!(ctx.updated_at, before);
        });
    }

    #[test]
    fn test_structured_identifier_uses_search_priority() {
        tokio_test::block_on(async {
            let store = arc_mem_store();
            store.seed(
                "customer",
                "c9",
                json!({ "name": "John Smith", "email": "john@x.com" }),
            );
            let resolver = resolver_over(store);

            let config =
                ResolutionConfig::new("customer").with_search_fields(["email", "name"]);
            let mut ctx = WorkflowContext::new("s1", "create_invoice");

            let outcome = resolver
                .resolve(
                    "customer",
                    &config,
                    &json!({ "name": "John Smith", "email": "john@x.com" }),
                    &mut ctx,
                )
                .await;
            assert!(outcome.is_success());
            assert_eq!(ctx.collected_data["customer"]["id"], json!("c9"));
            assert_eq!(
                ctx.extracted["customer"]["email"],
                json!("john@x.com"),
                "structured payload is retained for later creation"
            );
        });
    }
}
