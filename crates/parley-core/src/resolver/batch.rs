//! Batch entity resolution
//!
//! Resolves an ordered list of entity references (e.g. invoice line items),
//! partitioning every input item into exactly one of `validated` or
//! `missing`, then driving one sub-resolution per missing item — delegating
//! to the subflow orchestrator per item when a creation subflow is
//! configured.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::ResolveError;
use crate::intent::UserIntent;
use crate::resolver::{project_record, EntityResolver};
use crate::subflow::{StartOptions, SubflowProgress};
use crate::types::{
    BatchState, FieldResolutionState, ResolutionConfig, ResolveOutcome, WorkflowContext,
};

/// Batch resolution over an ordered item list
pub struct BatchEntityResolver {
    resolver: Arc<EntityResolver>,
}

impl BatchEntityResolver {
    /// Create a batch resolver sharing a single-entity resolver's collaborators
    pub fn new(resolver: Arc<EntityResolver>) -> Self {
        Self { resolver }
    }

    /// Resolve an ordered list of entity references for a field
    ///
    /// Same staging contract as `EntityResolver::resolve`: internal failures
    /// surface as a retry prompt with the staged context dropped.
    pub async fn resolve_batch(
        &self,
        field: &str,
        config: &ResolutionConfig,
        items: &[Value],
        ctx: &mut WorkflowContext,
    ) -> ResolveOutcome {
        let mut draft = ctx.clone();
        match self
            .resolve_batch_inner(field, config, items, &mut draft)
            .await
        {
            Ok(outcome) => {
                draft.touch();
                *ctx = draft;
                outcome
            }
            Err(ResolveError::UserDeclined(msg)) => {
                // A decline is terminal but its cleared batch state must
                // still land, so the draft commits like a success.
                draft.touch();
                *ctx = draft;
                ResolveOutcome::failure(msg)
            }
            Err(ResolveError::Configuration(msg)) => {
                warn!(field = %field, error = %msg, "batch configuration error");
                ResolveOutcome::failure(format!("Configuration error: {}", msg))
            }
            Err(err) => {
                warn!(field = %field, error = %err, "batch resolution failed; prompting for retry");
                ResolveOutcome::need_input_with(
                    format!(
                        "Something went wrong while checking the {} items. Would you like to try again?",
                        self.resolver.display(config)
                    ),
                    json!({ "error": err.to_string(), "field": field }),
                )
            }
        }
    }

    async fn resolve_batch_inner(
        &self,
        field: &str,
        config: &ResolutionConfig,
        items: &[Value],
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        // An item subflow in flight owns the turn.
        if draft
            .subflow
            .active()
            .map(|h| h.parent_field == field)
            .unwrap_or(false)
        {
            return self.continue_item_subflow(field, config, draft).await;
        }

        if let Some(batch) = draft.batches.get(field) {
            if batch.awaiting_create_confirm {
                return self.continue_batch_confirm(field, config, draft).await;
            }
            if !batch.missing.is_empty() {
                return self.drive_creation(field, config, draft).await;
            }
        }

        let normalized = normalize_items(items, config);
        if normalized.is_empty() {
            return Err(ResolveError::Configuration(format!(
                "no items supplied for field '{}'",
                field
            )));
        }
        self.process_items(field, config, normalized, draft).await
    }

    /// Partition items into validated/missing, then finalize or head into creation
    async fn process_items(
        &self,
        field: &str,
        config: &ResolutionConfig,
        items: Vec<Map<String, Value>>,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        let total = items.len();
        let mut validated: Vec<Map<String, Value>> = Vec::new();
        let mut missing: Vec<Map<String, Value>> = Vec::new();

        for item in items {
            let Some(identifier) = item_identifier(&item, config) else {
                missing.push(item);
                continue;
            };
            match self.resolver.exact_search(config, &identifier).await? {
                Some(record) => {
                    // Base fields + projected fields the user did not supply,
                    // then user input on top (user input wins).
                    let mut merged = project_record(&record, config);
                    for (key, value) in &item {
                        merged.insert(key.clone(), value.clone());
                    }
                    merged.insert("id".to_string(), Value::String(record.id.clone()));
                    validated.push(merged);
                }
                None => missing.push(item),
            }
        }
        debug_assert_eq!(validated.len() + missing.len(), total);
        info!(
            field = %field,
            validated = validated.len(),
            missing = missing.len(),
            "batch items partitioned"
        );

        if missing.is_empty() {
            let batch = BatchState {
                validated,
                ..BatchState::default()
            };
            draft.batches.insert(field.to_string(), batch);
            return Ok(self.finalize(field, config, draft));
        }

        if !config.interactive {
            // Non-interactive: create every missing item directly.
            let mut batch = BatchState {
                validated,
                missing,
                ..BatchState::default()
            };
            while !batch.missing.is_empty() {
                let item = batch.missing.remove(0);
                let merged = self.create_item_auto(config, item).await?;
                batch.validated.push(merged);
                batch.creation_index += 1;
            }
            draft.batches.insert(field.to_string(), batch);
            return Ok(self.finalize(field, config, draft));
        }

        let missing = dedupe_by_identifier(missing, config);
        let names: Vec<String> = missing
            .iter()
            .filter_map(|item| item_identifier(item, config))
            .collect();
        let count = missing.len();
        draft.batches.insert(
            field.to_string(),
            BatchState {
                validated,
                missing,
                creation_index: 0,
                awaiting_create_confirm: true,
            },
        );
        Ok(ResolveOutcome::need_input_with(
            format!(
                "The following {} {} item(s) don't exist yet:\n{}\nWould you like to create them?",
                count,
                self.resolver.display(config),
                names
                    .iter()
                    .map(|n| format!("- {}", n))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
            json!({ "field": field, "missing_count": count }),
        ))
    }

    /// Continuation turn for the pending "create them?" question
    async fn continue_batch_confirm(
        &self,
        field: &str,
        config: &ResolutionConfig,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        let reply = draft
            .latest_user_message()
            .map(ToString::to_string)
            .unwrap_or_default();
        let intent = match self
            .resolver
            .interpreter()
            .interpret(&reply, &draft.conversation_history)
            .await
        {
            Ok(intent) => intent,
            Err(err) => {
                warn!(field = %field, error = %err, "batch confirmation interpretation failed");
                UserIntent::Unclear
            }
        };

        match intent {
            UserIntent::Confirm | UserIntent::Create => {
                if let Some(batch) = draft.batches.get_mut(field) {
                    batch.awaiting_create_confirm = false;
                }
                self.drive_creation(field, config, draft).await
            }
            UserIntent::Decline => {
                draft.batches.remove(field);
                draft.clear_field(field);
                info!(field = %field, "user declined batch creation");
                Err(ResolveError::UserDeclined(format!(
                    "Creation of the missing {} items was declined.",
                    self.resolver.display(config)
                )))
            }
            UserIntent::Modify => {
                // A modify reply replaces the previous list wholesale.
                draft.batches.remove(field);
                draft.clear_field(field);
                let replacement = extract_items(&reply, config);
                if replacement.is_empty() {
                    return Ok(ResolveOutcome::need_input_with(
                        format!(
                            "I couldn't work out the new {} list. Please list the items again.",
                            self.resolver.display(config)
                        ),
                        json!({ "field": field }),
                    ));
                }
                info!(field = %field, count = replacement.len(), "batch list replaced by modify intent");
                self.process_items(field, config, replacement, draft).await
            }
            _ => {
                let batch = draft.batches.get(field).cloned().unwrap_or_default();
                Ok(ResolveOutcome::need_input_with(
                    format!(
                        "Should I create the {} missing {} item(s)? Please answer yes or no.",
                        batch.missing.len(),
                        self.resolver.display(config)
                    ),
                    json!({ "field": field }),
                ))
            }
        }
    }

    /// Create missing items one at a time until a subflow takes over or all are done
    async fn drive_creation(
        &self,
        field: &str,
        config: &ResolutionConfig,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        loop {
            let Some(batch) = draft.batches.get(field) else {
                return Err(ResolveError::Provider(format!(
                    "batch state missing for field '{}'",
                    field
                )));
            };
            let Some(next) = batch.missing.first().cloned() else {
                return Ok(self.finalize(field, config, draft));
            };
            let identifier = item_identifier(&next, config).ok_or_else(|| {
                ResolveError::Configuration(format!(
                    "batch item for '{}' has no usable identifier",
                    field
                ))
            })?;

            if config.subflow.is_some() {
                let mut passthrough = next.clone();
                passthrough.remove(&config.identifier_field);
                let progress = self
                    .resolver
                    .orchestrator()
                    .start(
                        draft,
                        field,
                        config,
                        &identifier,
                        StartOptions {
                            passthrough,
                            clear_entity_keys: true,
                        },
                    )
                    .await?;
                let index = draft
                    .batches
                    .get(field)
                    .map(|b| b.creation_index)
                    .unwrap_or_default();
                draft.set_field_state(field, FieldResolutionState::CreatingViaSubflow { index });
                match progress {
                    SubflowProgress::Prompt { prompt, .. } => {
                        return Ok(ResolveOutcome::need_input_with(
                            prompt,
                            json!({ "field": field, "subflow": config.subflow }),
                        ));
                    }
                    SubflowProgress::Finished => {
                        self.merge_completed_item(field, config, draft).await?;
                        continue;
                    }
                }
            }

            // No subflow: create directly and keep going.
            let batch = draft.batches.get_mut(field).ok_or_else(|| {
                ResolveError::Provider(format!("batch state missing for field '{}'", field))
            })?;
            let item = batch.missing.remove(0);
            let merged = self.create_item_auto(config, item).await?;
            let batch = draft.batches.get_mut(field).ok_or_else(|| {
                ResolveError::Provider(format!("batch state missing for field '{}'", field))
            })?;
            batch.validated.push(merged);
            batch.creation_index += 1;
        }
    }

    /// Continuation turn while an item's creation subflow is active
    async fn continue_item_subflow(
        &self,
        field: &str,
        config: &ResolutionConfig,
        draft: &mut WorkflowContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        if draft.subflow_step_owned() {
            let reply = draft
                .latest_user_message()
                .map(ToString::to_string)
                .unwrap_or_default();
            match self
                .resolver
                .orchestrator()
                .step(draft, config, &reply)
                .await?
            {
                SubflowProgress::Prompt { prompt, .. } => {
                    return Ok(ResolveOutcome::need_input_with(
                        prompt,
                        json!({ "field": field }),
                    ));
                }
                SubflowProgress::Finished => {}
            }
        }

        self.merge_completed_item(field, config, draft).await?;
        self.drive_creation(field, config, draft).await
    }

    /// Fold a completed item subflow back into the batch
    async fn merge_completed_item(
        &self,
        field: &str,
        config: &ResolutionConfig,
        draft: &mut WorkflowContext,
    ) -> Result<(), ResolveError> {
        let item = self
            .resolver
            .orchestrator()
            .complete(draft, field, config)
            .await?;
        let batch = draft.batches.get_mut(field).ok_or_else(|| {
            ResolveError::Provider(format!("batch state missing for field '{}'", field))
        })?;
        let pending = if batch.missing.is_empty() {
            Map::new()
        } else {
            batch.missing.remove(0)
        };

        // User-entered item fields take precedence over everything except id.
        let mut merged = item;
        for (key, value) in pending {
            if key != "id" {
                merged.insert(key, value);
            }
        }
        batch.validated.push(merged);
        batch.creation_index += 1;
        info!(
            field = %field,
            created = batch.creation_index,
            remaining = batch.missing.len(),
            "batch item created via subflow"
        );
        Ok(())
    }

    /// Non-interactive creation of one batch item
    async fn create_item_auto(
        &self,
        config: &ResolutionConfig,
        item: Map<String, Value>,
    ) -> Result<Map<String, Value>, ResolveError> {
        let writable = self.resolver.store().writable_fields(&config.model).await?;
        let mut fields = Map::new();
        for (key, value) in &item {
            if writable.contains(key) && !value.is_null() {
                fields.insert(key.clone(), value.clone());
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
        let record = self.resolver.store().create(&config.model, fields).await?;

        let mut merged = project_record(&record, config);
        for (key, value) in item {
            merged.insert(key, value);
        }
        merged.insert("id".to_string(), Value::String(record.id));
        Ok(merged)
    }

    /// Persist validated items as the single source of truth and finish
    fn finalize(
        &self,
        field: &str,
        config: &ResolutionConfig,
        draft: &mut WorkflowContext,
    ) -> ResolveOutcome {
        let batch = draft.batches.remove(field).unwrap_or_default();
        let validated: Vec<Value> = batch.validated.into_iter().map(Value::Object).collect();
        let count = validated.len();

        draft
            .collected_data
            .insert(field.to_string(), Value::Array(validated.clone()));
        // Single source of truth: drop the legacy alias key.
        draft.collected_data.remove(&format!("{}_list", field));
        draft.set_field_state(field, FieldResolutionState::Done);

        info!(field = %field, count, "batch resolved");
        ResolveOutcome::success_with(
            format!(
                "All {} {} item(s) are ready.",
                count,
                self.resolver.display(config)
            ),
            Value::Array(validated),
        )
    }
}

/// Normalize raw inputs into minimal structured items
pub(crate) fn normalize_items(items: &[Value], config: &ResolutionConfig) -> Vec<Map<String, Value>> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map.clone()),
            Value::String(text) if !text.trim().is_empty() => {
                Some(parse_string_item(text.trim(), config))
            }
            _ => None,
        })
        .collect()
}

/// Parse "2 laptops" style strings: leading quantity into the configured
/// quantity field, remainder into the identifier field.
fn parse_string_item(text: &str, config: &ResolutionConfig) -> Map<String, Value> {
    let mut item = Map::new();
    if let Some(quantity_field) = &config.quantity_field {
        let mut parts = text.splitn(2, char::is_whitespace);
        if let (Some(first), Some(rest)) = (parts.next(), parts.next()) {
            if let Ok(quantity) = first.parse::<i64>() {
                let rest = rest.trim();
                if !rest.is_empty() {
                    item.insert(quantity_field.clone(), Value::from(quantity));
                    item.insert(
                        config.identifier_field.clone(),
                        Value::String(rest.to_string()),
                    );
                    return item;
                }
            }
        }
    }
    item.insert(
        config.identifier_field.clone(),
        Value::String(text.to_string()),
    );
    item
}

/// Identifier of an item: configured field, else the first present search
/// field, else the sole string value.
pub(crate) fn item_identifier(item: &Map<String, Value>, config: &ResolutionConfig) -> Option<String> {
    if let Some(text) = item.get(&config.identifier_field).and_then(scalar_text) {
        return Some(text);
    }
    for field in &config.search_fields {
        if let Some(text) = item.get(field).and_then(scalar_text) {
            return Some(text);
        }
    }
    item.values().find_map(scalar_text)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn dedupe_by_identifier(
    items: Vec<Map<String, Value>>,
    config: &ResolutionConfig,
) -> Vec<Map<String, Value>> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| match item_identifier(item, config) {
            Some(name) => seen.insert(name.to_lowercase()),
            None => true,
        })
        .collect()
}

/// Re-extract a brand-new item list from free text (modify intent)
///
/// Handles "replace X with Y" phrasing and comma/"and" separated lists with
/// optional leading quantities. Deterministic by design; an AI extraction
/// pass can only refine, never replace, this behavior.
pub(crate) fn extract_items(text: &str, config: &ResolutionConfig) -> Vec<Map<String, Value>> {
    let lowered = text.to_lowercase();
    let effective = if (lowered.starts_with("replace")
        || lowered.starts_with("change")
        || lowered.starts_with("swap"))
        && lowered.contains(" with ")
    {
        lowered
            .find(" with ")
            .and_then(|i| text.get(i + " with ".len()..))
            .unwrap_or(text)
    } else {
        text
    };

    effective
        .split(',')
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_string_item(part, config))
        .collect()
}
