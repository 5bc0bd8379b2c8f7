//! Nested creation subflow orchestration
//!
//! A parent workflow collecting, say, invoice line items must be able to
//! pause, run a complete "create product" conversation, and resume exactly
//! where it left off. The orchestrator pushes the parent's position onto the
//! workflow stack, hands the subflow a fresh collected-data map so neither
//! side sees the other's fields, and merges only the final result back.
//!
//! Step names inside a subflow are namespaced with a deterministic prefix
//! (`{entity}_{parent_workflow}`); a recorded subflow whose prefix is gone
//! from `current_step` has completed.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::ResolveError;
use crate::store::{EntityStore, Filter, Query};
use crate::types::{
    ResolutionConfig, StackFrame, SubflowHandle, SubflowState, WorkflowContext, MAX_SUBFLOW_DEPTH,
};

/// Well-known context slot a completing subflow writes the created id into
pub const CREATED_ENTITY_SLOT: &str = "created_entity_id";

fn default_true() -> bool {
    true
}

fn default_identifier_field() -> String {
    "name".to_string()
}

/// One field-collection step of a creation subflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubflowStep {
    /// Step name, unique within the subflow (prefixed at runtime)
    pub name: String,
    /// Field the step collects
    pub field: String,
    /// Question asked to the user
    pub prompt: String,
    /// Whether the field may be skipped
    #[serde(default = "default_true")]
    pub required: bool,
}

/// Declaration of a nested creation workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubflowSpec {
    /// Workflow identifier referenced from `ResolutionConfig::subflow`
    pub id: String,
    /// Entity kind being created (e.g. "product")
    pub entity_name: String,
    /// Entity model in the store
    pub model: String,
    /// Field the identifier lands in (default "name")
    #[serde(default = "default_identifier_field")]
    pub identifier_field: String,
    /// Ordered field-collection steps
    pub steps: Vec<SubflowStep>,
}

impl SubflowSpec {
    /// The subflow's declared field set (the `GetEntityFields` contract):
    /// used to scrub stale entity keys before a batch item starts clean.
    pub fn entity_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = vec![self.identifier_field.clone()];
        for step in &self.steps {
            if !fields.contains(&step.field) {
                fields.push(step.field.clone());
            }
        }
        fields
    }

    /// First step whose field has not been collected yet
    fn next_pending(&self, collected: &HashMap<String, Value>) -> Option<&SubflowStep> {
        self.steps.iter().find(|s| !collected.contains_key(&s.field))
    }

    fn step_by_name(&self, name: &str) -> Option<&SubflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Lookup table of subflow declarations
#[derive(Debug, Clone, Default)]
pub struct SubflowRegistry {
    specs: HashMap<String, Arc<SubflowSpec>>,
}

impl SubflowRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subflow declaration
    pub fn register(&mut self, spec: SubflowSpec) {
        self.specs.insert(spec.id.clone(), Arc::new(spec));
    }

    /// Get a subflow declaration by id
    pub fn get(&self, id: &str) -> Option<Arc<SubflowSpec>> {
        self.specs.get(id).cloned()
    }
}

/// Progress of an active subflow after one turn
#[derive(Debug, Clone)]
pub enum SubflowProgress {
    /// The subflow needs another answer
    Prompt { step: String, prompt: String },
    /// The entity was created; `current_step` has dropped the prefix
    Finished,
}

/// How a subflow is started
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Item fields passed through from the caller (e.g. price, quantity)
    pub passthrough: Map<String, Value>,
    /// Scrub the subflow's declared field set from stale state first
    /// (set when resolving a batch field)
    pub clear_entity_keys: bool,
}

/// Starts, isolates, and resumes nested creation workflows
pub struct SubflowOrchestrator {
    store: Arc<dyn EntityStore>,
    registry: Arc<SubflowRegistry>,
}

impl SubflowOrchestrator {
    /// Create an orchestrator
    pub fn new(store: Arc<dyn EntityStore>, registry: Arc<SubflowRegistry>) -> Self {
        Self { store, registry }
    }

    /// The registry backing this orchestrator
    pub fn registry(&self) -> &SubflowRegistry {
        &self.registry
    }

    /// Start a subflow for a field, saving the parent's position
    pub async fn start(
        &self,
        ctx: &mut WorkflowContext,
        field: &str,
        config: &ResolutionConfig,
        identifier: &str,
        options: StartOptions,
    ) -> Result<SubflowProgress, ResolveError> {
        let subflow_id = config.subflow.as_deref().ok_or_else(|| {
            ResolveError::Configuration(format!("field '{}' has no subflow configured", field))
        })?;
        let spec = self.registry.get(subflow_id).ok_or_else(|| {
            ResolveError::Configuration(format!("unknown subflow '{}'", subflow_id))
        })?;
        if ctx.workflow_stack.len() >= MAX_SUBFLOW_DEPTH {
            return Err(ResolveError::Configuration(format!(
                "subflow nesting exceeds depth {}",
                MAX_SUBFLOW_DEPTH
            )));
        }

        let step_prefix = format!("{}_{}", spec.entity_name, ctx.current_workflow).to_lowercase();

        let mut frame = StackFrame {
            workflow: ctx.current_workflow.clone(),
            step: ctx.current_step.clone(),
            subflow: ctx.subflow.clone(),
            collected_data: ctx.collected_data.clone(),
        };

        let entity_fields = spec.entity_fields();
        if options.clear_entity_keys {
            for key in &entity_fields {
                ctx.state.remove(key);
                frame.collected_data.remove(key);
            }
        }
        ctx.workflow_stack.push(frame);

        // The subflow starts with only the identifier, previously-extracted
        // structured fields, and caller pass-through item fields visible.
        let mut fresh: HashMap<String, Value> = HashMap::new();
        fresh.insert(spec.identifier_field.clone(), Value::String(identifier.to_string()));
        if let Some(extracted) = ctx.extracted.get(field) {
            for (key, value) in extracted {
                if entity_fields.contains(key) && !fresh.contains_key(key) {
                    fresh.insert(key.clone(), value.clone());
                }
            }
        }
        for (key, value) in &options.passthrough {
            fresh.entry(key.clone()).or_insert_with(|| value.clone());
        }

        ctx.collected_data = fresh;
        ctx.subflow = SubflowState::Active(SubflowHandle {
            workflow_id: spec.id.clone(),
            parent_field: field.to_string(),
            entity_name: spec.entity_name.clone(),
            step_prefix: step_prefix.clone(),
        });
        ctx.current_workflow = spec.id.clone();
        ctx.touch();

        info!(
            field = %field,
            subflow = %spec.id,
            prefix = %step_prefix,
            depth = ctx.workflow_stack.len(),
            "subflow started"
        );
        self.advance(ctx, config, &spec).await
    }

    /// Feed one user answer into the active subflow
    pub async fn step(
        &self,
        ctx: &mut WorkflowContext,
        config: &ResolutionConfig,
        text: &str,
    ) -> Result<SubflowProgress, ResolveError> {
        let handle = ctx
            .subflow
            .active()
            .cloned()
            .ok_or_else(|| ResolveError::Provider("no active subflow to step".to_string()))?;
        let spec = self.registry.get(&handle.workflow_id).ok_or_else(|| {
            ResolveError::Configuration(format!("unknown subflow '{}'", handle.workflow_id))
        })?;

        let step_name = ctx
            .current_step
            .strip_prefix(&handle.step_prefix)
            .and_then(|s| s.strip_prefix('_'))
            .unwrap_or(&ctx.current_step)
            .to_string();
        let step = spec.step_by_name(&step_name).ok_or_else(|| {
            ResolveError::Provider(format!("subflow step '{}' not declared", step_name))
        })?;

        let answer = text.trim();
        let skipped = matches!(answer.to_lowercase().as_str(), "" | "skip" | "none" | "n/a");
        if skipped {
            if step.required {
                return Ok(SubflowProgress::Prompt {
                    step: step.name.clone(),
                    prompt: step.prompt.clone(),
                });
            }
            ctx.collected_data
                .insert(step.field.clone(), Value::Null);
        } else {
            ctx.collected_data
                .insert(step.field.clone(), parse_scalar(answer));
        }
        ctx.touch();
        self.advance(ctx, config, &spec).await
    }

    /// Restore the parent and merge the created entity into an item map
    ///
    /// Called after the step prefix has dropped out of `current_step`. The
    /// returned item carries base fields + projected `include_fields`, with
    /// user-entered values taking precedence over database values.
    pub async fn complete(
        &self,
        ctx: &mut WorkflowContext,
        field: &str,
        config: &ResolutionConfig,
    ) -> Result<Map<String, Value>, ResolveError> {
        let handle = ctx.subflow.active().cloned().ok_or_else(|| {
            ResolveError::Provider("no active subflow to complete".to_string())
        })?;
        let spec = self.registry.get(&handle.workflow_id).ok_or_else(|| {
            ResolveError::Configuration(format!("unknown subflow '{}'", handle.workflow_id))
        })?;

        let frame = ctx.workflow_stack.pop().ok_or_else(|| {
            ResolveError::Provider("workflow stack empty on subflow completion".to_string())
        })?;

        let subflow_collected = std::mem::take(&mut ctx.collected_data);
        ctx.collected_data = frame.collected_data;
        ctx.current_workflow = frame.workflow;
        ctx.current_step = frame.step;
        ctx.subflow = frame.subflow;

        let entity_id = ctx
            .state
            .remove(CREATED_ENTITY_SLOT)
            .and_then(|v| v.as_str().map(ToString::to_string))
            .ok_or_else(|| {
                ResolveError::Provider("subflow completed without a created entity id".to_string())
            })?;

        let record = self
            .store
            .find_one(
                &spec.model,
                &Query::default().with_filter(Filter {
                    field: "id".to_string(),
                    op: crate::store::FilterOp::Eq,
                    value: entity_id.clone(),
                }),
            )
            .await?
            .ok_or_else(|| {
                ResolveError::Store(crate::store::StoreError::NotFound(format!(
                    "{} '{}'",
                    spec.model, entity_id
                )))
            })?;

        let mut item = Map::new();
        item.insert("id".to_string(), Value::String(record.id.clone()));
        if let Some(name) = record.fields.get(&spec.identifier_field) {
            item.insert(spec.identifier_field.clone(), name.clone());
        }
        // Database values fill gaps; user-entered values always win.
        for key in &config.include_fields {
            if let Some(value) = record.fields.get(key) {
                item.insert(key.clone(), value.clone());
            }
        }
        for key in config
            .required_item_fields
            .iter()
            .chain(config.include_fields.iter())
        {
            if let Some(value) = subflow_collected.get(key) {
                if !value.is_null() {
                    item.insert(key.clone(), value.clone());
                }
            }
        }

        ctx.touch();
        info!(
            field = %field,
            subflow = %handle.workflow_id,
            entity_id = %entity_id,
            "subflow completed"
        );
        Ok(item)
    }

    /// Move to the next pending step, or create the entity when none remain
    async fn advance(
        &self,
        ctx: &mut WorkflowContext,
        config: &ResolutionConfig,
        spec: &SubflowSpec,
    ) -> Result<SubflowProgress, ResolveError> {
        let handle = ctx
            .subflow
            .active()
            .cloned()
            .ok_or_else(|| ResolveError::Provider("no active subflow".to_string()))?;

        if let Some(step) = spec.next_pending(&ctx.collected_data) {
            ctx.current_step = format!("{}_{}", handle.step_prefix, step.name);
            ctx.touch();
            debug!(step = %ctx.current_step, "subflow prompting");
            return Ok(SubflowProgress::Prompt {
                step: step.name.clone(),
                prompt: step.prompt.clone(),
            });
        }

        // All fields collected: create the entity, restricted to the
        // model's declared writable fields plus the scoping predicate.
        let writable = self.store.writable_fields(&spec.model).await?;
        let mut fields = Map::new();
        for (key, value) in &ctx.collected_data {
            if writable.contains(key) && !value.is_null() {
                fields.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &config.filters {
            if writable.contains(key) {
                fields.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let record = self.store.create(&spec.model, fields).await?;
        ctx.state.insert(
            CREATED_ENTITY_SLOT.to_string(),
            Value::String(record.id.clone()),
        );

        // Dropping the prefix from the current step is the completion signal.
        if let Some(frame) = ctx.workflow_stack.last() {
            ctx.current_step = frame.step.clone();
            ctx.current_workflow = frame.workflow.clone();
        }
        ctx.touch();
        info!(model = %spec.model, entity_id = %record.id, "subflow created entity");
        Ok(SubflowProgress::Finished)
    }
}

/// Parse a scalar answer: numeric-looking input becomes a JSON number so
/// pass-through fields (price, quantity) compare cleanly.
fn parse_scalar(text: &str) -> Value {
    if let Ok(int) = text.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = text.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(text.to_string())
}
