//! Store abstractions
//!
//! The engine never talks to a database directly. Entity lookup/creation and
//! durable session persistence are behind these traits; in-memory
//! implementations live in `parley-stores`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::WorkflowContext;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested record does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Unknown entity model
    #[error("unknown model: {0}")]
    UnknownModel(String),
    /// Backend failure
    #[error("store backend error: {0}")]
    Backend(String),
    /// Internal error (poisoned lock, serialization, ...)
    #[error("internal store error: {0}")]
    Internal(String),
}

/// A persisted domain record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Record id
    pub id: String,
    /// Record fields as stored
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// Create a record
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// String value of a field, if present
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// Field match operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Exact equality
    Eq,
    /// Case-insensitive equality
    EqCi,
    /// Case-insensitive substring containment
    Contains,
}

/// One field match predicate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    /// Case-insensitive equality filter
    pub fn eq_ci(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::EqCi,
            value: value.into(),
        }
    }

    /// Substring containment filter
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Contains,
            value: value.into(),
        }
    }

    /// Whether a record field satisfies this filter
    ///
    /// The pseudo-field `id` matches against the record id.
    pub fn matches(&self, record: &EntityRecord) -> bool {
        if self.field == "id" && !record.fields.contains_key("id") {
            return match self.op {
                FilterOp::Eq => record.id == self.value,
                FilterOp::EqCi => record.id.eq_ignore_ascii_case(&self.value),
                FilterOp::Contains => record
                    .id
                    .to_lowercase()
                    .contains(&self.value.to_lowercase()),
            };
        }
        let Some(value) = record.fields.get(&self.field) else {
            return false;
        };
        let Some(text) = value.as_str() else {
            // Non-string fields only support exact equality against their
            // JSON rendering.
            return self.op == FilterOp::Eq && value.to_string() == self.value;
        };
        match self.op {
            FilterOp::Eq => text == self.value,
            FilterOp::EqCi => text.eq_ignore_ascii_case(&self.value),
            FilterOp::Contains => text.to_lowercase().contains(&self.value.to_lowercase()),
        }
    }
}

/// Entity store query
///
/// `scope` predicates must all match (workspace scoping); `any` predicates
/// are OR'd — at least one must match when non-empty.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Equality constraints, all required
    pub scope: Map<String, Value>,
    /// Field filters, at least one must match (empty = unconstrained)
    pub any: Vec<Filter>,
    /// Result bound (0 = store default)
    pub limit: usize,
}

impl Query {
    /// Create a query with scoping constraints
    pub fn scoped(scope: Map<String, Value>) -> Self {
        Self {
            scope,
            any: Vec::new(),
            limit: 0,
        }
    }

    /// Add an OR'd field filter
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.any.push(filter);
        self
    }

    /// Set the result bound
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether a record satisfies this query
    pub fn matches(&self, record: &EntityRecord) -> bool {
        for (field, expected) in &self.scope {
            if record.fields.get(field) != Some(expected) {
                return false;
            }
        }
        if self.any.is_empty() {
            return true;
        }
        self.any.iter().any(|f| f.matches(record))
    }
}

/// Persistent storage and search for domain entities
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Find the first record matching a query
    async fn find_one(&self, model: &str, query: &Query) -> Result<Option<EntityRecord>, StoreError>;

    /// Find records matching a query, bounded by `query.limit`
    async fn find_many(&self, model: &str, query: &Query) -> Result<Vec<EntityRecord>, StoreError>;

    /// Create a record
    async fn create(&self, model: &str, fields: Map<String, Value>) -> Result<EntityRecord, StoreError>;

    /// Declared writable fields of a model
    async fn writable_fields(&self, model: &str) -> Result<Vec<String>, StoreError>;
}

/// Durable per-session context persistence
///
/// The host reads the context before a turn and writes it back after; the
/// engine assumes read-before/write-after semantics per turn.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session context
    async fn load(&self, session_id: &str) -> Result<Option<WorkflowContext>, StoreError>;

    /// Persist a session context
    async fn save(&self, ctx: &WorkflowContext) -> Result<(), StoreError>;

    /// Delete a session context
    async fn delete(&self, session_id: &str) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str, workspace: i64) -> EntityRecord {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!(name));
        fields.insert("workspace_id".to_string(), json!(workspace));
        EntityRecord::new("r1", fields)
    }

    #[test]
    fn test_query_scope_is_conjunctive() {
        let mut scope = Map::new();
        scope.insert("workspace_id".to_string(), json!(7));
        let query = Query::scoped(scope).with_filter(Filter::eq_ci("name", "acme"));

        assert!(query.matches(&record("Acme", 7)));
        assert!(!query.matches(&record("Acme", 8)));
    }

    #[test]
    fn test_any_filters_are_disjunctive() {
        let query = Query::default()
            .with_filter(Filter::eq_ci("name", "zzz"))
            .with_filter(Filter::contains("name", "acm"));
        assert!(query.matches(&record("Acme Corp", 1)));
    }
}
