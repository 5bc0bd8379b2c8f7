//! EntityStore in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use parley_core::store::{EntityRecord, EntityStore, Query, StoreError};

const DEFAULT_IN_MEMORY_RECORD_LIMIT: usize = 10_000;
const DEFAULT_FIND_MANY_LIMIT: usize = 50;

/// Declared shape of one entity model
#[derive(Debug, Clone)]
pub struct ModelSchema {
    /// Model identifier (e.g. "product")
    pub model: String,
    /// Fields accepted on creation
    pub writable_fields: Vec<String>,
}

impl ModelSchema {
    /// Declare a model with its writable fields
    pub fn new<I, S>(model: impl Into<String>, writable_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model: model.into(),
            writable_fields: writable_fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// In-memory implementation for development and testing.
///
/// Models must be registered up front; lookups against an unregistered
/// model fail rather than silently returning nothing.
pub struct InMemoryEntityStore {
    schemas: HashMap<String, ModelSchema>,
    records: RwLock<HashMap<String, Vec<EntityRecord>>>,
    max_records: usize,
}

impl InMemoryEntityStore {
    /// Create a store over a set of model schemas.
    pub fn new<I>(schemas: I) -> Self
    where
        I: IntoIterator<Item = ModelSchema>,
    {
        Self::with_max_records(schemas, DEFAULT_IN_MEMORY_RECORD_LIMIT)
    }

    /// Create a store with a hard per-model capacity limit.
    pub fn with_max_records<I>(schemas: I, max_records: usize) -> Self
    where
        I: IntoIterator<Item = ModelSchema>,
    {
        Self {
            schemas: schemas
                .into_iter()
                .map(|s| (s.model.clone(), s))
                .collect(),
            records: RwLock::new(HashMap::new()),
            max_records: max_records.max(1),
        }
    }

    /// Insert a record with a fixed id, bypassing writable-field checks.
    /// Intended for seeding test fixtures.
    pub fn seed(
        &self,
        model: &str,
        id: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.require_model(model)?;
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        records
            .entry(model.to_string())
            .or_default()
            .push(EntityRecord::new(id, fields));
        Ok(())
    }

    fn require_model(&self, model: &str) -> Result<&ModelSchema, StoreError> {
        self.schemas
            .get(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_one(&self, model: &str, query: &Query) -> Result<Option<EntityRecord>, StoreError> {
        self.require_model(model)?;
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(records
            .get(model)
            .and_then(|rs| rs.iter().find(|r| query.matches(r)).cloned()))
    }

    async fn find_many(&self, model: &str, query: &Query) -> Result<Vec<EntityRecord>, StoreError> {
        self.require_model(model)?;
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let limit = if query.limit > 0 {
            query.limit
        } else {
            DEFAULT_FIND_MANY_LIMIT
        };
        Ok(records
            .get(model)
            .map(|rs| {
                rs.iter()
                    .filter(|r| query.matches(r))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, model: &str, fields: Map<String, Value>) -> Result<EntityRecord, StoreError> {
        let schema = self.require_model(model)?;
        let rejected: Vec<&String> = fields
            .keys()
            .filter(|k| !schema.writable_fields.contains(k))
            .collect();
        if !rejected.is_empty() {
            return Err(StoreError::Backend(format!(
                "fields not writable on '{}': {:?}",
                model, rejected
            )));
        }

        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let entries = records.entry(model.to_string()).or_default();
        if entries.len() >= self.max_records {
            return Err(StoreError::Backend(format!(
                "record limit reached for model '{}'",
                model
            )));
        }

        let record = EntityRecord::new(Uuid::new_v4().to_string(), fields);
        entries.push(record.clone());
        debug!(model = %model, id = %record.id, "record created");
        Ok(record)
    }

    async fn writable_fields(&self, model: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.require_model(model)?.writable_fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::store::Filter;
    use serde_json::json;

    fn store() -> InMemoryEntityStore {
        InMemoryEntityStore::new([ModelSchema::new("product", ["name", "price"])])
    }

    #[test]
    fn test_create_rejects_unwritable_fields() {
        tokio_test::block_on(async {
            let store = store();
            let mut fields = Map::new();
            fields.insert("name".to_string(), json!("Gizmo"));
            fields.insert("secret".to_string(), json!("x"));

            let err = store.create("product", fields).await.unwrap_err();
            assert!(matches!(err, StoreError::Backend(_)));
        });
    }

    #[test]
    fn test_unknown_model_fails_loudly() {
        tokio_test::block_on(async {
            let store = store();
            let err = store
                .find_one("invoice", &Query::default())
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::UnknownModel(_)));
        });
    }

    #[test]
    fn test_find_one_respects_query_filters() {
        tokio_test::block_on(async {
            let store = store();
            let mut fields = Map::new();
            fields.insert("name".to_string(), json!("MacBook Pro"));
            store.seed("product", "p1", fields).unwrap();

            let query = Query::default().with_filter(Filter::eq_ci("name", "macbook pro"));
            let found = store.find_one("product", &query).await.unwrap();
            assert_eq!(found.unwrap().id, "p1");

            let query = Query::default().with_filter(Filter::eq_ci("name", "ipad"));
            assert!(store.find_one("product", &query).await.unwrap().is_none());
        });
    }

    #[test]
    fn test_record_limit_is_enforced() {
        tokio_test::block_on(async {
            let store = InMemoryEntityStore::with_max_records(
                [ModelSchema::new("product", ["name"])],
                1,
            );
            let mut fields = Map::new();
            fields.insert("name".to_string(), json!("first"));
            store.create("product", fields.clone()).await.unwrap();

            let err = store.create("product", fields).await.unwrap_err();
            assert!(matches!(err, StoreError::Backend(_)));
        });
    }
}
