//! Shared in-memory doubles for engine tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::intent::{IntentInterpreter, InterpretError, UserIntent};
use crate::store::{EntityRecord, EntityStore, Query, StoreError};
use crate::types::ChatMessage;

/// In-memory entity store seeded per model
pub struct MemStore {
    records: RwLock<HashMap<String, Vec<EntityRecord>>>,
    writable: HashMap<String, Vec<String>>,
    next_id: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            writable: HashMap::new(),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_writable<I, S>(mut self, model: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writable.insert(
            model.to_string(),
            fields.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn seed(&self, model: &str, id: &str, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.records
            .write()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push(EntityRecord::new(id, fields));
    }

    pub fn count(&self, model: &str) -> usize {
        self.records
            .read()
            .unwrap()
            .get(model)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl EntityStore for MemStore {
    async fn find_one(&self, model: &str, query: &Query) -> Result<Option<EntityRecord>, StoreError> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(model)
            .and_then(|rs| rs.iter().find(|r| query.matches(r)).cloned()))
    }

    async fn find_many(&self, model: &str, query: &Query) -> Result<Vec<EntityRecord>, StoreError> {
        let records = self.records.read().unwrap();
        let mut found: Vec<EntityRecord> = records
            .get(model)
            .map(|rs| rs.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        if query.limit > 0 {
            found.truncate(query.limit);
        }
        Ok(found)
    }

    async fn create(&self, model: &str, fields: Map<String, Value>) -> Result<EntityRecord, StoreError> {
        let id = format!("gen-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = EntityRecord::new(id, fields);
        self.records
            .write()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn writable_fields(&self, model: &str) -> Result<Vec<String>, StoreError> {
        self.writable
            .get(model)
            .cloned()
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
    }
}

/// Entity store that fails every call
pub struct FailingStore;

#[async_trait]
impl EntityStore for FailingStore {
    async fn find_one(&self, _: &str, _: &Query) -> Result<Option<EntityRecord>, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn find_many(&self, _: &str, _: &Query) -> Result<Vec<EntityRecord>, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn create(&self, _: &str, _: Map<String, Value>) -> Result<EntityRecord, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn writable_fields(&self, _: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }
}

/// Keyword-only intent interpreter, enough to script conversations
pub struct KeywordIntents;

#[async_trait]
impl IntentInterpreter for KeywordIntents {
    async fn interpret(
        &self,
        text: &str,
        _history: &[ChatMessage],
    ) -> Result<UserIntent, InterpretError> {
        let lowered = text.trim().to_lowercase();
        if let Ok(n) = lowered.parse::<usize>() {
            if let Some(index) = n.checked_sub(1) {
                return Ok(UserIntent::Select { index });
            }
        }
        Ok(match lowered.as_str() {
            "yes" | "y" | "sure" => UserIntent::Confirm,
            "no" | "n" | "cancel" => UserIntent::Decline,
            "create" | "new" => UserIntent::Create,
            _ if lowered.starts_with("replace") || lowered.starts_with("change") => {
                UserIntent::Modify
            }
            _ => UserIntent::Unclear,
        })
    }
}

pub fn arc_mem_store() -> Arc<MemStore> {
    Arc::new(
        MemStore::new()
            .with_writable("product", ["name", "price", "sku", "workspace_id"])
            .with_writable("customer", ["name", "email", "workspace_id"]),
    )
}
