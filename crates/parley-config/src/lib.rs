//! parley-config - static resolution catalog
//!
//! Hosts declare their entity-resolution policies in one YAML document:
//! per-field `ResolutionConfig`s, subflow declarations, and friendly entity
//! names. The catalog is loaded once at startup, validated eagerly, and
//! immutable afterwards.

mod loader;

pub use loader::{load_catalog, parse_catalog, ConfigError};

use std::collections::HashMap;

use serde::Deserialize;

use parley_core::subflow::{SubflowRegistry, SubflowSpec};
use parley_core::types::{DisplayNames, ResolutionConfig};

/// The full resolution catalog for one host application
#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionCatalog {
    /// Catalog schema version
    pub version: u32,
    /// Per-field resolution policies, keyed by field name
    #[serde(default)]
    pub fields: HashMap<String, ResolutionConfig>,
    /// Nested creation workflow declarations
    #[serde(default)]
    pub subflows: Vec<SubflowSpec>,
    /// Friendly entity names, keyed by model
    #[serde(default)]
    pub display_names: HashMap<String, String>,
}

impl ResolutionCatalog {
    /// Resolution policy for a field
    pub fn field_config(&self, field: &str) -> Option<&ResolutionConfig> {
        self.fields.get(field)
    }

    /// Build the subflow registry declared by this catalog
    pub fn subflow_registry(&self) -> SubflowRegistry {
        let mut registry = SubflowRegistry::new();
        for spec in &self.subflows {
            registry.register(spec.clone());
        }
        registry
    }

    /// Build the friendly-name table declared by this catalog
    pub fn display_names(&self) -> DisplayNames {
        let mut names = DisplayNames::new();
        for (model, name) in &self.display_names {
            names.insert(model, name);
        }
        names
    }
}
