//! ResolutionConfig - per-field resolution policy
//!
//! Configs are produced by the static catalog loader and are immutable for
//! the duration of one resolution run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_identifier_field() -> String {
    "name".to_string()
}

/// Per-field resolution policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Entity-type identifier in the entity store
    pub model: String,
    /// Match fields in priority order
    #[serde(default)]
    pub search_fields: Vec<String>,
    /// Field holding the human identifier (default "name")
    #[serde(default = "default_identifier_field")]
    pub identifier_field: String,
    /// Field holding per-item quantity, for batch items
    #[serde(default)]
    pub quantity_field: Option<String>,
    /// Whether creation is driven interactively
    #[serde(default)]
    pub interactive: bool,
    /// Whether creation must be confirmed first
    #[serde(default)]
    pub confirm_before_create: bool,
    /// Whether to run fuzzy duplicate detection
    #[serde(default)]
    pub check_duplicates: bool,
    /// Whether duplicate hits are presented to the user for a choice
    #[serde(default)]
    pub ask_on_duplicate: bool,
    /// Equality scoping predicate applied to every search and create
    #[serde(default)]
    pub filters: Map<String, Value>,
    /// Nested creation workflow identifier
    #[serde(default)]
    pub subflow: Option<String>,
    /// Extra fields projected from matched/created entities
    #[serde(default)]
    pub include_fields: Vec<String>,
    /// Fields always copied from a matched entity (default: id + identifier)
    #[serde(default)]
    pub base_fields: Vec<String>,
    /// Subflow-collected fields merged back into a pending batch item
    #[serde(default)]
    pub required_item_fields: Vec<String>,
    /// Presentation name, e.g. "Customer"
    #[serde(default)]
    pub display_name: Option<String>,
    /// Informal presentation name, e.g. "customer"
    #[serde(default)]
    pub friendly_name: Option<String>,
    /// Static field defaults applied on non-interactive creation
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

impl ResolutionConfig {
    /// Create a minimal config for a model
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            search_fields: Vec::new(),
            identifier_field: default_identifier_field(),
            quantity_field: None,
            interactive: false,
            confirm_before_create: false,
            check_duplicates: false,
            ask_on_duplicate: false,
            filters: Map::new(),
            subflow: None,
            include_fields: Vec::new(),
            base_fields: Vec::new(),
            required_item_fields: Vec::new(),
            display_name: None,
            friendly_name: None,
            defaults: Map::new(),
        }
    }

    /// Set the search fields
    pub fn with_search_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Enable duplicate detection with user choice
    pub fn with_duplicate_check(mut self) -> Self {
        self.check_duplicates = true;
        self.ask_on_duplicate = true;
        self
    }

    /// Enable interactive, confirm-gated creation
    pub fn with_interactive_create(mut self) -> Self {
        self.interactive = true;
        self.confirm_before_create = true;
        self
    }

    /// Set the nested creation subflow
    pub fn with_subflow(mut self, subflow: impl Into<String>) -> Self {
        self.subflow = Some(subflow.into());
        self
    }

    /// Set the projected fields
    pub fn with_include_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Fields in priority order used to locate a search value inside a
    /// structured identifier
    pub fn search_priority(&self) -> &[String] {
        &self.search_fields
    }

    /// Base fields copied from a matched entity
    pub fn effective_base_fields(&self) -> Vec<String> {
        if self.base_fields.is_empty() {
            vec!["id".to_string(), self.identifier_field.clone()]
        } else {
            self.base_fields.clone()
        }
    }
}

/// Injected lookup table of friendly entity names, owned by the engine
/// rather than a process-wide static.
#[derive(Debug, Clone, Default)]
pub struct DisplayNames {
    names: std::collections::HashMap<String, String>,
}

impl DisplayNames {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a friendly name for a model
    pub fn insert(&mut self, model: impl Into<String>, name: impl Into<String>) {
        self.names.insert(model.into(), name.into());
    }

    /// Presentation name for a config: explicit display/friendly name,
    /// then the injected table, then the raw model identifier.
    pub fn display_for(&self, config: &ResolutionConfig) -> String {
        if let Some(name) = &config.display_name {
            return name.clone();
        }
        if let Some(name) = &config.friendly_name {
            return name.clone();
        }
        self.names
            .get(&config.model)
            .cloned()
            .unwrap_or_else(|| config.model.clone())
    }
}
