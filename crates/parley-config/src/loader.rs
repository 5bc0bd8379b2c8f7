//! Catalog loading and validation.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use parley_core::subflow::SubflowSpec;
use parley_core::types::ResolutionConfig;

use crate::ResolutionCatalog;

/// Catalog loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid catalog: {0}")]
    Invalid(String),
}

/// Load and validate a resolution catalog from a YAML file.
pub fn load_catalog(path: &Path) -> Result<ResolutionCatalog, ConfigError> {
    let content = fs::read_to_string(path)?;
    let catalog = parse_catalog(&content)?;
    info!(
        path = %path.display(),
        fields = catalog.fields.len(),
        subflows = catalog.subflows.len(),
        "resolution catalog loaded"
    );
    Ok(catalog)
}

/// Parse and validate a resolution catalog from YAML text.
pub fn parse_catalog(content: &str) -> Result<ResolutionCatalog, ConfigError> {
    let catalog: ResolutionCatalog = serde_yaml::from_str(content)?;
    validate_catalog(&catalog)?;
    Ok(catalog)
}

fn validate_catalog(catalog: &ResolutionCatalog) -> Result<(), ConfigError> {
    if catalog.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    let subflow_ids: HashSet<&str> = catalog.subflows.iter().map(|s| s.id.as_str()).collect();
    if subflow_ids.len() != catalog.subflows.len() {
        return Err(ConfigError::Invalid(
            "subflow ids must be unique".to_string(),
        ));
    }

    for (field, config) in &catalog.fields {
        validate_field(field, config, &subflow_ids)?;
    }
    for spec in &catalog.subflows {
        validate_subflow(spec)?;
    }

    Ok(())
}

fn validate_field(
    field: &str,
    config: &ResolutionConfig,
    subflow_ids: &HashSet<&str>,
) -> Result<(), ConfigError> {
    if config.model.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "fields.{}.model must not be empty",
            field
        )));
    }
    if config.identifier_field.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "fields.{}.identifier_field must not be empty",
            field
        )));
    }
    if config.ask_on_duplicate && !config.check_duplicates {
        return Err(ConfigError::Invalid(format!(
            "fields.{}.ask_on_duplicate requires check_duplicates",
            field
        )));
    }
    if let Some(quantity_field) = &config.quantity_field {
        if quantity_field.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "fields.{}.quantity_field must not be empty when set",
                field
            )));
        }
    }
    if let Some(subflow) = &config.subflow {
        if !subflow_ids.contains(subflow.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "fields.{}.subflow '{}' not declared",
                field, subflow
            )));
        }
    }
    Ok(())
}

fn validate_subflow(spec: &SubflowSpec) -> Result<(), ConfigError> {
    if spec.id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "subflow id must not be empty".to_string(),
        ));
    }
    if spec.entity_name.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "subflow '{}' entity_name must not be empty",
            spec.id
        )));
    }
    if spec.model.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "subflow '{}' model must not be empty",
            spec.id
        )));
    }
    if spec.steps.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "subflow '{}' must declare at least one step",
            spec.id
        )));
    }

    let mut names = HashSet::new();
    for step in &spec.steps {
        if step.name.trim().is_empty() || step.field.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "subflow '{}' steps must have a name and field",
                spec.id
            )));
        }
        if !names.insert(step.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "subflow '{}' step '{}' declared twice",
                spec.id, step.name
            )));
        }
        if step.prompt.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "subflow '{}' step '{}' must have a prompt",
                spec.id, step.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
version: 1
display_names:
  product: Product
fields:
  customer:
    model: customer
    search_fields: [email, name]
    check_duplicates: true
    ask_on_duplicate: true
  items:
    model: product
    quantity_field: quantity
    interactive: true
    subflow: create_product
    include_fields: [price]
subflows:
  - id: create_product
    entity_name: product
    model: product
    steps:
      - name: price
        field: price
        prompt: "What is the price?"
"#;

    #[test]
    fn test_valid_catalog_parses() {
        let catalog = parse_catalog(CATALOG).unwrap();
        assert_eq!(catalog.version, 1);
        assert_eq!(catalog.fields.len(), 2);
        assert!(catalog.field_config("customer").unwrap().check_duplicates);
        assert!(catalog.subflow_registry().get("create_product").is_some());

        let items = catalog.field_config("items").unwrap();
        assert_eq!(items.quantity_field.as_deref(), Some("quantity"));
        assert_eq!(items.identifier_field, "name");
    }

    #[test]
    fn test_unknown_subflow_reference_is_rejected() {
        let broken = CATALOG.replace("subflow: create_product", "subflow: create_gadget");
        let err = parse_catalog(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_ask_on_duplicate_requires_check_duplicates() {
        let broken = CATALOG.replace("check_duplicates: true", "check_duplicates: false");
        let err = parse_catalog(&broken).unwrap_err();
        assert!(err.to_string().contains("ask_on_duplicate"));
    }

    #[test]
    fn test_duplicate_step_names_are_rejected() {
        let broken = CATALOG.replace(
            "      - name: price\n        field: price\n        prompt: \"What is the price?\"",
            "      - name: price\n        field: price\n        prompt: \"What is the price?\"\n      - name: price\n        field: sku\n        prompt: \"What is the SKU?\"",
        );
        let err = parse_catalog(&broken).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }
}
