//! The target schema a mapping run derives data for.
//!
//! A [`Schema`] names the target columns (the keys of `description_dict`, in
//! order), describes each in natural language, marks some as categorical, and
//! carries the structural [`ValidationSchema`] candidate tables are checked
//! against. Schemas are persisted as YAML and edited through a flat list of
//! form fields built from their own content.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::ValidationSchema;

pub const NAME_FIELD: &str = "name";
pub const VALIDATION_FIELD: &str = "validation_schema";
pub const DESCRIPTION_FIELD_PREFIX: &str = "description_dict_";
pub const CATEGORIES_FIELD_PREFIX: &str = "categories_dict_";

/// The category set of a categorical column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Categories {
    Values(Vec<String>),
    Description(String),
}

impl Categories {
    /// Text shown in an edit form: a JSON array for explicit values.
    pub fn to_field_text(&self) -> String {
        match self {
            Categories::Values(values) => {
                serde_json::to_string(values).unwrap_or_else(|_| values.join(", "))
            }
            Categories::Description(text) => text.clone(),
        }
    }

    /// Inverse of [`Categories::to_field_text`]; blank text means "not
    /// categorical".
    pub fn from_field_text(field: &str, text: &str) -> Result<Option<Self>, SchemaEditError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if trimmed.starts_with('[') {
            let values: Vec<String> =
                serde_json::from_str(trimmed).map_err(|err| SchemaEditError::InvalidCategories {
                    field: field.to_string(),
                    message: err.to_string(),
                })?;
            return Ok(Some(Categories::Values(values)));
        }
        Ok(Some(Categories::Description(trimmed.to_string())))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaEditError {
    #[error("{field}: Invalid JSON/YAML format: {message}")]
    InvalidValidationSchema { field: String, message: String },
    #[error("{field}: invalid category list: {message}")]
    InvalidCategories { field: String, message: String },
    #[error("{field}: this field is required")]
    Required { field: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub description_dict: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub categories_dict: IndexMap<String, Categories>,
    #[serde(default)]
    pub validation_schema: ValidationSchema,
}

/// One entry of a schema-driven edit form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub key: String,
    pub initial: String,
    pub label: String,
    pub help: Option<String>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description_dict: IndexMap::new(),
            categories_dict: IndexMap::new(),
            validation_schema: ValidationSchema::default(),
        }
    }

    /// Target columns in declaration order.
    pub fn columns(&self) -> Vec<String> {
        self.description_dict.keys().cloned().collect()
    }

    pub fn description(&self, column: &str) -> &str {
        self.description_dict
            .get(column)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Categories of a target column. Entries for columns outside
    /// `description_dict` are never returned.
    pub fn categories_for(&self, column: &str) -> Option<&Categories> {
        if !self.description_dict.contains_key(column) {
            return None;
        }
        self.categories_dict.get(column)
    }

    pub fn is_categorical(&self, column: &str) -> bool {
        self.categories_for(column).is_some()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema: Schema = serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        Ok(schema)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing schema YAML")
    }

    /// Replaces the rule set from raw text. On error nothing changes.
    pub fn set_validation_schema_text(&mut self, text: &str) -> Result<(), SchemaEditError> {
        let parsed = ValidationSchema::parse(text).map_err(|message| {
            SchemaEditError::InvalidValidationSchema {
                field: VALIDATION_FIELD.to_string(),
                message,
            }
        })?;
        self.validation_schema = parsed;
        Ok(())
    }

    pub fn edit_fields(&self) -> Vec<FormField> {
        let mut fields = vec![FormField {
            key: NAME_FIELD.to_string(),
            initial: self.name.clone(),
            label: "Name".to_string(),
            help: None,
        }];
        for (column, description) in &self.description_dict {
            fields.push(FormField {
                key: format!("{DESCRIPTION_FIELD_PREFIX}{column}"),
                initial: description.clone(),
                label: column.clone(),
                help: None,
            });
        }
        for (column, categories) in &self.categories_dict {
            if !self.description_dict.contains_key(column) {
                continue;
            }
            fields.push(FormField {
                key: format!("{CATEGORIES_FIELD_PREFIX}{column}"),
                initial: categories.to_field_text(),
                label: format!("{column} categories"),
                help: Some("JSON array of values, or a free-text description".to_string()),
            });
        }
        fields.push(FormField {
            key: VALIDATION_FIELD.to_string(),
            initial: self.validation_schema.to_text().unwrap_or_default(),
            label: "Data Quality Schema".to_string(),
            help: Some("YAML or JSON rule set".to_string()),
        });
        fields
    }

    /// Applies submitted form values. All edits are checked first; the schema
    /// is only modified when every field is valid.
    pub fn apply_edits(&mut self, edits: &IndexMap<String, String>) -> Result<(), SchemaEditError> {
        let mut updated = self.clone();
        for (key, value) in edits {
            if key == NAME_FIELD {
                let name = value.trim();
                if name.is_empty() {
                    return Err(SchemaEditError::Required {
                        field: NAME_FIELD.to_string(),
                    });
                }
                updated.name = name.to_string();
            } else if key == VALIDATION_FIELD {
                updated.set_validation_schema_text(value)?;
            } else if let Some(column) = key.strip_prefix(DESCRIPTION_FIELD_PREFIX) {
                updated
                    .description_dict
                    .insert(column.to_string(), value.trim().to_string());
            } else if let Some(column) = key.strip_prefix(CATEGORIES_FIELD_PREFIX) {
                match Categories::from_field_text(key, value)? {
                    Some(categories) => {
                        updated
                            .categories_dict
                            .insert(column.to_string(), categories);
                    }
                    None => {
                        updated.categories_dict.shift_remove(column);
                    }
                }
            } else {
                log::warn!("Ignoring unknown schema field '{key}'");
            }
        }
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        let mut schema = Schema::new("people");
        schema
            .description_dict
            .insert("age".into(), "person's age in years".into());
        schema
            .description_dict
            .insert("risk".into(), "risk level".into());
        schema.categories_dict.insert(
            "risk".into(),
            Categories::Values(vec!["low".into(), "high".into()]),
        );
        schema
            .categories_dict
            .insert("ghost".into(), Categories::Description("unused".into()));
        schema
    }

    #[test]
    fn categories_outside_description_dict_are_inert() {
        let schema = sample_schema();
        assert!(schema.is_categorical("risk"));
        assert!(!schema.is_categorical("ghost"));
        assert!(
            !schema
                .edit_fields()
                .iter()
                .any(|f| f.key == "categories_dict_ghost")
        );
    }

    #[test]
    fn edit_fields_follow_column_order() {
        let keys = sample_schema()
            .edit_fields()
            .into_iter()
            .map(|f| f.key)
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                "name",
                "description_dict_age",
                "description_dict_risk",
                "categories_dict_risk",
                "validation_schema",
            ]
        );
    }

    #[test]
    fn malformed_validation_schema_leaves_schema_untouched() {
        let mut schema = sample_schema();
        let before = schema.clone();
        let mut edits = IndexMap::new();
        edits.insert("name".to_string(), "renamed".to_string());
        edits.insert("validation_schema".to_string(), "{not: [valid".to_string());
        let err = schema.apply_edits(&edits).unwrap_err();
        assert!(matches!(
            err,
            SchemaEditError::InvalidValidationSchema { ref field, .. } if field == "validation_schema"
        ));
        assert_eq!(schema, before);
    }

    #[test]
    fn category_field_text_round_trips() {
        let values = Categories::Values(vec!["low".into(), "high".into()]);
        assert_eq!(
            Categories::from_field_text("f", &values.to_field_text()).unwrap(),
            Some(values)
        );
        assert_eq!(
            Categories::from_field_text("f", "  mild or severe ").unwrap(),
            Some(Categories::Description("mild or severe".into()))
        );
        assert_eq!(Categories::from_field_text("f", " ").unwrap(), None);
        assert!(Categories::from_field_text("f", "[\"open").is_err());
    }

    #[test]
    fn apply_edits_updates_and_clears_categories() {
        let mut schema = sample_schema();
        let mut edits = IndexMap::new();
        edits.insert("description_dict_age".to_string(), "age at intake".to_string());
        edits.insert("categories_dict_risk".to_string(), String::new());
        schema.apply_edits(&edits).unwrap();
        assert_eq!(schema.description("age"), "age at intake");
        assert!(!schema.is_categorical("risk"));
    }
}
