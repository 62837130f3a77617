//! Field library and deck field schemas.
//!
//! A deck's schema is an ordered list of [`FieldDefinition`]s. The four built-in fields live in
//! [`FIELD_LIBRARY`]; anything else is a custom field, generated only when the deck carries a
//! generation prompt under the field's own key.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use utoipa::ToSchema;

use crate::errors::{Error, Result};

pub const FOREIGN_PHRASE: &str = "foreign_phrase";
pub const NATIVE_PHRASE: &str = "native_phrase";
pub const DICTIONARY_ENTRY: &str = "dictionary_entry";
pub const EXAMPLE_SENTENCE: &str = "example_sentence";

/// A built-in field with its defaults.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryField {
    pub key: &'static str,
    pub label: &'static str,
    pub required: bool,
    pub description: &'static str,
    pub default_auto_generate: bool,
    pub supports_generation: bool,
    pub default_enabled: bool,
    pub allow_disable: bool,
}

pub const FIELD_LIBRARY: [LibraryField; 4] = [
    LibraryField {
        key: FOREIGN_PHRASE,
        label: "Foreign expression",
        required: true,
        description: "Phrase in the language you are learning.",
        default_auto_generate: false,
        supports_generation: false,
        default_enabled: true,
        allow_disable: false,
    },
    LibraryField {
        key: NATIVE_PHRASE,
        label: "Native expression",
        required: false,
        description: "Translation in your native language.",
        default_auto_generate: true,
        supports_generation: true,
        default_enabled: true,
        allow_disable: true,
    },
    LibraryField {
        key: DICTIONARY_ENTRY,
        label: "Dictionary / Notes",
        required: false,
        description: "Optional dictionary entry or grammatical notes.",
        default_auto_generate: true,
        supports_generation: true,
        default_enabled: true,
        allow_disable: true,
    },
    LibraryField {
        key: EXAMPLE_SENTENCE,
        label: "Example sentence",
        required: false,
        description: "Short usage sentence in the target language.",
        default_auto_generate: true,
        supports_generation: true,
        default_enabled: true,
        allow_disable: true,
    },
];

pub fn library_field(key: &str) -> Option<&'static LibraryField> {
    FIELD_LIBRARY.iter().find(|field| field.key == key)
}

/// One validated entry of a deck's field schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldDefinition {
    pub key: String,
    pub label: String,
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auto_generate: bool,
}

/// Schema entry as submitted by clients. Missing attributes are filled from the library.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct FieldDefinitionInput {
    pub key: Option<String>,
    pub label: Option<String>,
    pub required: Option<bool>,
    pub description: Option<String>,
    #[serde(alias = "autoGenerate")]
    pub auto_generate: Option<bool>,
}

impl From<FieldDefinition> for FieldDefinitionInput {
    fn from(field: FieldDefinition) -> Self {
        Self {
            key: Some(field.key),
            label: Some(field.label),
            required: Some(field.required),
            description: Some(field.description),
            auto_generate: Some(field.auto_generate),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn normalize_field(key: &str, entry: &FieldDefinitionInput) -> FieldDefinition {
    let base = library_field(key);
    FieldDefinition {
        key: key.to_string(),
        label: non_empty(entry.label.as_deref())
            .or(base.map(|b| b.label))
            .unwrap_or(key)
            .to_string(),
        // The seed field is always required
        required: key == FOREIGN_PHRASE || entry.required.unwrap_or(base.is_some_and(|b| b.required)),
        description: non_empty(entry.description.as_deref())
            .or(base.map(|b| b.description))
            .unwrap_or_default()
            .to_string(),
        auto_generate: base.is_none_or(|b| b.supports_generation)
            && entry.auto_generate.unwrap_or(base.is_some_and(|b| b.default_auto_generate)),
    }
}

/// Schema used for new decks: every library field enabled by default.
pub fn default_field_schema() -> Vec<FieldDefinition> {
    FIELD_LIBRARY
        .iter()
        .filter(|field| field.default_enabled)
        .map(|field| normalize_field(field.key, &FieldDefinitionInput::default()))
        .collect()
}

/// Normalise a client-submitted schema.
///
/// Entries without a key are dropped, attributes missing from an entry come from the library,
/// and `foreign_phrase` is inserted first when absent. Duplicate keys are rejected.
pub fn normalize_field_schema(schema: Option<&[FieldDefinitionInput]>) -> Result<Vec<FieldDefinition>> {
    let Some(schema) = schema else {
        return Ok(default_field_schema());
    };

    let mut normalized = Vec::with_capacity(schema.len() + 1);
    let mut seen = HashSet::new();
    for entry in schema {
        let Some(key) = non_empty(entry.key.as_deref()) else {
            continue;
        };
        if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::BadRequest {
                message: format!("Field key '{key}' may only contain letters, digits and underscores."),
            });
        }
        if !seen.insert(key.to_string()) {
            return Err(Error::BadRequest {
                message: format!("Field '{key}' appears more than once."),
            });
        }
        normalized.push(normalize_field(key, entry));
    }

    if !seen.contains(FOREIGN_PHRASE) {
        normalized.insert(0, normalize_field(FOREIGN_PHRASE, &FieldDefinitionInput::default()));
    }

    Ok(normalized)
}

/// Re-normalise a schema read from storage. Stored schemas were validated on write, so this
/// only fills attributes added since and restores the seed field.
pub fn hydrate_field_schema(stored: Vec<FieldDefinition>) -> Vec<FieldDefinition> {
    let inputs: Vec<FieldDefinitionInput> = stored.into_iter().map(Into::into).collect();
    normalize_field_schema(Some(&inputs)).unwrap_or_else(|_| default_field_schema())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(key: &str) -> FieldDefinitionInput {
        FieldDefinitionInput {
            key: Some(key.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_schema_has_library_order() {
        let schema = default_field_schema();
        let keys: Vec<_> = schema.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec![FOREIGN_PHRASE, NATIVE_PHRASE, DICTIONARY_ENTRY, EXAMPLE_SENTENCE]);
        assert!(schema[0].required);
        assert!(!schema[0].auto_generate);
        assert!(schema[1].auto_generate);
    }

    #[test]
    fn test_missing_seed_field_is_inserted_first() {
        let schema = normalize_field_schema(Some(&[input(NATIVE_PHRASE), input("gender")])).unwrap();
        let keys: Vec<_> = schema.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec![FOREIGN_PHRASE, NATIVE_PHRASE, "gender"]);
    }

    #[test]
    fn test_library_defaults_fill_missing_attributes() {
        let schema = normalize_field_schema(Some(&[input(DICTIONARY_ENTRY)])).unwrap();
        let dictionary = &schema[1];
        assert_eq!(dictionary.label, "Dictionary / Notes");
        assert_eq!(dictionary.description, "Optional dictionary entry or grammatical notes.");
        assert!(dictionary.auto_generate);
    }

    #[test]
    fn test_custom_field_uses_key_as_label() {
        let schema = normalize_field_schema(Some(&[input("gender")])).unwrap();
        let custom = &schema[1];
        assert_eq!(custom.label, "gender");
        assert!(!custom.required);
        assert!(!custom.auto_generate);
    }

    #[test]
    fn test_seed_field_cannot_be_generated_or_optional() {
        let entry = FieldDefinitionInput {
            key: Some(FOREIGN_PHRASE.to_string()),
            required: Some(false),
            auto_generate: Some(true),
            ..Default::default()
        };
        let schema = normalize_field_schema(Some(&[entry])).unwrap();
        assert!(schema[0].required);
        assert!(!schema[0].auto_generate);
    }

    #[test]
    fn test_entries_without_key_are_dropped() {
        let schema = normalize_field_schema(Some(&[FieldDefinitionInput::default(), input("  ")])).unwrap();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0].key, FOREIGN_PHRASE);
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let result = normalize_field_schema(Some(&[input(NATIVE_PHRASE), input(NATIVE_PHRASE)]));
        assert!(matches!(result, Err(Error::BadRequest { .. })));
    }

    #[test]
    fn test_none_yields_default_schema() {
        assert_eq!(normalize_field_schema(None).unwrap(), default_field_schema());
    }
}
