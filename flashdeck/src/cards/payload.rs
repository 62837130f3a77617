//! Card group payloads: a map from field key to text.

use std::collections::BTreeMap;

use crate::errors::{Error, Result};
use crate::types::Direction;

use super::fields::{FOREIGN_PHRASE, FieldDefinition, NATIVE_PHRASE};

pub type Payload = BTreeMap<String, String>;

/// Keep only the schema's keys, trimmed. Keys missing from `raw` become empty strings.
pub fn normalize_payload(schema: &[FieldDefinition], raw: &BTreeMap<String, Option<String>>) -> Payload {
    schema
        .iter()
        .map(|field| {
            let value = raw
                .get(&field.key)
                .and_then(|v| v.as_deref())
                .map(str::trim)
                .unwrap_or_default();
            (field.key.clone(), value.to_string())
        })
        .collect()
}

/// Every required field except the native phrase must be filled in.
pub fn validate_payload(schema: &[FieldDefinition], payload: &Payload) -> Result<()> {
    let missing: Vec<&str> = schema
        .iter()
        .filter(|field| field.required && field.key != NATIVE_PHRASE)
        .filter(|field| payload.get(&field.key).is_none_or(|v| v.trim().is_empty()))
        .map(|field| field.label.as_str())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::BadRequest {
            message: format!("Missing required fields: {}", missing.join(", ")),
        })
    }
}

/// The seed phrase that identifies a card group within its deck.
pub fn foreign_phrase(payload: &Payload) -> &str {
    payload.get(FOREIGN_PHRASE).map(|v| v.trim()).unwrap_or_default()
}

pub fn field_is_empty(payload: &Payload, key: &str) -> bool {
    payload.get(key).is_none_or(|v| v.trim().is_empty())
}

/// Deduplicate and order requested directions. An empty request falls back to `fallback`.
pub fn normalize_directions(requested: &[Direction], fallback: &[Direction]) -> Vec<Direction> {
    let source = if requested.is_empty() { fallback } else { requested };
    Direction::ALL.into_iter().filter(|d| source.contains(d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::fields::default_field_schema;

    fn raw(entries: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_normalize_trims_and_drops_unknown_keys() {
        let schema = default_field_schema();
        let payload = normalize_payload(
            &schema,
            &raw(&[("foreign_phrase", Some("  hus ")), ("stale", Some("x")), ("native_phrase", None)]),
        );
        assert_eq!(payload["foreign_phrase"], "hus");
        assert_eq!(payload["native_phrase"], "");
        assert_eq!(payload["example_sentence"], "");
        assert!(!payload.contains_key("stale"));
    }

    #[test]
    fn test_validate_requires_foreign_phrase() {
        let schema = default_field_schema();
        let payload = normalize_payload(&schema, &raw(&[("native_phrase", Some("house"))]));
        let err = validate_payload(&schema, &payload).unwrap_err();
        assert_eq!(err.user_message(), "Missing required fields: Foreign expression");
    }

    #[test]
    fn test_validate_ignores_required_native_phrase() {
        let mut schema = default_field_schema();
        schema[1].required = true;
        let payload = normalize_payload(&schema, &raw(&[("foreign_phrase", Some("hus"))]));
        assert!(validate_payload(&schema, &payload).is_ok());
    }

    #[test]
    fn test_directions_default_and_dedupe() {
        assert_eq!(normalize_directions(&[], &Direction::ALL), vec![Direction::Forward, Direction::Backward]);
        assert_eq!(
            normalize_directions(&[Direction::Backward, Direction::Backward], &Direction::ALL),
            vec![Direction::Backward]
        );
    }
}
