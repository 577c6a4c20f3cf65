//! Agent configuration schema
//!
//! The downstream agent runtime only accepts documents that pass
//! [`validate_agent_config`]. All violations are collected so a user can fix
//! a record in one round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;

/// Languages the agent runtime can respond in
pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "vi"];

/// Maximum length of the `name` field (chars, after trimming)
pub const MAX_NAME_LEN: usize = 128;

/// Maximum length of the `description` field (chars)
pub const MAX_DESCRIPTION_LEN: usize = 2048;

const REQUIRED_FIELDS: &[&str] = &["name", "language", "llm_id", "prompt_id"];
const SINGLE_REFERENCES: &[&str] = &["llm_id", "prompt_id", "image_recognizer_id"];
const LIST_REFERENCES: &[&str] = &["retriever_ids", "tool_ids", "mcp_server_ids"];
const KNOWN_FIELDS: &[&str] = &[
    "name",
    "description",
    "language",
    "llm_id",
    "prompt_id",
    "image_recognizer_id",
    "retriever_ids",
    "tool_ids",
    "mcp_server_ids",
];

/// A single schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    /// Offending field
    pub field: String,
    /// Human-readable reason
    pub reason: String,
}

impl SchemaViolation {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Validate record content against the agent configuration schema
///
/// # Errors
/// Returns every violation found, in field order
pub fn validate_agent_config(content: &Map<String, JsonValue>) -> Result<(), Vec<SchemaViolation>> {
    let mut violations = Vec::new();

    let mut unknown: Vec<_> = content
        .keys()
        .filter(|k| !KNOWN_FIELDS.contains(&k.as_str()))
        .collect();
    unknown.sort();
    for field in unknown {
        violations.push(SchemaViolation::new(field.as_str(), "unknown field"));
    }

    for field in REQUIRED_FIELDS {
        if !content.contains_key(*field) {
            violations.push(SchemaViolation::new(*field, "required field is missing"));
        }
    }

    match content.get("name") {
        Some(JsonValue::String(name)) => {
            let len = name.trim().chars().count();
            if len == 0 {
                violations.push(SchemaViolation::new("name", "must not be blank"));
            } else if len > MAX_NAME_LEN {
                violations.push(SchemaViolation::new(
                    "name",
                    format!("must be at most {MAX_NAME_LEN} characters"),
                ));
            }
        }
        Some(_) => violations.push(SchemaViolation::new("name", "must be a string")),
        None => {}
    }

    match content.get("description") {
        Some(JsonValue::String(text)) if text.chars().count() > MAX_DESCRIPTION_LEN => {
            violations.push(SchemaViolation::new(
                "description",
                format!("must be at most {MAX_DESCRIPTION_LEN} characters"),
            ));
        }
        Some(JsonValue::String(_)) | None => {}
        Some(_) => violations.push(SchemaViolation::new("description", "must be a string")),
    }

    match content.get("language") {
        Some(JsonValue::String(lang)) if SUPPORTED_LANGUAGES.contains(&lang.as_str()) => {}
        Some(JsonValue::String(lang)) => violations.push(SchemaViolation::new(
            "language",
            format!(
                "unsupported language '{lang}', expected one of {}",
                SUPPORTED_LANGUAGES.join(", ")
            ),
        )),
        Some(_) => violations.push(SchemaViolation::new("language", "must be a string")),
        None => {}
    }

    // id -> first role that claimed it
    let mut claimed: HashMap<&str, &str> = HashMap::new();

    for field in SINGLE_REFERENCES {
        match content.get(*field) {
            Some(JsonValue::String(id)) if id.trim().is_empty() => {
                violations.push(SchemaViolation::new(*field, "reference id must not be empty"));
            }
            Some(JsonValue::String(id)) => {
                if let Some(role) = claimed.insert(id.as_str(), *field) {
                    violations.push(SchemaViolation::new(
                        *field,
                        format!("reference id '{id}' is already used as {role}"),
                    ));
                }
            }
            Some(_) => violations.push(SchemaViolation::new(*field, "must be a string")),
            None => {}
        }
    }

    for field in LIST_REFERENCES {
        match content.get(*field) {
            Some(JsonValue::Array(items)) => {
                let mut seen = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let Some(id) = item.as_str() else {
                        violations.push(SchemaViolation::new(
                            format!("{field}[{i}]"),
                            "must be a string",
                        ));
                        continue;
                    };
                    if id.trim().is_empty() {
                        violations.push(SchemaViolation::new(
                            format!("{field}[{i}]"),
                            "reference id must not be empty",
                        ));
                    } else if seen.contains(&id) {
                        violations.push(SchemaViolation::new(
                            format!("{field}[{i}]"),
                            format!("duplicate reference id '{id}'"),
                        ));
                    } else {
                        seen.push(id);
                        if let Some(role) = claimed.insert(id, *field) {
                            violations.push(SchemaViolation::new(
                                format!("{field}[{i}]"),
                                format!("reference id '{id}' is already used as {role}"),
                            ));
                        }
                    }
                }
            }
            Some(_) => violations.push(SchemaViolation::new(*field, "must be an array of ids")),
            None => {}
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Map<String, JsonValue> {
        match json!({
            "name": "Support agent",
            "description": "Answers questions",
            "language": "en",
            "llm_id": "llm-1",
            "prompt_id": "prompt-1",
            "retriever_ids": ["ret-1", "ret-2"],
            "tool_ids": ["tool-1"],
            "mcp_server_ids": []
        }) {
            JsonValue::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn fields(result: Result<(), Vec<SchemaViolation>>) -> Vec<String> {
        result.unwrap_err().into_iter().map(|v| v.field).collect()
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate_agent_config(&valid()).is_ok());
    }

    #[test]
    fn reports_missing_required_fields() {
        let mut content = valid();
        content.remove("llm_id");
        content.remove("language");
        assert_eq!(fields(validate_agent_config(&content)), vec!["language", "llm_id"]);
    }

    #[test]
    fn rejects_unknown_language() {
        let mut content = valid();
        content.insert("language".into(), json!("fr"));
        assert_eq!(fields(validate_agent_config(&content)), vec!["language"]);
    }

    #[test]
    fn rejects_unknown_fields() {
        let mut content = valid();
        content.insert("temperature".into(), json!(0.2));
        assert_eq!(fields(validate_agent_config(&content)), vec!["temperature"]);
    }

    #[test]
    fn rejects_duplicate_list_entries() {
        let mut content = valid();
        content.insert("tool_ids".into(), json!(["t", "t"]));
        assert_eq!(fields(validate_agent_config(&content)), vec!["tool_ids[1]"]);
    }

    #[test]
    fn rejects_id_shared_between_roles() {
        let mut content = valid();
        content.insert("prompt_id".into(), json!("llm-1"));
        let violations = validate_agent_config(&content).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "prompt_id");
        assert!(violations[0].reason.contains("llm_id"));
    }

    #[test]
    fn rejects_blank_name_and_wrong_types() {
        let mut content = valid();
        content.insert("name".into(), json!("   "));
        content.insert("retriever_ids".into(), json!("ret-1"));
        assert_eq!(
            fields(validate_agent_config(&content)),
            vec!["name", "retriever_ids"]
        );
    }
}
