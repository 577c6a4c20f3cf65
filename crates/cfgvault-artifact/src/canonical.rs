//! Canonical JSON encoding
//!
//! Rules (fixed; changing any of them changes every fingerprint):
//!
//! - UTF-8 output, no insignificant whitespace
//! - object keys sorted by their UTF-8 byte sequence
//! - strings escaped exactly like `serde_json` does (`"`, `\\`, control
//!   characters; `/` and non-ASCII are emitted verbatim)
//! - numbers in `serde_json`'s shortest decimal form
//! - `true`, `false`, `null` literals

use serde_json::Value as JsonValue;

/// Encode `value` canonically into `out`
pub fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        JsonValue::String(s) => write_string(s, out),
        JsonValue::Number(n) => out.push_str(&n.to_string()),
        JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JsonValue::Null => out.push_str("null"),
    }
}

/// Canonical JSON string of `value`
#[must_use]
pub fn to_canonical_string(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_string(s: &str, out: &mut String) {
    // serializing a &str cannot fail
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => out.push_str("\"\""),
    }
}
