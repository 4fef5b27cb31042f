//! JSON key transformation between camelCase and snake_case.
//!
//! The TimeTree API sends and expects camelCase object keys on the wire;
//! everything inside this crate works with snake_case. Both transforms walk
//! arbitrarily nested objects and arrays; values are never touched.

use serde_json::{Map, Value};

fn to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() && prev_lower_or_digit {
            out.push('_');
        }
        out.push(ch.to_ascii_lowercase());
        prev_lower_or_digit = ch.is_ascii_lowercase() || ch.is_ascii_digit();
    }
    out
}

fn to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '_' {
            match chars.peek() {
                Some(next) if next.is_ascii_lowercase() => {
                    out.push(next.to_ascii_uppercase());
                    chars.next();
                }
                _ => out.push('_'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn map_keys(value: Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(entries) => {
            let mut out = Map::with_capacity(entries.len());
            for (key, val) in entries {
                out.insert(rename(&key), map_keys(val, rename));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| map_keys(v, rename)).collect())
        }
        other => other,
    }
}

/// Recursively convert all object keys from camelCase to snake_case.
pub fn decamelize(value: Value) -> Value {
    map_keys(value, &to_snake)
}

/// Recursively convert all object keys from snake_case to camelCase.
pub fn camelize(value: Value) -> Value {
    map_keys(value, &to_camel)
}
