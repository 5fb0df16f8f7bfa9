use std::fmt::Debug;

use serde::Serialize;
use serde_json::{Map, Value, json};

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_TERMS: [&str; 5] = ["password", "token", "key", "secret", "auth"];

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_TERMS.iter().any(|term| key.contains(term))
}

/// Serializes and redacts a payload. Values that cannot be serialized
/// become the `unserializable` placeholder instead of being dropped.
pub fn sanitize_payload<T: Serialize + Debug + ?Sized>(data: &T) -> Value {
    match serde_json::to_value(data) {
        Ok(value) => sanitize(value),
        Err(_) => json!({
            "error": "unserializable",
            "original": redact_debug(&format!("{data:?}")),
        }),
    }
}

/// Masks the value of every sensitive `field: value` or `"key": value`
/// pair in `Debug` output. Values end at a comma or closing bracket at
/// their own nesting depth.
fn redact_debug(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let token_end = if c == '"' {
            quoted_end(&chars, i)
        } else if c.is_alphanumeric() || c == '_' {
            let mut end = i;
            while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                end += 1;
            }
            end
        } else {
            out.push(c);
            i += 1;
            continue;
        };

        let token: String = chars[i..token_end].iter().collect();
        out.push_str(&token);
        i = token_end;

        if is_sensitive_key(token.trim_matches('"')) {
            if let Some(value_start) = separator_end(&chars, i) {
                out.extend(&chars[i..value_start]);
                out.push_str(REDACTED);
                i = value_end(&chars, value_start);
            }
        }
    }

    out
}

/// Index just past the closing quote, honouring backslash escapes
fn quoted_end(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '"' => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Start of the value when `at` is followed by `:` (not `::`) or `=`
fn separator_end(chars: &[char], at: usize) -> Option<usize> {
    let mut i = at;
    while i < chars.len() && chars[i] == ' ' {
        i += 1;
    }
    let is_separator = match chars.get(i) {
        Some(':') => chars.get(i + 1) != Some(&':'),
        Some('=') => true,
        _ => false,
    };
    if !is_separator {
        return None;
    }
    i += 1;
    while i < chars.len() && chars[i] == ' ' {
        i += 1;
    }
    Some(i)
}

fn value_end(chars: &[char], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '"' => {
                i = quoted_end(chars, i);
                continue;
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                if depth == 0 {
                    return i;
                }
                depth -= 1;
            }
            ',' if depth == 0 => return i,
            _ => {}
        }
        i += 1;
    }
    chars.len()
}

/// Replaces the value of every sensitive key, at any depth.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let value = if is_sensitive_key(&key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize(value)
                    };
                    (key, value)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        other => other,
    }
}
