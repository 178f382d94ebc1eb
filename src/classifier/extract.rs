//! JSON extraction from free-form model output.
//!
//! Hosted models rarely return bare JSON: the object is usually wrapped in
//! prose ("Sure! {...} hope that helps"). Every caller that needs structured
//! output goes through [`extract_json`], which finds the first balanced
//! `{...}` span and parses it. The outcome is an explicit enum; this
//! function never panics and never lets a parse error escape.

use serde_json::Value;

/// Result of attempting to pull a JSON object out of raw model text.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// A balanced span was found and parsed.
    Json(Value),
    /// No balanced span, or the span was not valid JSON.
    Unparsable,
}

impl Extraction {
    /// Returns the parsed value, if any.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Extraction::Json(v) => Some(v),
            Extraction::Unparsable => None,
        }
    }
}

/// Extract the first balanced `{...}` span from `text` and parse it.
///
/// Brace matching is string-aware: braces inside JSON string literals
/// (including escaped quotes) do not affect the depth count.
///
/// # Example
/// ```
/// use groupwarden::classifier::extract::{extract_json, Extraction};
///
/// let out = extract_json("Sure! {\"a\":1} thanks");
/// assert!(matches!(out, Extraction::Json(_)));
/// assert_eq!(extract_json("{broken"), Extraction::Unparsable);
/// ```
pub fn extract_json(text: &str) -> Extraction {
    let Some(span) = first_balanced_span(text) else {
        return Extraction::Unparsable;
    };
    match serde_json::from_str::<Value>(span) {
        Ok(value) if value.is_object() => Extraction::Json(value),
        _ => Extraction::Unparsable,
    }
}

/// Find the first balanced `{...}` span in `text`.
fn first_balanced_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
