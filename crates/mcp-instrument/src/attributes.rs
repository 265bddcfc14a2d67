//! Span attribute helpers
//!
//! Utilities for turning loosely-typed attribute maps into values the tracing
//! backend accepts, plus the `tracing` span used to correlate handler logs with
//! an operation.

use crate::span_attributes::*;
use crate::tracker::OperationContext;
use opentelemetry::{Array, KeyValue, StringValue};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::{Span, debug, info_span};

/// Maximum attribute value length before truncation
pub const MAX_ATTRIBUTE_LENGTH: usize = 1024;

/// Maximum attribute key length
pub const MAX_KEY_LENGTH: usize = 255;

/// Placeholder written in place of sensitive values
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "api-key",
    "authorization",
    "cookie",
    "private_key",
];

fn key_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").ok())
        .as_ref()
}

/// Check whether `key` is usable as an attribute key
#[must_use]
pub fn is_valid_attribute_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LENGTH
        && key_pattern().is_some_and(|pattern| pattern.is_match(key))
}

/// Truncate to at most `max_chars` characters, appending `...` when shortened
#[must_use]
pub fn truncate_value(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &value[..byte_index]),
        None => value.to_string(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

/// Make an attribute map safe to attach to a span
///
/// Invalid keys and nulls are dropped and sensitive keys are redacted. Arrays of
/// one scalar type are kept with each string element truncated; objects and
/// mixed arrays are flattened to JSON text. Long strings are truncated.
#[must_use]
pub fn sanitize_attributes(attributes: &Map<String, Value>) -> Map<String, Value> {
    let mut sanitized = Map::with_capacity(attributes.len());

    for (key, value) in attributes {
        if !is_valid_attribute_key(key) {
            debug!(key = %key, "Dropping attribute with invalid key");
            continue;
        }

        let clean = match value {
            Value::Null => continue,
            _ if is_sensitive_key(key) => Value::String(REDACTED.to_string()),
            Value::String(s) => Value::String(truncate_value(s, MAX_ATTRIBUTE_LENGTH)),
            Value::Array(items) if scalar_array(items).is_some() => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Value::String(truncate_value(s, MAX_ATTRIBUTE_LENGTH)),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            Value::Array(_) | Value::Object(_) => {
                Value::String(truncate_value(&value.to_string(), MAX_ATTRIBUTE_LENGTH))
            }
            Value::Bool(_) | Value::Number(_) => value.clone(),
        };
        sanitized.insert(key.clone(), clean);
    }

    sanitized
}

/// Merge attribute layers; later layers win on key collisions
#[must_use]
pub fn merge_attributes<'a, I>(layers: I) -> Map<String, Value>
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    let mut merged = Map::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Convert a JSON value into a span attribute value
///
/// Returns `None` for nulls. Non-empty arrays of one scalar type map onto typed
/// arrays, anything else nested becomes JSON text.
#[must_use]
pub fn to_otel_value(value: &Value) -> Option<opentelemetry::Value> {
    let converted = match value {
        Value::Null => return None,
        Value::Bool(b) => opentelemetry::Value::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => opentelemetry::Value::I64(i),
            None => opentelemetry::Value::F64(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => opentelemetry::Value::String(s.clone().into()),
        Value::Array(items) => match scalar_array(items) {
            Some(array) => opentelemetry::Value::Array(array),
            None => opentelemetry::Value::String(value.to_string().into()),
        },
        Value::Object(_) => opentelemetry::Value::String(value.to_string().into()),
    };
    Some(converted)
}

/// Typed array when every element has the type of the first; integers widen to
/// floats when any element is fractional
fn scalar_array(items: &[Value]) -> Option<Array> {
    match items.first()? {
        Value::String(_) => items
            .iter()
            .map(|item| item.as_str().map(|s| StringValue::from(s.to_string())))
            .collect::<Option<Vec<_>>>()
            .map(Array::String),
        Value::Bool(_) => items
            .iter()
            .map(Value::as_bool)
            .collect::<Option<Vec<_>>>()
            .map(Array::Bool),
        Value::Number(_) if items.iter().all(|item| item.as_i64().is_some()) => items
            .iter()
            .map(Value::as_i64)
            .collect::<Option<Vec<_>>>()
            .map(Array::I64),
        Value::Number(_) => items
            .iter()
            .map(|item| if item.is_number() { item.as_f64() } else { None })
            .collect::<Option<Vec<_>>>()
            .map(Array::F64),
        _ => None,
    }
}

/// Sanitize and convert an attribute map into span key-values
#[must_use]
pub fn to_key_values(attributes: &Map<String, Value>) -> Vec<KeyValue> {
    sanitize_attributes(attributes)
        .into_iter()
        .filter_map(|(key, value)| to_otel_value(&value).map(|v| KeyValue::new(key, v)))
        .collect()
}

/// Build an attribute map from key-value pairs
#[must_use]
pub fn build_attributes<K, V, I>(pairs: I) -> Map<String, Value>
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// `tracing` span wrapping a handler invocation
///
/// Logs emitted by the handler carry the operation id, so they can be joined
/// with the recorded telemetry events.
#[must_use]
pub fn request_span(context: &OperationContext) -> Span {
    let span = info_span!(
        "mcp.request",
        { MCP_METHOD } = context.metadata.method.as_str(),
        { MCP_OPERATION_ID } = context.operation_id.as_str(),
        { MCP_REQUEST_ID } = tracing::field::Empty,
        { MCP_AI_CONTEXT_LENGTH } = tracing::field::Empty,
    );

    if let Some(ref id) = context.metadata.request_id {
        span.record(MCP_REQUEST_ID, id.as_str());
    }
    if let Some(ref intent) = context.metadata.ai_context {
        span.record(MCP_AI_CONTEXT_LENGTH, intent.chars().count() as u64);
    }

    span
}
