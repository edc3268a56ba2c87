//! Request Parameters
//!
//! Insertion-ordered parameter maps and their query-string rendering.
//!
//! The signed trace digest covers the full URL, so the query string must be
//! rendered deterministically: keys keep insertion order and values are
//! rendered without JSON quoting.

use serde_json::{Map, Value};

/// Ordered parameter map sent as a query string or JSON body.
pub type Params = Map<String, Value>;

/// Build a [`Params`] map from `(key, value)` pairs, keeping their order.
#[must_use]
pub fn params<K, V, I>(pairs: I) -> Params
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Render `params` as an `application/x-www-form-urlencoded` query string.
///
/// Strings are sent raw, numbers in their JSON form, booleans
/// capitalised as `True`/`False` (the service's own client sends them that
/// way), arrays as comma-joined elements and `null` as an empty
/// value. Objects fall back to their JSON text.
#[must_use]
pub fn encode_query(params: &Params) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, &render_value(value));
    }
    serializer.finish()
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}
