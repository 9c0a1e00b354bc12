//! OData envelope simplification.
//!
//! S/4HANA wraps every payload: v2 services answer `{"d": {"results": [...]}}`
//! or `{"d": {...}}`, v4 services answer `{"value": [...]}`. Entities carry
//! `__metadata`, and unexpanded navigation properties show up as
//! `{"__deferred": {...}}`. Callers get the plain data instead.

use serde_json::{Map, Value};

/// Unwrap the OData envelope and strip protocol noise.
pub fn simplify(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("d") => {
            unwrap_v2(map.remove("d").unwrap_or(Value::Null))
        }
        Value::Object(mut map) if matches!(map.get("value"), Some(Value::Array(_))) => {
            let count = map.get("@odata.count").and_then(parse_count);
            let results = clean(map.remove("value").unwrap_or(Value::Null));
            with_count(results, count)
        }
        other => clean(other),
    }
}

fn unwrap_v2(d: Value) -> Value {
    match d {
        Value::Object(mut map) if matches!(map.get("results"), Some(Value::Array(_))) => {
            let count = map.get("__count").and_then(parse_count);
            let results = clean(map.remove("results").unwrap_or(Value::Null));
            with_count(results, count)
        }
        other => clean(other),
    }
}

fn with_count(results: Value, count: Option<u64>) -> Value {
    match count {
        Some(count) => serde_json::json!({ "count": count, "results": results }),
        None => results,
    }
}

/// `__count` is a string in v2 and a number in v4.
fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn clean(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(clean).collect()),
        Value::Object(map) => clean_object(map),
        other => other,
    }
}

fn clean_object(map: Map<String, Value>) -> Value {
    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        if key == "__metadata" || key.starts_with("@odata.") {
            continue;
        }
        match value {
            Value::Object(inner) if inner.contains_key("__deferred") => continue,
            // Expanded to-many navigation: {"results": [...]}
            Value::Object(mut inner)
                if inner.len() == 1 && matches!(inner.get("results"), Some(Value::Array(_))) =>
            {
                out.insert(key, clean(inner.remove("results").unwrap_or(Value::Null)));
            }
            other => {
                out.insert(key, clean(other));
            }
        }
    }
    Value::Object(out)
}

/// Extract the human-readable message from an OData error body.
pub fn error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let message = parsed.get("error")?.get("message")?;
    match message {
        Value::String(s) => Some(s.clone()),
        Value::Object(m) => m.get("value").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}
