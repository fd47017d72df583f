//! `$filter` matching for `query.read`
//!
//! A filter is a JSON object shaped like the record it selects. Plain
//! values must be equal; nested objects match recursively; objects whose
//! keys start with `$` are comparisons against the record value.

use std::cmp::Ordering;

use serde_json::Value;

pub fn matches(filter: &Value, target: &Value) -> bool {
    match filter {
        Value::Object(fields) if fields.keys().any(|k| k.starts_with('$')) => fields
            .iter()
            .all(|(op, operand)| compare(op, operand, target)),
        Value::Object(fields) => fields.iter().all(|(key, expected)| {
            let actual = target.get(key).unwrap_or(&Value::Null);
            matches(expected, actual)
        }),
        other => other == target,
    }
}

fn compare(op: &str, operand: &Value, target: &Value) -> bool {
    match op {
        "$eq" => operand == target,
        "$ne" => operand != target,
        "$in" => operand
            .as_array()
            .is_some_and(|choices| choices.contains(target)),
        "$is" => type_name(target) == operand.as_str().unwrap_or_default(),
        "$prefix" => match (operand.as_str(), target.as_str()) {
            (Some(prefix), Some(value)) => value.starts_with(prefix),
            _ => false,
        },
        "$gt" => order(target, operand) == Some(Ordering::Greater),
        "$gte" => matches!(order(target, operand), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => order(target, operand) == Some(Ordering::Less),
        "$lte" => matches!(order(target, operand), Some(Ordering::Less | Ordering::Equal)),
        _ => false,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
