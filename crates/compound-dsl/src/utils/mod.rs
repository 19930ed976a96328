pub mod reference;

use serde_json::Value;

/// Integer reading of a loosely typed value.
///
/// Numbers truncate toward zero, strings must spell an integer,
/// booleans count as 1/0. Anything else has no integer reading.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
