//! Request Key Module
//!
//! Deterministic cache keys for parameterized requests.

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

pub const DATA_PREFIX: &str = "data_";

/// Canonical parameter strings longer than this are hashed to keep keys short.
const MAX_INLINE_PARAMS: usize = 160;

// == Request Key ==
/// Cache key for `resource` with `params`.
///
/// Null or empty-object params produce `data_<resource>`. Otherwise the
/// canonical params are appended, or their SHA-256 when long.
pub fn request_key(resource: &str, params: &Value) -> String {
    let no_params = match params {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if no_params {
        return format!("{}{}", DATA_PREFIX, resource);
    }

    let canonical = canonical_json(params);
    if canonical.len() <= MAX_INLINE_PARAMS {
        format!("{}{}_{}", DATA_PREFIX, resource, canonical)
    } else {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{}{}_{}", DATA_PREFIX, resource, hex::encode(hasher.finalize()))
    }
}

// == Canonical JSON ==
/// Compact JSON with object keys sorted and integral floats written as integers,
/// so logically equal parameter sets serialize identically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_number(n)),
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

fn format_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        // 2^53: beyond this f64 stops representing every integer
        Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_without_params() {
        assert_eq!(request_key("orders", &Value::Null), "data_orders");
        assert_eq!(request_key("orders", &json!({})), "data_orders");
    }

    #[test]
    fn test_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"status":"open","page":1,"filter":{"b":2,"a":1}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"filter":{"a":1,"b":2},"page":1,"status":"open"}"#).unwrap();

        assert_eq!(request_key("orders", &a), request_key("orders", &b));
        assert_eq!(
            request_key("orders", &a),
            r#"data_orders_{"filter":{"a":1,"b":2},"page":1,"status":"open"}"#
        );
    }

    #[test]
    fn test_integral_floats_match_integers() {
        assert_eq!(canonical_json(&json!({"page": 2.0})), canonical_json(&json!({"page": 2})));
        assert_eq!(canonical_json(&json!(1.5)), "1.5");
    }

    #[test]
    fn test_strings_are_escaped() {
        assert_eq!(canonical_json(&json!({"q": "a\"b"})), r#"{"q":"a\"b"}"#);
    }

    #[test]
    fn test_long_params_are_hashed() {
        let params = json!({ "ids": (0..100).collect::<Vec<u32>>() });
        let key = request_key("products", &params);

        assert!(key.starts_with("data_products_"));
        assert_eq!(key.len(), "data_products_".len() + 64);
        assert_eq!(key, request_key("products", &params));
    }
}
