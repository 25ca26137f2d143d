//! Layer merging
//!
//! - Tables merge key by key
//! - Arrays are replaced whole (a `drivers` list in the repo config
//!   replaces the host one)
//! - Scalars are replaced
//! - `null` in an overlay means "not set" and leaves the base alone

use serde_json::Value;

/// Merge `overlay` onto `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (base, Value::Null) => base,
        (Value::Object(mut table), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match table.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                if !merged.is_null() {
                    table.insert(key, merged);
                }
            }
            Value::Object(table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge layers in precedence order, lowest first.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}
