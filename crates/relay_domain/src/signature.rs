use serde::Serialize;
use serde_json::Value;

/// Stable serialization of a config value: JSON with object keys sorted at
/// every level. Used to detect semantic change without structural
/// comparison.
pub fn stable_signature<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_value(value).unwrap_or(Value::Null);
    sort_keys(json).to_string()
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, sort_keys(value)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({ "b": 1, "a": { "d": 2, "c": 3 } });
        let b = json!({ "a": { "c": 3, "d": 2 }, "b": 1 });

        assert_eq!(stable_signature(&a), stable_signature(&b));
    }

    #[test]
    fn test_value_change_changes_signature() {
        let a = json!({ "a": 1 });
        let b = json!({ "a": 2 });

        assert_ne!(stable_signature(&a), stable_signature(&b));
    }

    #[test]
    fn test_array_order_matters() {
        let a = json!({ "a": [1, 2] });
        let b = json!({ "a": [2, 1] });

        assert_ne!(stable_signature(&a), stable_signature(&b));
    }
}
