use serde_json::{Map, Value, json};

/// Constraint keywords the Code-Assist validator rejects; re-encoded as
/// description hints instead of dropped silently.
const UNSUPPORTED_CONSTRAINTS: &[&str] = &[
    "minLength",
    "maxLength",
    "pattern",
    "format",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minProperties",
    "maxProperties",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "default",
    "examples",
];

/// Rewrites a JSON-Schema tool parameter block for the constrained server
/// validator. Pure: the input is never mutated.
///
/// - `$ref` and `allOf` are resolved against the schema's own definitions
/// - `anyOf`/`oneOf` collapse into one merged schema with a variant hint
/// - unsupported constraints become description hints
/// - `["string","null"]` type arrays become `type: string` plus a nullable
///   hint
/// - arrays always get an `items`, empty objects get a `_placeholder`
pub fn clean_schema(schema: &Value) -> Value {
    let definitions = collect_definitions(schema);
    let mut cleaned = clean_node(schema, &definitions, 0);

    // The server rejects a parameters block that is not an object schema
    if !cleaned.is_object() {
        cleaned = json!({ "type": "object" });
    }
    ensure_object_nonempty(&mut cleaned);
    cleaned
}

/// Restricts a tool name to `[a-zA-Z_][a-zA-Z0-9_.:-]{0,63}`
pub fn sanitize_tool_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len().min(64));
    for (index, ch) in name.chars().enumerate() {
        let valid = if index == 0 {
            ch.is_ascii_alphabetic() || ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | ':' | '-')
        };
        sanitized.push(if valid { ch } else { '_' });
        if sanitized.len() == 64 {
            break;
        }
    }
    if sanitized.is_empty() {
        sanitized.push('_');
    }
    sanitized
}

fn collect_definitions(root: &Value) -> Map<String, Value> {
    let mut definitions = Map::new();
    for container in ["$defs", "definitions"] {
        if let Some(Value::Object(map)) = root.get(container) {
            for (name, schema) in map {
                definitions.insert(format!("#/{container}/{name}"), schema.clone());
            }
        }
    }
    definitions
}

const MAX_DEPTH: usize = 32;

fn clean_node(node: &Value, definitions: &Map<String, Value>, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return json!({ "type": "string" });
    }

    let Value::Object(map) = node else {
        // Booleans (`true` schemas) and other scalars accept anything
        return json!({ "type": "object" });
    };

    // $ref resolves first; sibling keys on a $ref are rare and dropped
    if let Some(Value::String(reference)) = map.get("$ref") {
        return match definitions.get(reference.as_str()) {
            Some(target) => clean_node(target, definitions, depth + 1),
            None => json!({ "type": "object" }),
        };
    }

    let mut map = map.clone();
    map.remove("$defs");
    map.remove("definitions");
    map.remove("$schema");
    map.remove("additionalProperties");

    // allOf: merge every branch into the parent
    if let Some(Value::Array(branches)) = map.remove("allOf") {
        for branch in branches {
            let cleaned = clean_node(&branch, definitions, depth + 1);
            if let Value::Object(branch_map) = cleaned {
                merge_into(&mut map, branch_map);
            }
        }
    }

    // anyOf/oneOf: collapse into one merged schema, hinting the variants
    for keyword in ["anyOf", "oneOf"] {
        if let Some(Value::Array(variants)) = map.remove(keyword) {
            let mut merged = Map::new();
            let mut hints = Vec::new();
            for variant in &variants {
                let cleaned = clean_node(variant, definitions, depth + 1);
                hints.push(describe_variant(&cleaned));
                if let Value::Object(variant_map) = cleaned {
                    merge_into(&mut merged, variant_map);
                }
            }
            merge_into(&mut map, merged);
            if !hints.is_empty() {
                append_hint(&mut map, &format!("One of: {}", hints.join(" | ")));
            }
        }
    }

    // Nullable type arrays
    if let Some(Value::Array(types)) = map.get("type").cloned() {
        let non_null: Vec<&Value> = types.iter().filter(|t| *t != &json!("null")).collect();
        let nullable = non_null.len() != types.len();
        map.insert(
            "type".to_string(),
            non_null.first().cloned().cloned().unwrap_or(json!("string")),
        );
        if nullable {
            append_hint(&mut map, "May be null.");
        }
    }

    // Unsupported constraints become hints
    let mut hints = Vec::new();
    for keyword in UNSUPPORTED_CONSTRAINTS {
        if let Some(value) = map.remove(*keyword) {
            hints.push(format!("{keyword}: {value}"));
        }
    }
    if !hints.is_empty() {
        append_hint(&mut map, &format!("Constraints: {}.", hints.join(", ")));
    }

    // Recurse into subschemas
    if let Some(Value::Object(properties)) = map.get("properties").cloned() {
        let cleaned: Map<String, Value> = properties
            .into_iter()
            .map(|(name, schema)| (name, clean_node(&schema, definitions, depth + 1)))
            .collect();
        map.insert("properties".to_string(), Value::Object(cleaned));
    }

    match map.get("items").cloned() {
        Some(items) => {
            map.insert(
                "items".to_string(),
                clean_node(&items, definitions, depth + 1),
            );
        }
        None if map.get("type") == Some(&json!("array")) => {
            map.insert("items".to_string(), json!({ "type": "string" }));
        }
        None => {}
    }

    if map.get("type") == Some(&json!("object")) {
        ensure_object_nonempty_map(&mut map);
    }

    Value::Object(map)
}

/// The server rejects empty object schemas; give them a placeholder
fn ensure_object_nonempty(schema: &mut Value) {
    if let Value::Object(map) = schema {
        if map.get("type").is_none() && map.get("properties").is_none() {
            map.insert("type".to_string(), json!("object"));
        }
        if map.get("type") == Some(&json!("object")) {
            ensure_object_nonempty_map(map);
        }
    }
}

fn ensure_object_nonempty_map(map: &mut Map<String, Value>) {
    let empty = map
        .get("properties")
        .and_then(Value::as_object)
        .map(Map::is_empty)
        .unwrap_or(true);
    if empty {
        map.insert(
            "properties".to_string(),
            json!({ "_placeholder": { "type": "boolean" } }),
        );
        map.insert("required".to_string(), json!(["_placeholder"]));
    }
}

fn merge_into(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            (Some(Value::Array(existing)), Value::Array(incoming)) => {
                for item in incoming {
                    if !existing.contains(&item) {
                        existing.push(item);
                    }
                }
            }
            (Some(_), _) => {} // first writer wins on scalar conflicts
            (None, value) => {
                target.insert(key, value);
            }
        }
    }
}

fn describe_variant(schema: &Value) -> String {
    match schema.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => "object".to_string(),
    }
}

fn append_hint(map: &mut Map<String, Value>, hint: &str) {
    let description = match map.get("description").and_then(Value::as_str) {
        Some(existing) if !existing.is_empty() => format!("{existing} {hint}"),
        _ => hint.to_string(),
    };
    map.insert("description".to_string(), Value::String(description));
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_input_is_not_mutated() {
        let schema = json!({ "type": "object", "properties": { "a": { "type": "string", "minLength": 3 } } });
        let snapshot = schema.clone();
        let _ = clean_schema(&schema);
        assert_eq!(schema, snapshot);
    }

    #[test]
    fn test_empty_object_gets_placeholder() {
        let cleaned = clean_schema(&json!({ "type": "object" }));

        assert_eq!(
            cleaned["properties"]["_placeholder"],
            json!({ "type": "boolean" })
        );
        assert_eq!(cleaned["required"], json!(["_placeholder"]));
    }

    #[test]
    fn test_constraints_become_description_hints() {
        let cleaned = clean_schema(&json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "minLength": 3, "pattern": "^[a-z]+$" }
            }
        }));

        let name = &cleaned["properties"]["name"];
        assert_eq!(name.get("minLength"), None);
        assert_eq!(name.get("pattern"), None);
        let description = name["description"].as_str().unwrap();
        assert!(description.contains("minLength: 3"));
        assert!(description.contains("pattern"));
    }

    #[test]
    fn test_nullable_type_array() {
        let cleaned = clean_schema(&json!({
            "type": "object",
            "properties": { "note": { "type": ["string", "null"] } }
        }));

        assert_eq!(cleaned["properties"]["note"]["type"], "string");
        assert!(
            cleaned["properties"]["note"]["description"]
                .as_str()
                .unwrap()
                .contains("May be null")
        );
    }

    #[test]
    fn test_ref_resolution() {
        let cleaned = clean_schema(&json!({
            "type": "object",
            "properties": { "target": { "$ref": "#/$defs/Target" } },
            "$defs": { "Target": { "type": "integer", "minimum": 0 } }
        }));

        let target = &cleaned["properties"]["target"];
        assert_eq!(target["type"], "integer");
        assert!(target["description"].as_str().unwrap().contains("minimum"));
        assert_eq!(cleaned.get("$defs"), None);
    }

    #[test]
    fn test_any_of_collapses_with_hint() {
        let cleaned = clean_schema(&json!({
            "type": "object",
            "properties": {
                "value": { "anyOf": [ { "type": "string" }, { "type": "integer" } ] }
            }
        }));

        let value = &cleaned["properties"]["value"];
        assert_eq!(value.get("anyOf"), None);
        assert_eq!(value["type"], "string");
        assert!(
            value["description"]
                .as_str()
                .unwrap()
                .contains("One of: string | integer")
        );
    }

    #[test]
    fn test_array_without_items_gets_string_items() {
        let cleaned = clean_schema(&json!({
            "type": "object",
            "properties": { "tags": { "type": "array" } }
        }));

        assert_eq!(cleaned["properties"]["tags"]["items"], json!({ "type": "string" }));
    }

    #[test]
    fn test_all_of_merges_branches() {
        let cleaned = clean_schema(&json!({
            "allOf": [
                { "type": "object", "properties": { "a": { "type": "string" } } },
                { "type": "object", "properties": { "b": { "type": "integer" } } }
            ]
        }));

        assert!(cleaned["properties"].get("a").is_some());
        assert!(cleaned["properties"].get("b").is_some());
    }

    #[test]
    fn test_tool_name_sanitization() {
        assert_eq!(sanitize_tool_name("read_file"), "read_file");
        assert_eq!(sanitize_tool_name("mcp/server:tool"), "mcp_server:tool");
        assert_eq!(sanitize_tool_name("9lives"), "_lives");
        assert_eq!(sanitize_tool_name(""), "_");
        assert_eq!(sanitize_tool_name(&"x".repeat(100)).len(), 64);
    }
}
