use serde_json::{Map, Value, json};

/// Step actions the executor runtime understands. Anything else is dropped
/// during normalization rather than failing the whole spec.
pub const SUPPORTED_ACTIONS: &[&str] = &[
    "goto",
    "click",
    "fill",
    "fill_date",
    "fill_if_visible",
    "select_option",
    "select2",
    "select2_tax",
    "wait",
    "wait_for_url",
    "screenshot",
    "evaluate",
    "check_validation",
    "handle_cookies",
    "foreach",
];

fn pick<'a>(step: &'a Value, params: &'a Value, args: &'a Value, key: &str) -> Option<&'a Value> {
    for source in [step, params, args] {
        if let Some(value) = source.get(key)
            && !value.is_null()
        {
            return Some(value);
        }
    }
    None
}

fn as_trimmed_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonicalize one step: fold `params`/`args` indirection, map common
/// aliases, and keep only the keys the executor reads.
fn normalize_step(step: &Value) -> Value {
    let params = step.get("params").cloned().unwrap_or(Value::Null);
    let args = step.get("args").cloned().unwrap_or(Value::Null);
    let params = if params.is_object() { params } else { Value::Null };
    let args = if args.is_object() { args } else { Value::Null };

    let mut action = step
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    action = match action.as_str() {
        "navigate" | "open_url" => "goto".to_string(),
        "wait_for_selector" => "wait".to_string(),
        other => other.to_string(),
    };

    let mut normalized = Map::new();
    normalized.insert("action".to_string(), Value::String(action.clone()));

    let selector = pick(step, &params, &args, "selector");
    let mut value = pick(step, &params, &args, "value");

    if (action == "goto" || action == "wait_for_url") && value.is_none() {
        value = pick(step, &params, &args, "url");
    }

    let mut timeout = pick(step, &params, &args, "timeout");
    if timeout.is_none() && action == "wait" {
        timeout = pick(step, &params, &args, "duration");
    }

    if let Some(selector) = selector {
        normalized.insert(
            "selector".to_string(),
            Value::String(as_trimmed_string(selector)),
        );
    }
    if let Some(value) = value {
        normalized.insert("value".to_string(), Value::String(as_trimmed_string(value)));
    }
    if let Some(timeout) = timeout {
        let as_int = match timeout {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        };
        if let Some(ms) = as_int {
            normalized.insert("timeout".to_string(), json!(ms));
        }
    }

    for key in ["search", "result", "store_as", "items", "skill"] {
        if let Some(value) = pick(step, &params, &args, key) {
            normalized.insert(key.to_string(), Value::String(as_trimmed_string(value)));
        }
    }
    for key in ["optional", "skip_if_exists"] {
        if let Some(value) = pick(step, &params, &args, key) {
            let truthy = value.as_bool().unwrap_or(false);
            normalized.insert(key.to_string(), Value::Bool(truthy));
        }
    }

    Value::Object(normalized)
}

/// Convert a model-produced `arguments` list into the slots schema the
/// runtime actually consumes.
fn arguments_to_slots_schema(arguments: &[Value]) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();

    for arg in arguments {
        let name = arg
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if name.is_empty() {
            continue;
        }
        let arg_type = arg
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("string")
            .trim()
            .to_lowercase();
        let arg_type = match arg_type.as_str() {
            "string" | "number" | "integer" | "boolean" => arg_type,
            _ => "string".to_string(),
        };

        let mut prop = Map::new();
        prop.insert("type".to_string(), Value::String(arg_type));
        if let Some(description) = arg.get("description").and_then(Value::as_str) {
            let description = description.trim();
            if !description.is_empty() {
                prop.insert(
                    "description".to_string(),
                    Value::String(description.to_string()),
                );
            }
        }
        if arg.get("required").and_then(Value::as_bool).unwrap_or(true) {
            required.push(Value::String(name.clone()));
        }
        properties.insert(name, Value::Object(prop));
    }

    json!({ "type": "object", "required": required, "properties": properties })
}

/// Normalize a (possibly model-generated) SkillSpec into the canonical shape:
/// id/name/description/base_url/version filled, steps canonicalized with
/// unsupported actions removed, and a slots schema present.
pub fn normalize_skill_spec(skill_spec: &Value, default_id: &str, default_base_url: &str) -> Value {
    let mut normalized = match skill_spec {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    let id = normalized
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_id)
        .to_string();
    normalized.insert("id".to_string(), Value::String(id.clone()));

    let name = normalized
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("Skill {}", id));
    normalized.insert("name".to_string(), Value::String(name));

    let description = normalized
        .get("description")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("Auto-generated workflow skill.")
        .to_string();
    normalized.insert("description".to_string(), Value::String(description));

    let base_url = normalized
        .get("base_url")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_base_url)
        .to_string();
    normalized.insert("base_url".to_string(), Value::String(base_url));

    let version = normalized.get("version").and_then(Value::as_i64).unwrap_or(1);
    normalized.insert("version".to_string(), json!(version.max(1)));

    let runtime_steps: Vec<Value> = normalized
        .get("steps")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .filter(|step| step.is_object())
                .map(normalize_step)
                .filter(|step| {
                    step.get("action")
                        .and_then(Value::as_str)
                        .map(|action| SUPPORTED_ACTIONS.contains(&action))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();
    normalized.insert("steps".to_string(), Value::Array(runtime_steps));

    let slots_schema = match normalized.get("slots_schema") {
        Some(Value::Object(schema)) => {
            let mut schema = schema.clone();
            schema
                .entry("type".to_string())
                .or_insert(Value::String("object".to_string()));
            schema
                .entry("properties".to_string())
                .or_insert(json!({}));
            Value::Object(schema)
        }
        _ => match normalized.get("arguments").and_then(Value::as_array) {
            Some(args) => arguments_to_slots_schema(args),
            None => json!({ "type": "object", "properties": {} }),
        },
    };
    normalized.insert("slots_schema".to_string(), slots_schema);

    Value::Object(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_runtime_actions() {
        let spec = json!({
            "steps": [
                { "action": "navigate", "url": "https://x.example/add" },
                { "action": "wait_for_selector", "selector": "#form", "timeout": "5000" },
            ]
        });
        let normalized = normalize_skill_spec(&spec, "p.auto.test", "https://x.example");
        let steps = normalized["steps"].as_array().unwrap();
        assert_eq!(steps[0]["action"], "goto");
        assert_eq!(steps[0]["value"], "https://x.example/add");
        assert_eq!(steps[1]["action"], "wait");
        assert_eq!(steps[1]["timeout"], 5000);
    }

    #[test]
    fn unsupported_actions_are_dropped() {
        let spec = json!({
            "steps": [
                { "action": "teleport", "selector": "#x" },
                { "action": "click", "selector": "#ok" },
                "not-an-object",
            ]
        });
        let normalized = normalize_skill_spec(&spec, "p.auto.test", "https://x.example");
        let steps = normalized["steps"].as_array().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0]["action"], "click");
    }

    #[test]
    fn params_and_args_indirection_is_flattened() {
        let spec = json!({
            "steps": [
                { "action": "fill", "params": { "selector": "#amount", "value": "{{amount}}" } },
            ]
        });
        let normalized = normalize_skill_spec(&spec, "p.auto.test", "https://x.example");
        let step = &normalized["steps"][0];
        assert_eq!(step["selector"], "#amount");
        assert_eq!(step["value"], "{{amount}}");
    }

    #[test]
    fn arguments_become_slots_schema() {
        let spec = json!({
            "steps": [{ "action": "screenshot" }],
            "arguments": [
                { "name": "customer", "description": "Customer name" },
                { "name": "note", "type": "weird", "required": false },
            ]
        });
        let normalized = normalize_skill_spec(&spec, "p.auto.test", "https://x.example");
        let schema = &normalized["slots_schema"];
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["customer"]["type"], "string");
        assert_eq!(schema["properties"]["note"]["type"], "string");
        assert_eq!(schema["required"], json!(["customer"]));
    }

    #[test]
    fn defaults_fill_missing_identity() {
        let normalized = normalize_skill_spec(&json!({}), "p.auto.generated", "https://x.example");
        assert_eq!(normalized["id"], "p.auto.generated");
        assert_eq!(normalized["version"], 1);
        assert_eq!(normalized["base_url"], "https://x.example");
        assert!(normalized["steps"].as_array().unwrap().is_empty());
    }
}
