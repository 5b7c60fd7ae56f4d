use std::collections::HashSet;
use std::path::PathBuf;

use serde_json::Value;

const SUPPORTED_ACTIONS: &[&str] = &[
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

fn seeds_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("seeds")
}

fn seed_specs() -> Vec<(String, Value)> {
    let mut specs = Vec::new();
    for entry in std::fs::read_dir(seeds_dir()).expect("seeds dir should be readable") {
        let path = entry.expect("dir entry").path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read_to_string(&path).expect("seed should be readable");
        let spec: Value = serde_json::from_str(&raw)
            .unwrap_or_else(|e| panic!("{} should parse as JSON: {}", path.display(), e));
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .expect("seed file name")
            .to_string();
        specs.push((stem, spec));
    }
    specs
}

#[test]
fn seed_catalog_is_not_empty() {
    assert!(!seed_specs().is_empty(), "expected at least one skill seed");
}

#[test]
fn every_seed_matches_its_file_name_and_carries_identity() {
    for (stem, spec) in seed_specs() {
        assert_eq!(
            spec["id"].as_str(),
            Some(stem.as_str()),
            "seed file name and spec id must agree"
        );
        assert!(spec["version"].as_i64().unwrap_or(0) >= 1, "{}: version", stem);
        assert!(spec["name"].is_string(), "{}: name", stem);
        assert!(spec["base_url"].is_string(), "{}: base_url", stem);
    }
}

#[test]
fn every_seed_step_uses_a_supported_action() {
    let supported: HashSet<&str> = SUPPORTED_ACTIONS.iter().copied().collect();
    for (stem, spec) in seed_specs() {
        let steps = spec["steps"].as_array().unwrap_or_else(|| {
            panic!("{}: steps must be a list", stem);
        });
        assert!(!steps.is_empty(), "{}: seed must have steps", stem);
        for (i, step) in steps.iter().enumerate() {
            let action = step["action"]
                .as_str()
                .unwrap_or_else(|| panic!("{} step {}: action missing", stem, i));
            assert!(
                supported.contains(action),
                "{} step {}: unsupported action '{}'",
                stem,
                i,
                action
            );
        }
    }
}

#[test]
fn every_required_slot_is_declared_in_properties() {
    for (stem, spec) in seed_specs() {
        let schema = &spec["slots_schema"];
        let properties = schema["properties"]
            .as_object()
            .unwrap_or_else(|| panic!("{}: slots_schema.properties", stem));
        let required = schema["required"].as_array().cloned().unwrap_or_default();
        for slot in required {
            let slot = slot.as_str().expect("required slot name");
            assert!(
                properties.contains_key(slot),
                "{}: required slot '{}' missing from properties",
                stem,
                slot
            );
        }
    }
}

#[test]
fn slot_placeholders_reference_declared_slots() {
    for (stem, spec) in seed_specs() {
        let properties: HashSet<String> = spec["slots_schema"]["properties"]
            .as_object()
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();
        let steps = spec["steps"].as_array().cloned().unwrap_or_default();
        for step in steps {
            let Some(value) = step["value"].as_str() else {
                continue;
            };
            let mut rest = value;
            while let Some(open) = rest.find("{{") {
                let Some(close) = rest[open..].find("}}") else {
                    break;
                };
                let slot = &rest[open + 2..open + close];
                assert!(
                    properties.contains(slot),
                    "{}: placeholder '{{{{{}}}}}' has no declared slot",
                    stem,
                    slot
                );
                rest = &rest[open + close + 2..];
            }
        }
    }
}
