use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;

use super::db::Backend;
use super::storage::ObjectStore;

pub const SEEDS_DIR: &str = "seeds";

pub fn seed_path(skill_id: &str) -> PathBuf {
    PathBuf::from(SEEDS_DIR).join(format!("{}.json", skill_id))
}

pub fn load_seed(skill_id: &str) -> Result<Value> {
    let path = seed_path(skill_id);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("skill seed not found at {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

pub fn save_seed(skill_id: &str, spec: &Value) -> Result<PathBuf> {
    let path = seed_path(skill_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(spec)?)
        .with_context(|| format!("failed to write seed {}", path.display()))?;
    Ok(path)
}

/// Sorted stems of every local seed file.
pub fn existing_skill_ids() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(SEEDS_DIR) else {
        return Vec::new();
    };
    let mut ids: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                path.file_stem().and_then(|s| s.to_str()).map(String::from)
            } else {
                None
            }
        })
        .collect();
    ids.sort();
    ids
}

/// Append a UTC timestamp when the candidate id already has a seed, so
/// synthesized skills never silently overwrite an existing one.
pub fn ensure_unique_skill_id(candidate: &str) -> String {
    if !existing_skill_ids().iter().any(|id| id == candidate) {
        return candidate.to_string();
    }
    format!("{}_{}", candidate, Utc::now().format("%Y%m%d%H%M%S"))
}

pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-');
    let truncated: String = slug.chars().take(max_len).collect();
    let truncated = truncated.trim_matches('-').to_string();
    if truncated.is_empty() {
        "generated".to_string()
    } else {
        truncated
    }
}

/// Storage key for a seed; slashes in skill ids are flattened so the object
/// key stays a single path segment under `artifacts/seeds/`.
pub fn seed_storage_path(skill_id: &str) -> String {
    let safe_id = skill_id.trim().replace('/', "__");
    format!("artifacts/seeds/{}.json", safe_id)
}

/// Push a seed to object storage and upsert the matching `skills` row.
/// Returns the storage key.
pub async fn sync_seed(
    backend: &Backend,
    store: &ObjectStore,
    skill_id: &str,
    path: &Path,
) -> Result<String> {
    let raw = std::fs::read(path)
        .with_context(|| format!("seed file missing at {}", path.display()))?;
    let spec: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let skill = super::model::Skill {
        id: spec
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(skill_id)
            .to_string(),
        version: spec.get("version").and_then(Value::as_i64).unwrap_or(1),
        spec,
    };

    let storage_key = seed_storage_path(skill_id);
    store.upload(&storage_key, raw, "application/json").await?;
    backend.upsert_skill(&skill).await?;
    Ok(storage_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation_runs() {
        assert_eq!(slugify("Create a €1200 invoice!!", 48), "create-a-1200-invoice");
        assert_eq!(slugify("***", 48), "generated");
    }

    #[test]
    fn slugify_respects_max_len() {
        let slug = slugify("a very long prompt that keeps going and going", 12);
        assert!(slug.chars().count() <= 12);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn storage_path_flattens_slashes() {
        assert_eq!(
            seed_storage_path("invoiceapp/sales.invoice"),
            "artifacts/seeds/invoiceapp__sales.invoice.json"
        );
    }
}
