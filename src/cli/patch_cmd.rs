use anyhow::Result;
use serde_json::Value;

use crate::core::config::EnvConfig;
use crate::core::db::Backend;
use crate::core::patching::{apply_eval_patch, eval_patch_ops, fetch_eval};
use crate::core::seeds;
use crate::core::storage::ObjectStore;
use crate::core::terminal::{print_step, print_success, print_warn};

/// Apply the RFC 6902 patch from an evaluation to a skill seed, bump its
/// version, and sync the new seed to the backend.
pub async fn apply_patch(cfg: &EnvConfig, skill_id: &str, eval_key: &str) -> Result<()> {
    print_step(&format!(
        "Applying patch to skill '{}' using eval '{}'...",
        skill_id, eval_key
    ));

    let store = ObjectStore::from_config(cfg).ok();
    let eval = fetch_eval(cfg, store.as_ref(), eval_key).await?;

    let patch_ops = eval_patch_ops(&eval);
    if patch_ops.is_empty() {
        print_warn("No patch operations found in evaluation. Nothing to apply.");
        return Ok(());
    }

    let skill_spec = seeds::load_seed(skill_id)?;
    let patched = apply_eval_patch(&skill_spec, patch_ops)?;
    let new_version = patched.get("version").and_then(Value::as_i64).unwrap_or(1);
    print_success(&format!("Patch applied. New version: {}", new_version));

    let seed_path = seeds::save_seed(skill_id, &patched)?;

    match (Backend::from_config(cfg), store) {
        (Ok(backend), Some(store)) => {
            match seeds::sync_seed(&backend, &store, skill_id, &seed_path).await {
                Ok(storage_key) => print_success(&format!("Seed synced to {}", storage_key)),
                Err(err) => print_warn(&format!("Seed sync skipped ({err:#})")),
            }
        }
        _ => print_warn("Seed sync skipped (backend not configured)."),
    }

    print_success(&format!("Skill '{}' patched successfully!", skill_id));
    print_success(&format!("Updated seed: {}", seed_path.display()));
    Ok(())
}
