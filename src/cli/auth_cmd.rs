use anyhow::{Context, Result};

use crate::core::config::EnvConfig;
use crate::core::storage::ObjectStore;
use crate::core::terminal::{print_info, print_step, print_success};

/// Upload a captured session-state file to the `auth` bucket so remote
/// workers can reuse the login. The file itself is produced by an external
/// capture flow and dropped into `.state/auth/<name>.json`.
pub async fn save_auth(cfg: &EnvConfig, name: &str) -> Result<()> {
    let auth_path = cfg.auth_dir.join(format!("{}.json", name));
    print_step(&format!("Uploading auth state '{}'...", name));

    let raw = std::fs::read(&auth_path).with_context(|| {
        format!(
            "no captured auth state at {} — capture a session there first",
            auth_path.display()
        )
    })?;
    // Sanity-parse before shipping credentials anywhere.
    serde_json::from_slice::<serde_json::Value>(&raw)
        .with_context(|| format!("{} is not valid JSON", auth_path.display()))?;

    let store = ObjectStore::from_config(cfg)?;
    let object_path = format!("auth/{}.json", name);
    store.upload(&object_path, raw, "application/json").await?;

    print_success(&format!("Auth state uploaded to {}", object_path));
    print_info("Workers will pick up the refreshed session on their next run.");
    Ok(())
}
