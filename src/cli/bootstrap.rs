use anyhow::Result;

use crate::core::config::EnvConfig;
use crate::core::terminal::{print_step, print_success};

/// Create the local state directories every other command assumes.
pub fn run_bootstrap(cfg: &EnvConfig) -> Result<()> {
    print_step("Bootstrapping agent...");

    let dirs = [
        cfg.artifact_dir.clone(),
        cfg.runs_dir.clone(),
        cfg.auth_dir.clone(),
        cfg.schedules_dir(),
    ];
    for dir in dirs {
        std::fs::create_dir_all(&dir)?;
        print_success(&format!("Created {}", dir.display()));
    }

    print_success("Bootstrap complete.");
    Ok(())
}
