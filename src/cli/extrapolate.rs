use std::path::PathBuf;

use anyhow::{Result, bail};
use serde_json::Value;

use crate::core::config::EnvConfig;
use crate::core::db::Backend;
use crate::core::dust::DustClient;
use crate::core::extrapolation::extrapolate_skill_from_platform_map;
use crate::core::platform::{load_platform_map, merge_platform_signals, platform_map_digest, save_platform_map};
use crate::core::seeds;
use crate::core::skill_spec::normalize_skill_spec;
use crate::core::storage::ObjectStore;
use crate::core::terminal::{agent_log, agent_warn, print_status, print_success};

const SPEAKER: &str = "Agent Extrapolator";

pub struct AcquiredSkill {
    pub skill_id: String,
    pub seed_path: PathBuf,
    pub platform_map_path: PathBuf,
    pub skill_spec: Value,
    pub seed_storage_key: Option<String>,
}

/// Synthesize a skill for a prompt from platform memory: the multi-role
/// agent pipeline when configured, the deterministic selector-frequency
/// extrapolation otherwise. The seed is persisted, folded back into the
/// platform map, and synced to the backend when possible.
pub async fn synthesize_skill_for_prompt(
    cfg: &EnvConfig,
    prompt: &str,
    platform_id: &str,
    agent_id: &str,
    preferred_skill_id: Option<&str>,
) -> Result<AcquiredSkill> {
    let mut platform_map = load_platform_map(platform_id);
    let digest = platform_map_digest(&platform_map, 30);
    let available_skill_ids = seeds::existing_skill_ids();

    let target_skill_id = match preferred_skill_id {
        Some(id) => id.to_string(),
        None => seeds::ensure_unique_skill_id(&format!(
            "{}.auto.{}",
            platform_id,
            seeds::slugify(prompt, 36)
        )),
    };

    let generated = match DustClient::from_config(cfg) {
        Ok(dust) => {
            match dust
                .synthesize_skill_from_prompt(
                    &target_skill_id,
                    prompt,
                    &digest,
                    &available_skill_ids,
                    agent_id,
                )
                .await
            {
                Ok(generated) => generated
                    .get("skill_spec")
                    .cloned()
                    .unwrap_or(Value::Null),
                Err(err) => {
                    agent_warn(
                        SPEAKER,
                        &format!("Agent synthesis unavailable ({err:#}); extrapolating from map signals."),
                    );
                    extrapolate_skill_from_platform_map(
                        prompt,
                        &platform_map,
                        &target_skill_id,
                        &cfg.app_base_url,
                    )
                }
            }
        }
        Err(err) => {
            agent_warn(
                SPEAKER,
                &format!("Agent synthesis unavailable ({err:#}); extrapolating from map signals."),
            );
            extrapolate_skill_from_platform_map(
                prompt,
                &platform_map,
                &target_skill_id,
                &cfg.app_base_url,
            )
        }
    };

    let mut skill_spec = normalize_skill_spec(&generated, &target_skill_id, &cfg.app_base_url);
    let unique_id = seeds::ensure_unique_skill_id(
        skill_spec
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(&target_skill_id),
    );
    if let Some(object) = skill_spec.as_object_mut() {
        object.insert("id".to_string(), Value::String(unique_id.clone()));
    }

    if skill_spec
        .get("steps")
        .and_then(Value::as_array)
        .map(Vec::is_empty)
        .unwrap_or(true)
    {
        bail!("synthesized skill has no steps");
    }

    let seed_path = seeds::save_seed(&unique_id, &skill_spec)?;

    let base_url = skill_spec
        .get("base_url")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    merge_platform_signals(&mut platform_map, &base_url, &[], &unique_id, "synth");
    let platform_map_path = save_platform_map(platform_id, &mut platform_map)?;

    let seed_storage_key = match (Backend::from_config(cfg), ObjectStore::from_config(cfg)) {
        (Ok(backend), Ok(store)) => {
            match seeds::sync_seed(&backend, &store, &unique_id, &seed_path).await {
                Ok(key) => Some(key),
                Err(err) => {
                    agent_warn(SPEAKER, &format!("Seed sync skipped ({err:#})"));
                    None
                }
            }
        }
        _ => None,
    };

    Ok(AcquiredSkill {
        skill_id: unique_id,
        seed_path,
        platform_map_path,
        skill_spec,
        seed_storage_key,
    })
}

/// The `extrapolate` command: synthesize, persist, and print the result.
pub async fn run_extrapolate(
    cfg: &EnvConfig,
    prompt: &str,
    platform_id: &str,
    agent_id: &str,
    skill_id: Option<&str>,
) -> Result<()> {
    agent_log(
        SPEAKER,
        &format!("Generating skill from platform map {}...", platform_id),
    );
    let acquired = synthesize_skill_for_prompt(cfg, prompt, platform_id, agent_id, skill_id).await?;

    print_success(&format!("Skill generated: {}", acquired.skill_id));
    print_status("Seed path", &acquired.seed_path.display().to_string());
    print_status(
        "Platform map",
        &acquired.platform_map_path.display().to_string(),
    );
    if let Some(storage_key) = &acquired.seed_storage_key {
        print_status("Seed storage", storage_key);
    }
    let steps = acquired.skill_spec["steps"].as_array().map(Vec::len).unwrap_or(0);
    let required = acquired.skill_spec["slots_schema"]["required"]
        .as_array()
        .map(Vec::len)
        .unwrap_or(0);
    print_status("Steps", &format!("{} | Required slots: {}", steps, required));
    println!("{}", serde_json::to_string_pretty(&acquired.skill_spec)?);
    Ok(())
}
