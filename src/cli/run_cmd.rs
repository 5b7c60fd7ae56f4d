use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::core::config::EnvConfig;
use crate::core::db::Backend;
use crate::core::events;
use crate::core::executor::{ExecutorClient, RunReport};
use crate::core::model::{NewRun, RunStatus, RunTerminal};
use crate::core::seeds;
use crate::core::storage::{ObjectStore, content_type_for};
use crate::core::terminal::{agent_fail, agent_log, agent_warn};

const SPEAKER: &str = "Agent Orchestrator";

fn load_slots(input_file: Option<&Path>) -> Result<Value> {
    let Some(path) = input_file else {
        return Ok(json!({}));
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("input file not found at {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Initialize the run row in the backend; fall back to a local id when the
/// backend is unreachable so the executor can still run.
async fn init_run(
    backend: Option<&Backend>,
    cfg: &EnvConfig,
    skill_id: &str,
    skill_version: i64,
    slots: &Value,
) -> String {
    if let Some(backend) = backend {
        let new_run = NewRun {
            status: RunStatus::Running,
            prompt: None,
            skill_id: Some(skill_id.to_string()),
            skill_version: Some(skill_version),
            slots: Some(slots.clone()),
        };
        match backend.insert_run(&new_run).await {
            Ok(run) => {
                agent_log(SPEAKER, &format!("Run ID {} created in backend.", run.id));
                events::record(
                    cfg,
                    "run_initialized",
                    &format!("Run ID: {}", run.id),
                    json!({ "skill_id": skill_id, "slots": slots }),
                )
                .await;
                return run.id;
            }
            Err(err) => {
                agent_warn(
                    SPEAKER,
                    &format!("Failed to sync with backend ({err:#}); using a local run ID."),
                );
            }
        }
    }
    Uuid::new_v4().to_string()
}

/// Upload every artifact the executor shipped back; returns the
/// name → storage-path map that lands on the run row.
async fn upload_artifacts(
    store: Option<&ObjectStore>,
    run_id: &str,
    report: &RunReport,
) -> BTreeMap<String, String> {
    let mut uploaded = BTreeMap::new();
    let Some(store) = store else {
        return uploaded;
    };

    for (name, payload) in &report.artifacts {
        let bytes = match payload.decode() {
            Ok(bytes) => bytes,
            Err(err) => {
                agent_fail(SPEAKER, &format!("Skipping artifact {}: {err:#}", name));
                continue;
            }
        };
        let storage_path = format!("artifacts/{}/{}", run_id, payload.file_name);
        let content_type = content_type_for(&payload.file_name);
        match store.upload(&storage_path, bytes, &content_type).await {
            Ok(()) => {
                uploaded.insert(name.clone(), storage_path);
            }
            Err(err) => {
                agent_fail(
                    SPEAKER,
                    &format!("Failed to upload {}: {err:#}", payload.file_name),
                );
            }
        }
    }
    uploaded
}

fn persist_local_report(cfg: &EnvConfig, run_id: &str, report: &Value) -> Result<()> {
    let dir = cfg.artifact_dir.join(run_id);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(
        dir.join("run_report.json"),
        serde_json::to_string_pretty(report)?,
    )?;
    Ok(())
}

/// Execute a skill through the remote executor and keep the backend run row
/// truthful about the outcome. Returns the run id.
pub async fn run_skill(
    cfg: &EnvConfig,
    skill_id: &str,
    input_file: Option<&Path>,
    headless: bool,
) -> Result<String> {
    let skill_spec = seeds::load_seed(skill_id)?;
    let skill_version = skill_spec.get("version").and_then(Value::as_i64).unwrap_or(1);
    let slots = load_slots(input_file)?;

    let backend = Backend::from_config(cfg).ok();
    let store = ObjectStore::from_config(cfg).ok();

    agent_log(
        SPEAKER,
        &format!("I am initializing a new run for skill {}...", skill_id),
    );
    let run_id = init_run(backend.as_ref(), cfg, skill_id, skill_version, &slots).await;

    let executor = ExecutorClient::from_config(cfg)?;
    let mut report = match executor.execute(&run_id, &skill_spec, &slots, headless).await {
        Ok(report) => report,
        Err(err) => {
            agent_fail(SPEAKER, &format!("Executor unreachable: {err:#}"));
            RunReport::transport_failure(&format!("{err:#}"))
        }
    };

    if report.is_success() {
        agent_log(SPEAKER, "Skill execution was successful!");
        events::record(cfg, "run_success", &format!("Run ID: {}", run_id), json!({})).await;
    } else {
        let error_summary = report.error.clone().unwrap_or_else(|| "unknown error".to_string());
        agent_fail(SPEAKER, &format!("Skill execution failed: {}", error_summary));
        events::record(
            cfg,
            "run_failed",
            &format!("Run ID: {}", run_id),
            json!({ "error": error_summary }),
        )
        .await;
    }

    agent_log(
        SPEAKER,
        "I am uploading the execution artifacts to storage...",
    );
    let mut uploaded = upload_artifacts(store.as_ref(), &run_id, &report).await;

    // The run report itself becomes an artifact, findable from the run row.
    let persisted = report.to_persisted(&run_id, &uploaded);
    if let Err(err) = persist_local_report(cfg, &run_id, &persisted) {
        agent_warn(SPEAKER, &format!("Local report not written: {err:#}"));
    }
    if let Some(store) = store.as_ref() {
        let report_path = format!("artifacts/{}/run_report.json", run_id);
        let report_bytes = serde_json::to_vec_pretty(&persisted)?;
        if store
            .upload(&report_path, report_bytes, "application/json")
            .await
            .is_ok()
        {
            uploaded.insert("run_report_json".to_string(), report_path);
        }
    }

    agent_log(SPEAKER, "I am finalizing the run status in the backend.");
    let status: RunStatus = report.status.parse().unwrap_or(RunStatus::Failed);
    report.error = report.error.take().filter(|e| !e.is_empty());
    if let Some(backend) = backend.as_ref() {
        let terminal = RunTerminal {
            status,
            artifacts: Some(uploaded),
            error: report.error.clone(),
        };
        if let Err(err) = backend.finalize_run(&run_id, &terminal).await {
            agent_fail(SPEAKER, &format!("Failed to update run status: {err:#}"));
        }
    }

    agent_log(SPEAKER, "Run complete. System is ready for evaluation.");
    Ok(run_id)
}
