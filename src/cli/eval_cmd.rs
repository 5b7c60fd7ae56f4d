use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::core::config::{DEFAULT_AGENT_ID, EnvConfig};
use crate::core::db::Backend;
use crate::core::dust::DustClient;
use crate::core::events;
use crate::core::patching::{heuristic_evaluation, normalize_eval};
use crate::core::seeds;
use crate::core::storage::ObjectStore;
use crate::core::terminal::{agent_log, agent_warn};

const SPEAKER: &str = "Agent Evaluator";

/// Backend-first report fetch: run row → run_report artifact → storage
/// download, with the local artifact directory as fallback.
async fn fetch_report(cfg: &EnvConfig, run_id: &str) -> Result<(Value, Value)> {
    let mut report: Option<Value> = None;
    let mut skill_spec = json!({});

    if let (Ok(backend), Ok(store)) = (Backend::from_config(cfg), ObjectStore::from_config(cfg)) {
        match backend.fetch_run(run_id).await {
            Ok(Some(run)) => {
                if let Some(report_path) = run.artifacts.get("run_report_json") {
                    match store.download_json(report_path).await {
                        Ok(fetched) => report = Some(fetched),
                        Err(err) => agent_warn(
                            SPEAKER,
                            &format!("Backend report fetch failed ({err:#}); trying local copy."),
                        ),
                    }
                }
                if let Some(skill_id) = &run.skill_id
                    && let Ok(spec) = seeds::load_seed(skill_id)
                {
                    skill_spec = spec;
                }
            }
            Ok(None) => {
                agent_warn(SPEAKER, &format!("Run {} not found in backend.", run_id));
            }
            Err(err) => {
                agent_warn(
                    SPEAKER,
                    &format!("Backend fetch failed ({err:#}); falling back to local report."),
                );
            }
        }
    }

    let report = match report {
        Some(report) => report,
        None => {
            let local = cfg.artifact_dir.join(run_id).join("run_report.json");
            let raw = std::fs::read_to_string(&local).with_context(|| {
                format!(
                    "could not load run report for '{}' from backend or {}",
                    run_id,
                    local.display()
                )
            })?;
            agent_warn(SPEAKER, &format!("Using local run report at {}.", local.display()));
            serde_json::from_str(&raw)?
        }
    };

    Ok((report, skill_spec))
}

/// Evaluate a run: agent-platform verdict when available, deterministic
/// heuristic otherwise. Persists the eval locally, mirrors it to storage,
/// and links it from the run row.
pub async fn evaluate_run(cfg: &EnvConfig, run_id: &str) -> Result<Value> {
    agent_log(SPEAKER, &format!("Evaluating run '{}'...", run_id));

    let (report, skill_spec) = fetch_report(cfg, run_id).await?;

    let eval = match DustClient::from_config(cfg) {
        Ok(dust) => match dust.evaluate_run(&report, &skill_spec, DEFAULT_AGENT_ID).await {
            Ok(eval) => {
                let eval = normalize_eval(eval);
                let decision = eval
                    .get("decision")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                agent_log(SPEAKER, &format!("Evaluation complete! Decision: {}", decision));
                if let Some(reasons) = eval.get("reasons").and_then(Value::as_array) {
                    let joined: Vec<&str> = reasons.iter().filter_map(Value::as_str).collect();
                    agent_log(SPEAKER, &format!("Reasons: {}", joined.join(", ")));
                }
                eval
            }
            Err(err) => {
                agent_warn(
                    SPEAKER,
                    &format!("Agent evaluation unavailable ({err:#}); using heuristic evaluator."),
                );
                heuristic_evaluation(&report)
            }
        },
        Err(err) => {
            agent_warn(
                SPEAKER,
                &format!("Agent evaluation unavailable ({err:#}); using heuristic evaluator."),
            );
            heuristic_evaluation(&report)
        }
    };

    let eval_key = format!("evals/{}.json", run_id);
    let local_path = cfg.evals_dir().join(format!("{}.json", run_id));
    std::fs::create_dir_all(cfg.evals_dir())?;
    std::fs::write(&local_path, serde_json::to_string_pretty(&eval)?)?;
    agent_log(SPEAKER, &format!("Evaluation saved locally: {}", local_path.display()));

    if let (Ok(backend), Ok(store)) = (Backend::from_config(cfg), ObjectStore::from_config(cfg)) {
        let sync: Result<()> = async {
            store
                .upload(
                    &format!("artifacts/{}", eval_key),
                    serde_json::to_vec(&eval)?,
                    "application/json",
                )
                .await?;
            backend.set_eval_key(run_id, &eval_key).await?;
            Ok(())
        }
        .await;
        match sync {
            Ok(()) => agent_log(SPEAKER, &format!("Evaluation saved to storage: {}", eval_key)),
            Err(err) => agent_warn(
                SPEAKER,
                &format!("Storage sync skipped ({err:#}). Local evaluation is available."),
            ),
        }
    }

    events::record(
        cfg,
        "run_evaluated",
        &format!("Run ID: {}", run_id),
        json!({ "decision": eval.get("decision") }),
    )
    .await;

    Ok(eval)
}
