use anyhow::{Result, bail};
use serde_json::{Value, json};

use super::{eval_cmd, patch_cmd, run_cmd};
use crate::core::config::{DEFAULT_AGENT_ID, EnvConfig};
use crate::core::dust::DustClient;
use crate::core::events;
use crate::core::invoice::parse_invoice_prompt;
use crate::core::terminal::{ReportTable, agent_fail, agent_log, agent_warn};

const SPEAKER: &str = "Agent Loop";

struct IterationRow {
    iter: u32,
    run_id: String,
    decision: String,
    failure_class: String,
}

/// The full route → run → eval → patch training loop for N iterations.
pub async fn run_loop(cfg: &EnvConfig, prompt: &str, iters: u32) -> Result<()> {
    if !(1..=10).contains(&iters) {
        bail!("--iters must be between 1 and 10");
    }

    agent_log(SPEAKER, &format!("Starting training loop for: {}", prompt));
    events::record(cfg, "loop_started", prompt, json!({ "iters": iters })).await;

    agent_log(SPEAKER, "Step 1: Routing prompt to identify the correct skill...");
    let (skill_id, slots) = match DustClient::from_config(cfg) {
        Ok(dust) => match dust.route_prompt(prompt, DEFAULT_AGENT_ID).await {
            Ok(decision) => (
                decision
                    .skill_id
                    .unwrap_or_else(|| "invoiceapp.sales_invoice.existing".to_string()),
                Value::Object(decision.slots),
            ),
            Err(err) => {
                agent_warn(
                    SPEAKER,
                    &format!("Routing unavailable ({err:#}); using deterministic invoice fallback."),
                );
                (
                    "invoiceapp.sales_invoice.existing".to_string(),
                    Value::Object(parse_invoice_prompt(prompt)),
                )
            }
        },
        Err(err) => {
            agent_warn(
                SPEAKER,
                &format!("Routing unavailable ({err:#}); using deterministic invoice fallback."),
            );
            (
                "invoiceapp.sales_invoice.existing".to_string(),
                Value::Object(parse_invoice_prompt(prompt)),
            )
        }
    };

    agent_log(
        SPEAKER,
        &format!("I've identified skill {}. Starting iterations...", skill_id),
    );

    let temp_input = std::path::PathBuf::from(".state/temp_slots.json");
    if let Some(parent) = temp_input.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&temp_input, serde_json::to_string(&slots)?)?;

    let mut history: Vec<IterationRow> = Vec::new();

    for i in 1..=iters {
        agent_log(SPEAKER, &format!("Iteration {}/{}", i, iters));

        agent_log(SPEAKER, "Step 2: Executing via the remote worker...");
        let run_id = match run_cmd::run_skill(cfg, &skill_id, Some(&temp_input), true).await {
            Ok(run_id) => run_id,
            Err(err) => {
                agent_fail(SPEAKER, &format!("Run failed: {err:#}"));
                break;
            }
        };

        agent_log(SPEAKER, "Step 3: Evaluating run results...");
        let eval = match eval_cmd::evaluate_run(cfg, &run_id).await {
            Ok(eval) => eval,
            Err(err) => {
                agent_fail(SPEAKER, &format!("Evaluation failed: {err:#}"));
                break;
            }
        };

        let decision = eval
            .get("decision")
            .and_then(Value::as_str)
            .unwrap_or("failure")
            .to_string();
        history.push(IterationRow {
            iter: i,
            run_id: run_id.clone(),
            decision: decision.clone(),
            failure_class: eval
                .get("failure_class")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        });

        if decision == "success" {
            agent_log(SPEAKER, "Goal achieved! The skill is now perfected.");
            events::record(cfg, "loop_success", &format!("Skill {} perfected.", skill_id), json!({}))
                .await;
            break;
        }

        agent_log(SPEAKER, "Step 4: Applying self-healing patch to the skill...");
        let eval_key = format!("evals/{}.json", run_id);
        if let Err(err) = patch_cmd::apply_patch(cfg, &skill_id, &eval_key).await {
            agent_fail(SPEAKER, &format!("Patching failed: {err:#}"));
            break;
        }
        events::record(
            cfg,
            "skill_patched",
            &format!("Skill {} patched.", skill_id),
            json!({ "run_id": run_id }),
        )
        .await;
    }

    if !history.is_empty() {
        let mut table = ReportTable::new(
            "Training Loop Summary",
            &["Iter", "Run ID", "Decision", "Failure Class"],
        );
        for row in &history {
            let short_id: String = row.run_id.chars().take(8).collect();
            table.row(&[
                &row.iter.to_string(),
                &short_id,
                &row.decision,
                &row.failure_class,
            ]);
        }
        table.print();
        println!();
    }

    Ok(())
}
