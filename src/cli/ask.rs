use anyhow::Result;
use serde_json::{Map, Value, json};

use super::{eval_cmd, patch_cmd, run_cmd};
use crate::core::config::EnvConfig;
use crate::core::dust::{DustClient, RouteDecision};
use crate::core::events;
use crate::core::invoice::{parse_invoice_prompt, validate_vat_id};
use crate::core::patching::eval_patch_ops;
use crate::core::schedule::{frequencies_for_period, save_recurring_job};
use crate::core::seeds;
use crate::core::terminal::{agent_fail, agent_log, agent_warn};

const SPEAKER: &str = "Agent Router";

/// Canonical invoice fields where deterministic extraction beats the model.
const TRUSTED_SLOTS: &[&str] = &["amount", "currency", "period", "tax_rule", "vat_id"];

pub struct AskOptions {
    pub platform_id: String,
    pub agent_id: String,
    pub auto_acquire: bool,
    pub learn: bool,
    pub yes: bool,
}

async fn route(cfg: &EnvConfig, prompt: &str, agent_id: &str) -> RouteDecision {
    match DustClient::from_config(cfg) {
        Ok(dust) => match dust.route_prompt(prompt, agent_id).await {
            Ok(decision) => return decision,
            Err(err) => agent_warn(
                SPEAKER,
                &format!("Routing unavailable ({err:#}); using deterministic invoice fallback."),
            ),
        },
        Err(err) => agent_warn(
            SPEAKER,
            &format!("Routing unavailable ({err:#}); using deterministic invoice fallback."),
        ),
    }
    RouteDecision {
        skill_id: Some("invoiceapp.sales_invoice.existing".to_string()),
        slots: parse_invoice_prompt(prompt),
        confidence: 0.4,
    }
}

fn overlay_deterministic_slots(slots: &mut Map<String, Value>, prompt: &str) {
    for (key, value) in parse_invoice_prompt(prompt) {
        if TRUSTED_SLOTS.contains(&key.as_str()) {
            slots.insert(key, value);
        } else {
            slots.entry(key).or_insert(value);
        }
    }
}

fn confirm_execution(yes: bool) -> bool {
    if yes {
        return true;
    }
    match inquire::Confirm::new("Proceed with execution?")
        .with_default(false)
        .prompt()
    {
        Ok(answer) => answer,
        Err(_) => {
            agent_warn(
                SPEAKER,
                "No interactive input available; re-run with --yes to execute automatically.",
            );
            false
        }
    }
}

/// Route a natural-language request, acquire a skill when routing finds
/// none, execute it, and optionally run the one-step learn pass.
pub async fn run_ask(cfg: &EnvConfig, prompt: &str, options: AskOptions) -> Result<()> {
    agent_log(SPEAKER, &format!("I've received your request: {}", prompt));
    events::record(cfg, "user_prompt", prompt, json!({})).await;

    agent_log(SPEAKER, "I am analyzing the request to find the right skill...");
    let decision = route(cfg, prompt, &options.agent_id).await;
    if decision.confidence < 0.5 {
        agent_warn(
            SPEAKER,
            &format!("Routing confidence is low ({:.2}).", decision.confidence),
        );
    }
    let mut skill_id = decision.skill_id;
    let mut slots = decision.slots;
    overlay_deterministic_slots(&mut slots, prompt);

    if let Some(vat_id) = slots.get("vat_id").and_then(Value::as_str).map(String::from) {
        agent_log(SPEAKER, &format!("Checking VAT ID via VIES endpoint: {}", vat_id));
        let vat_result = validate_vat_id(cfg, &vat_id).await;
        events::record(cfg, "vat_check", &format!("VAT result for {}", vat_id), vat_result.clone())
            .await;
        slots.insert("vat_check".to_string(), vat_result);
    }

    let seed_exists = skill_id
        .as_deref()
        .map(|id| seeds::seed_path(id).exists())
        .unwrap_or(false);
    if (skill_id.is_none() || !seed_exists) && options.auto_acquire {
        agent_log(
            SPEAKER,
            "No usable routed skill found. Starting skill acquisition from platform memory...",
        );
        let preferred = skill_id.clone().filter(|_| !seed_exists);
        let acquired = super::extrapolate::synthesize_skill_for_prompt(
            cfg,
            prompt,
            &options.platform_id,
            &options.agent_id,
            preferred.as_deref(),
        )
        .await?;
        agent_log(
            SPEAKER,
            &format!(
                "Acquired new skill {} at {}",
                acquired.skill_id,
                acquired.seed_path.display()
            ),
        );
        events::record(
            cfg,
            "skill_acquired_from_prompt",
            &format!("Skill: {}", acquired.skill_id),
            json!({ "prompt": prompt, "seed_path": acquired.seed_path.display().to_string() }),
        )
        .await;
        skill_id = Some(acquired.skill_id);
    }

    let Some(skill_id) = skill_id else {
        agent_fail(SPEAKER, "I couldn't identify or acquire a skill for this request.");
        anyhow::bail!("no skill identified for prompt");
    };

    agent_log(
        SPEAKER,
        &format!(
            "I've identified the skill {} with parameters: {}",
            skill_id,
            Value::Object(slots.clone())
        ),
    );
    events::record(
        cfg,
        "route_identified",
        &format!("Skill: {}", skill_id),
        json!({ "slots": slots }),
    )
    .await;

    if !confirm_execution(options.yes) {
        agent_warn(SPEAKER, "Execution cancelled by user.");
        return Ok(());
    }

    let temp_input = std::path::PathBuf::from(".state/temp_slots.json");
    if let Some(parent) = temp_input.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&temp_input, serde_json::to_string(&slots)?)?;

    let run_id = run_cmd::run_skill(cfg, &skill_id, Some(&temp_input), true).await?;

    if options.learn {
        match eval_cmd::evaluate_run(cfg, &run_id).await {
            Ok(eval) => {
                let failed = eval.get("decision").and_then(Value::as_str) == Some("failure");
                if failed && !eval_patch_ops(&eval).is_empty() {
                    let eval_key = format!("evals/{}.json", run_id);
                    agent_warn(SPEAKER, &format!("Applying auto-heal patch from {}...", eval_key));
                    patch_cmd::apply_patch(cfg, &skill_id, &eval_key).await?;
                    events::record(
                        cfg,
                        "skill_auto_patched",
                        &format!("Auto-patched {}", skill_id),
                        json!({ "run_id": run_id, "eval_key": eval_key }),
                    )
                    .await;
                }
            }
            Err(err) => agent_warn(SPEAKER, &format!("Learning pass skipped ({err:#})")),
        }
    }

    let period = slots
        .get("period")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    let schedule_frequencies = frequencies_for_period(&period);
    if !schedule_frequencies.is_empty() {
        let slots_value = Value::Object(slots.clone());
        let mut created_paths = Vec::new();
        for frequency in &schedule_frequencies {
            let job_path = save_recurring_job(cfg, &skill_id, prompt, &slots_value, frequency)?;
            created_paths.push(job_path.display().to_string());
        }
        agent_log(
            SPEAKER,
            &format!(
                "Recurring schedules created ({}): {}",
                schedule_frequencies.join(", "),
                created_paths.join(", ")
            ),
        );
        events::record(
            cfg,
            "recurrence_scheduled",
            &format!("{} schedule for {}", period, skill_id),
            json!({ "job_paths": created_paths }),
        )
        .await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_slots_override_trusted_fields_only() {
        let mut slots = Map::new();
        slots.insert("amount".to_string(), json!(1.0));
        slots.insert("customer".to_string(), json!("ACME"));
        overlay_deterministic_slots(&mut slots, "monthly invoice of €1200, reverse charge");
        // Canonical fields come from the deterministic extractor.
        assert_eq!(slots["amount"], 1200.0);
        assert_eq!(slots["period"], "monthly");
        assert_eq!(slots["tax_rule"], "reverse_charge");
        // Non-canonical routed fields survive.
        assert_eq!(slots["customer"], "ACME");
    }
}
