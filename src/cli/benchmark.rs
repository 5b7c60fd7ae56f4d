use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use serde_json::{Value, json};

use super::{eval_cmd, patch_cmd, run_cmd};
use crate::core::config::EnvConfig;
use crate::core::events;
use crate::core::patching::eval_patch_ops;
use crate::core::seeds;
use crate::core::terminal::{ReportTable, agent_log, agent_warn, print_error, print_status, print_success};

const SPEAKER: &str = "Agent Benchmark";

pub struct BenchmarkOptions {
    pub input_file: Option<PathBuf>,
    pub runs: u32,
    pub min_success_rate: f64,
    pub auto_patch: bool,
    pub stop_on_failure: bool,
    pub headless: bool,
}

#[derive(Debug, Clone)]
pub struct BenchmarkRun {
    pub iter: u32,
    pub run_id: String,
    pub decision: String,
    pub failure_class: Option<String>,
    pub created_invoice_id: Option<String>,
    pub validation_error_count: usize,
    pub status: Option<String>,
}

/// Aggregate repeated run/eval rows into the reliability summary.
pub fn summarize_benchmark_results(
    skill_id: &str,
    runs: &[BenchmarkRun],
    started_at: &str,
    ended_at: &str,
) -> Value {
    let total = runs.len();
    let success_count = runs.iter().filter(|r| r.decision == "success").count();
    let failure_count = total - success_count;
    let success_rate = if total > 0 {
        success_count as f64 / total as f64
    } else {
        0.0
    };

    let mut failure_classes: BTreeMap<String, u64> = BTreeMap::new();
    for run in runs.iter().filter(|r| r.decision != "success") {
        let class = run
            .failure_class
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        *failure_classes.entry(class).or_insert(0) += 1;
    }

    json!({
        "skill_id": skill_id,
        "started_at": started_at,
        "ended_at": ended_at,
        "total_runs": total,
        "success_count": success_count,
        "failure_count": failure_count,
        "success_rate": success_rate,
        "failure_classes": failure_classes,
        "runs": runs.iter().map(|r| json!({
            "iter": r.iter,
            "run_id": r.run_id,
            "decision": r.decision,
            "failure_class": r.failure_class,
            "created_invoice_id": r.created_invoice_id,
            "validation_error_count": r.validation_error_count,
            "status": r.status,
        })).collect::<Vec<_>>(),
    })
}

fn load_local_report(cfg: &EnvConfig, run_id: &str) -> Value {
    let path = cfg.artifact_dir.join(run_id).join("run_report.json");
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_else(|| json!({}))
}

/// Repeated execution/evaluation cycles scoring skill reliability.
/// Exit code 2 when the success rate misses the gate.
pub async fn run_benchmark(cfg: &EnvConfig, skill_id: &str, options: BenchmarkOptions) -> Result<u8> {
    if !seeds::seed_path(skill_id).exists() {
        print_error(&format!(
            "skill seed not found: {}",
            seeds::seed_path(skill_id).display()
        ));
        return Ok(1);
    }
    if let Some(input_file) = &options.input_file
        && !input_file.exists()
    {
        print_error(&format!("input file not found: {}", input_file.display()));
        return Ok(1);
    }

    let started_at = Utc::now().to_rfc3339();
    agent_log(
        SPEAKER,
        &format!("Starting benchmark for {} with {} run(s).", skill_id, options.runs),
    );
    events::record(
        cfg,
        "benchmark_started",
        &format!("Skill: {}", skill_id),
        json!({ "runs": options.runs }),
    )
    .await;

    let mut run_rows: Vec<BenchmarkRun> = Vec::new();
    for iter in 1..=options.runs {
        agent_log(SPEAKER, &format!("Run {}/{}: executing skill...", iter, options.runs));

        let run_id = run_cmd::run_skill(
            cfg,
            skill_id,
            options.input_file.as_deref(),
            options.headless,
        )
        .await?;
        let eval = eval_cmd::evaluate_run(cfg, &run_id).await?;
        let report = load_local_report(cfg, &run_id);

        let decision = eval
            .get("decision")
            .and_then(Value::as_str)
            .unwrap_or("failure")
            .to_string();
        run_rows.push(BenchmarkRun {
            iter,
            run_id: run_id.clone(),
            decision: decision.clone(),
            failure_class: eval
                .get("failure_class")
                .and_then(Value::as_str)
                .map(String::from),
            created_invoice_id: report
                .get("created_invoice_id")
                .and_then(Value::as_str)
                .map(String::from),
            validation_error_count: report
                .get("validation_errors")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0),
            status: report.get("status").and_then(Value::as_str).map(String::from),
        });

        if options.auto_patch && decision != "success" && !eval_patch_ops(&eval).is_empty() {
            let eval_key = format!("evals/{}.json", run_id);
            agent_warn(SPEAKER, &format!("Applying auto-patch from {}...", eval_key));
            patch_cmd::apply_patch(cfg, skill_id, &eval_key).await?;
        }

        if options.stop_on_failure && decision != "success" {
            agent_warn(SPEAKER, "Stopping early due to failed run.");
            break;
        }
    }

    let ended_at = Utc::now().to_rfc3339();
    let summary = summarize_benchmark_results(skill_id, &run_rows, &started_at, &ended_at);

    let out_dir = cfg.benchmarks_dir();
    std::fs::create_dir_all(&out_dir)?;
    let out_path = out_dir.join(format!(
        "{}_{}.json",
        skill_id.replace('/', "_"),
        Utc::now().format("%Y%m%dT%H%M%SZ")
    ));
    std::fs::write(&out_path, serde_json::to_string_pretty(&summary)?)?;

    let mut table = ReportTable::new(
        "Benchmark Runs",
        &["Iter", "Run ID", "Decision", "Failure Class", "Created ID", "Validation Errors"],
    );
    for row in &run_rows {
        let short_id: String = row.run_id.chars().take(8).collect();
        table.row(&[
            &row.iter.to_string(),
            &short_id,
            &row.decision,
            row.failure_class.as_deref().unwrap_or(""),
            row.created_invoice_id.as_deref().unwrap_or(""),
            &row.validation_error_count.to_string(),
        ]);
    }
    table.print();

    let success_rate = summary["success_rate"].as_f64().unwrap_or(0.0);
    let success_count = summary["success_count"].as_u64().unwrap_or(0);
    let total_runs = summary["total_runs"].as_u64().unwrap_or(0);
    print_status(
        "Success rate",
        &format!("{:.2}% ({}/{})", success_rate * 100.0, success_count, total_runs),
    );
    print_status("Saved benchmark", &out_path.display().to_string());

    events::record(
        cfg,
        "benchmark_completed",
        &format!("Skill: {}", skill_id),
        json!({
            "success_rate": success_rate,
            "total_runs": total_runs,
            "output": out_path.display().to_string(),
        }),
    )
    .await;

    if success_rate < options.min_success_rate {
        print_error(&format!(
            "Benchmark failed: success rate {:.2}% < required {:.2}%",
            success_rate * 100.0,
            options.min_success_rate * 100.0
        ));
        return Ok(2);
    }

    print_success("Benchmark passed.");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(iter: u32, decision: &str, failure_class: Option<&str>) -> BenchmarkRun {
        BenchmarkRun {
            iter,
            run_id: format!("run-{}", iter),
            decision: decision.to_string(),
            failure_class: failure_class.map(String::from),
            created_invoice_id: None,
            validation_error_count: 0,
            status: None,
        }
    }

    #[test]
    fn summary_counts_success_and_failure_classes() {
        let runs = vec![
            run(1, "success", None),
            run(2, "failure", Some("validation_error")),
            run(3, "failure", Some("validation_error")),
            run(4, "failure", Some("runtime_error")),
        ];
        let summary = summarize_benchmark_results(
            "invoiceapp.sales_invoice.existing",
            &runs,
            "2026-02-22T00:00:00Z",
            "2026-02-22T00:01:00Z",
        );
        assert_eq!(summary["total_runs"], 4);
        assert_eq!(summary["success_count"], 1);
        assert_eq!(summary["failure_count"], 3);
        assert_eq!(summary["success_rate"], 0.25);
        assert_eq!(summary["failure_classes"]["validation_error"], 2);
        assert_eq!(summary["failure_classes"]["runtime_error"], 1);
    }

    #[test]
    fn summary_of_no_runs_is_zeroed() {
        let summary = summarize_benchmark_results("s", &[], "t0", "t1");
        assert_eq!(summary["total_runs"], 0);
        assert_eq!(summary["success_rate"], 0.0);
    }

    #[test]
    fn unclassified_failures_count_as_unknown() {
        let runs = vec![run(1, "failure", None)];
        let summary = summarize_benchmark_results("s", &runs, "t0", "t1");
        assert_eq!(summary["failure_classes"]["unknown"], 1);
    }
}
