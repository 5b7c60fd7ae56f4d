use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::core::config::EnvConfig;
use crate::core::db::Backend;
use crate::core::gemini::check_gemini_connectivity;
use crate::core::terminal::{ReportTable, print_error, print_step, print_success};

async fn check_supabase(cfg: &EnvConfig) -> (bool, String) {
    match Backend::from_config(cfg) {
        Ok(backend) => backend.ping().await,
        Err(err) => (false, err.to_string()),
    }
}

pub(crate) async fn check_dust_status(cfg: &EnvConfig) -> (bool, String) {
    let (Some(api_key), Some(workspace_id)) = (&cfg.dust_api_key, &cfg.dust_workspace_id) else {
        return (false, "missing DUST_API_KEY or DUST_WORKSPACE_ID".to_string());
    };
    let url = format!(
        "{}/w/{}/assistant/agent_configurations",
        cfg.dust_base_url.trim_end_matches('/'),
        workspace_id
    );
    let request = reqwest::Client::new()
        .get(&url)
        .bearer_auth(api_key)
        .timeout(Duration::from_secs(10));
    match request.send().await {
        Ok(resp) if resp.status().is_success() => (true, "ok".to_string()),
        Ok(resp) => (false, format!("status={}", resp.status().as_u16())),
        Err(err) => (false, err.to_string()),
    }
}

fn status_label(ok: bool) -> &'static str {
    if ok { "OK" } else { "FAIL" }
}

/// Cloud smoke: dependency checks, then one worker `/smoke` execution.
pub async fn run_cloud_smoke(cfg: &EnvConfig, timeout_seconds: u64) -> Result<u8> {
    let supabase = check_supabase(cfg).await;
    let dust = check_dust_status(cfg).await;
    let gemini =
        check_gemini_connectivity(cfg.gemini_api_key.as_deref(), Duration::from_secs(10)).await;

    let mut table = ReportTable::new("Cloud Dependency Checks", &["Dependency", "Status", "Details"]);
    table.row(&["Supabase", status_label(supabase.0), &supabase.1]);
    table.row(&["Dust", status_label(dust.0), &dust.1]);
    table.row(&["Gemini", status_label(gemini.0), &gemini.1]);
    table.print();

    let Some(worker_url) = &cfg.worker_url else {
        print_error("WORKER_URL not set in .env");
        return Ok(1);
    };

    print_step(&format!("Running worker smoke at {}...", worker_url));
    let started = Instant::now();

    let request = reqwest::Client::new()
        .post(format!("{}/smoke", worker_url))
        .timeout(Duration::from_secs(timeout_seconds));

    let outcome: Result<(String, String)> = async {
        let resp = request.send().await?.error_for_status()?;
        let payload: Value = resp.json().await?;
        let run_id = payload
            .get("run_id")
            .and_then(Value::as_str)
            .map(String::from);
        let smoke_png = payload
            .get("artifacts")
            .and_then(|a| a.get("smoke_png"))
            .and_then(Value::as_str)
            .map(String::from);
        match (run_id, smoke_png) {
            (Some(run_id), Some(smoke_png)) => Ok((run_id, smoke_png)),
            _ => Err(anyhow!("unexpected worker response: {}", payload)),
        }
    }
    .await;

    match outcome {
        Ok((run_id, smoke_png)) => {
            print_success(&format!("Run ID: {}", run_id));
            print_success(&format!("Artifact: {}", smoke_png));
            print_success(&format!("Completed in {:.1}s", started.elapsed().as_secs_f64()));
            print_success("Cloud smoke test passed.");
            Ok(0)
        }
        Err(err) => {
            print_error(&format!("Worker smoke failed: {err:#}"));
            Ok(1)
        }
    }
}
