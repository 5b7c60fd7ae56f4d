use std::time::Duration;

use anyhow::Result;

use super::smoke;
use crate::core::config::EnvConfig;
use crate::core::db::Backend;
use crate::core::gemini::check_gemini_connectivity;
use crate::core::schedule::recent_schedule_files;
use crate::core::terminal::{ReportTable, print_step};

fn status_cell(ok: bool) -> &'static str {
    if ok { "CONNECTED" } else { "NOT READY" }
}

/// System readiness: available skills, recent runs, integration status, and
/// pending recurring-invoice schedules.
pub async fn show_overview(cfg: &EnvConfig) -> Result<()> {
    let backend = Backend::from_config(cfg)?;
    print_step("Agent Orchestration Overview");

    let runs = backend.recent_runs(5).await.unwrap_or_default();
    let skill_ids = backend.skill_ids().await.unwrap_or_default();

    let mut skills_table = ReportTable::new("Available Skills", &["Skill ID", "Status"]);
    if skill_ids.is_empty() {
        skills_table.row(&["No skills found", "N/A"]);
    } else {
        for skill_id in &skill_ids {
            skills_table.row(&[skill_id, "Active"]);
        }
    }
    skills_table.print();

    let mut runs_table = ReportTable::new("Recent Runs", &["Run ID", "Skill", "Status", "Created"]);
    if runs.is_empty() {
        runs_table.row(&["-", "-", "No recent runs", "-"]);
    } else {
        for run in &runs {
            let short_id: String = run.id.chars().take(8).collect();
            let created = run
                .created_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            runs_table.row(&[
                &short_id,
                run.skill_id.as_deref().unwrap_or("N/A"),
                &run.status.to_string(),
                &created,
            ]);
        }
    }
    runs_table.print();

    let supabase = backend.ping().await;
    let dust = smoke::check_dust_status(cfg).await;
    let gemini =
        check_gemini_connectivity(cfg.gemini_api_key.as_deref(), Duration::from_secs(8)).await;

    let mut dep_table = ReportTable::new("Integration Status", &["Service", "Status", "Details"]);
    dep_table.row(&["Supabase", status_cell(supabase.0), &supabase.1]);
    dep_table.row(&["Dust", status_cell(dust.0), &dust.1]);
    dep_table.row(&["Gemini", status_cell(gemini.0), &gemini.1]);
    dep_table.print();

    let schedule_files = recent_schedule_files(cfg, 5);
    let mut schedule_table = ReportTable::new("Recurring Invoice Jobs", &["Job File", "Status"]);
    if schedule_files.is_empty() {
        schedule_table.row(&["No scheduled jobs", "N/A"]);
    } else {
        for path in &schedule_files {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("(unnamed)");
            schedule_table.row(&[name, "Scheduled"]);
        }
    }
    schedule_table.print();
    println!();
    Ok(())
}
