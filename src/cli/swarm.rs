use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use regex::Regex;
use serde_json::{Value, json};

use crate::core::config::EnvConfig;
use crate::core::events;
use crate::core::seeds::SEEDS_DIR;
use crate::core::terminal::{ReportTable, agent_log, print_status, print_success};

const SPEAKER: &str = "Agent Swarm";

const RUN_ID_PATTERN: &str =
    r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b";

pub struct SwarmOptions {
    pub tasks_file: Option<PathBuf>,
    pub prompts: Vec<String>,
    pub mode: String,
    pub workers: usize,
    pub sandbox_root: PathBuf,
    pub headless: bool,
    pub timeout_seconds: u64,
    pub auth_name: String,
}

#[derive(Debug, Clone)]
pub struct SwarmTask {
    pub id: String,
    pub prompt: Option<String>,
    pub skill_id: Option<String>,
    pub input_file: Option<String>,
    pub task_type: String,
    pub platform_id: String,
    pub auto_acquire: bool,
    pub learn: bool,
}

fn slug(value: &str, limit: usize) -> String {
    let collapsed = Regex::new(r"[^a-z0-9]+")
        .unwrap()
        .replace_all(&value.to_lowercase(), "-")
        .trim_matches('-')
        .to_string();
    let truncated: String = collapsed.chars().take(limit).collect();
    let truncated = truncated.trim_matches('-').to_string();
    if truncated.is_empty() { "task".to_string() } else { truncated }
}

/// Normalize a tasks payload (`{"tasks": [...]}` or a bare list) into
/// runnable tasks; entries without a prompt or skill id are dropped.
pub fn normalize_tasks(payload: &Value, default_prompt_task_type: &str) -> Vec<SwarmTask> {
    let raw_tasks = match payload {
        Value::Object(object) => object.get("tasks").and_then(Value::as_array).cloned(),
        Value::Array(items) => Some(items.clone()),
        _ => None,
    }
    .unwrap_or_default();

    let mut tasks = Vec::new();
    for (idx, raw) in raw_tasks.iter().enumerate() {
        let Some(object) = raw.as_object() else {
            continue;
        };
        let get_str =
            |key: &str| -> Option<String> { object.get(key).and_then(Value::as_str).map(String::from) };

        let prompt = get_str("prompt");
        let skill_id = get_str("skill_id");
        let mut task_type = get_str("task_type").unwrap_or_default();
        if task_type.is_empty() {
            task_type = if prompt.is_some() {
                default_prompt_task_type.to_string()
            } else if skill_id.is_some() {
                "run".to_string()
            } else {
                "ask".to_string()
            };
        }

        if prompt.is_none() && skill_id.is_none() {
            continue;
        }
        tasks.push(SwarmTask {
            id: get_str("id").unwrap_or_else(|| format!("task_{}", idx + 1)),
            prompt,
            skill_id,
            input_file: get_str("input_file"),
            task_type,
            platform_id: get_str("platform_id")
                .unwrap_or_else(|| crate::core::config::DEFAULT_PLATFORM_ID.to_string()),
            auto_acquire: object
                .get("auto_acquire")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            learn: object.get("learn").and_then(Value::as_bool).unwrap_or(true),
        });
    }
    tasks
}

fn load_tasks(options: &SwarmOptions) -> Result<Vec<SwarmTask>> {
    let default_prompt_task_type = if options.mode == "learn" { "extrapolate" } else { "ask" };

    let mut tasks = Vec::new();
    if let Some(tasks_file) = &options.tasks_file {
        let raw = std::fs::read_to_string(tasks_file)
            .with_context(|| format!("tasks file not found: {}", tasks_file.display()))?;
        let payload: Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", tasks_file.display()))?;
        tasks.extend(normalize_tasks(&payload, default_prompt_task_type));
    }
    for (idx, prompt) in options.prompts.iter().enumerate() {
        tasks.push(SwarmTask {
            id: format!("prompt_{}", idx + 1),
            prompt: Some(prompt.clone()),
            skill_id: None,
            input_file: None,
            task_type: default_prompt_task_type.to_string(),
            platform_id: crate::core::config::DEFAULT_PLATFORM_ID.to_string(),
            auto_acquire: true,
            learn: true,
        });
    }
    Ok(tasks)
}

/// Argv (without the binary) to run one task inside a sandbox.
pub fn command_for_task(task: &SwarmTask) -> Result<Vec<String>> {
    if let Some(prompt) = &task.prompt {
        if matches!(task.task_type.as_str(), "extrapolate" | "learn") {
            let skill_id = format!(
                "{}.swarm.{}.{}",
                task.platform_id,
                slug(&task.id, 32),
                Utc::now().format("%Y%m%d%H%M%S")
            );
            return Ok(vec![
                "extrapolate".to_string(),
                prompt.clone(),
                "--platform-id".to_string(),
                task.platform_id.clone(),
                "--skill-id".to_string(),
                skill_id,
            ]);
        }
        if matches!(task.task_type.as_str(), "ask" | "execute") {
            let mut cmd = vec![
                "ask".to_string(),
                prompt.clone(),
                "--yes".to_string(),
                "--platform-id".to_string(),
                task.platform_id.clone(),
            ];
            cmd.push(if task.auto_acquire { "--auto-acquire" } else { "--no-auto-acquire" }.to_string());
            cmd.push(if task.learn { "--learn" } else { "--no-learn" }.to_string());
            return Ok(cmd);
        }
    }

    if let Some(skill_id) = &task.skill_id {
        if matches!(task.task_type.as_str(), "run" | "execute") {
            let mut cmd = vec!["run".to_string(), skill_id.clone()];
            if let Some(input_file) = &task.input_file {
                cmd.push(input_file.clone());
            }
            return Ok(cmd);
        }
        if task.task_type == "benchmark" {
            let mut cmd = vec![
                "benchmark".to_string(),
                skill_id.clone(),
                "--runs".to_string(),
                "1".to_string(),
                "--stop-on-failure".to_string(),
            ];
            if let Some(input_file) = &task.input_file {
                cmd.push("--input-file".to_string());
                cmd.push(input_file.clone());
            }
            return Ok(cmd);
        }
    }

    bail!(
        "task '{}' has unsupported task_type='{}' or missing fields",
        task.id,
        task.task_type
    )
}

#[cfg(unix)]
fn link_shared_dir(dst: &Path, src: &Path) -> std::io::Result<()> {
    if dst.exists() || dst.is_symlink() {
        return Ok(());
    }
    std::os::unix::fs::symlink(src.canonicalize()?, dst)
}

#[cfg(not(unix))]
fn link_shared_dir(dst: &Path, src: &Path) -> std::io::Result<()> {
    if dst.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        if entry.path().is_file() {
            std::fs::copy(entry.path(), dst.join(entry.file_name()))?;
        }
    }
    Ok(())
}

/// One sandbox per worker: shared seeds, private `.state`, auth state copied
/// in so workers never write back to the primary session file.
fn prepare_sandbox(
    repo_root: &Path,
    sandbox_root: &Path,
    worker_name: &str,
    auth_name: &str,
) -> Result<PathBuf> {
    let sandbox = sandbox_root.join(worker_name);
    std::fs::create_dir_all(&sandbox)?;

    let seeds_src = repo_root.join(SEEDS_DIR);
    if seeds_src.exists() {
        let _ = link_shared_dir(&sandbox.join(SEEDS_DIR), &seeds_src);
    }

    let state_dir = sandbox.join(".state");
    for sub in ["auth", "artifacts", "runs", "swarm"] {
        std::fs::create_dir_all(state_dir.join(sub))?;
    }

    let src_auth = repo_root.join(".state/auth").join(format!("{}.json", auth_name));
    let dst_auth = state_dir.join("auth").join(format!("{}.json", auth_name));
    if src_auth.exists() && !dst_auth.exists() {
        std::fs::copy(&src_auth, &dst_auth)?;
    }
    Ok(sandbox)
}

fn scrape_run_ids(output: &str) -> Vec<String> {
    let re = Regex::new(RUN_ID_PATTERN).unwrap();
    let mut ids: Vec<String> = re.find_iter(output).map(|m| m.as_str().to_string()).collect();
    ids.sort();
    ids.dedup();
    ids
}

async fn run_task_in_sandbox(
    task: &SwarmTask,
    sandbox: &Path,
    headless: bool,
    timeout_seconds: u64,
) -> Result<Value> {
    let args = command_for_task(task)?;
    let binary = std::env::current_exe().context("cannot locate invox binary")?;
    let started = Utc::now().to_rfc3339();

    let mut command = tokio::process::Command::new(&binary);
    command
        .args(&args)
        .current_dir(sandbox)
        .env("HEADLESS", if headless { "1" } else { "0" })
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let output = tokio::time::timeout(
        std::time::Duration::from_secs(timeout_seconds),
        command.output(),
    )
    .await
    .with_context(|| format!("task '{}' timed out after {}s", task.id, timeout_seconds))??;
    let ended = Utc::now().to_rfc3339();

    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        text.push('\n');
        text.push_str(&stderr);
    }

    let run_ids = scrape_run_ids(&text);
    let mut run_statuses: BTreeMap<String, String> = BTreeMap::new();
    for run_id in &run_ids {
        let report_path = sandbox
            .join(".state/artifacts")
            .join(run_id)
            .join("run_report.json");
        if let Ok(raw) = std::fs::read_to_string(&report_path)
            && let Ok(report) = serde_json::from_str::<Value>(&raw)
            && let Some(status) = report.get("status").and_then(Value::as_str)
        {
            run_statuses.insert(run_id.clone(), status.to_string());
        }
    }
    let report_failed = run_statuses
        .values()
        .any(|status| !matches!(status.to_lowercase().as_str(), "success" | "succeeded"));
    let exit_code = output.status.code().unwrap_or(1);
    let task_ok = exit_code == 0 && !report_failed;

    let swarm_dir = sandbox.join(".state/swarm");
    std::fs::create_dir_all(&swarm_dir)?;
    let log_path = swarm_dir.join(format!("{}.log", task.id));
    std::fs::write(&log_path, &text)?;

    Ok(json!({
        "task_id": task.id,
        "prompt": task.prompt,
        "skill_id": task.skill_id,
        "command": args,
        "sandbox": sandbox.display().to_string(),
        "exit_code": exit_code,
        "task_ok": task_ok,
        "run_ids": run_ids,
        "run_statuses": run_statuses,
        "started_at": started,
        "ended_at": ended,
        "log_path": log_path.display().to_string(),
    }))
}

/// Fan a task list across isolated worker sandboxes.
/// Exit code 2 when any task fails.
pub async fn run_swarm(cfg: &EnvConfig, options: SwarmOptions) -> Result<u8> {
    let tasks = load_tasks(&options)?;
    if tasks.is_empty() {
        bail!("no tasks to run — provide --tasks-file and/or --prompt entries");
    }

    let repo_root = std::env::current_dir()?;
    std::fs::create_dir_all(&options.sandbox_root)?;

    let mut sandboxes = Vec::new();
    for i in 0..options.workers {
        sandboxes.push(prepare_sandbox(
            &repo_root,
            &options.sandbox_root,
            &format!("worker_{}", i + 1),
            &options.auth_name,
        )?);
    }

    agent_log(
        SPEAKER,
        &format!(
            "Starting swarm with {} worker(s), {} task(s), mode={}.",
            options.workers,
            tasks.len(),
            options.mode
        ),
    );

    let queue: Arc<Mutex<VecDeque<SwarmTask>>> = Arc::new(Mutex::new(tasks.iter().cloned().collect()));
    let results: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for sandbox in sandboxes {
        let queue = queue.clone();
        let results = results.clone();
        let headless = options.headless;
        let timeout_seconds = options.timeout_seconds;
        handles.push(tokio::spawn(async move {
            loop {
                let task = { queue.lock().unwrap().pop_front() };
                let Some(task) = task else {
                    return;
                };
                let result = match run_task_in_sandbox(&task, &sandbox, headless, timeout_seconds)
                    .await
                {
                    Ok(result) => result,
                    Err(err) => json!({
                        "task_id": task.id,
                        "prompt": task.prompt,
                        "skill_id": task.skill_id,
                        "sandbox": sandbox.display().to_string(),
                        "exit_code": 1,
                        "task_ok": false,
                        "run_ids": [],
                        "error": format!("{err:#}"),
                    }),
                };
                results.lock().unwrap().push(result);
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }

    let mut results: Vec<Value> = Arc::try_unwrap(results)
        .map(|m| m.into_inner().unwrap_or_default())
        .unwrap_or_default();
    results.sort_by_key(|r| {
        r.get("task_id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    });

    let success_count = results
        .iter()
        .filter(|r| r.get("task_ok").and_then(Value::as_bool).unwrap_or(false))
        .count();
    let failure_count = results.len() - success_count;

    let mut table = ReportTable::new("Swarm Tasks", &["Task", "Exit", "Run IDs", "Sandbox", "Log"]);
    for row in &results {
        let run_ids = row
            .get("run_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        let run_ids: String = run_ids.chars().take(120).collect();
        let sandbox_name = row
            .get("sandbox")
            .and_then(Value::as_str)
            .and_then(|s| Path::new(s).file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("-")
            .to_string();
        table.row(&[
            row.get("task_id").and_then(Value::as_str).unwrap_or("?"),
            &row.get("exit_code").and_then(Value::as_i64).unwrap_or(1).to_string(),
            &run_ids,
            &sandbox_name,
            row.get("log_path").and_then(Value::as_str).unwrap_or("-"),
        ]);
    }
    table.print();
    print_status(
        "Swarm summary",
        &format!(
            "success={} failed={} total={}",
            success_count,
            failure_count,
            results.len()
        ),
    );

    let out_dir = cfg.swarm_dir();
    std::fs::create_dir_all(&out_dir)?;
    let out_path = out_dir.join(format!("swarm_{}.json", Utc::now().format("%Y%m%dT%H%M%SZ")));
    std::fs::write(
        &out_path,
        serde_json::to_string_pretty(&json!({
            "workers": options.workers,
            "tasks_total": tasks.len(),
            "success_count": success_count,
            "failure_count": failure_count,
            "sandbox_root": options.sandbox_root.display().to_string(),
            "results": results,
        }))?,
    )?;
    print_success(&format!("Swarm report: {}", out_path.display()));

    events::record(
        cfg,
        "swarm_completed",
        "Swarm run completed",
        json!({
            "workers": options.workers,
            "tasks_total": tasks.len(),
            "success_count": success_count,
            "failure_count": failure_count,
            "report_path": out_path.display().to_string(),
        }),
    )
    .await;

    Ok(if failure_count > 0 { 2 } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_tasks_accepts_wrapper_and_bare_list() {
        let wrapped = json!({ "tasks": [{ "id": "a", "prompt": "make invoice" }] });
        let bare = json!([{ "skill_id": "invoiceapp.extract_sales" }]);
        assert_eq!(normalize_tasks(&wrapped, "ask").len(), 1);
        let bare_tasks = normalize_tasks(&bare, "ask");
        assert_eq!(bare_tasks.len(), 1);
        assert_eq!(bare_tasks[0].task_type, "run");
        assert_eq!(bare_tasks[0].id, "task_1");
    }

    #[test]
    fn normalize_tasks_drops_empty_entries() {
        let payload = json!({ "tasks": [{ "id": "empty" }, "not-an-object", 42] });
        assert!(normalize_tasks(&payload, "ask").is_empty());
    }

    #[test]
    fn prompt_tasks_default_to_mode_task_type() {
        let payload = json!({ "tasks": [{ "prompt": "teach yourself invoices" }] });
        assert_eq!(normalize_tasks(&payload, "extrapolate")[0].task_type, "extrapolate");
        assert_eq!(normalize_tasks(&payload, "ask")[0].task_type, "ask");
    }

    #[test]
    fn ask_command_carries_acquire_and_learn_switches() {
        let task = SwarmTask {
            id: "t".to_string(),
            prompt: Some("make invoice".to_string()),
            skill_id: None,
            input_file: None,
            task_type: "ask".to_string(),
            platform_id: "invoiceapp".to_string(),
            auto_acquire: false,
            learn: true,
        };
        let cmd = command_for_task(&task).unwrap();
        assert_eq!(cmd[0], "ask");
        assert!(cmd.contains(&"--yes".to_string()));
        assert!(cmd.contains(&"--no-auto-acquire".to_string()));
        assert!(cmd.contains(&"--learn".to_string()));
    }

    #[test]
    fn benchmark_command_pins_single_stop_on_failure_run() {
        let task = SwarmTask {
            id: "b".to_string(),
            prompt: None,
            skill_id: Some("invoiceapp.sales_invoice.existing".to_string()),
            input_file: Some("slots.json".to_string()),
            task_type: "benchmark".to_string(),
            platform_id: "invoiceapp".to_string(),
            auto_acquire: true,
            learn: true,
        };
        let cmd = command_for_task(&task).unwrap();
        assert_eq!(cmd[0], "benchmark");
        assert!(cmd.contains(&"--stop-on-failure".to_string()));
        assert!(cmd.contains(&"--input-file".to_string()));
    }

    #[test]
    fn unsupported_task_shape_is_an_error() {
        let task = SwarmTask {
            id: "x".to_string(),
            prompt: None,
            skill_id: Some("s".to_string()),
            input_file: None,
            task_type: "mine".to_string(),
            platform_id: "invoiceapp".to_string(),
            auto_acquire: true,
            learn: true,
        };
        assert!(command_for_task(&task).is_err());
    }

    #[test]
    fn run_ids_are_scraped_sorted_and_deduped() {
        let output = "run 9b2e6c1a-1111-4222-8333-abcdefabcdef done\n\
                      again 9b2e6c1a-1111-4222-8333-abcdefabcdef\n\
                      and 00112233-4455-4677-8899-aabbccddeeff";
        let ids = scrape_run_ids(output);
        assert_eq!(
            ids,
            vec![
                "00112233-4455-4677-8899-aabbccddeeff".to_string(),
                "9b2e6c1a-1111-4222-8333-abcdefabcdef".to_string(),
            ]
        );
    }

    #[test]
    fn slug_limits_and_sanitizes() {
        assert_eq!(slug("Invoice Task #42!", 32), "invoice-task-42");
        assert_eq!(slug("", 32), "task");
    }
}
