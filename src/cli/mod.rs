mod ask;
mod auth_cmd;
mod benchmark;
mod bootstrap;
mod chat;
mod eval_cmd;
mod extrapolate;
mod loop_cmd;
mod overview;
mod patch_cmd;
mod run_cmd;
mod serve;
mod smoke;
mod storage_check;
mod swarm;

use anyhow::Result;
use console::style;

use crate::core::config::{DEFAULT_AGENT_ID, DEFAULT_PLATFORM_ID, EnvConfig};
use crate::core::terminal::{self, print_error};

fn print_help() {
    terminal::print_banner();

    let sections: &[(&str, &[(&str, &str)])] = &[
        (
            "Core",
            &[
                ("ask \"<prompt>\"", "Route a natural-language request and run it"),
                ("run <skill_id> [input.json]", "Execute a skill seed as a tracked run"),
                ("loop \"<prompt>\"", "Run the route → run → eval → patch loop"),
                ("chat", "Interactive chat with thread persistence"),
            ],
        ),
        (
            "Learning",
            &[
                ("eval <run_id>", "Evaluate a run and store the verdict"),
                ("patch <skill_id> <eval_key>", "Apply a self-heal patch to a skill"),
                ("extrapolate \"<prompt>\"", "Synthesize a skill from platform memory"),
                ("benchmark <skill_id>", "Score skill reliability over repeated runs"),
                ("swarm", "Fan tasks across sandboxed workers"),
            ],
        ),
        (
            "Infrastructure",
            &[
                ("bootstrap", "Create local state directories"),
                ("serve", "Host the worker API (GET / and POST /smoke)"),
                ("smoke", "Check cloud dependencies and hit the worker /smoke"),
                ("storage-check [--run-id <id>]", "Inspect object storage buckets"),
                ("overview", "Show skills, recent runs, and integration status"),
                ("auth save <name>", "Upload a captured auth state to storage"),
            ],
        ),
    ];

    for (title, commands) in sections {
        println!(" {}", style(title).bold().magenta());
        for (command, description) in *commands {
            println!("   {:<34} {}", style(command).green(), description);
        }
        println!();
    }
    println!(
        " {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("invox").green()
    );
}

fn flag_value(args: &[String], start: usize, names: &[&str]) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], start: usize, name: &str) -> bool {
    args.iter().skip(start).any(|a| a == name)
}

/// `--foo/--no-foo` pair with a default; the last occurrence wins.
fn bool_flag(args: &[String], start: usize, name: &str, default: bool) -> bool {
    let yes = format!("--{}", name);
    let no = format!("--no-{}", name);
    let mut value = default;
    for arg in args.iter().skip(start) {
        if *arg == yes {
            value = true;
        } else if *arg == no {
            value = false;
        }
    }
    value
}

/// First argument after the command that is not a flag or a flag value.
fn positional(args: &[String], start: usize) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        let arg = &args[i];
        if arg.starts_with("--") {
            // Paired flags consume the next token; switches do not.
            if matches!(
                arg.as_str(),
                "--yes"
                    | "--new"
                    | "--history"
                    | "--headless"
                    | "--headed"
                    | "--auto-patch"
                    | "--no-auto-patch"
                    | "--stop-on-failure"
                    | "--no-stop-on-failure"
                    | "--auto-acquire"
                    | "--no-auto-acquire"
                    | "--learn"
                    | "--no-learn"
            ) {
                i += 1;
            } else {
                i += 2;
            }
            continue;
        }
        return Some(arg.clone());
    }
    None
}

fn positionals(args: &[String], start: usize, count: usize) -> Vec<String> {
    let mut found = Vec::new();
    let mut i = start;
    while i < args.len() && found.len() < count {
        let arg = &args[i];
        if arg.starts_with("--") {
            i += 2;
            continue;
        }
        found.push(arg.clone());
        i += 1;
    }
    found
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize) -> (String, u16) {
    let host = flag_value(args, start, &["--host"]).unwrap_or_else(|| "127.0.0.1".to_string());
    let port = flag_value(args, start, &["--port"])
        .and_then(|p| p.parse().ok())
        .unwrap_or(8787);
    (host, port)
}

/// Exit code for the process; commands with reliability gates use 2.
pub async fn run_main() -> Result<u8> {
    let args: Vec<String> = std::env::args().collect();
    let cfg = EnvConfig::load();

    if args.len() < 2 {
        print_help();
        return Ok(0);
    }

    match args[1].as_str() {
        "bootstrap" => {
            bootstrap::run_bootstrap(&cfg)?;
            Ok(0)
        }
        "serve" => {
            let (host, port) = parse_serve_flags(&args, 2);
            serve::run_serve(&cfg, host, port).await?;
            Ok(0)
        }
        "smoke" => {
            let timeout_seconds = flag_value(&args, 2, &["--timeout-seconds"])
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60)
                .clamp(15, 300);
            smoke::run_cloud_smoke(&cfg, timeout_seconds).await
        }
        "storage-check" => {
            let run_id = flag_value(&args, 2, &["--run-id"]);
            storage_check::run_storage_check(&cfg, run_id.as_deref()).await?;
            Ok(0)
        }
        "overview" => {
            overview::show_overview(&cfg).await?;
            Ok(0)
        }
        "auth" => {
            if args.len() > 3 && args[2] == "save" {
                auth_cmd::save_auth(&cfg, &args[3]).await?;
                Ok(0)
            } else {
                print_error("Usage: invox auth save <name>");
                Ok(1)
            }
        }
        "run" => {
            let positional_args = positionals(&args, 2, 2);
            let Some(skill_id) = positional_args.first() else {
                print_error("Usage: invox run <skill_id> [input.json]");
                return Ok(1);
            };
            let input_file = positional_args.get(1).map(std::path::PathBuf::from);
            run_cmd::run_skill(&cfg, skill_id, input_file.as_deref(), true).await?;
            Ok(0)
        }
        "ask" => {
            let Some(prompt) = positional(&args, 2) else {
                print_error("Usage: invox ask \"<prompt>\" [--yes]");
                return Ok(1);
            };
            let options = ask::AskOptions {
                platform_id: flag_value(&args, 2, &["--platform-id"])
                    .unwrap_or_else(|| DEFAULT_PLATFORM_ID.to_string()),
                agent_id: flag_value(&args, 2, &["--agent-id"])
                    .unwrap_or_else(|| DEFAULT_AGENT_ID.to_string()),
                auto_acquire: bool_flag(&args, 2, "auto-acquire", true),
                learn: bool_flag(&args, 2, "learn", true),
                yes: has_flag(&args, 2, "--yes"),
            };
            ask::run_ask(&cfg, &prompt, options).await?;
            Ok(0)
        }
        "eval" => {
            let Some(run_id) = positional(&args, 2) else {
                print_error("Usage: invox eval <run_id>");
                return Ok(1);
            };
            eval_cmd::evaluate_run(&cfg, &run_id).await?;
            Ok(0)
        }
        "patch" => {
            let positional_args = positionals(&args, 2, 2);
            let [skill_id, eval_key] = positional_args.as_slice() else {
                print_error("Usage: invox patch <skill_id> <eval_key>");
                return Ok(1);
            };
            patch_cmd::apply_patch(&cfg, skill_id, eval_key).await?;
            Ok(0)
        }
        "loop" => {
            let Some(prompt) = positional(&args, 2) else {
                print_error("Usage: invox loop \"<prompt>\" [--iters N]");
                return Ok(1);
            };
            let iters = flag_value(&args, 2, &["--iters"])
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3);
            loop_cmd::run_loop(&cfg, &prompt, iters).await?;
            Ok(0)
        }
        "benchmark" => {
            let Some(skill_id) = positional(&args, 2) else {
                print_error("Usage: invox benchmark <skill_id> [--runs N]");
                return Ok(1);
            };
            let options = benchmark::BenchmarkOptions {
                input_file: flag_value(&args, 2, &["--input-file"]).map(std::path::PathBuf::from),
                runs: flag_value(&args, 2, &["--runs"])
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(3)
                    .clamp(1, 20),
                min_success_rate: flag_value(&args, 2, &["--min-success-rate"])
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(1.0)
                    .clamp(0.0, 1.0),
                auto_patch: bool_flag(&args, 2, "auto-patch", false),
                stop_on_failure: bool_flag(&args, 2, "stop-on-failure", false),
                headless: !has_flag(&args, 2, "--headed"),
            };
            benchmark::run_benchmark(&cfg, &skill_id, options).await
        }
        "extrapolate" => {
            let Some(prompt) = positional(&args, 2) else {
                print_error("Usage: invox extrapolate \"<prompt>\"");
                return Ok(1);
            };
            let platform_id = flag_value(&args, 2, &["--platform-id"])
                .unwrap_or_else(|| DEFAULT_PLATFORM_ID.to_string());
            let agent_id = flag_value(&args, 2, &["--agent-id"])
                .unwrap_or_else(|| DEFAULT_AGENT_ID.to_string());
            let skill_id = flag_value(&args, 2, &["--skill-id"]);
            extrapolate::run_extrapolate(&cfg, &prompt, &platform_id, &agent_id, skill_id.as_deref())
                .await?;
            Ok(0)
        }
        "swarm" => {
            let options = swarm::SwarmOptions {
                tasks_file: flag_value(&args, 2, &["--tasks-file"]).map(std::path::PathBuf::from),
                prompts: collect_repeated(&args, 2, "--prompt"),
                mode: flag_value(&args, 2, &["--mode"]).unwrap_or_else(|| "learn".to_string()),
                workers: flag_value(&args, 2, &["--workers"])
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(2)
                    .clamp(1, 20),
                sandbox_root: flag_value(&args, 2, &["--sandbox-root"])
                    .map(std::path::PathBuf::from)
                    .unwrap_or_else(|| std::path::PathBuf::from(".sandboxes")),
                headless: !has_flag(&args, 2, "--headed"),
                timeout_seconds: flag_value(&args, 2, &["--timeout-seconds"])
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1800)
                    .clamp(60, 7200),
                auth_name: flag_value(&args, 2, &["--auth-name"])
                    .unwrap_or_else(|| DEFAULT_PLATFORM_ID.to_string()),
            };
            swarm::run_swarm(&cfg, options).await
        }
        "chat" => {
            let options = chat::ChatOptions {
                new: has_flag(&args, 2, "--new"),
                resume: flag_value(&args, 2, &["--resume"]),
                history: has_flag(&args, 2, "--history"),
            };
            chat::start_chat(&cfg, options).await?;
            Ok(0)
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(0)
        }
        other => {
            print_error(&format!("Unknown command: {}", other));
            print_help();
            Ok(1)
        }
    }
}

fn collect_repeated(args: &[String], start: usize, name: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut i = start;
    while i < args.len() {
        if args[i] == name && i + 1 < args.len() {
            values.push(args[i + 1].clone());
            i += 2;
        } else {
            i += 1;
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn parse_serve_flags_reads_host_and_port() {
        let args = argv(&["invox", "serve", "--host", "0.0.0.0", "--port", "9900"]);
        let (host, port) = parse_serve_flags(&args, 2);
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 9900);
    }

    #[test]
    fn parse_serve_flags_defaults() {
        let args = argv(&["invox", "serve"]);
        let (host, port) = parse_serve_flags(&args, 2);
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 8787);
    }

    #[test]
    fn positional_skips_flag_pairs_and_switches() {
        let args = argv(&["invox", "ask", "--platform-id", "acme", "--yes", "make invoice"]);
        assert_eq!(positional(&args, 2).as_deref(), Some("make invoice"));
    }

    #[test]
    fn positionals_take_two_values_around_flags() {
        let args = argv(&["invox", "patch", "skill.a", "--verbose-thing", "x", "evals/r1.json"]);
        assert_eq!(
            positionals(&args, 2, 2),
            vec!["skill.a".to_string(), "evals/r1.json".to_string()]
        );
    }

    #[test]
    fn bool_flag_last_occurrence_wins() {
        let args = argv(&["invox", "ask", "--no-learn", "--learn"]);
        assert!(bool_flag(&args, 2, "learn", false));
        let args = argv(&["invox", "ask", "--learn", "--no-learn"]);
        assert!(!bool_flag(&args, 2, "learn", true));
    }

    #[test]
    fn collect_repeated_gathers_all_prompts() {
        let args = argv(&["invox", "swarm", "--prompt", "a", "--workers", "3", "--prompt", "b"]);
        assert_eq!(collect_repeated(&args, 2, "--prompt"), vec!["a", "b"]);
    }
}
