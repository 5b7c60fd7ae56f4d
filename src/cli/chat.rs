use std::time::Duration;

use anyhow::Result;
use console::style;
use serde_json::{Value, json};

use crate::core::config::{DEFAULT_AGENT_ID, EnvConfig};
use crate::core::db::Backend;
use crate::core::dust::DustClient;
use crate::core::events;
use crate::core::model::Thread;
use crate::core::seeds;
use crate::core::terminal::{ReportTable, print_error, print_info, print_step, print_warn};

pub struct ChatOptions {
    pub new: bool,
    pub resume: Option<String>,
    pub history: bool,
}

const SYSTEM_PROMPT: &str = "You are the invoice automation copilot. You help users understand, \
create, modify, and execute invoicing automation skills.\n\nYou have deep knowledge of:\n1. The \
target invoicing platform — its Select2 dropdowns, invoice forms, tax rules, customer \
management.\n2. The SkillSpec format — JSON files with steps (goto, click, fill, select2, \
select2_tax, fill_date, handle_cookies, wait, screenshot, evaluate, check_validation).\n3. The \
agent's capabilities: `invox ask`, `invox run`, `invox loop`, `invox eval`, `invox patch`.\n\n\
Current skills available:\n{skills}\n\nWhen the user asks to create or modify a skill, output the \
full SkillSpec JSON.\nWhen the user asks to run something, tell them the exact CLI command.\nBe \
concise and actionable. You are a power-user copilot, not a tutorial.";

/// One line per local seed: id, version, description, slot names.
fn load_skills_context() -> String {
    let mut lines = Vec::new();
    for skill_id in seeds::existing_skill_ids() {
        let Ok(spec) = seeds::load_seed(&skill_id) else {
            continue;
        };
        let version = spec.get("version").and_then(Value::as_i64).unwrap_or(1);
        let description = spec
            .get("description")
            .or_else(|| spec.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let slot_keys: Vec<&str> = spec
            .get("slots_schema")
            .and_then(|s| s.get("properties"))
            .and_then(Value::as_object)
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default();
        lines.push(format!(
            "- **{}** v{}: {} [slots: {}]",
            skill_id,
            version,
            description,
            slot_keys.join(", ")
        ));
    }
    if lines.is_empty() {
        "(no skills loaded)".to_string()
    } else {
        lines.join("\n")
    }
}

async fn show_history(backend: &Backend) -> Result<()> {
    let threads = backend.list_threads(15).await?;
    if threads.is_empty() {
        print_info("No threads found.");
        return Ok(());
    }

    let mut table = ReportTable::new("Recent Chat Threads", &["UUID", "Title", "Turns", "Updated"]);
    for thread in &threads {
        let title: String = thread
            .title
            .as_deref()
            .unwrap_or("—")
            .chars()
            .take(50)
            .collect();
        let updated = thread
            .updated_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        table.row(&[
            &thread.id,
            &title,
            &thread.turn_count.to_string(),
            &updated,
        ]);
    }
    table.print();
    print_info("Resume with: invox chat --resume <UUID>");
    Ok(())
}

fn show_recent_context(messages: &[crate::core::model::ThreadMessage]) {
    if messages.is_empty() {
        return;
    }
    println!("{}", style("Recent context:").dim());
    for message in messages.iter().rev().take(4).rev() {
        let snippet: String = message.content.chars().take(120).collect();
        let suffix = if message.content.chars().count() > 120 { "…" } else { "" };
        let role = if message.role == "user" {
            style(message.role.as_str()).green()
        } else {
            style(message.role.as_str()).cyan()
        };
        println!("  {}: {}{}", role, snippet, suffix);
    }
    println!();
}

/// Interactive chat over the agent platform, with every turn persisted into
/// `threads`/`thread_messages`.
pub async fn start_chat(cfg: &EnvConfig, options: ChatOptions) -> Result<()> {
    let backend = Backend::from_config(cfg)
        .map_err(|_| anyhow::anyhow!("backend credentials are required for chat persistence"))?;

    if options.history {
        return show_history(&backend).await;
    }

    let system = SYSTEM_PROMPT.replace("{skills}", &load_skills_context());

    let mut thread_row: Option<Thread> = None;
    if let Some(resume_id) = &options.resume {
        thread_row = backend.thread_by_id(resume_id).await?;
        if thread_row.is_none() {
            print_error(&format!("Thread {} not found.", resume_id));
            anyhow::bail!("thread not found");
        }
    } else if !options.new {
        thread_row = backend.latest_thread().await?;
    }

    print_step("Invoice Agent Chat");
    print_info("Commands:  /new  |  /skills  |  /history  |  /run <cmd>  |  /quit");
    println!();

    if let Some(thread) = &thread_row {
        let short_id: String = thread.id.chars().take(8).collect();
        print_info(&format!(
            "Resuming thread {} ({})",
            short_id,
            thread.title.as_deref().unwrap_or("—")
        ));
        let messages = backend.thread_messages(&thread.id, 6).await.unwrap_or_default();
        show_recent_context(&messages);
    } else {
        print_info("Starting new thread…");
    }

    let dust = DustClient::from_config(cfg)?;

    let mut conversation_id = thread_row.as_ref().map(|t| t.dust_conversation_id.clone());
    let mut thread_id = thread_row.as_ref().map(|t| t.id.clone());
    let mut turn = thread_row.as_ref().map(|t| t.turn_count).unwrap_or(0);

    loop {
        let user_input = match inquire::Text::new("you ❯").prompt() {
            Ok(input) => input,
            Err(_) => {
                print_info("Goodbye.");
                break;
            }
        };
        let command = user_input.trim().to_string();
        if command.is_empty() {
            continue;
        }

        match command.as_str() {
            "/quit" => {
                print_info("Goodbye.");
                break;
            }
            "/new" => {
                conversation_id = None;
                thread_id = None;
                turn = 0;
                print_info("Thread reset. Next message starts a new thread.");
                continue;
            }
            "/skills" => {
                println!("\n{}\n", load_skills_context());
                continue;
            }
            "/history" => {
                show_history(&backend).await?;
                continue;
            }
            _ => {}
        }
        if let Some(shell_cmd) = command.strip_prefix("/run ") {
            run_shell(shell_cmd);
            continue;
        }

        let content = if turn == 0 && conversation_id.is_none() {
            format!("{}\n\n---\n\nUser: {}", system, user_input)
        } else {
            user_input.clone()
        };

        events::record(
            cfg,
            "chat_message",
            &format!("User: {:.100}", user_input),
            json!({ "thread_id": thread_id }),
        )
        .await;

        let reply = match &conversation_id {
            Some(existing) => {
                dust.reply_in_thread(
                    existing,
                    &content,
                    DEFAULT_AGENT_ID,
                    Duration::from_secs(2),
                    Duration::from_secs(120),
                )
                .await
            }
            None => match dust
                .create_conversation(&content, DEFAULT_AGENT_ID, Some(&format!("Chat: {:.30}", user_input)))
                .await
            {
                Ok(created) => {
                    conversation_id = Some(created.conversation_id.clone());
                    let thread = backend
                        .create_thread(&created.conversation_id, &truncate(&user_input, 80))
                        .await?;
                    print_info(&format!("Thread created: {}", thread.id));
                    thread_id = Some(thread.id);
                    Ok(created.message)
                }
                Err(err) => Err(err),
            },
        };

        let agent_reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                print_error(&format!("{err:#}"));
                continue;
            }
        };
        turn += 1;

        if let Some(thread_id) = &thread_id {
            let persist: Result<()> = async {
                backend
                    .insert_thread_message(thread_id, "user", &user_input, json!({}))
                    .await?;
                backend
                    .insert_thread_message(
                        thread_id,
                        "agent",
                        &agent_reply,
                        json!({ "dust_conversation_id": conversation_id }),
                    )
                    .await?;
                backend.bump_thread_turn(thread_id, turn).await?;
                Ok(())
            }
            .await;
            if let Err(err) = persist {
                print_warn(&format!("Thread persistence failed: {err:#}"));
            }
        }

        println!("\n{}", style("agent").bold().cyan());
        println!("{}\n", agent_reply);

        events::record(
            cfg,
            "chat_reply",
            &format!("Agent replied ({} chars)", agent_reply.chars().count()),
            json!({ "thread_id": thread_id, "conversation_id": conversation_id }),
        )
        .await;
    }

    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(unix)]
fn run_shell(cmd: &str) {
    let _ = std::process::Command::new("sh").arg("-c").arg(cmd).status();
}

#[cfg(not(unix))]
fn run_shell(cmd: &str) {
    let _ = std::process::Command::new("cmd").arg("/C").arg(cmd).status();
}
