use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde_json::{Value, json};

use super::model::{Event, NewRun, Run, RunTerminal, Skill, Thread, ThreadMessage};
use super::recorder::RunStore;

const REST_TIMEOUT: Duration = Duration::from_secs(20);

/// PostgREST client for the backend tables
/// (`runs`, `skills`, `events`, `threads`, `thread_messages`).
#[derive(Clone)]
pub struct Backend {
    base_url: String,
    key: String,
    http: reqwest::Client,
}

impl Backend {
    pub fn new(base_url: &str, key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(cfg: &super::config::EnvConfig) -> Result<Self> {
        let (url, key) = cfg.require_backend()?;
        Ok(Self::new(&url, &key))
    }

    fn rest(&self, table_and_query: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table_and_query)
    }

    fn auth(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("apikey", &self.key)
            .bearer_auth(&self.key)
            .timeout(REST_TIMEOUT)
    }

    /// Liveness probe against the REST root; returns (ok, details).
    pub async fn ping(&self) -> (bool, String) {
        let request = self.auth(self.http.get(self.rest("")));
        match request.send().await {
            Ok(resp) if resp.status().is_success() => (true, "ok".to_string()),
            Ok(resp) => (false, format!("status={}", resp.status().as_u16())),
            Err(err) => (false, err.to_string()),
        }
    }

    pub async fn insert_run(&self, new_run: &NewRun) -> Result<Run> {
        let resp = self
            .auth(self.http.post(self.rest("runs")))
            .header("Prefer", "return=representation")
            .json(new_run)
            .send()
            .await
            .context("run insert request failed")?
            .error_for_status()
            .context("run insert rejected")?;
        let mut rows: Vec<Run> = resp.json().await.context("run insert returned no row")?;
        rows.pop()
            .ok_or_else(|| anyhow!("run insert returned an empty result set"))
    }

    pub async fn finalize_run(&self, run_id: &str, terminal: &RunTerminal) -> Result<()> {
        self.auth(
            self.http
                .patch(self.rest(&format!("runs?id=eq.{}", urlencoding::encode(run_id)))),
        )
        .json(terminal)
        .send()
        .await
        .context("run update request failed")?
        .error_for_status()
        .context("run update rejected")?;
        Ok(())
    }

    pub async fn set_eval_key(&self, run_id: &str, eval_key: &str) -> Result<()> {
        self.auth(
            self.http
                .patch(self.rest(&format!("runs?id=eq.{}", urlencoding::encode(run_id)))),
        )
        .json(&json!({ "eval_key": eval_key }))
        .send()
        .await?
        .error_for_status()?;
        Ok(())
    }

    pub async fn fetch_run(&self, run_id: &str) -> Result<Option<Run>> {
        let resp = self
            .auth(
                self.http
                    .get(self.rest(&format!("runs?id=eq.{}", urlencoding::encode(run_id)))),
            )
            .send()
            .await?
            .error_for_status()?;
        let mut rows: Vec<Run> = resp.json().await?;
        Ok(rows.pop())
    }

    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let resp = self
            .auth(self.http.get(self.rest(&format!(
                "runs?order=created_at.desc&limit={}",
                limit
            ))))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn skill_ids(&self) -> Result<Vec<String>> {
        let resp = self
            .auth(self.http.get(self.rest("skills?select=id")))
            .send()
            .await?
            .error_for_status()?;
        let rows: Vec<Value> = resp.json().await?;
        let mut ids: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str))
            .map(String::from)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Append-only upsert: `(id, version)` rows are merged, never rewritten
    /// under a new meaning.
    pub async fn upsert_skill(&self, skill: &Skill) -> Result<()> {
        self.auth(self.http.post(self.rest("skills")))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(skill)
            .send()
            .await?
            .error_for_status()
            .context("skill upsert rejected")?;
        Ok(())
    }

    pub async fn insert_event(&self, event: &Event) -> Result<()> {
        self.auth(self.http.post(self.rest("events")))
            .timeout(Duration::from_secs(5))
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    // --- thread persistence (chat) ---

    pub async fn create_thread(&self, dust_conversation_id: &str, title: &str) -> Result<Thread> {
        let resp = self
            .auth(self.http.post(self.rest("threads")))
            .header("Prefer", "return=representation")
            .json(&json!({
                "dust_conversation_id": dust_conversation_id,
                "title": title,
                "turn_count": 0,
            }))
            .send()
            .await?
            .error_for_status()?;
        let mut rows: Vec<Thread> = resp.json().await?;
        rows.pop()
            .ok_or_else(|| anyhow!("thread insert returned an empty result set"))
    }

    pub async fn bump_thread_turn(&self, thread_id: &str, turn: i64) -> Result<()> {
        self.auth(self.http.patch(self.rest(&format!(
            "threads?id=eq.{}",
            urlencoding::encode(thread_id)
        ))))
        .json(&json!({ "turn_count": turn, "updated_at": "now()" }))
        .send()
        .await?
        .error_for_status()?;
        Ok(())
    }

    pub async fn latest_thread(&self) -> Result<Option<Thread>> {
        let resp = self
            .auth(self.http.get(self.rest("threads?order=updated_at.desc&limit=1")))
            .send()
            .await?
            .error_for_status()?;
        let mut rows: Vec<Thread> = resp.json().await?;
        Ok(rows.pop())
    }

    pub async fn thread_by_id(&self, thread_id: &str) -> Result<Option<Thread>> {
        let resp = self
            .auth(self.http.get(self.rest(&format!(
                "threads?id=eq.{}",
                urlencoding::encode(thread_id)
            ))))
            .send()
            .await?
            .error_for_status()?;
        let mut rows: Vec<Thread> = resp.json().await?;
        Ok(rows.pop())
    }

    pub async fn list_threads(&self, limit: usize) -> Result<Vec<Thread>> {
        let resp = self
            .auth(self.http.get(self.rest(&format!(
                "threads?order=updated_at.desc&limit={}",
                limit
            ))))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn thread_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<ThreadMessage>> {
        let resp = self
            .auth(self.http.get(self.rest(&format!(
                "thread_messages?thread_id=eq.{}&order=created_at.asc&limit={}",
                urlencoding::encode(thread_id),
                limit
            ))))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn insert_thread_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
        metadata: Value,
    ) -> Result<()> {
        self.auth(self.http.post(self.rest("thread_messages")))
            .json(&json!({
                "thread_id": thread_id,
                "role": role,
                "content": content,
                "metadata": metadata,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for Backend {
    async fn create_running(&self, prompt: &str) -> Result<String> {
        let run = self.insert_run(&NewRun::running(prompt)).await?;
        Ok(run.id)
    }

    async fn mark_terminal(&self, run_id: &str, terminal: &RunTerminal) -> Result<()> {
        self.finalize_run(run_id, terminal).await
    }
}
