use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::config::EnvConfig;

const EXECUTE_TIMEOUT: Duration = Duration::from_secs(1800);

/// One artifact produced by the remote executor, shipped inline as base64 so
/// the worker needs no shared filesystem with the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPayload {
    pub file_name: String,
    pub content_base64: String,
}

impl ArtifactPayload {
    pub fn decode(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.content_base64)
            .with_context(|| format!("artifact {} is not valid base64", self.file_name))
    }
}

/// Report returned by the browser-automation worker for one skill execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: String,
    #[serde(default)]
    pub steps_completed: u64,
    #[serde(default)]
    pub steps_total: u64,
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactPayload>,
    #[serde(default)]
    pub extracted_data: Map<String, Value>,
    #[serde(default)]
    pub validation_errors: Vec<String>,
    #[serde(default)]
    pub final_url: Option<String>,
    #[serde(default)]
    pub created_invoice_id: Option<String>,
    #[serde(default)]
    pub failure_class: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Synthetic report for a worker that crashed or never answered.
    pub fn transport_failure(message: &str) -> Self {
        Self {
            status: "failed".to_string(),
            steps_completed: 0,
            steps_total: 0,
            artifacts: BTreeMap::new(),
            extracted_data: Map::new(),
            validation_errors: Vec::new(),
            final_url: None,
            created_invoice_id: None,
            failure_class: Some("executor_unreachable".to_string()),
            error: Some(message.to_string()),
        }
    }

    /// The shape persisted as `run_report.json` and fed to evaluation: the
    /// executor report minus inline artifact bytes, plus run identity and
    /// the storage paths the artifacts ended up at.
    pub fn to_persisted(&self, run_id: &str, uploaded: &BTreeMap<String, String>) -> Value {
        json!({
            "run_id": run_id,
            "status": self.status,
            "steps_completed": self.steps_completed,
            "steps_total": self.steps_total,
            "artifacts": uploaded,
            "extracted_data": self.extracted_data,
            "validation_errors": self.validation_errors,
            "final_url": self.final_url,
            "created_invoice_id": self.created_invoice_id,
            "failure_class": self.failure_class,
            "error": self.error,
        })
    }
}

/// Client for the remote browser-automation worker. The worker owns the
/// whole browser lifecycle; this side only ships the skill spec and slots
/// and takes back a report.
pub struct ExecutorClient {
    worker_url: String,
    http: reqwest::Client,
}

impl ExecutorClient {
    pub fn from_config(cfg: &EnvConfig) -> Result<Self> {
        let Some(worker_url) = &cfg.worker_url else {
            bail!("WORKER_URL not set in .env");
        };
        Ok(Self {
            worker_url: worker_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        })
    }

    pub async fn execute(
        &self,
        run_id: &str,
        skill_spec: &Value,
        slots: &Value,
        headless: bool,
    ) -> Result<RunReport> {
        let resp = self
            .http
            .post(format!("{}/execute", self.worker_url))
            .timeout(EXECUTE_TIMEOUT)
            .json(&json!({
                "run_id": run_id,
                "skill": skill_spec,
                "slots": slots,
                "headless": headless,
            }))
            .send()
            .await
            .context("executor request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("executor rejected run {}: {} {}", run_id, status, body);
        }
        resp.json::<RunReport>()
            .await
            .context("executor returned an unreadable report")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tolerates_minimal_payload() {
        let report: RunReport = serde_json::from_value(json!({ "status": "success" })).unwrap();
        assert!(report.is_success());
        assert!(report.artifacts.is_empty());
        assert!(report.error.is_none());
    }

    #[test]
    fn artifact_payload_round_trips_base64() {
        let payload = ArtifactPayload {
            file_name: "smoke.png".to_string(),
            content_base64: BASE64.encode([1u8, 2, 3]),
        };
        assert_eq!(payload.decode().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn invalid_base64_is_reported_with_file_name() {
        let payload = ArtifactPayload {
            file_name: "video.webm".to_string(),
            content_base64: "!!not-base64!!".to_string(),
        };
        let err = payload.decode().unwrap_err().to_string();
        assert!(err.contains("video.webm"));
    }

    #[test]
    fn persisted_report_replaces_payloads_with_storage_paths() {
        let mut report = RunReport::transport_failure("boom");
        report.status = "success".to_string();
        report.error = None;
        report.failure_class = None;
        let uploaded =
            BTreeMap::from([("last_png".to_string(), "artifacts/r1/last.png".to_string())]);
        let persisted = report.to_persisted("r1", &uploaded);
        assert_eq!(persisted["run_id"], "r1");
        assert_eq!(persisted["artifacts"]["last_png"], "artifacts/r1/last.png");
        assert!(persisted.get("content_base64").is_none());
    }
}
