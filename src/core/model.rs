use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a tracked run. Transitions are monotonic along
/// `pending → running → {success | failed | error}`; nothing leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed | RunStatus::Error)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
        };
        write!(f, "{}", label)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" | "succeeded" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "error" => Ok(RunStatus::Error),
            other => Err(anyhow::anyhow!("unknown run status: {}", other)),
        }
    }
}

/// One tracked execution of an external action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub skill_id: Option<String>,
    #[serde(default)]
    pub skill_version: Option<i64>,
    #[serde(default)]
    pub slots: Option<Value>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub eval_key: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Insert payload for a new run row.
#[derive(Debug, Clone, Serialize)]
pub struct NewRun {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots: Option<Value>,
}

impl NewRun {
    pub fn running(prompt: &str) -> Self {
        Self {
            status: RunStatus::Running,
            prompt: Some(prompt.to_string()),
            skill_id: None,
            skill_version: None,
            slots: None,
        }
    }
}

/// Terminal update for a run row. `error` is serialized unconditionally so a
/// success update clears any previous message to null.
#[derive(Debug, Clone, Serialize)]
pub struct RunTerminal {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<String, String>>,
    pub error: Option<String>,
}

impl RunTerminal {
    pub fn success(artifacts: BTreeMap<String, String>) -> Self {
        Self {
            status: RunStatus::Success,
            artifacts: Some(artifacts),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            status: RunStatus::Error,
            artifacts: None,
            error: Some(message),
        }
    }
}

/// Versioned definition of an automatable action. `(id, version)` pairs are
/// append-only and immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub version: i64,
    pub spec: Value,
}

/// Append-only audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub details: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub dust_conversation_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub turn_count: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub thread_id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminality() {
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Error.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn status_round_trips_through_serde_lowercase() {
        let json = serde_json::to_string(&RunStatus::Error).unwrap();
        assert_eq!(json, "\"error\"");
        let back: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunStatus::Error);
    }

    #[test]
    fn success_terminal_serializes_null_error() {
        let update = RunTerminal::success(BTreeMap::new());
        let value = serde_json::to_value(&update).unwrap();
        assert!(value.get("error").unwrap().is_null());
        assert_eq!(value["status"], "success");
    }

    #[test]
    fn run_row_tolerates_missing_optional_columns() {
        let run: Run =
            serde_json::from_value(serde_json::json!({ "id": "r1", "status": "running" }))
                .unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.artifacts.is_empty());
        assert!(run.error.is_none());
    }
}
