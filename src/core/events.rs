use serde_json::Value;
use tracing::debug;

use super::config::EnvConfig;
use super::db::Backend;
use super::model::Event;

/// Record an audit event in the backend `events` table.
///
/// Best-effort: missing credentials or a failed insert never interrupt the
/// calling command. The audit trail is a side channel, not a dependency.
pub async fn record(cfg: &EnvConfig, event_type: &str, details: &str, metadata: Value) {
    let Ok(backend) = Backend::from_config(cfg) else {
        return;
    };
    let event = Event {
        event_type: event_type.to_string(),
        details: details.to_string(),
        metadata,
    };
    if let Err(err) = backend.insert_event(&event).await {
        debug!("event '{}' not recorded: {}", event_type, err);
    }
}
