use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::{Value, json};

use super::recorder::ArtifactStore;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const LIST_TIMEOUT: Duration = Duration::from_secs(20);

/// Object storage client. Paths are `bucket/key...`, e.g.
/// `artifacts/{run_id}/smoke.png` or `auth/{name}.json`.
#[derive(Clone)]
pub struct ObjectStore {
    base_url: String,
    key: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl ObjectEntry {
    pub fn size(&self) -> Option<u64> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("size"))
            .and_then(Value::as_u64)
    }
}

/// Content type from the artifact file name, `application/octet-stream`
/// when unrecognized.
pub fn content_type_for(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

impl ObjectStore {
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

    fn auth(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("apikey", &self.key).bearer_auth(&self.key)
    }

    /// Upsert upload: a retry of the same object path must not fail on
    /// "already exists".
    pub async fn upload(&self, object_path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, object_path);
        let resp = self
            .auth(self.http.post(&url))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .timeout(UPLOAD_TIMEOUT)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("upload request for {} failed", object_path))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("upload of {} rejected: {} {}", object_path, status, body);
        }
        Ok(())
    }

    pub async fn download(&self, object_path: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/storage/v1/object/authenticated/{}",
            self.base_url, object_path
        );
        let resp = self
            .auth(self.http.get(&url))
            .timeout(LIST_TIMEOUT)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("download of {} rejected", object_path))?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn download_json(&self, object_path: &str) -> Result<Value> {
        let bytes = self.download(object_path).await?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("{} is not valid JSON", object_path))
    }

    pub async fn list(&self, bucket: &str, prefix: &str, limit: usize) -> Result<Vec<ObjectEntry>> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, bucket);
        let resp = self
            .auth(self.http.post(&url))
            .timeout(LIST_TIMEOUT)
            .json(&json!({
                "prefix": prefix,
                "limit": limit,
                "offset": 0,
                "sortBy": { "column": "created_at", "order": "desc" },
            }))
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("listing {}/{} rejected", bucket, prefix))?;
        let entries: Value = resp.json().await?;
        match entries {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect()),
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl ArtifactStore for ObjectStore {
    async fn put_object(&self, object_path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.upload(object_path, bytes, content_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::content_type_for;

    #[test]
    fn content_types_follow_artifact_extension() {
        assert_eq!(content_type_for("smoke.png"), "image/png");
        assert_eq!(content_type_for("run_report.json"), "application/json");
        assert_eq!(content_type_for("video.webm"), "video/webm");
        assert_eq!(content_type_for("trace.zip"), "application/zip");
        assert_eq!(content_type_for("blob.weird"), "application/octet-stream");
    }
}
