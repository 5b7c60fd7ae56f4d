use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::model::{RunStatus, RunTerminal};

/// Persistence seam for run rows. Production impl is the PostgREST backend;
/// tests substitute an in-memory store.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a fresh run row in `running` state and return its id.
    async fn create_running(&self, prompt: &str) -> Result<String>;

    /// Transition an existing run to a terminal state.
    async fn mark_terminal(&self, run_id: &str, terminal: &RunTerminal) -> Result<()>;
}

/// Persistence seam for binary artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upsert bytes at `object_path`; re-uploading the same path succeeds.
    async fn put_object(&self, object_path: &str, bytes: Vec<u8>, content_type: &str)
    -> Result<()>;
}

/// The external side effect a run tracks. Implementations must confine their
/// writes to `artifacts/{run_id}/...` and return the name → path mapping of
/// what they stored.
#[async_trait]
pub trait TrackedAction: Send + Sync {
    fn describe(&self) -> String;

    async fn perform(
        &self,
        run_id: &str,
        artifacts: &dyn ArtifactStore,
    ) -> Result<BTreeMap<String, String>>;
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// The initial run insertion failed. Fatal: no side effect was attempted
    /// and there is nothing to compensate.
    #[error("failed to persist run record: {0:#}")]
    Persistence(anyhow::Error),

    /// The action (or its success update) failed AND the best-effort update
    /// to `error` also failed. The run row may be stuck in `running`; that
    /// gap is surfaced here rather than masked.
    #[error("run {run_id} failed ({side_effect}) and could not be marked terminal: {compensation:#}")]
    Compensation {
        run_id: String,
        side_effect: String,
        compensation: anyhow::Error,
    },
}

/// Outcome of one tracked action, returned on every path that leaves the run
/// row in a terminal state.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub artifacts: BTreeMap<String, String>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// Executes exactly one tracked external action and guarantees the persisted
/// run record reflects the outcome, even under partial failure.
///
/// Two deliberate properties: invocations are never deduplicated (N calls
/// create N runs), and all steps run sequentially with no internal
/// concurrency.
pub struct RunRecorder {
    runs: Arc<dyn RunStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl RunRecorder {
    pub fn new(runs: Arc<dyn RunStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { runs, artifacts }
    }

    /// Mark running, do the work, mark terminal. Action failures are
    /// recovered into a terminal `error` run; only an unrecordable outcome
    /// becomes an `Err`.
    pub async fn execute_tracked_action(
        &self,
        action: &dyn TrackedAction,
    ) -> std::result::Result<RunResult, RecorderError> {
        let started = Instant::now();

        let run_id = self
            .runs
            .create_running(&action.describe())
            .await
            .map_err(RecorderError::Persistence)?;

        match action.perform(&run_id, self.artifacts.as_ref()).await {
            Ok(artifacts) => {
                let terminal = RunTerminal::success(artifacts.clone());
                match self.runs.mark_terminal(&run_id, &terminal).await {
                    Ok(()) => Ok(RunResult {
                        run_id,
                        status: RunStatus::Success,
                        artifacts,
                        error: None,
                        elapsed: started.elapsed(),
                    }),
                    Err(update_err) => {
                        self.compensate(run_id, format!("run update failed: {update_err:#}"), started)
                            .await
                    }
                }
            }
            Err(action_err) => {
                self.compensate(run_id, format!("{action_err:#}"), started)
                    .await
            }
        }
    }

    /// Best-effort transition to `error`. One attempt, no retry; a second
    /// failure leaves the run stale and is reported as such.
    async fn compensate(
        &self,
        run_id: String,
        message: String,
        started: Instant,
    ) -> std::result::Result<RunResult, RecorderError> {
        let terminal = RunTerminal::error(message.clone());
        match self.runs.mark_terminal(&run_id, &terminal).await {
            Ok(()) => Ok(RunResult {
                run_id,
                status: RunStatus::Error,
                artifacts: BTreeMap::new(),
                error: Some(message),
                elapsed: started.elapsed(),
            }),
            Err(compensation) => Err(RecorderError::Compensation {
                run_id,
                side_effect: message,
                compensation,
            }),
        }
    }
}

/// Canonical artifact name reported by the smoke action.
pub const SMOKE_ARTIFACT: &str = "smoke_png";

// 1x1 PNG. The smoke test exercises the whole write path without caring what
// the pixels are.
const SMOKE_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// The worker smoke action: upload a fixed PNG under the run's artifact
/// prefix and report it as `smoke_png`.
pub struct SmokeShot;

#[async_trait]
impl TrackedAction for SmokeShot {
    fn describe(&self) -> String {
        "worker smoke test".to_string()
    }

    async fn perform(
        &self,
        run_id: &str,
        artifacts: &dyn ArtifactStore,
    ) -> Result<BTreeMap<String, String>> {
        let bytes = BASE64
            .decode(SMOKE_PNG_BASE64)
            .context("embedded smoke PNG is not valid base64")?;
        let path = format!("artifacts/{}/smoke.png", run_id);
        artifacts.put_object(&path, bytes, "image/png").await?;
        Ok(BTreeMap::from([(SMOKE_ARTIFACT.to_string(), path)]))
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::*;

    #[derive(Debug, Clone)]
    pub struct StoredRun {
        pub prompt: String,
        pub status: RunStatus,
        pub artifacts: BTreeMap<String, String>,
        pub error: Option<String>,
    }

    #[derive(Default)]
    pub struct MemoryRunStore {
        next_id: AtomicU64,
        pub fail_create: AtomicBool,
        pub fail_update: AtomicBool,
        pub rows: Mutex<HashMap<String, StoredRun>>,
    }

    #[async_trait]
    impl RunStore for MemoryRunStore {
        async fn create_running(&self, prompt: &str) -> Result<String> {
            if self.fail_create.load(Ordering::SeqCst) {
                anyhow::bail!("insert refused");
            }
            let id = format!("run-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.rows.lock().unwrap().insert(
                id.clone(),
                StoredRun {
                    prompt: prompt.to_string(),
                    status: RunStatus::Running,
                    artifacts: BTreeMap::new(),
                    error: None,
                },
            );
            Ok(id)
        }

        async fn mark_terminal(&self, run_id: &str, terminal: &RunTerminal) -> Result<()> {
            if self.fail_update.load(Ordering::SeqCst) {
                anyhow::bail!("update refused");
            }
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(run_id)
                .ok_or_else(|| anyhow::anyhow!("no such run {}", run_id))?;
            assert!(
                !row.status.is_terminal(),
                "terminal run {} must not transition again",
                run_id
            );
            row.status = terminal.status;
            if let Some(artifacts) = &terminal.artifacts {
                row.artifacts = artifacts.clone();
            }
            row.error = terminal.error.clone();
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MemoryArtifactStore {
        pub fail_put: AtomicBool,
        pub objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    }

    #[async_trait]
    impl ArtifactStore for MemoryArtifactStore {
        async fn put_object(
            &self,
            object_path: &str,
            bytes: Vec<u8>,
            content_type: &str,
        ) -> Result<()> {
            if self.fail_put.load(Ordering::SeqCst) {
                anyhow::bail!("simulated network error during upload");
            }
            // Upsert semantics: existing keys are overwritten, never an error.
            self.objects
                .lock()
                .unwrap()
                .insert(object_path.to_string(), (bytes, content_type.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::fakes::{MemoryArtifactStore, MemoryRunStore};
    use super::*;

    fn recorder(
        runs: &Arc<MemoryRunStore>,
        artifacts: &Arc<MemoryArtifactStore>,
    ) -> RunRecorder {
        RunRecorder::new(runs.clone(), artifacts.clone())
    }

    #[tokio::test]
    async fn successful_invocation_finalizes_run_and_writes_artifact() {
        let runs = Arc::new(MemoryRunStore::default());
        let artifacts = Arc::new(MemoryArtifactStore::default());

        let result = recorder(&runs, &artifacts)
            .execute_tracked_action(&SmokeShot)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert!(result.error.is_none());
        let path = result.artifacts.get(SMOKE_ARTIFACT).unwrap();
        assert_eq!(path, &format!("artifacts/{}/smoke.png", result.run_id));

        let rows = runs.rows.lock().unwrap();
        let row = rows.get(&result.run_id).unwrap();
        assert_eq!(row.status, RunStatus::Success);
        assert!(row.error.is_none());
        assert_eq!(row.artifacts.get(SMOKE_ARTIFACT), Some(path));

        let objects = artifacts.objects.lock().unwrap();
        let (bytes, content_type) = objects.get(path).unwrap();
        assert_eq!(content_type, "image/png");
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[tokio::test]
    async fn failed_upload_compensates_to_error_with_message() {
        let runs = Arc::new(MemoryRunStore::default());
        let artifacts = Arc::new(MemoryArtifactStore::default());
        artifacts.fail_put.store(true, Ordering::SeqCst);

        let result = recorder(&runs, &artifacts)
            .execute_tracked_action(&SmokeShot)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Error);
        let message = result.error.unwrap();
        assert!(message.contains("simulated network error"));
        assert!(result.artifacts.is_empty());

        let rows = runs.rows.lock().unwrap();
        let row = rows.get(&result.run_id).unwrap();
        assert_eq!(row.status, RunStatus::Error);
        assert_eq!(row.error.as_deref(), Some(message.as_str()));
        assert!(!row.artifacts.contains_key(SMOKE_ARTIFACT));
    }

    #[tokio::test]
    async fn insert_failure_is_fatal_with_no_side_effects() {
        let runs = Arc::new(MemoryRunStore::default());
        let artifacts = Arc::new(MemoryArtifactStore::default());
        runs.fail_create.store(true, Ordering::SeqCst);

        let err = recorder(&runs, &artifacts)
            .execute_tracked_action(&SmokeShot)
            .await
            .unwrap_err();

        assert!(matches!(err, RecorderError::Persistence(_)));
        assert!(artifacts.objects.lock().unwrap().is_empty());
        assert!(runs.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_compensation_surfaces_and_leaves_run_running() {
        let runs = Arc::new(MemoryRunStore::default());
        let artifacts = Arc::new(MemoryArtifactStore::default());
        artifacts.fail_put.store(true, Ordering::SeqCst);
        runs.fail_update.store(true, Ordering::SeqCst);

        let err = recorder(&runs, &artifacts)
            .execute_tracked_action(&SmokeShot)
            .await
            .unwrap_err();

        match err {
            RecorderError::Compensation { run_id, side_effect, .. } => {
                assert!(side_effect.contains("simulated network error"));
                // Documented gap: the run stays in `running`.
                let rows = runs.rows.lock().unwrap();
                assert_eq!(rows.get(&run_id).unwrap().status, RunStatus::Running);
            }
            other => panic!("expected compensation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_invocations_create_distinct_runs() {
        let runs = Arc::new(MemoryRunStore::default());
        let artifacts = Arc::new(MemoryArtifactStore::default());
        let recorder = recorder(&runs, &artifacts);

        let mut ids = std::collections::HashSet::new();
        for _ in 0..3 {
            let result = recorder.execute_tracked_action(&SmokeShot).await.unwrap();
            ids.insert(result.run_id);
        }
        assert_eq!(ids.len(), 3);
        assert_eq!(runs.rows.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn artifact_upload_overwrites_existing_object() {
        let artifacts = MemoryArtifactStore::default();
        artifacts
            .put_object("artifacts/x/smoke.png", vec![1], "image/png")
            .await
            .unwrap();
        artifacts
            .put_object("artifacts/x/smoke.png", vec![2, 3], "image/png")
            .await
            .unwrap();
        let objects = artifacts.objects.lock().unwrap();
        assert_eq!(objects.get("artifacts/x/smoke.png").unwrap().0, vec![2, 3]);
    }
}
