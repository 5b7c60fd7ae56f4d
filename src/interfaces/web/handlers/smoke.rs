use std::time::Instant;

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use tracing::{error, info};

use super::super::AppState;
use crate::core::model::RunStatus;
use crate::core::recorder::{RunRecorder, SmokeShot};

/// One tracked smoke action per request. Every outcome leaves the boundary
/// as structured JSON with timing; nothing panics across it.
pub async fn smoke_endpoint(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let started = Instant::now();
    let recorder = RunRecorder::new(state.runs.clone(), state.artifacts.clone());

    match recorder.execute_tracked_action(&SmokeShot).await {
        Ok(result) if result.status == RunStatus::Success => {
            info!("smoke run {} succeeded", result.run_id);
            (
                StatusCode::OK,
                Json(json!({
                    "run_id": result.run_id,
                    "status": "success",
                    "artifacts": result.artifacts,
                    "elapsed_ms": result.elapsed.as_millis() as u64,
                })),
            )
        }
        Ok(result) => {
            error!(
                "smoke run {} failed: {}",
                result.run_id,
                result.error.as_deref().unwrap_or("unknown")
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "error": result
                        .error
                        .unwrap_or_else(|| "tracked action failed".to_string()),
                    "elapsed_ms": result.elapsed.as_millis() as u64,
                })),
            )
        }
        Err(err) => {
            error!("smoke run could not be recorded: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "error": err.to_string(),
                    "elapsed_ms": started.elapsed().as_millis() as u64,
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::core::recorder::fakes::{MemoryArtifactStore, MemoryRunStore};
    use crate::interfaces::web::{AppState, build_api_router};

    fn router_with_fakes() -> (
        axum::Router,
        Arc<MemoryRunStore>,
        Arc<MemoryArtifactStore>,
    ) {
        let runs = Arc::new(MemoryRunStore::default());
        let artifacts = Arc::new(MemoryArtifactStore::default());
        let router = build_api_router(AppState::new(runs.clone(), artifacts.clone()));
        (router, runs, artifacts)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_is_a_side_effect_free_liveness_check() {
        let (router, runs, _) = router_with_fakes();
        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(runs.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn smoke_returns_success_json_with_artifact_path() {
        let (router, runs, artifacts) = router_with_fakes();
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/smoke")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;

        assert_eq!(payload["status"], "success");
        let run_id = payload["run_id"].as_str().unwrap();
        let artifact = payload["artifacts"]["smoke_png"].as_str().unwrap();
        assert_eq!(artifact, format!("artifacts/{}/smoke.png", run_id));
        assert!(payload["elapsed_ms"].is_u64());

        let rows = runs.rows.lock().unwrap();
        assert_eq!(
            rows.get(run_id).unwrap().status,
            crate::core::model::RunStatus::Success
        );
        assert!(artifacts.objects.lock().unwrap().contains_key(artifact));
    }

    #[tokio::test]
    async fn smoke_upload_failure_is_a_structured_500() {
        let (router, runs, artifacts) = router_with_fakes();
        artifacts.fail_put.store(true, Ordering::SeqCst);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/smoke")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let payload = body_json(response).await;

        assert_eq!(payload["status"], "error");
        assert!(payload["error"].as_str().unwrap().contains("network error"));
        assert!(payload["elapsed_ms"].is_u64());
        assert!(payload.get("run_id").is_none());

        let rows = runs.rows.lock().unwrap();
        let row = rows.values().next().unwrap();
        assert_eq!(row.status, crate::core::model::RunStatus::Error);
        assert!(row.error.is_some());
    }

    #[tokio::test]
    async fn smoke_insert_failure_is_a_structured_500_without_rows() {
        let (router, runs, _) = router_with_fakes();
        runs.fail_create.store(true, Ordering::SeqCst);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/smoke")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let payload = body_json(response).await;
        assert_eq!(payload["status"], "error");
        assert!(payload["error"].as_str().unwrap().contains("persist"));
        assert!(runs.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_smoke_requests_create_distinct_runs() {
        let (router, runs, _) = router_with_fakes();
        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/smoke")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(runs.rows.lock().unwrap().len(), 2);
    }
}
