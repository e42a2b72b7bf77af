//! Admin and observability endpoints
//!
//! Endpoints:
//! - GET    /health                — service health summary
//! - GET    /metrics               — Prometheus text exposition
//! - GET    /admin/pool            — per-credential pool snapshot
//! - GET    /admin/subjects/{id}   — one subject's concurrency state
//! - DELETE /admin/subjects/{id}   — clear a subject's leases and queue
//! - POST   /admin/reset           — wipe all shared state
//!
//! The destructive endpoints operate on live shared state; reset requires
//! an explicit `{"confirm": true}` body and otherwise returns 400.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;
use dispatch::JobDispatcher;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{info, warn};

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub dispatcher: Arc<JobDispatcher>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Build the axum router with all routes and shared state.
pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/admin/pool", get(pool_snapshot))
        .route("/admin/subjects/{id}", get(subject_snapshot))
        .route("/admin/subjects/{id}", delete(clear_subject))
        .route("/admin/reset", post(reset))
        .with_state(state)
}

/// GET /health — 200 while at least one credential is selectable, 503
/// when the whole pool is out.
async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let stats = match state.dispatcher.coordinator().stats().await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(error = %e, "health check failed to read pool stats");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(serde_json::json!({
                    "status": "error",
                    "uptime_seconds": uptime,
                })),
            );
        }
    };

    let healthy = stats.iter().filter(|s| s.healthy).count();
    let status_code = if healthy > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status_code,
        axum::Json(serde_json::json!({
            "status": if healthy > 0 { "healthy" } else { "degraded" },
            "uptime_seconds": uptime,
            "credentials_total": stats.len(),
            "credentials_healthy": healthy,
        })),
    )
}

/// GET /metrics — Prometheus text exposition format.
async fn render_metrics(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// GET /admin/pool — per-credential stats. Only ids and fingerprintable
/// counters, never secrets.
async fn pool_snapshot(State(state): State<AdminState>) -> impl IntoResponse {
    match state.dispatcher.coordinator().stats().await {
        Ok(stats) => (StatusCode::OK, axum::Json(serde_json::json!({ "instances": stats }))),
        Err(e) => internal_error("pool stats", dispatch::Error::Pool(e)),
    }
}

/// GET /admin/subjects/{id} — one subject's dispatcher state.
async fn subject_snapshot(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.dispatcher.subject_stats(&id).await {
        Ok(stats) => (StatusCode::OK, axum::Json(serde_json::json!(stats))),
        Err(e) => internal_error("subject stats", e),
    }
}

/// DELETE /admin/subjects/{id} — clear the subject's counters, deferred
/// queue and affinity.
async fn clear_subject(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.dispatcher.clear_subject(&id).await {
        Ok(cleared) => {
            info!(subject = %id, cleared, "subject cleared via admin API");
            (
                StatusCode::OK,
                axum::Json(serde_json::json!({ "subject_id": id, "cleared": cleared })),
            )
        }
        Err(e) => internal_error("clear subject", e),
    }
}

#[derive(Deserialize)]
struct ResetRequest {
    #[serde(default)]
    confirm: bool,
}

/// POST /admin/reset — wipe queues, leases, windows and subject state.
///
/// The body is read as a raw string so a missing or malformed body gets
/// the same guidance response as `confirm: false`.
async fn reset(State(state): State<AdminState>, body: String) -> impl IntoResponse {
    let confirmed = serde_json::from_str::<ResetRequest>(&body)
        .map(|r| r.confirm)
        .unwrap_or(false);
    if !confirmed {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({
                "error": "reset is destructive; send {\"confirm\": true}",
            })),
        );
    }
    match state.dispatcher.reset_shared_state().await {
        Ok(cleared) => {
            info!(cleared, "shared state reset via admin API");
            (StatusCode::OK, axum::Json(serde_json::json!({ "cleared": cleared })))
        }
        Err(e) => internal_error("reset", e),
    }
}

fn internal_error(
    action: &str,
    e: dispatch::Error,
) -> (StatusCode, axum::Json<serde_json::Value>) {
    warn!(action, error = %e, "admin operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(serde_json::json!({ "error": e.to_string() })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use common::Secret;
    use coordination::{MemoryStore, Store};
    use credential_pool::{CredentialCoordinator, InitOutcome, PoolConfig};
    use dispatch::{DispatcherConfig, Job, JobDescriptor};
    use tower::ServiceExt;

    /// Create a PrometheusHandle for tests without installing a global
    /// recorder — install_recorder() panics on a second call per process.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    async fn test_state(credentials: usize) -> AdminState {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let secrets = (0..credentials)
            .map(|i| Secret::new(format!("npsso-{i}")))
            .collect();
        let InitOutcome::Started(coordinator) = CredentialCoordinator::initialize(
            PoolConfig {
                expected_credentials: credentials,
                ..PoolConfig::default()
            },
            secrets,
            store.clone(),
            reqwest::Client::new(),
        )
        .await
        .unwrap() else {
            panic!("fresh store cannot be already running");
        };
        AdminState {
            dispatcher: Arc::new(JobDispatcher::new(
                store,
                coordinator,
                DispatcherConfig::default(),
            )),
            prometheus: test_prometheus_handle(),
            started_at: Instant::now(),
        }
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_pool_counts() {
        let state = test_state(2).await;
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["credentials_total"], 2);
        assert_eq!(json["credentials_healthy"], 2);
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn health_degrades_when_every_credential_is_out() {
        let state = test_state(1).await;
        state
            .dispatcher
            .coordinator()
            .quarantine("cred-0")
            .await
            .unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = json_body(response).await;
        assert_eq!(json["status"], "degraded");
    }

    #[tokio::test]
    async fn pool_snapshot_lists_instances_without_secrets() {
        let state = test_state(2).await;
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/pool")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        let instances = json["instances"].as_array().unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0]["id"], "cred-0");
        assert!(
            !json.to_string().contains("npsso"),
            "pool snapshot must never leak secret material"
        );
    }

    #[tokio::test]
    async fn subject_lifecycle_via_admin() {
        let state = test_state(1).await;
        let dispatcher = state.dispatcher.clone();
        dispatcher
            .assign_job(JobDescriptor {
                subject_id: "player-1".into(),
                job: Job::ProfileSync {
                    online_id: "player-1".into(),
                },
            })
            .await
            .unwrap();

        let app = build_router(state);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/admin/subjects/player-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["in_flight"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/admin/subjects/player-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/subjects/player-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["in_flight"], 0);
    }

    #[tokio::test]
    async fn reset_requires_explicit_confirmation() {
        let state = test_state(1).await;
        let app = build_router(state);

        // No body
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // confirm: false
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/reset")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"confirm": false}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // confirm: true
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/reset")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"confirm": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reset_actually_clears_queued_work() {
        let state = test_state(1).await;
        let dispatcher = state.dispatcher.clone();
        dispatcher
            .assign_job(JobDescriptor {
                subject_id: "player-1".into(),
                job: Job::ProfileSync {
                    online_id: "player-1".into(),
                },
            })
            .await
            .unwrap();
        assert!(dispatcher.queue_depth("cred-0").await.unwrap() > 0);

        let app = build_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/reset")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"confirm": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(dispatcher.queue_depth("cred-0").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let state = test_state(1).await;
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
