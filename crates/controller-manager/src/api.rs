//! HTTP API: health checks, Prometheus metrics and the volume endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use controller_lib::{
    health::{ControllerStatus, HealthRegistry},
    observability::ControllerMetrics,
    ControllerError, PersistentVolume, PersistentVolumeClaim, PvController,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ControllerMetrics,
    pub volumes: Arc<PvController>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ControllerMetrics,
        volumes: Arc<PvController>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            volumes,
        }
    }
}

/// Controller error rendered as `{"error": "..."}`
struct ApiError(ControllerError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ControllerError::AlreadyExists { .. } => StatusCode::CONFLICT,
            ControllerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ControllerError::Provision { .. } | ControllerError::Io(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(status = status.as_u16(), error = %self.0, "Volume request failed");
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        Self(err)
    }
}

/// Body of the claim creation response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClaimBinding {
    claim: String,
    bound_to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PodRef {
    pod: String,
}

/// 200 while every controller is healthy or degraded, 503 once one is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.report().await;

    let status_code = match health.status {
        ControllerStatus::Healthy | ControllerStatus::Degraded => StatusCode::OK,
        ControllerStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_volumes(State(state): State<Arc<AppState>>) -> Json<Vec<PersistentVolume>> {
    Json(state.volumes.volumes().await)
}

async fn create_volume(
    State(state): State<Arc<AppState>>,
    Json(pv): Json<PersistentVolume>,
) -> Result<impl IntoResponse, ApiError> {
    let volume = state.volumes.add_pv(pv).await?;
    info!(volume = %volume.key(), "Volume created");
    Ok((StatusCode::CREATED, Json(volume)))
}

async fn list_claims(State(state): State<Arc<AppState>>) -> Json<Vec<PersistentVolumeClaim>> {
    Json(state.volumes.claims().await)
}

/// 201 when bound right away, 202 when the claim is left pending
async fn create_claim(
    State(state): State<Arc<AppState>>,
    Json(pvc): Json<PersistentVolumeClaim>,
) -> Result<Response, ApiError> {
    let claim = pvc.key();

    match state.volumes.add_pvc(pvc).await {
        Ok(volume) => Ok((
            StatusCode::CREATED,
            Json(ClaimBinding {
                claim,
                bound_to: Some(volume),
            }),
        )
            .into_response()),
        Err(ControllerError::NoCompatibleVolume { .. }) => Ok((
            StatusCode::ACCEPTED,
            Json(ClaimBinding {
                claim,
                bound_to: None,
            }),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

async fn claim_binding(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Json<Option<String>> {
    Json(state.volumes.pvc_binding(&namespace, &name).await)
}

async fn attach_pod(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(body): Json<PodRef>,
) -> Result<StatusCode, ApiError> {
    state
        .volumes
        .bind_pod_to_pvc(&namespace, &name, &body.pod)
        .await?;
    Ok(StatusCode::OK)
}

async fn detach_pod(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.volumes.unbind_pod_from_pvc(&namespace, &name).await?;
    Ok(StatusCode::OK)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route(
            "/api/v1/persistentvolumes",
            get(list_volumes).post(create_volume),
        )
        .route(
            "/api/v1/persistentvolumeclaims",
            get(list_claims).post(create_claim),
        )
        .route(
            "/api/v1/namespaces/:namespace/persistentvolumeclaims/:name",
            get(claim_binding),
        )
        .route(
            "/api/v1/namespaces/:namespace/persistentvolumeclaims/:name/pod",
            post(attach_pod).delete(detach_pod),
        )
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use controller_lib::controllers::LocalProvisioner;
    use controller_lib::health::components;
    use controller_lib::TickReport;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn setup_test_app() -> (Router, Arc<AppState>, TempDir) {
        let dir = TempDir::new().unwrap();
        let health_registry = HealthRegistry::new();
        health_registry
            .register(components::REPLICASET_CONTROLLER)
            .await;
        health_registry.register(components::HPA_CONTROLLER).await;

        let volumes = Arc::new(PvController::new(Arc::new(LocalProvisioner::new(
            dir.path(),
        ))));
        let state = Arc::new(AppState::new(
            health_registry,
            ControllerMetrics::new(),
            volumes,
        ));
        (create_router(state.clone()), state, dir)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz_reports_degraded_controller() {
        let (app, state, _dir) = setup_test_app().await;
        let mut report = TickReport::new(2);
        report.record_error(ControllerError::InvalidConfig("pod web-2 rejected".to_string()));
        state
            .health_registry
            .record_tick(components::REPLICASET_CONTROLLER, &report)
            .await;

        let response = app.oneshot(get_request("/healthz")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let health = body_json(response).await;
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["controllers"]["replicaset"]["failures"], 1);
        assert!(health["controllers"]["hpa"].is_object());
    }

    #[tokio::test]
    async fn test_healthz_returns_503_when_unhealthy() {
        let (app, state, _dir) = setup_test_app().await;
        state
            .health_registry
            .record_abort(
                components::HPA_CONTROLLER,
                &ControllerError::InvalidConfig("connection refused".to_string()),
            )
            .await;

        let response = app.oneshot(get_request("/healthz")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readyz_follows_registry() {
        let (app, state, _dir) = setup_test_app().await;

        let response = app.clone().oneshot(get_request("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.health_registry.set_running(true).await;
        let response = app.oneshot(get_request("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["ready"], true);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_returns_prometheus_format() {
        let (app, state, _dir) = setup_test_app().await;
        state.metrics.observe_tick(components::REPLICASET_CONTROLLER, 0.01);
        state.metrics.add_pods_created(components::REPLICASET_CONTROLLER, 1);

        let response = app.oneshot(get_request("/metrics")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("controller_tick_duration_seconds_bucket"));
        assert!(text.contains("controller_pods_created_total"));
    }

    #[tokio::test]
    async fn test_volume_and_claim_lifecycle() {
        let (app, _state, _dir) = setup_test_app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/persistentvolumes",
                json!({"name": "pv-1", "namespace": "default", "capacity": 100, "accessModes": ["ReadWriteOnce"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/persistentvolumes",
                json!({"name": "pv-1", "namespace": "default", "capacity": 100}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("already exists"));

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/persistentvolumeclaims",
                json!({"name": "data", "namespace": "default", "capacity": 50, "accessModes": ["ReadWriteOnce"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["boundTo"], "default/pv-1");

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/persistentvolumeclaims",
                json!({"name": "big", "namespace": "default", "capacity": 500, "accessModes": ["ReadWriteOnce"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(body_json(response).await["boundTo"].is_null());

        let response = app
            .clone()
            .oneshot(get_request(
                "/api/v1/namespaces/default/persistentvolumeclaims/data",
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!("default/pv-1"));

        let response = app
            .oneshot(get_request("/api/v1/persistentvolumeclaims"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pod_attach_and_detach() {
        let (app, state, _dir) = setup_test_app().await;
        state
            .volumes
            .add_pvc(serde_json::from_value(json!({"name": "data", "capacity": 1})).unwrap())
            .await
            .unwrap_err();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/namespaces/default/persistentvolumeclaims/data/pod",
                json!({"pod": "default/web-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.volumes.claims().await[0].bound_pod, "default/web-1");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/namespaces/default/persistentvolumeclaims/data/pod")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.volumes.claims().await[0].bound_pod.is_empty());

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/v1/namespaces/default/persistentvolumeclaims/ghost/pod",
                json!({"pod": "default/web-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
