//! Local control-plane server.
//!
//! Exposes the orchestrator's request surface over HTTP, bound to 127.0.0.1
//! only, plus an SSE endpoint streaming the event channel. Payload shapes of
//! the events are normative; the HTTP framing is transport detail.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use orc_core::plan::{plan_from_value, validate_policy, Plan};
use orc_core::{DecisionResult, RunRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::executor::{AdmitError, Orchestrator};
use crate::gate::DecisionMode;
use crate::planner::PlannerError;
use crate::store::RunListEntry;

/// Shared state for HTTP handlers.
#[derive(Debug)]
pub struct AppState {
    pub orch: Arc<Orchestrator>,
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/plan", post(generate_plan))
        .route("/runs", post(run_plan).get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/cancel", post(cancel_run))
        .route("/runs/{id}/decision", post(submit_decision))
        .route("/autobuild", post(start_autobuild))
        .route("/autobuild/cancel", post(cancel_autobuild))
        .route("/runs-root", get(runs_root))
        .route("/events", get(stream_events))
        .route("/health", get(health_check))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on localhost.
pub async fn start_server(orch: Arc<Orchestrator>, port: u16) -> eyre::Result<()> {
    let state = Arc::new(AppState { orch });
    let router = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("control plane listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

// --- Request/Response types ---

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn planner_error(e: &PlannerError) -> ApiError {
    let status = match e {
        PlannerError::AuthMissing => StatusCode::UNAUTHORIZED,
        PlannerError::Upstream(_) | PlannerError::Transport(_) => StatusCode::BAD_GATEWAY,
        PlannerError::PromptMissing => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    api_error(status, e.to_string())
}

fn admit_error(e: &AdmitError) -> ApiError {
    let status = match e {
        AdmitError::AnotherRunActive | AdmitError::AutobuildActive => StatusCode::CONFLICT,
        AdmitError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    api_error(status, e.to_string())
}

#[derive(Debug, Deserialize)]
pub struct GeneratePlanRequest {
    pub requirement: String,
}

#[derive(Debug, Serialize)]
pub struct GeneratePlanResponse {
    pub plan: Plan,
}

#[derive(Debug, Deserialize)]
pub struct RunPlanRequest {
    #[serde(rename = "workspacePath")]
    pub workspace_path: String,
    pub plan: serde_json::Value,
    #[serde(default)]
    pub requirement: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunPlanResponse {
    #[serde(rename = "runId")]
    pub run_id: String,
}

#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<RunListEntry>,
}

#[derive(Debug, Deserialize)]
pub struct StartAutobuildRequest {
    pub workspace: String,
    pub requirement: String,
    #[serde(rename = "maxIterations", default)]
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct StartAutobuildResponse {
    pub started: bool,
}

#[derive(Debug, Deserialize)]
pub struct SubmitDecisionRequest {
    pub result: DecisionResult,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelledResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct RunsRootResponse {
    pub path: String,
}

// --- Handlers ---

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /plan — generate a plan from a requirement.
async fn generate_plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GeneratePlanRequest>,
) -> Result<Json<GeneratePlanResponse>, ApiError> {
    let plan = state.orch.generate_plan(&req.requirement).await.map_err(|e| {
        error!("plan generation failed: {e}");
        planner_error(&e)
    })?;
    Ok(Json(GeneratePlanResponse { plan }))
}

/// POST /runs — validate and run a plan in synchronous decision mode.
async fn run_plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunPlanRequest>,
) -> Result<(StatusCode, Json<RunPlanResponse>), ApiError> {
    let plan = plan_from_value(&req.plan)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    validate_policy(&plan, &state.orch.config().allowed_commands)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let (run_id, _outcome) = state
        .orch
        .start_run(
            &req.workspace_path,
            plan,
            req.requirement,
            DecisionMode::Synchronous,
        )
        .map_err(|e| admit_error(&e))?;

    Ok((StatusCode::CREATED, Json(RunPlanResponse { run_id })))
}

/// GET /runs — list run records, newest first.
async fn list_runs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListRunsResponse>, ApiError> {
    let runs = state
        .orch
        .store()
        .list()
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(ListRunsResponse { runs }))
}

/// GET /runs/{id} — the on-disk run record.
async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    match state.orch.store().load(&id) {
        Ok(record) => Ok(Json(record)),
        Err(crate::store::StoreError::RunNotFound(id)) => {
            Err(api_error(StatusCode::NOT_FOUND, format!("run not found: {id}")))
        }
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// POST /runs/{id}/cancel
async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<CancelledResponse> {
    Json(CancelledResponse {
        cancelled: state.orch.cancel_run(&id),
    })
}

/// POST /runs/{id}/decision
async fn submit_decision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SubmitDecisionRequest>,
) -> Json<AcceptedResponse> {
    Json(AcceptedResponse {
        accepted: state.orch.submit_decision(&id, req.result),
    })
}

/// POST /autobuild
async fn start_autobuild(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartAutobuildRequest>,
) -> Result<Json<StartAutobuildResponse>, ApiError> {
    state
        .orch
        .start_autobuild(&req.workspace, &req.requirement, req.max_iterations)
        .map_err(|e| admit_error(&e))?;
    Ok(Json(StartAutobuildResponse { started: true }))
}

/// POST /autobuild/cancel
async fn cancel_autobuild(State(state): State<Arc<AppState>>) -> Json<CancelledResponse> {
    Json(CancelledResponse {
        cancelled: state.orch.cancel_autobuild(),
    })
}

/// GET /runs-root — creates the directory if missing.
async fn runs_root(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RunsRootResponse>, ApiError> {
    let path = state
        .orch
        .store()
        .ensure_root()
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(RunsRootResponse {
        path: path.to_string_lossy().into_owned(),
    }))
}

/// GET /events — SSE stream of orchestrator events; the SSE event type is
/// the normative event name.
async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.orch.bus().subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.to_json() {
                    Ok(data) => {
                        let sse = SseEvent::default().event(event.name()).data(data);
                        return Some((Ok::<_, Infallible>(sse), rx));
                    }
                    Err(e) => {
                        error!("failed to serialize event: {e}");
                        continue;
                    }
                },
                // A slow consumer dropped some events; keep streaming.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::planner::PlanSource;
    use crate::store::RunStore;
    use axum::body::Body;
    use axum::http::Request;
    use futures_util::future::BoxFuture;
    use http_body_util::BodyExt;
    use orc_core::Config;
    use tower::ServiceExt;

    struct NoPlanner;

    impl PlanSource for NoPlanner {
        fn generate_plan<'a>(
            &'a self,
            _requirement: &'a str,
        ) -> BoxFuture<'a, Result<Plan, PlannerError>> {
            Box::pin(async { Err(PlannerError::AuthMissing) })
        }
    }

    fn test_state(runs_root: std::path::PathBuf) -> Arc<AppState> {
        let orch = Arc::new(Orchestrator::new(
            Config::default(),
            EventBus::new(),
            RunStore::new(runs_root),
            Arc::new(NoPlanner),
        ));
        Arc::new(AppState { orch })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path().to_path_buf()));
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn runs_root_creates_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("runs");
        let router = create_router(test_state(root.clone()));
        let response = router
            .oneshot(Request::get("/runs-root").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn run_plan_rejects_invalid_plan_json() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path().to_path_buf()));
        let body = serde_json::json!({
            "workspacePath": "/tmp",
            "plan": { "name": "p" },
        });
        let response = router
            .oneshot(
                Request::post("/runs")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("$.steps"));
    }

    #[tokio::test]
    async fn run_plan_rejects_non_repository_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path().to_path_buf()));
        let body = serde_json::json!({
            "workspacePath": workspace.path(),
            "plan": { "name": "p", "steps": [ { "type": "note", "message": "hi" } ] },
        });
        let response = router
            .oneshot(
                Request::post("/runs")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("not a git repository"));
    }

    #[tokio::test]
    async fn planner_auth_failure_maps_to_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path().to_path_buf()));
        let response = router
            .oneshot(
                Request::post("/plan")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"requirement":"do it"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn cancel_of_unknown_run_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path().to_path_buf()));
        let response = router
            .oneshot(
                Request::post("/runs/does-not-exist/cancel")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["cancelled"], false);
    }

    #[tokio::test]
    async fn unknown_run_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path().to_path_buf()));
        let response = router
            .oneshot(Request::get("/runs/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_runs_is_empty_initially() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path().to_path_buf()));
        let response = router
            .oneshot(Request::get("/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["runs"].as_array().unwrap().len(), 0);
    }
}
