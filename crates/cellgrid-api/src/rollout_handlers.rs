//! REST API handlers for deployment runs.
//!
//! Starting a run or posting an approval only records the request and
//! wakes the scheduler; the orchestrator does the work in the background.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use cellgrid_rollout::RolloutError;
use cellgrid_state::ApprovalDecision;

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response, state_error};

fn rollout_error(e: &RolloutError) -> Response {
    let status = match e {
        RolloutError::RunNotFound(_) => StatusCode::NOT_FOUND,
        RolloutError::WaveMismatch { .. } | RolloutError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        RolloutError::State(inner) => return state_error(inner),
        RolloutError::UnknownCell { .. } | RolloutError::Worker(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status)
}

/// Request body to start a run.
#[derive(Deserialize)]
pub struct StartRolloutRequest {
    pub source_version: String,
}

/// Request body for an approval decision. `wave_number` defaults to the
/// wave whose gate is open.
#[derive(Deserialize, Default)]
pub struct ApprovalRequest {
    #[serde(default)]
    pub wave_number: Option<u32>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /api/v1/rollouts
pub async fn start_rollout(
    State(state): State<ApiState>,
    Json(req): Json<StartRolloutRequest>,
) -> Response {
    if req.source_version.trim().is_empty() {
        return error_response("source_version is required", StatusCode::BAD_REQUEST);
    }
    match state.orchestrator.start_run(req.source_version.trim()) {
        Ok(run) => {
            state.scheduler.wake(&run.run_id);
            (StatusCode::ACCEPTED, ApiResponse::ok(run)).into_response()
        }
        Err(e) => rollout_error(&e),
    }
}

/// GET /api/v1/rollouts
pub async fn list_rollouts(State(state): State<ApiState>) -> Response {
    match state.orchestrator.list_runs() {
        Ok(runs) => ApiResponse::ok(runs).into_response(),
        Err(e) => rollout_error(&e),
    }
}

/// GET /api/v1/rollouts/{id}
pub async fn get_rollout(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.get_run(&id) {
        Ok(run) => ApiResponse::ok(run).into_response(),
        Err(e) => rollout_error(&e),
    }
}

/// GET /api/v1/rollouts/{id}/report
pub async fn get_report(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.report(&id) {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => rollout_error(&e),
    }
}

fn post_decision(state: &ApiState, run_id: &str, wave: Option<u32>, decision: ApprovalDecision) -> Response {
    match state.orchestrator.post_decision(run_id, wave, decision) {
        Ok(wave_number) => {
            state.scheduler.wake(run_id);
            ApiResponse::ok(serde_json::json!({
                "run_id": run_id,
                "wave_number": wave_number,
                "status": "queued",
            }))
            .into_response()
        }
        Err(e) => rollout_error(&e),
    }
}

/// POST /api/v1/rollouts/{id}/approve
pub async fn approve_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<ApprovalRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    post_decision(&state, &id, req.wave_number, ApprovalDecision::Proceed)
}

/// POST /api/v1/rollouts/{id}/reject
pub async fn reject_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<ApprovalRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let reason = req.reason.unwrap_or_else(|| "rejected by approver".to_string());
    post_decision(&state, &id, req.wave_number, ApprovalDecision::Reject { reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_state;
    use cellgrid_rollout::RunState;
    use cellgrid_state::{CellRecord, CellStatus, SizeClass};

    fn two_wave_fleet(state: &ApiState) {
        for (id, wave) in [("c000001", 1), ("c000002", 2)] {
            let mut cell = CellRecord::new(id, id, SizeClass::Small, wave, 0);
            cell.status = CellStatus::Available;
            cell.cell_url = Some(format!("https://{id}.example.com"));
            state.store.put_cell(&cell).unwrap();
        }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn start_rollout_requires_source_version() {
        let state = test_state();
        let req = StartRolloutRequest {
            source_version: " ".into(),
        };
        let resp = start_rollout(State(state), Json(req)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_rollout_records_run() {
        let state = test_state();
        let req = StartRolloutRequest {
            source_version: "abc123".into(),
        };
        let resp = start_rollout(State(state.clone()), Json(req)).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["state"], "SOURCE_FETCHED");
        let run_id = body["data"]["run_id"].as_str().unwrap().to_string();

        let resp = get_rollout(State(state.clone()), Path(run_id)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = list_rollouts(State(state)).await;
        let body = body_json(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_nonexistent_rollout() {
        let state = test_state();
        let resp = get_rollout(State(state.clone()), Path("nope".into())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = get_report(State(state), Path("nope".into())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn approve_without_open_gate_conflicts() {
        let state = test_state();
        let run = state.orchestrator.start_run("abc").unwrap();
        let resp = approve_rollout(State(state), Path(run.run_id), None).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn approve_then_complete() {
        let state = test_state();
        two_wave_fleet(&state);
        let run = state.orchestrator.start_run("abc").unwrap();
        let run = state.orchestrator.drive(&run.run_id).await.unwrap();
        assert_eq!(run.awaiting_wave(), Some(1));

        let resp = approve_rollout(
            State(state.clone()),
            Path(run.run_id.clone()),
            Some(Json(ApprovalRequest {
                wave_number: Some(1),
                reason: None,
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let run = state.orchestrator.drive(&run.run_id).await.unwrap();
        assert_eq!(run.state, RunState::Complete);

        let resp = get_report(State(state), Path(run.run_id)).await;
        let body = body_json(resp).await;
        assert_eq!(body["data"]["final_state"], "COMPLETE");
        assert_eq!(body["data"]["artifact_version"], "art-abc");
    }

    #[tokio::test]
    async fn reject_fails_run() {
        let state = test_state();
        two_wave_fleet(&state);
        let run = state.orchestrator.start_run("abc").unwrap();
        state.orchestrator.drive(&run.run_id).await.unwrap();

        let resp = reject_rollout(
            State(state.clone()),
            Path(run.run_id.clone()),
            Some(Json(ApprovalRequest {
                wave_number: None,
                reason: Some("latency regression".into()),
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let run = state.orchestrator.drive(&run.run_id).await.unwrap();
        let report = run.report();
        assert_eq!(report.final_state, cellgrid_rollout::FinalState::Failed);
    }
}
