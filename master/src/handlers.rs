use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};

use common::{
    HeartbeatRequest, JobRequest, JobResultsResponse, JobStatusResponse, RegisterRequest,
    SubmitResponse, TaskResult, WorkerInfo,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register_worker))
        .route("/heartbeat", post(worker_heartbeat))
        .route("/api/v1/jobs", post(submit_job))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/results", get(get_job_results))
        .route("/api/v1/workers", get(list_workers))
        .route("/task/complete", post(complete_task))
        .with_state(state)
}

/// El host del worker se toma del peer de la conexión, nunca del body.
/// Loopback v4/v6 se normaliza a localhost para evitar problemas de DNS
/// en contenedores.
fn peer_host(ip: IpAddr) -> String {
    if ip.is_loopback() {
        "localhost".to_string()
    } else {
        ip.to_string()
    }
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn register_worker(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<RegisterRequest>,
) -> StatusCode {
    let url = format!("http://{}:{}", peer_host(addr.ip()), req.port);
    state.inner.lock().unwrap().register_worker(req.id, url);
    StatusCode::OK
}

async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> StatusCode {
    state.inner.lock().unwrap().heartbeat(&req.id, req.metrics);
    StatusCode::OK
}

// Valida y registra el job; las particiones de los nodos source quedan
// encoladas antes de responder.
async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<Value>)> {
    let (job, tasks) = {
        let mut master = state.inner.lock().unwrap();
        master
            .submit_job(req)
            .map_err(|msg| (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))))?
    };
    state.enqueue_all(tasks);

    Ok(Json(SubmitResponse {
        job_id: job.id,
        status: "ACCEPTED".to_string(),
    }))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let master = state.inner.lock().unwrap();
    master
        .status_response(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_job_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResultsResponse>, StatusCode> {
    let master = state.inner.lock().unwrap();
    master
        .results_response(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerInfo>> {
    Json(state.inner.lock().unwrap().worker_list())
}

// Reporte de completado/fallo de una tarea; puede desbloquear reintentos
// o particiones hijas, que se encolan fuera del lock.
async fn complete_task(State(state): State<AppState>, Json(res): Json<TaskResult>) -> StatusCode {
    let tasks = {
        let mut master = state.inner.lock().unwrap();
        master.handle_task_result(res)
    };
    state.enqueue_all(tasks);
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_host_normaliza_loopback() {
        assert_eq!(peer_host("127.0.0.1".parse().unwrap()), "localhost");
        assert_eq!(peer_host("::1".parse().unwrap()), "localhost");
        assert_eq!(peer_host("192.168.1.7".parse().unwrap()), "192.168.1.7");
    }
}
