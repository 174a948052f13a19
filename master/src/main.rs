mod handlers;
mod monitor;
mod scheduler;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use tokio::{net::TcpListener, sync::mpsc};
use tracing::info;

use crate::state::{AppState, MasterState};

/// Un worker UP sin heartbeat por más de este umbral se declara DOWN.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 10;
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 5;
/// Espera del scheduler cuando no hay ningún worker vivo.
pub const NO_WORKER_BACKOFF_SECS: u64 = 2;
pub const TASK_QUEUE_CAPACITY: usize = 100;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("master=debug,axum=info")
        .init();

    let state_file =
        std::env::var("MASTER_STATE_FILE").unwrap_or_else(|_| "master_state.json".to_string());
    let mut master = MasterState::new(state_file);
    master.load_state();

    let (task_tx, task_rx) = mpsc::channel(TASK_QUEUE_CAPACITY);
    let state = AppState::new(master, task_tx);

    // router HTTP
    let app = handlers::build_router(state.clone());

    // actividades de fondo: scheduler y health-check
    tokio::spawn(scheduler::run_scheduler(state.clone(), task_rx));
    tokio::spawn(monitor::run_health_check(state.clone()));

    let port: u16 = std::env::var("MASTER_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
