mod agent;
mod executor;

use anyhow::Result;
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

use crate::agent::WorkerAgent;

pub const HEARTBEAT_INTERVAL_SECS: u64 = 3;
pub const REGISTER_RETRY_SECS: u64 = 2;
/// Reintentos del POST /task/complete hacia el master.
pub const REPORT_RETRIES: u32 = 3;

#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Nodo worker: ejecuta tareas asignadas por el master")]
struct Cli {
    /// Puerto HTTP donde el worker recibe tareas
    #[arg(long, default_value_t = 9001)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("worker=debug,axum=info,reqwest=info")
        .init();

    let cli = Cli::parse();

    let master_url =
        std::env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let output_dir: PathBuf = std::env::var("OUTPUT_DIR")
        .unwrap_or_else(|_| "/tmp/lote".to_string())
        .into();
    std::fs::create_dir_all(&output_dir)?;

    let host = hostname::get().unwrap_or_default().to_string_lossy().to_string();
    info!(
        host = %host,
        port = cli.port,
        master = %master_url,
        output_dir = %output_dir.display(),
        "worker iniciando"
    );

    let agent = Arc::new(WorkerAgent::new(cli.port, master_url, output_dir));
    agent.run().await
}
