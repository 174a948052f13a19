use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use reqwest::Client;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::TcpListener, time::sleep};
use tracing::{info, warn};

use common::{HeartbeatRequest, RegisterRequest, SystemMetrics, Task, WorkerId};

use crate::{executor, HEARTBEAT_INTERVAL_SECS, REGISTER_RETRY_SECS};

/// Agente del worker: servidor de tareas, registro en el master y
/// heartbeats periódicos con métricas locales.
pub struct WorkerAgent {
    pub id: WorkerId,
    pub port: u16,
    pub master_url: String,
    pub output_dir: PathBuf,
    pub client: Client,
    pub active_tasks: AtomicU32,
}

impl WorkerAgent {
    pub fn new(port: u16, master_url: String, output_dir: PathBuf) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            port,
            master_url,
            output_dir,
            client: Client::new(),
            active_tasks: AtomicU32::new(0),
        }
    }

    /// 1) Arranca el servidor HTTP de tareas.
    /// 2) Se registra en el master (con retry hasta que responda).
    /// 3) Entra al loop de heartbeats.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let app = Router::new()
            .route("/task", post(receive_task))
            .with_state(self.clone());
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        info!("worker escuchando en {}", listener.local_addr()?);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "servidor de tareas terminó");
            }
        });

        self.register_with_retry().await;
        self.heartbeat_loop().await;
        Ok(())
    }

    async fn register_with_retry(&self) {
        let req = RegisterRequest {
            id: self.id.clone(),
            port: self.port,
        };
        loop {
            let res = self
                .client
                .post(format!("{}/register", self.master_url))
                .json(&req)
                .send()
                .await;
            match res {
                Ok(resp) if resp.status().is_success() => {
                    info!(worker_id = %self.id, "registrado en el master");
                    return;
                }
                _ => {
                    warn!("master no disponible, reintentando registro");
                    sleep(Duration::from_secs(REGISTER_RETRY_SECS)).await;
                }
            }
        }
    }

    /// Cada 3 s envía una señal de vida con métricas. Errores de transporte
    /// se loguean y se sigue intentando: el master nos dará por muertos solo
    /// si el silencio supera su umbral.
    async fn heartbeat_loop(&self) {
        loop {
            let req = HeartbeatRequest {
                id: self.id.clone(),
                metrics: self.current_metrics(),
            };
            if let Err(e) = self
                .client
                .post(format!("{}/heartbeat", self.master_url))
                .json(&req)
                .send()
                .await
            {
                warn!(error = %e, "error enviando heartbeat");
            }
            sleep(Duration::from_secs(HEARTBEAT_INTERVAL_SECS)).await;
        }
    }

    fn current_metrics(&self) -> SystemMetrics {
        let active = self.active_tasks.load(Ordering::Relaxed);
        SystemMetrics {
            // proxy de carga: cantidad de tareas ejecutando
            cpu_usage: active as f64,
            memory_usage: resident_memory_bytes().unwrap_or(0),
            active_tasks: active,
        }
    }
}

/// Handler de POST /task: responde de inmediato y ejecuta en background.
async fn receive_task(
    State(agent): State<Arc<WorkerAgent>>,
    Json(task): Json<Task>,
) -> StatusCode {
    tokio::spawn(executor::execute_task(agent, task));
    StatusCode::OK
}

/// RSS del proceso leyendo /proc/self/status (None fuera de Linux).
fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}
