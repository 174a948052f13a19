use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type WorkerId = String;

/// Métricas locales que viajan en cada heartbeat.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Proxy de carga: cantidad de tareas activas como f64
    #[serde(default)]
    pub cpu_usage: f64,
    /// Bytes residentes del proceso (0 si no se pudo leer)
    #[serde(default)]
    pub memory_usage: u64,
    #[serde(default)]
    pub active_tasks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Up,
    Down,
}

/// Worker registrado en el master. Nunca se persiste: el registro se
/// reconstruye con los re-registros después de un reinicio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    /// Endpoint HTTP alcanzable (http://host:puerto), host tomado del peer
    pub url: String,
    pub last_heartbeat: DateTime<Utc>,
    pub status: WorkerStatus,
    pub metrics: SystemMetrics,
}

/// Registro inicial: el worker sólo reporta su puerto; el host lo
/// determina el master a partir de la conexión.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub id: WorkerId,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub id: WorkerId,
    pub metrics: SystemMetrics,
}
