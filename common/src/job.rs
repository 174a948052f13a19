use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::dag::Dag;
use crate::task::PartitionState;

pub type JobId = String;

/// JSON que envía el cliente al submitir un job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,

    /// DAG de operadores (read_csv, map, filter, flat_map, reduce_by_key, join)
    pub dag: Dag,

    /// Paralelismo deseado (particiones por nodo); < 1 se normaliza a 1
    #[serde(default)]
    pub parallelism: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,

    /// DAG original que se envió para este job
    #[serde(rename = "dag")]
    pub graph: Dag,

    /// Paralelismo configurado (P particiones por nodo)
    pub parallelism: u32,

    pub submitted_at: DateTime<Utc>,
    /// Presente sólo cuando el job llegó a COMPLETED o FAILED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Respuesta de POST /api/v1/jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: String, // "ACCEPTED"
}

/// Respuesta de GET /api/v1/jobs/{id}, enriquecida con progreso y métricas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub progress_percent: f64,
    /// Estado agregado por nodo: PENDING | SCHEDULED | COMPLETED
    pub node_status: HashMap<String, PartitionState>,
    pub failure_count: u32,
}

/// Respuesta de GET /api/v1/jobs/{id}/results: sólo nodos sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultsResponse {
    pub job_id: JobId,
    /// NodeID -> ruta del archivo de salida
    pub outputs: HashMap<String, String>,
}
