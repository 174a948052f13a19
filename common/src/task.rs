use serde::{Deserialize, Serialize};

use crate::job::JobId;

pub type TaskId = String;

/// Unidad de trabajo despachada a un worker: una partición de un nodo del DAG.
/// Cada despacho (incluido cada reintento) lleva un id fresco.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub node_id: String,
    pub op: String,
    /// Nombre de la UDF registrada (para map/filter/flat_map)
    #[serde(rename = "fn", default)]
    pub fn_name: String,
    /// Argumentos extra (ej: ruta del archivo fuente para read_csv)
    pub args: Vec<String>,
    /// Salidas de los nodos padre para esta misma partición, en orden de arista
    pub input_files: Vec<String>,
    pub partition: u32,
    pub total_partitions: u32,
    /// Contador de intentos (1..=MAX_RETRIES)
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// Reporte del worker al terminar (o fallar) una tarea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: TaskId,
    pub job_id: JobId,
    pub node_id: String,
    pub partition: u32,
    pub status: TaskStatus,
    /// Ruta del archivo de salida escrito por el worker
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

/// Estado de una partición de un nodo, y por agregación del nodo mismo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionState {
    Pending,
    Scheduled,
    Completed,
}
