pub mod dag;
pub mod engine;
pub mod job;
pub mod task;
pub mod worker;

pub use dag::{Dag, DagNode};
pub use job::{
    Job, JobId, JobRequest, JobResultsResponse, JobStatus, JobStatusResponse, SubmitResponse,
};
pub use task::{PartitionState, Task, TaskId, TaskResult, TaskStatus};
pub use worker::{
    HeartbeatRequest, RegisterRequest, SystemMetrics, WorkerId, WorkerInfo, WorkerStatus,
};

/// Número máximo de intentos por tarea lógica antes de marcar el job como FAILED.
pub const MAX_RETRIES: u32 = 3;
