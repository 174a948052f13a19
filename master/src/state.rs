use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use common::{
    DagNode, Job, JobId, JobRequest, JobResultsResponse, JobStatus, JobStatusResponse,
    PartitionState, SystemMetrics, Task, TaskId, TaskResult, TaskStatus, WorkerId, WorkerInfo,
    WorkerStatus, MAX_RETRIES,
};

/// Estado compartido entre handlers HTTP, scheduler y health-check.
/// Un único mutex grueso protege todo el estado de coordinación; los envíos
/// a la cola y los POST salientes ocurren siempre fuera del lock.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<Mutex<MasterState>>,
    pub task_tx: mpsc::Sender<Task>,
}

impl AppState {
    pub fn new(master: MasterState, task_tx: mpsc::Sender<Task>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(master)),
            task_tx,
        }
    }

    /// Encola en diferido: la cola es acotada y un send bloqueante desde una
    /// región con lock podría auto-bloquear al scheduler contra la cola llena.
    pub fn enqueue(&self, task: Task) {
        let tx = self.task_tx.clone();
        tokio::spawn(async move {
            if tx.send(task).await.is_err() {
                warn!("cola de tareas cerrada, tarea descartada");
            }
        });
    }

    pub fn enqueue_all(&self, tasks: Vec<Task>) {
        for task in tasks {
            self.enqueue(task);
        }
    }
}

pub struct MasterState {
    pub jobs: HashMap<JobId, Job>,

    /// JobID -> NodeID -> estado de cada partición (índice = id de partición)
    partitions: HashMap<JobId, HashMap<String, Vec<PartitionState>>>,
    /// JobID -> NodeID -> ruta de salida por partición
    partition_outputs: HashMap<JobId, HashMap<String, Vec<Option<String>>>>,
    /// JobID -> NodeID -> ruta de salida a nivel de nodo (para results y persistencia)
    job_outputs: HashMap<JobId, HashMap<String, String>>,
    /// JobID -> total de reportes FAILED observados
    job_failures: HashMap<JobId, u32>,

    pub workers: HashMap<WorkerId, WorkerInfo>,
    /// TaskID -> worker asignado
    assignments: HashMap<TaskId, WorkerId>,
    /// TaskID -> copia de la tarea en vuelo (para reintentos y huérfanas)
    running: HashMap<TaskId, Task>,
    rr_cursor: usize,

    state_file: PathBuf,
}

/// Snapshot durable: sólo el catálogo de jobs, las salidas finales y los
/// contadores de fallos. Workers, colas y tareas en vuelo son volátiles.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(rename = "Jobs", default)]
    jobs: HashMap<JobId, Job>,
    #[serde(rename = "JobOutputs", default)]
    job_outputs: HashMap<JobId, HashMap<String, String>>,
    #[serde(rename = "JobFailures", default)]
    job_failures: HashMap<JobId, u32>,
}

impl MasterState {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            jobs: HashMap::new(),
            partitions: HashMap::new(),
            partition_outputs: HashMap::new(),
            job_outputs: HashMap::new(),
            job_failures: HashMap::new(),
            workers: HashMap::new(),
            assignments: HashMap::new(),
            running: HashMap::new(),
            rr_cursor: 0,
            state_file: state_file.into(),
        }
    }

    /* ---------------- jobs ---------------- */

    /// Valida y registra un job nuevo. Devuelve el job y las tareas de los
    /// nodos source (todas sus particiones), listas para encolar.
    /// Un job rechazado no deja rastro en el estado.
    pub fn submit_job(&mut self, req: JobRequest) -> Result<(Job, Vec<Task>), String> {
        req.dag.validate()?;

        let parallelism = req.parallelism.max(1);
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            name: req.name,
            status: JobStatus::Running,
            graph: req.dag,
            parallelism,
            submitted_at: Utc::now(),
            completed_at: None,
        };

        self.init_job_progress(&job);
        self.jobs.insert(job.id.clone(), job.clone());

        let tasks = self.schedule_source_tasks(&job.id);
        self.save_state();

        info!(job_id = %job.id, parallelism, "job aceptado");
        Ok((job, tasks))
    }

    fn init_job_progress(&mut self, job: &Job) {
        let p = job.parallelism.max(1) as usize;
        let states = self.partitions.entry(job.id.clone()).or_default();
        let outputs = self.partition_outputs.entry(job.id.clone()).or_default();
        for node in &job.graph.nodes {
            states.insert(node.id.clone(), vec![PartitionState::Pending; p]);
            outputs.insert(node.id.clone(), vec![None; p]);
        }
        self.job_failures.entry(job.id.clone()).or_insert(0);
        self.job_outputs.entry(job.id.clone()).or_default();
    }

    /// Encola todas las particiones de los nodos sin dependencias (in-degree 0).
    fn schedule_source_tasks(&mut self, job_id: &str) -> Vec<Task> {
        let Some(job) = self.jobs.get(job_id) else {
            return Vec::new();
        };
        let graph = job.graph.clone();
        let total = job.parallelism.max(1);

        let in_degrees = graph.in_degrees();
        let mut tasks = Vec::new();
        for node in &graph.nodes {
            if in_degrees.get(node.id.as_str()) != Some(&0) {
                continue;
            }
            for partition in 0..total {
                tasks.push(self.queue_partition(job_id, node, partition, total, Vec::new()));
            }
        }
        tasks
    }

    /// Construye la tarea de una partición y la marca SCHEDULED.
    fn queue_partition(
        &mut self,
        job_id: &str,
        node: &DagNode,
        partition: u32,
        total: u32,
        input_files: Vec<String>,
    ) -> Task {
        self.set_partition_state(job_id, &node.id, partition, PartitionState::Scheduled);
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            node_id: node.id.clone(),
            op: node.op.clone(),
            fn_name: node.fn_name.clone().unwrap_or_default(),
            args: vec![node.path.clone().unwrap_or_default()],
            input_files,
            partition,
            total_partitions: total,
            attempt: 1,
        };
        info!(task_id = %task.id, node = %node.id, partition, "tarea encolada");
        task
    }

    /* ---------------- progreso por partición ---------------- */

    fn partition_state(&self, job_id: &str, node_id: &str, partition: u32) -> PartitionState {
        self.partitions
            .get(job_id)
            .and_then(|nodes| nodes.get(node_id))
            .and_then(|parts| parts.get(partition as usize))
            .copied()
            .unwrap_or(PartitionState::Pending)
    }

    fn set_partition_state(
        &mut self,
        job_id: &str,
        node_id: &str,
        partition: u32,
        state: PartitionState,
    ) {
        if let Some(parts) = self
            .partitions
            .get_mut(job_id)
            .and_then(|nodes| nodes.get_mut(node_id))
        {
            if let Some(slot) = parts.get_mut(partition as usize) {
                *slot = state;
            }
        }
    }

    /// Estado agregado de un nodo: COMPLETED si todas sus particiones lo
    /// están, SCHEDULED si alguna lo está, PENDING en el resto de casos.
    pub fn node_state(&self, job_id: &str, node_id: &str) -> PartitionState {
        let Some(parts) = self
            .partitions
            .get(job_id)
            .and_then(|nodes| nodes.get(node_id))
        else {
            return PartitionState::Pending;
        };
        if parts.iter().all(|s| *s == PartitionState::Completed) {
            PartitionState::Completed
        } else if parts.iter().any(|s| *s == PartitionState::Scheduled) {
            PartitionState::Scheduled
        } else {
            PartitionState::Pending
        }
    }

    /* ---------------- reporte de tareas ---------------- */

    /// Procesa el reporte de un worker. Devuelve las tareas nuevas que el
    /// reporte desbloquea (reintento o particiones hijas recién habilitadas).
    pub fn handle_task_result(&mut self, res: TaskResult) -> Vec<Task> {
        self.assignments.remove(&res.id);
        let original = self.running.remove(&res.id);

        if res.status == TaskStatus::Failed {
            *self.job_failures.entry(res.job_id.clone()).or_insert(0) += 1;
            error!(
                job_id = %res.job_id,
                node = %res.node_id,
                partition = res.partition,
                error = res.error_msg.as_deref().unwrap_or(""),
                "fallo en tarea"
            );

            let mut tasks = Vec::new();
            match original {
                Some(mut task) if task.attempt < MAX_RETRIES => {
                    task.attempt += 1;
                    task.id = uuid::Uuid::new_v4().to_string();
                    info!(task_id = %task.id, attempt = task.attempt, "reintentando tarea");
                    tasks.push(task);
                }
                _ => {
                    if let Some(job) = self.jobs.get_mut(&res.job_id) {
                        if job.status == JobStatus::Running {
                            warn!(job_id = %res.job_id, "reintentos agotados, job FAILED");
                            job.status = JobStatus::Failed;
                            job.completed_at = Some(Utc::now());
                        }
                    }
                }
            }
            self.save_state();
            return tasks;
        }

        // Éxito: registrar salida y completar la partición.
        self.set_partition_state(
            &res.job_id,
            &res.node_id,
            res.partition,
            PartitionState::Completed,
        );
        if let Some(slot) = self
            .partition_outputs
            .get_mut(&res.job_id)
            .and_then(|nodes| nodes.get_mut(&res.node_id))
            .and_then(|parts| parts.get_mut(res.partition as usize))
        {
            *slot = Some(res.result.clone());
        }
        self.job_outputs
            .entry(res.job_id.clone())
            .or_default()
            .insert(res.node_id.clone(), res.result.clone());

        info!(
            job_id = %res.job_id,
            node = %res.node_id,
            partition = res.partition,
            "tarea completada"
        );
        self.save_state();

        // Un reporte tardío sobre un job ya terminal se registra pero no
        // programa trabajo nuevo ni revive el job.
        let job_running = self
            .jobs
            .get(&res.job_id)
            .map(|j| !j.status.is_terminal())
            .unwrap_or(false);
        if !job_running {
            return Vec::new();
        }

        let tasks = self.check_and_schedule_dependents(&res.job_id);
        self.check_job_completion(&res.job_id);
        tasks
    }

    /// Gating por partición: la partición i de un hijo se habilita cuando la
    /// partición i de todos sus padres está COMPLETED. Los inputs se cablean
    /// con las salidas de esa misma partición, en orden de declaración de
    /// aristas.
    fn check_and_schedule_dependents(&mut self, job_id: &str) -> Vec<Task> {
        let Some(job) = self.jobs.get(job_id) else {
            return Vec::new();
        };
        let graph = job.graph.clone();
        let total = job.parallelism.max(1);

        let mut tasks = Vec::new();
        for node in &graph.nodes {
            let parents = graph.parents_of(&node.id);
            if parents.is_empty() {
                continue; // los sources se encolaron al aceptar el job
            }
            for partition in 0..total {
                if self.partition_state(job_id, &node.id, partition) != PartitionState::Pending {
                    continue;
                }
                let ready = parents.iter().all(|parent| {
                    self.partition_state(job_id, parent, partition) == PartitionState::Completed
                });
                if !ready {
                    continue;
                }
                let inputs: Vec<String> = parents
                    .iter()
                    .filter_map(|parent| {
                        self.partition_outputs
                            .get(job_id)
                            .and_then(|nodes| nodes.get(*parent))
                            .and_then(|parts| parts.get(partition as usize))
                            .and_then(|slot| slot.clone())
                    })
                    .collect();
                tasks.push(self.queue_partition(job_id, node, partition, total, inputs));
            }
        }
        tasks
    }

    fn check_job_completion(&mut self, job_id: &str) {
        let Some(job) = self.jobs.get(job_id) else {
            return;
        };
        if job.status != JobStatus::Running {
            return;
        }
        let all_done = job
            .graph
            .nodes
            .iter()
            .all(|n| self.node_state(job_id, &n.id) == PartitionState::Completed);
        if !all_done {
            return;
        }

        info!(job_id, "job completado");
        if let Some(job) = self.jobs.get_mut(job_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
        }
        self.save_state();
    }

    /* ---------------- workers ---------------- */

    /// Registra (o re-registra) un worker. La URL llega ya construida con el
    /// host del peer; un re-registro por id sólo la sobreescribe y vuelve a UP.
    pub fn register_worker(&mut self, id: WorkerId, url: String) {
        info!(worker_id = %id, url = %url, "worker registrado");
        self.workers.insert(
            id.clone(),
            WorkerInfo {
                id,
                url,
                last_heartbeat: Utc::now(),
                status: WorkerStatus::Up,
                metrics: SystemMetrics::default(),
            },
        );
    }

    /// Heartbeat: refresca el timestamp, fuerza UP y copia las métricas.
    /// Heartbeats de ids desconocidos se ignoran en silencio.
    pub fn heartbeat(&mut self, id: &str, metrics: SystemMetrics) {
        if let Some(worker) = self.workers.get_mut(id) {
            worker.last_heartbeat = Utc::now();
            worker.status = WorkerStatus::Up;
            worker.metrics = metrics;
        }
    }

    /// Round-robin sobre los workers UP (orden estable por id).
    pub fn pick_worker(&mut self) -> Option<WorkerInfo> {
        let mut up: Vec<&WorkerInfo> = self
            .workers
            .values()
            .filter(|w| w.status == WorkerStatus::Up)
            .collect();
        if up.is_empty() {
            return None;
        }
        up.sort_by(|a, b| a.id.cmp(&b.id));
        let picked = up[self.rr_cursor % up.len()].clone();
        self.rr_cursor += 1;
        Some(picked)
    }

    pub fn record_assignment(&mut self, task: &Task, worker_id: &str) {
        self.assignments.insert(task.id.clone(), worker_id.to_string());
        self.running.insert(task.id.clone(), task.clone());
    }

    /// El POST de despacho falló: liberar la asignación para que la misma
    /// tarea (mismo intento) pueda ir a otro worker.
    pub fn clear_assignment(&mut self, task_id: &str) {
        self.assignments.remove(task_id);
    }

    /// Marca DOWN a los workers UP sin heartbeat dentro del umbral y devuelve
    /// sus tareas huérfanas, cada una con id fresco (el intento se conserva).
    /// El worker muerto queda en el registro y puede re-registrarse por id.
    pub fn expire_dead_workers(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<Task> {
        let mut dead: Vec<WorkerId> = Vec::new();
        for (id, worker) in self.workers.iter_mut() {
            if worker.status == WorkerStatus::Up && now - worker.last_heartbeat > timeout {
                warn!(worker_id = %id, "worker sin heartbeat, marcado DOWN");
                worker.status = WorkerStatus::Down;
                dead.push(id.clone());
            }
        }
        if dead.is_empty() {
            return Vec::new();
        }

        let orphaned: Vec<TaskId> = self
            .assignments
            .iter()
            .filter(|(_, wid)| dead.contains(wid))
            .map(|(tid, _)| tid.clone())
            .collect();

        let mut tasks = Vec::new();
        for task_id in orphaned {
            self.assignments.remove(&task_id);
            if let Some(mut task) = self.running.remove(&task_id) {
                task.id = uuid::Uuid::new_v4().to_string();
                info!(
                    task_id = %task.id,
                    job_id = %task.job_id,
                    "reencolando tarea huérfana con id fresco"
                );
                tasks.push(task);
            }
        }
        tasks
    }

    /* ---------------- consultas ---------------- */

    pub fn status_response(&self, job_id: &str) -> Option<JobStatusResponse> {
        let job = self.jobs.get(job_id)?;

        let mut node_status = HashMap::new();
        let mut completed = 0usize;
        for node in &job.graph.nodes {
            let state = self.node_state(job_id, &node.id);
            if state == PartitionState::Completed {
                completed += 1;
            }
            node_status.insert(node.id.clone(), state);
        }

        let total = job.graph.nodes.len();
        let progress_percent = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let end = job.completed_at.unwrap_or_else(Utc::now);
        let duration_secs = (end - job.submitted_at).num_milliseconds() as f64 / 1000.0;

        Some(JobStatusResponse {
            id: job.id.clone(),
            name: job.name.clone(),
            status: job.status,
            submitted_at: job.submitted_at,
            duration_secs,
            progress_percent,
            node_status,
            failure_count: self.job_failures.get(job_id).copied().unwrap_or(0),
        })
    }

    /// Salidas finales: sólo los nodos sink (out-degree 0).
    pub fn results_response(&self, job_id: &str) -> Option<JobResultsResponse> {
        let job = self.jobs.get(job_id)?;
        let outputs = self.job_outputs.get(job_id);

        let mut finals = HashMap::new();
        for sink in job.graph.sink_ids() {
            if let Some(path) = outputs.and_then(|o| o.get(sink)) {
                finals.insert(sink.to_string(), path.clone());
            }
        }
        Some(JobResultsResponse {
            job_id: job_id.to_string(),
            outputs: finals,
        })
    }

    pub fn worker_list(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> = self.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /* ---------------- persistencia ---------------- */

    /// Persiste el snapshot en cada transición de estado. Escribe a un
    /// archivo temporal y renombra para no dejar un snapshot a medias.
    pub fn save_state(&self) {
        let data = PersistedState {
            jobs: self.jobs.clone(),
            job_outputs: self.job_outputs.clone(),
            job_failures: self.job_failures.clone(),
        };

        let content = match serde_json::to_string_pretty(&data) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "error serializando estado");
                return;
            }
        };

        let tmp = self.state_file.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, content).and_then(|_| fs::rename(&tmp, &self.state_file)) {
            error!(error = %e, "no se pudo guardar estado");
        }
    }

    /// Recupera el snapshot al arrancar. Sin archivo o con archivo corrupto
    /// se arranca vacío. Los jobs COMPLETED recuperan todas sus particiones
    /// en COMPLETED; los que quedaron RUNNING no se re-encolan.
    pub fn load_state(&mut self) {
        let content = match fs::read_to_string(&self.state_file) {
            Ok(c) => c,
            Err(_) => {
                info!("iniciando sin estado previo");
                return;
            }
        };

        let data: PersistedState = match serde_json::from_str(&content) {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "archivo de estado corrupto, iniciando vacío");
                return;
            }
        };

        self.jobs = data.jobs;
        self.job_outputs = data.job_outputs;
        self.job_failures = data.job_failures;

        let jobs: Vec<Job> = self.jobs.values().cloned().collect();
        for job in jobs {
            self.init_job_progress(&job);
            if job.status == JobStatus::Completed {
                let total = job.parallelism.max(1);
                for node in &job.graph.nodes {
                    for partition in 0..total {
                        self.set_partition_state(
                            &job.id,
                            &node.id,
                            partition,
                            PartitionState::Completed,
                        );
                    }
                }
            }
        }
        info!(jobs_loaded = self.jobs.len(), "estado recuperado");
    }
}
