use reqwest::Client;
use std::time::Duration;
use tokio::{sync::mpsc, time::sleep};
use tracing::{info, warn};

use common::{Task, WorkerInfo};

use crate::state::AppState;
use crate::NO_WORKER_BACKOFF_SECS;

/// Loop del scheduler: drena la cola de tareas y las reparte round-robin
/// entre los workers UP. El POST de despacho corre en una tarea aparte para
/// que un worker lento no frene al resto de la cola.
pub async fn run_scheduler(state: AppState, mut task_rx: mpsc::Receiver<Task>) {
    let client = Client::new();

    while let Some(task) = task_rx.recv().await {
        let picked = {
            let mut master = state.inner.lock().unwrap();
            master.pick_worker()
        };

        let Some(worker) = picked else {
            // sin workers vivos: backoff acotado y reencolar en diferido
            warn!(task_id = %task.id, "sin workers UP, reencolando tarea");
            sleep(Duration::from_secs(NO_WORKER_BACKOFF_SECS)).await;
            state.enqueue(task);
            continue;
        };

        {
            let mut master = state.inner.lock().unwrap();
            master.record_assignment(&task, &worker.id);
        }
        info!(task_id = %task.id, worker_id = %worker.id, "tarea asignada");

        let state = state.clone();
        let client = client.clone();
        tokio::spawn(async move {
            dispatch_task(state, client, worker, task).await;
        });
    }
}

/// POST de la tarea al endpoint /task del worker. El worker responde antes
/// de ejecutar. Si el envío falla, se libera la asignación y la misma tarea
/// (mismo intento) vuelve a la cola para otro worker.
async fn dispatch_task(state: AppState, client: Client, worker: WorkerInfo, task: Task) {
    let url = format!("{}/task", worker.url);
    let delivered = match client.post(&url).json(&task).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    };

    if !delivered {
        warn!(
            task_id = %task.id,
            worker_id = %worker.id,
            "fallo el despacho, reencolando tarea"
        );
        {
            let mut master = state.inner.lock().unwrap();
            master.clear_assignment(&task.id);
        }
        state.enqueue(task);
    }
}
