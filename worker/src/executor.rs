use std::{
    io,
    path::{Path, PathBuf},
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tokio::time::sleep;
use tracing::{error, info, warn};

use common::{engine, Task, TaskResult, TaskStatus};

use crate::agent::WorkerAgent;
use crate::REPORT_RETRIES;

/// Ejecuta una tarea recibida del master y reporta el resultado.
/// El trabajo de archivos corre en un hilo de bloqueo; el contador de
/// tareas activas se mantiene para las métricas de heartbeat.
pub async fn execute_task(agent: Arc<WorkerAgent>, task: Task) {
    agent.active_tasks.fetch_add(1, Ordering::Relaxed);
    info!(
        task_id = %task.id,
        node = %task.node_id,
        op = %task.op,
        partition = task.partition,
        attempt = task.attempt,
        "ejecutando tarea"
    );

    let output_file = output_path_for(&agent.output_dir, &task)
        .to_string_lossy()
        .to_string();

    let blocking_task = task.clone();
    let blocking_output = output_file.clone();
    let outcome =
        tokio::task::spawn_blocking(move || run_operator(&blocking_task, &blocking_output)).await;

    let (status, error_msg) = match outcome {
        Ok(Ok(())) => (TaskStatus::Completed, None),
        Ok(Err(e)) => {
            warn!(task_id = %task.id, error = %e, "tarea falló");
            (TaskStatus::Failed, Some(e.to_string()))
        }
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "panic ejecutando tarea");
            (TaskStatus::Failed, Some(format!("panic en la tarea: {e}")))
        }
    };

    report_completion(&agent, &task, status, &output_file, error_msg).await;
    agent.active_tasks.fetch_sub(1, Ordering::Relaxed);
}

/// Convención de nombres de intermedios: <dir>/<job>_<nodo>_p<particion>.txt.
/// La partición va en el nombre para que las P salidas de un nodo no
/// colisionen en un directorio compartido; la misma ruta se reporta al master.
pub fn output_path_for(output_dir: &Path, task: &Task) -> PathBuf {
    output_dir.join(format!(
        "{}_{}_p{}.txt",
        task.job_id, task.node_id, task.partition
    ))
}

/// Despacho por operador. Cualquier error convierte la tarea en FAILED;
/// salidas parciales y spills quedan en disco y el reintento los pisa.
pub fn run_operator(task: &Task, output_file: &str) -> io::Result<()> {
    match task.op.as_str() {
        "read_csv" | "read_jsonl" => {
            let source = task
                .args
                .first()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "nodo source sin ruta de entrada")
                })?;
            engine::copy_source(source, output_file)
        }
        "map" => engine::map_lines(&task.input_files, output_file, &task.fn_name),
        "flat_map" => engine::flat_map_lines(&task.input_files, output_file, &task.fn_name),
        "filter" => engine::filter_lines(&task.input_files, output_file, &task.fn_name),
        "reduce_by_key" => {
            engine::reduce_by_key(&task.input_files, output_file, engine::spill_threshold())
        }
        "join" => {
            if task.input_files.len() >= 2 {
                engine::join(&task.input_files[0], &task.input_files[1], output_file)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "join requiere 2 entradas",
                ))
            }
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("operación desconocida: {other}"),
        )),
    }
}

/// Reporta el resultado al master, con reintentos ante errores de conexión.
async fn report_completion(
    agent: &WorkerAgent,
    task: &Task,
    status: TaskStatus,
    result_path: &str,
    error_msg: Option<String>,
) {
    let res = TaskResult {
        id: task.id.clone(),
        job_id: task.job_id.clone(),
        node_id: task.node_id.clone(),
        partition: task.partition,
        status,
        result: result_path.to_string(),
        error_msg,
    };

    for _ in 0..REPORT_RETRIES {
        match agent
            .client
            .post(format!("{}/task/complete", agent.master_url))
            .json(&res)
            .send()
            .await
        {
            Ok(_) => return,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "error reportando tarea");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
    error!(task_id = %task.id, "no se pudo reportar la tarea al master");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("executor_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn task(op: &str, fn_name: &str, args: Vec<String>, inputs: Vec<String>) -> Task {
        Task {
            id: "t1".to_string(),
            job_id: "job-1".to_string(),
            node_id: "nodo".to_string(),
            op: op.to_string(),
            fn_name: fn_name.to_string(),
            args,
            input_files: inputs,
            partition: 2,
            total_partitions: 4,
            attempt: 1,
        }
    }

    #[test]
    fn output_path_codifica_job_nodo_y_particion() {
        let t = task("map", "to_lower", vec![], vec![]);
        let path = output_path_for(Path::new("/tmp/lote"), &t);
        assert_eq!(path, PathBuf::from("/tmp/lote/job-1_nodo_p2.txt"));
    }

    #[test]
    fn operacion_desconocida_falla() {
        let t = task("sort_by", "", vec![], vec![]);
        let err = run_operator(&t, "/tmp/no-importa.txt").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(err.to_string().contains("sort_by"));
    }

    #[test]
    fn source_sin_ruta_falla() {
        let t = task("read_csv", "", vec![String::new()], vec![]);
        assert!(run_operator(&t, "/tmp/no-importa.txt").is_err());
    }

    #[test]
    fn join_con_una_sola_entrada_falla() {
        let t = task("join", "", vec![], vec!["/tmp/solo-uno.txt".to_string()]);
        let err = run_operator(&t, "/tmp/no-importa.txt").unwrap_err();
        assert!(err.to_string().contains("join"));
    }

    #[test]
    fn map_con_udf_desconocida_falla() {
        let tmp = temp_dir("bad_udf");
        let input = tmp.join("in.txt");
        fs::write(&input, "hola\n").unwrap();
        let t = task(
            "map",
            "inexistente",
            vec![],
            vec![input.to_string_lossy().to_string()],
        );
        let out = tmp.join("out.txt").to_string_lossy().to_string();

        assert!(run_operator(&t, &out).is_err());
    }

    #[test]
    fn read_csv_copia_la_fuente() {
        let tmp = temp_dir("read");
        let source = tmp.join("datos.csv");
        fs::write(&source, "a,1\nb,2\n").unwrap();
        let t = task(
            "read_csv",
            "",
            vec![source.to_string_lossy().to_string()],
            vec![],
        );
        let out = tmp.join("out.txt").to_string_lossy().to_string();

        run_operator(&t, &out).unwrap();

        assert_eq!(fs::read_to_string(&out).unwrap(), "a,1\nb,2\n");
    }

    #[test]
    fn map_aplica_udf_sobre_las_entradas() {
        let tmp = temp_dir("map");
        let input = tmp.join("in.txt");
        fs::write(&input, "HOLA\n").unwrap();
        let t = task(
            "map",
            "to_lower",
            vec![],
            vec![input.to_string_lossy().to_string()],
        );
        let out = tmp.join("out.txt").to_string_lossy().to_string();

        run_operator(&t, &out).unwrap();

        assert_eq!(fs::read_to_string(&out).unwrap(), "hola\n");
    }
}
