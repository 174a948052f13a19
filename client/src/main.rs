use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use std::{env, path::PathBuf};

use common::{JobResultsResponse, JobStatusResponse, SubmitResponse, WorkerInfo};

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI para enviar y consultar jobs en el master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía la definición de un job (archivo JSON con name, dag y parallelism)
    Submit {
        #[arg(value_name = "ARCHIVO_JOB")]
        file: PathBuf,
    },
    /// Consulta estado y progreso de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista las salidas finales (nodos sink) de un job
    Results {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista los workers registrados y sus métricas
    Workers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Submit { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("no se pudo leer {}", file.display()))?;
            // validar que el archivo sea JSON antes de enviarlo
            let body: serde_json::Value =
                serde_json::from_str(&raw).context("el archivo de job no es JSON válido")?;

            let url = format!("{}/api/v1/jobs", base_url);
            let resp = client.post(&url).json(&body).send().await?;
            if !resp.status().is_success() {
                bail!("el master rechazó el job ({}): {}", resp.status(), resp.text().await?);
            }

            let accepted: SubmitResponse = resp.json().await?;
            println!("Job creado:");
            println!("  id: {}", accepted.job_id);
            println!("  estado: {}", accepted.status);
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/jobs/{id}", base_url);
            let resp = client.get(&url).send().await?;
            if !resp.status().is_success() {
                bail!("job no encontrado (status {})", resp.status());
            }

            let job: JobStatusResponse = resp.json().await?;
            println!("Job:");
            println!("  id: {}", job.id);
            println!("  nombre: {}", job.name);
            println!("  estado: {:?}", job.status);
            println!("  progreso: {:.1}%", job.progress_percent);
            println!("  duración: {:.1}s", job.duration_secs);
            println!("  fallos: {}", job.failure_count);
            println!("  nodos:");
            let mut nodes: Vec<_> = job.node_status.iter().collect();
            nodes.sort_by(|a, b| a.0.cmp(b.0));
            for (node, state) in nodes {
                println!("    {node}: {state:?}");
            }
        }

        Commands::Results { id } => {
            let url = format!("{}/api/v1/jobs/{id}/results", base_url);
            let resp = client.get(&url).send().await?;
            if !resp.status().is_success() {
                bail!("no se encontraron resultados para el job {id}");
            }

            let results: JobResultsResponse = resp.json().await?;
            println!("Resultados del job {}:", results.job_id);
            if results.outputs.is_empty() {
                println!("  (sin salidas todavía)");
            } else {
                let mut outputs: Vec<_> = results.outputs.iter().collect();
                outputs.sort_by(|a, b| a.0.cmp(b.0));
                for (node, path) in outputs {
                    println!("  {node}: {path}");
                }
            }
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let resp = client.get(&url).send().await?;
            let workers: Vec<WorkerInfo> = resp.json().await?;
            if workers.is_empty() {
                println!("No hay workers registrados.");
            } else {
                for w in workers {
                    println!("Worker {}", w.id);
                    println!("  url            : {}", w.url);
                    println!("  estado         : {:?}", w.status);
                    println!("  last_heartbeat : {}", w.last_heartbeat);
                    println!(
                        "  tareas activas : {} (mem: {} bytes)",
                        w.metrics.active_tasks, w.metrics.memory_usage
                    );
                    println!();
                }
            }
        }
    }

    Ok(())
}
