//! orchestrator CLI: run the HTTP service or drive tasks from the shell.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pipeline_orchestrator::collaborator::HttpCollaborators;
use pipeline_orchestrator::config::Config;
use pipeline_orchestrator::db::Db;
use pipeline_orchestrator::engine::Engine;
use pipeline_orchestrator::model::{JsonMap, NewTask, Task, TaskId, TaskStatus, WorkflowType};
use pipeline_orchestrator::publish::{LogPublisher, PgmqPublisher, ResultPublisher};
use pipeline_orchestrator::resilience::Resilience;
use pipeline_orchestrator::store::{MemoryTaskStore, TaskStore};
use pipeline_orchestrator::telemetry::{TelemetryConfig, init_telemetry};
use pipeline_orchestrator::workflow::{WorkflowExecutor, WorkflowRegistry};
use secrecy::ExposeSecret;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "orchestrator", about = "Workflow orchestration for the report pipeline")]
struct Cli {
    /// TOML file with [resilience] and [timeouts] overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Keep tasks in memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
    },
    /// Task operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// List workflow definitions
    Workflows,
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create a task and run it to completion in this process
    Run {
        /// Workflow type (e.g. report-analysis)
        workflow: String,
        /// JSON object used as the task input
        #[arg(long)]
        input: Option<String>,
        /// Task id (idempotency key); generated when omitted
        #[arg(long)]
        id: Option<String>,
    },
    /// List tasks, newest first
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Maximum tasks to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a task
    Show {
        /// Task id
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(ref path) = cli.config {
        config = config.with_file(path)?;
    }

    match cli.command {
        Command::Serve { in_memory } => cmd_serve(config, in_memory).await,
        Command::Workflows => cmd_workflows(),
        Command::Task { action } => {
            let _guard = init_telemetry(TelemetryConfig {
                endpoint: None,
                service_name: "orchestrator".to_string(),
                default_level: "warn".to_string(),
            })?;
            match action {
                TaskAction::Run {
                    workflow,
                    input,
                    id,
                } => cmd_task_run(config, workflow, input, id).await,
                TaskAction::List { status, limit } => cmd_task_list(config, status, limit).await,
                TaskAction::Show { id } => cmd_task_show(config, id).await,
            }
        }
    }
}

/// Connect the durable store if one is configured.
async fn connect_db(config: &Config) -> anyhow::Result<Option<Db>> {
    let Some(ref url) = config.database_url else {
        return Ok(None);
    };
    let db = Db::connect(url.expose_secret()).await?;
    db.migrate().await?;
    Ok(Some(db))
}

async fn require_db(config: &Config) -> anyhow::Result<Db> {
    connect_db(config)
        .await?
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for this command"))
}

async fn build_engine(config: &Config, db: Option<Db>) -> anyhow::Result<Engine> {
    let store: Arc<dyn TaskStore> = match db {
        Some(ref db) => Arc::new(db.clone()),
        None => Arc::new(MemoryTaskStore::new()),
    };

    let publisher: Arc<dyn ResultPublisher> = match (db, &config.results_queue) {
        (Some(db), Some(queue)) => Arc::new(PgmqPublisher::new(db, queue.clone()).await?),
        (None, Some(queue)) => {
            warn!(queue = %queue, "RESULTS_QUEUE needs a database, logging results instead");
            Arc::new(LogPublisher)
        }
        (_, None) => Arc::new(LogPublisher),
    };

    let collaborators = Arc::new(HttpCollaborators::new(config.endpoints.clone())?);
    let executor = WorkflowExecutor::new(
        Arc::clone(&store),
        collaborators,
        publisher,
        Resilience::new(config.retry.clone()),
        config.timeouts,
    );

    Ok(Engine::new(
        store,
        Arc::new(WorkflowRegistry::standard()),
        executor,
    ))
}

async fn cmd_serve(config: Config, in_memory: bool) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "orchestrator".to_string(),
        default_level: config.log_level.clone(),
    })?;

    let db = if in_memory {
        info!("using in-memory task store");
        None
    } else {
        Some(require_db(&config).await?)
    };

    let engine = build_engine(&config, db).await?;
    engine.recover_interrupted().await?;

    pipeline_orchestrator::server::serve(engine, config.bind_addr).await?;
    Ok(())
}

fn cmd_workflows() -> anyhow::Result<()> {
    let registry = WorkflowRegistry::standard();
    for (workflow, definition) in registry.definitions() {
        let steps: Vec<&str> = definition.steps.iter().map(|s| s.as_str()).collect();
        println!("{:<20}  {}", workflow, steps.join(" -> "));
    }
    Ok(())
}

async fn cmd_task_run(
    config: Config,
    workflow: String,
    input: Option<String>,
    id: Option<String>,
) -> anyhow::Result<()> {
    let workflow: WorkflowType = workflow.parse()?;
    let input: JsonMap = match input {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| anyhow::anyhow!("--input must be a JSON object: {e}"))?,
        None => JsonMap::new(),
    };

    let mut new = NewTask::new(workflow).input(input);
    if let Some(id) = id {
        new = new.id(id);
    }

    let db = connect_db(&config).await?;
    let engine = build_engine(&config, db).await?;
    let task = engine.run_to_completion(new).await?;

    print_task(&task)?;
    if task.status == TaskStatus::Failed {
        anyhow::bail!(
            "task {} failed: {}",
            task.id,
            task.error_message.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}

async fn cmd_task_list(config: Config, status: Option<String>, limit: usize) -> anyhow::Result<()> {
    let status: Option<TaskStatus> = status.map(|s| s.parse()).transpose()?;
    let db = require_db(&config).await?;
    let tasks = db.list(status, limit).await?;

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<20}  {:<20}  {:<12}  {:<12}  CREATED",
        "ID", "WORKFLOW", "STATUS", "STEP"
    );
    println!("{}", "-".repeat(90));

    for task in &tasks {
        println!(
            "{:<20}  {:<20}  {:<12}  {:<12}  {}",
            task.id,
            task.workflow_type,
            task.status,
            task.status.step_name().unwrap_or("-"),
            task.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} task(s)", tasks.len());
    Ok(())
}

async fn cmd_task_show(config: Config, id: String) -> anyhow::Result<()> {
    let db = require_db(&config).await?;
    let task = db.get(&TaskId(id)).await?;
    print_task(&task)
}

fn print_task(task: &Task) -> anyhow::Result<()> {
    println!("ID:         {}", task.id);
    println!("Workflow:   {}", task.workflow_type);
    println!("Status:     {}", task.status);
    println!("Step:       {}", task.status.step_name().unwrap_or("-"));
    println!("Created:    {}", task.created_at);
    println!("Updated:    {}", task.updated_at);
    println!(
        "Input:      {}",
        serde_json::to_string_pretty(&task.input_data)?
    );
    if !task.output_data.is_empty() {
        println!(
            "Output:     {}",
            serde_json::to_string_pretty(&task.output_data)?
        );
    }
    if let Some(ref err) = task.error_message {
        println!("Error:      {err}");
    }
    Ok(())
}
