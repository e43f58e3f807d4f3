//! The `hive` binary: run the orchestrator, submit tasks, and inspect the
//! operator surface.

use clap::{Parser, Subcommand};
use hive_core::{HiveConfig, HiveError, HiveResult, ModelId, Task, TaskType};
use hive_orchestrator::{BusProbe, Orchestrator};
use hive_registry::{CapabilityMatcher, MatcherConfig};
use hive_resilience::{BreakerPolicy, BreakerRegistry, MessageBus, MessageCipher};
use hive_router::TaskRouter;
use hive_store::{MemoryConnector, MemoryStore, StorePool};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hive", about = "Hive — cost-aware multi-model task orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "hive.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator until interrupted
    Serve,
    /// Route a task and print the decision without enqueueing it
    Route {
        /// The task prompt
        #[arg(long)]
        prompt: String,
        /// Optional file the task operates on
        #[arg(long)]
        file: Option<String>,
        /// Task type (e.g. bug_fix, code_generation)
        #[arg(long = "type")]
        task_type: Option<String>,
    },
    /// Route and enqueue one task, then print the decision
    Enqueue {
        /// Task id; generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// The task prompt
        #[arg(long)]
        prompt: String,
        /// Optional file the task operates on
        #[arg(long)]
        file: Option<String>,
        /// Task type (e.g. bug_fix, code_generation)
        #[arg(long = "type")]
        task_type: Option<String>,
        /// Required capability ids
        #[arg(long = "require")]
        required: Vec<String>,
    },
    /// Print a health snapshot of the local store
    Health,
    /// Dead-letter queue operations
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
    /// Generate a 32-byte hex key for message encryption/signing
    Keygen,
}

#[derive(Subcommand)]
enum DlqAction {
    /// List dead letters for a queue
    List {
        /// Model whose DLQ to list (e.g. gpt-4o)
        model: String,
    },
    /// Requeue one dead letter by task id
    Requeue {
        /// Model whose DLQ holds the task
        model: String,
        /// The task id to requeue
        task_id: String,
    },
    /// Purge a queue's DLQ
    Purge {
        /// Model whose DLQ to purge
        model: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hive=info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("hive: {e}");
        std::process::exit(1);
    }
}

async fn run() -> HiveResult<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Route {
            prompt,
            file,
            task_type,
        } => {
            let task = build_task(None, prompt, file, task_type, Vec::new())?;
            let decision = TaskRouter::new().route(&task);
            print_decision(&decision);
            Ok(())
        }
        Commands::Enqueue {
            id,
            prompt,
            file,
            task_type,
            required,
        } => {
            let task = build_task(id, prompt, file, task_type, required)?;
            let orchestrator = build_orchestrator(&config).await?;
            let decision = orchestrator.submit(task).await?;
            print_decision(&decision);
            Ok(())
        }
        Commands::Health => {
            let orchestrator = build_orchestrator(&config).await?;
            let snapshot = orchestrator.health_snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Commands::Dlq { action } => {
            let orchestrator = build_orchestrator(&config).await?;
            match action {
                DlqAction::List { model } => {
                    let queue = ModelId::from_str(&model)?;
                    let dead = orchestrator.dead_letters(queue).await?;
                    println!("{}: {} dead letter(s)", queue.queue_name(), dead.len());
                    for dl in dead {
                        println!("  {}  {}  ({})", dl.task.id, dl.reason, dl.failed_at);
                    }
                    Ok(())
                }
                DlqAction::Requeue { model, task_id } => {
                    let queue = ModelId::from_str(&model)?;
                    orchestrator.requeue_dead_letter(queue, &task_id).await?;
                    println!("requeued '{task_id}' on {}", queue.queue_name());
                    Ok(())
                }
                DlqAction::Purge { model } => {
                    let queue = ModelId::from_str(&model)?;
                    let purged = orchestrator.purge_dead_letters(queue).await?;
                    println!("purged {purged} dead letter(s) from {}", queue.queue_name());
                    Ok(())
                }
            }
        }
        Commands::Keygen => {
            let mut key = [0u8; 32];
            rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut key);
            println!("{}", hex::encode(key));
            Ok(())
        }
    }
}

fn load_config(path: &PathBuf) -> HiveResult<HiveConfig> {
    let config = if path.exists() {
        let text = std::fs::read_to_string(path)?;
        HiveConfig::from_toml(&text)?
    } else {
        HiveConfig::default()
    };
    Ok(config.apply_env())
}

fn build_task(
    id: Option<String>,
    prompt: String,
    file: Option<String>,
    task_type: Option<String>,
    required: Vec<String>,
) -> HiveResult<Task> {
    let id = id.unwrap_or_else(|| format!("task-{}", uuid_suffix()));
    let mut task = Task::new(id, prompt).with_required_capabilities(required);
    if let Some(file) = file {
        task = task.with_file(file);
    }
    if let Some(name) = task_type {
        let parsed: TaskType = serde_json::from_value(serde_json::Value::String(name.clone()))
            .map_err(|_| HiveError::Config(format!("unknown task type '{name}'")))?;
        task = task.with_type(parsed);
    }
    Ok(task)
}

fn uuid_suffix() -> String {
    let mut bytes = [0u8; 4];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    hex::encode(bytes)
}

async fn serve(config: HiveConfig) -> HiveResult<()> {
    let orchestrator = build_orchestrator(&config).await?;
    let probe = Arc::new(BusProbe::new(
        orchestrator.bus().clone(),
        Duration::from_secs(5),
    ));
    let handles = orchestrator.run(Some(probe)).await?;
    info!(id = %orchestrator.id(), "Serving; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

async fn build_orchestrator(config: &HiveConfig) -> HiveResult<Arc<Orchestrator>> {
    if !config.store_url.starts_with("memory://") {
        return Err(HiveError::Config(format!(
            "no store connector for '{}'; implement QueueStore for your backend",
            config.store_url
        )));
    }
    let store = Arc::new(MemoryStore::new());
    let pool = Arc::new(StorePool::new(
        Arc::new(MemoryConnector::new(store.clone())),
        config.pool_size,
    ));
    let matcher = Arc::new(
        CapabilityMatcher::with_default_catalog(MatcherConfig {
            matching_threshold: config.matching_threshold,
            default_proficiency: config.default_proficiency,
            capability_timeout: Duration::from_secs(config.capability_timeout_secs),
        })
        .await,
    );
    let breakers = Arc::new(BreakerRegistry::new(BreakerPolicy {
        threshold: config.breaker_threshold,
        reset_timeout: Duration::from_secs(config.breaker_timeout_secs),
    }));
    let cipher = Arc::new(MessageCipher::new(
        config.message_key.as_deref(),
        config.signing_key.as_deref(),
    )?);
    let bus = Arc::new(MessageBus::new(store, cipher, breakers.clone(), "orchestrator"));

    Ok(Arc::new(Orchestrator::new(
        config.clone(),
        pool,
        matcher,
        Arc::new(TaskRouter::new()),
        breakers,
        bus,
    )))
}

fn print_decision(decision: &hive_router::RouteDecision) {
    println!("model:     {}", decision.model);
    println!("type:      {}", decision.task_type);
    println!("queue:     {}", decision.queue_name);
    println!("tier:      {}", decision.complexity);
    println!(
        "budget:    in={} out={}",
        decision.budget.input, decision.budget.output
    );
    println!("priority:  {}", decision.priority);
    println!("fallback:  {}", decision.fallback_model);
    println!("reasoning:");
    for line in &decision.reasoning {
        println!("  - {line}");
    }
}
