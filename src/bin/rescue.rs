//! rescue CLI: operator interface to a task queue.
//!
//! Without `RESCUE_DATABASE` every command runs against a throwaway
//! in-memory queue, which is only useful for `serve`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rescue::config::Config;
use rescue::matcher::{self, Labels};
use rescue::control::{ControlConfig, ControlPlane};
use rescue::task::{Core, Cron, Gate, Meta, Method, Node, ObjectId, Task};
use rescue::telemetry::{TelemetryConfig, init_telemetry};
use rescue::{Engine, Error};

#[derive(Parser)]
#[command(name = "rescue", about = "Distributed task queue")]
struct Cli {
    /// TOML config file. Environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run lease expiry and cron emission until interrupted
    Serve {
        /// Milliseconds between maintenance rounds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Create a task
    Create {
        /// Metadata labels as key=value
        #[arg(required = true, value_parser = parse_label)]
        meta: Vec<(String, String)>,
        /// Recurring cron template, e.g. "6 hours"
        #[arg(long)]
        every: Option<String>,
        /// One-shot template emitted this long from now
        #[arg(long)]
        defer: Option<String>,
        /// Delivery method: any, uni or all
        #[arg(long, default_value = "any")]
        method: Method,
        /// Target worker for uni delivery
        #[arg(long)]
        worker: Option<String>,
        /// Gate slots; waiting on a template, addressed on a trigger
        #[arg(long)]
        gate: Vec<String>,
        /// Make the gate a trigger instead of a template
        #[arg(long, requires = "gate")]
        trigger: bool,
        /// Stop scheduling after this many lost leases
        #[arg(long)]
        cancel: Option<u32>,
    },
    /// Claim the next task for this worker
    Search,
    /// Remove a task regardless of who holds it
    Delete { object: i64 },
    /// List tasks whose metadata contains the given labels
    List {
        #[arg(value_parser = parse_label)]
        meta: Vec<(String, String)>,
        /// Match tasks carrying any one of the labels instead of all
        #[arg(long)]
        any: bool,
    },
    /// Reclaim expired leases once
    Expire,
    /// Advance cron templates once
    Ticker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "rescue".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let engine = Arc::new(Engine::from_config(&config)?);

    match cli.command {
        Command::Serve { interval_ms } => cmd_serve(engine, interval_ms).await,
        Command::Create {
            meta,
            every,
            defer,
            method,
            worker,
            gate,
            trigger,
            cancel,
        } => {
            let mut task = Task::new().meta(meta.into_iter().collect::<Meta>());
            task = task.node(match method {
                Method::Uni => Node::uni(worker.unwrap_or_default()),
                Method::All => Node::all(),
                Method::Any => Node::any(),
            });
            if let Some(every) = every {
                task = task.cron(Cron::every(every));
            }
            if let Some(defer) = defer {
                task = task.cron(Cron::defer(defer));
            }
            if !gate.is_empty() {
                task = task.gate(if trigger {
                    Gate::trigger(gate)
                } else {
                    Gate::waiting(gate)
                });
            }
            if let Some(cancel) = cancel {
                task = task.core(Core::cancel(cancel));
            }
            let created = engine.create(task)?;
            println!("{}", serde_json::to_string_pretty(&created)?);
            Ok(())
        }
        Command::Search => match engine.search() {
            Ok(task) => {
                println!("{}", serde_json::to_string_pretty(&task)?);
                Ok(())
            }
            Err(e) if e.is_task_not_found() => {
                println!("No task available.");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Command::Delete { object } => {
            let core = Core {
                bypass: true,
                ..Core::object(ObjectId(object))
            };
            engine.delete(&Task::new().core(core))?;
            println!("Deleted: {object}");
            Ok(())
        }
        Command::List { meta, any } => {
            let selectors: Vec<Labels> = meta
                .into_iter()
                .map(|(k, v)| Labels::from([(k, v)]))
                .collect();
            let tasks: Vec<Task> = engine
                .lister(&Task::new().meta(Meta::new().with("*", "*")))?
                .into_iter()
                .filter(|t| {
                    let Some(labels) = t.meta.as_ref().map(|m| m.labels()) else {
                        return false;
                    };
                    if selectors.is_empty() {
                        true
                    } else if any {
                        matcher::any(labels, &selectors)
                    } else {
                        matcher::all(labels, &selectors)
                    }
                })
                .collect();
            if tasks.is_empty() {
                println!("No tasks found.");
                return Ok(());
            }
            println!("{:<20}  {:<6}  {:<10}  META", "OBJECT", "METHOD", "WORKER");
            println!("{}", "-".repeat(72));
            for t in &tasks {
                let object = t.object().map(|o| o.to_string()).unwrap_or_default();
                let meta = t
                    .meta
                    .as_ref()
                    .map(|m| {
                        m.iter()
                            .map(|(k, v)| format!("{k}={v}"))
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .unwrap_or_default();
                println!(
                    "{:<20}  {:<6}  {:<10}  {}",
                    object,
                    t.method(),
                    t.worker().unwrap_or("-"),
                    meta
                );
            }
            println!("\n{} task(s)", tasks.len());
            Ok(())
        }
        Command::Expire => match engine.expire() {
            Err(Error::TaskNotRevoked(deviation)) => {
                println!("Fairness not restored: {deviation}");
                Ok(())
            }
            other => Ok(other?),
        },
        Command::Ticker => Ok(engine.ticker()?),
    }
}

async fn cmd_serve(engine: Arc<Engine>, interval_ms: u64) -> anyhow::Result<()> {
    let control = ControlPlane::new(
        engine,
        ControlConfig {
            poll_interval: Duration::from_millis(interval_ms),
        },
    );

    let ctrl = control.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    control.run().await?;
    Ok(())
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}
