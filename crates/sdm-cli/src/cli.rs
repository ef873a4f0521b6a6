use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sdm_core::config;
use sdm_core::events::{EventBus, Topic};
use sdm_core::queue::QueueManager;

/// Top-level CLI for the sdm download manager.
#[derive(Debug, Parser)]
#[command(name = "sdm")]
#[command(about = "sdm: segmented download manager with a durable priority queue", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a download task to the queue.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,

        /// Destination file path.
        destination: String,

        /// Task priority, 1-10 (higher runs sooner).
        #[arg(long, default_value_t = 5)]
        priority: u8,

        /// Expected SHA-256 of the finished file (hex).
        #[arg(long)]
        sha256: Option<String>,
    },

    /// Run the scheduler until the queue drains.
    Run,

    /// Show status of all queued tasks.
    Status,

    /// Pause a task by id.
    Pause {
        /// Task identifier.
        id: String,
    },

    /// Resume a paused task by id.
    Resume {
        /// Task identifier.
        id: String,
    },

    /// Cancel a task by id.
    Cancel {
        /// Task identifier.
        id: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let mut cfg = config::load_or_init()?;
        // The CLI always operates on the durable queue file so tasks survive
        // between invocations.
        cfg.persist_queue = true;
        tracing::debug!("loaded config: {:?}", cfg);

        let bus = Arc::new(EventBus::new());
        let queue = QueueManager::new(cfg, Arc::clone(&bus))
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("open queue")?;

        match cli.command {
            CliCommand::Add {
                url,
                destination,
                priority,
                sha256,
            } => {
                let task_id = next_task_id(&queue);
                let mut options = BTreeMap::new();
                if let Some(digest) = sha256 {
                    options.insert(
                        "expected_sha256".to_string(),
                        serde_json::Value::String(digest),
                    );
                }
                let added = queue
                    .enqueue(&task_id, &url, &destination, priority, options)
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                if added {
                    println!("Added task {task_id} for {url}");
                } else {
                    println!("Task {task_id} already queued");
                }
            }
            CliCommand::Run => {
                bus.subscribe(|topic, payload| {
                    if topic == Topic::TaskUpdated {
                        let id = payload["task_id"].as_str().unwrap_or("?");
                        let state = payload["state"].as_str().unwrap_or("?");
                        let done = payload["bytes_downloaded"].as_u64().unwrap_or(0);
                        let total = payload["bytes_total"].as_u64().unwrap_or(0);
                        if total > 0 {
                            eprintln!("{id}: {state} {done}/{total}");
                        } else {
                            eprintln!("{id}: {state}");
                        }
                    }
                });
                let scheduler = queue.start();
                queue.wait_until_idle().await;
                queue.shutdown();
                scheduler.await.ok();

                let mut completed = 0usize;
                let mut failed = 0usize;
                for entry in queue.history() {
                    match entry.state.as_str() {
                        "COMPLETED" => completed += 1,
                        "FAILED" => failed += 1,
                        _ => {}
                    }
                }
                println!("Run finished: {completed} completed, {failed} failed");
            }
            CliCommand::Status => {
                let mut snapshots = queue.snapshots();
                if snapshots.is_empty() {
                    println!("No tasks in queue.");
                } else {
                    snapshots.sort_by(|a, b| a.task_id.cmp(&b.task_id));
                    println!(
                        "{:<14} {:<12} {:>4} {:>12} {}",
                        "ID", "STATE", "PRI", "BYTES", "ERROR"
                    );
                    for s in snapshots {
                        println!(
                            "{:<14} {:<12} {:>4} {:>12} {}",
                            s.task_id, s.state, s.priority, s.bytes_downloaded, s.last_error
                        );
                    }
                }
            }
            CliCommand::Pause { id } => {
                if queue.pause(&id) {
                    println!("Paused {id}");
                } else {
                    println!("Cannot pause {id}");
                }
            }
            CliCommand::Resume { id } => {
                if queue.resume(&id) {
                    println!("Resumed {id}");
                } else {
                    println!("Cannot resume {id}");
                }
            }
            CliCommand::Cancel { id } => {
                if queue.cancel(&id) {
                    println!("Cancelled {id}");
                } else {
                    println!("Cannot cancel {id}");
                }
            }
        }

        Ok(())
    }
}

/// Next free `task-N` id given what the queue already holds.
fn next_task_id(queue: &QueueManager) -> String {
    let used: std::collections::HashSet<String> = queue
        .snapshots()
        .into_iter()
        .map(|s| s.task_id)
        .chain(queue.history().into_iter().map(|s| s.task_id))
        .collect();
    (1..)
        .map(|n| format!("task-{n}"))
        .find(|id| !used.contains(id))
        .expect("unbounded id space")
}
