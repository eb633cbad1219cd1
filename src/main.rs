//! Mnemo CLI.
//!
//! Thin shell over the library: every command builds an [`Engine`] from the
//! config file and delegates. Long-running commands (`serve`, `watch`) also
//! start the background worker.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use mnemo::config;
use mnemo::engine::{Engine, QueryRequest};
use mnemo::migrate;
use mnemo::models::Entity;
use mnemo::server;
use mnemo::watcher;

#[derive(Parser)]
#[command(
    name = "mnemo",
    about = "Mnemo — a local-first semantic memory engine for code and developer notes",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/mnemo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database schemas
    Init,

    /// Ingest a file or directory
    Ingest {
        /// File or directory to ingest
        path: PathBuf,

        /// Project name (defaults to the directory name)
        #[arg(long)]
        project: Option<String>,

        /// Recurse into subdirectories
        #[arg(long)]
        recursive: bool,

        /// Enqueue a background job instead of ingesting inline
        #[arg(long)]
        enqueue: bool,
    },

    /// Query the memory and print the composed context
    Ask {
        /// Natural-language query
        query: String,

        /// Budget mode: light, auto, extra, or budget
        #[arg(long, default_value = "auto")]
        mode: String,

        /// Restrict to one project
        #[arg(long)]
        project: Option<String>,

        /// Candidate limit override
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Fetch an exact line range from an indexed file
    Fetch {
        file_path: String,
        start_line: i64,
        end_line: i64,

        /// Stored content hash for staleness detection
        #[arg(long)]
        hash: Option<String>,
    },

    /// Start the HTTP API server (with the background worker)
    Serve {
        /// Also watch a directory for changes
        #[arg(long)]
        watch: Option<PathBuf>,
    },

    /// Watch a directory and ingest changes via the job queue
    Watch {
        path: PathBuf,

        #[arg(long)]
        project: Option<String>,
    },

    /// Inspect and manage background jobs
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Inspect and manage temporal decisions
    Decisions {
        #[command(subcommand)]
        action: DecisionsAction,
    },

    /// Show database statistics
    Stats,

    /// Show the savings ledger summary
    Savings,

    /// Wipe the stores and replay the archive log
    Rebuild,
}

#[derive(Subcommand)]
enum JobsAction {
    /// List recent jobs
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show one job
    Show { id: String },
    /// Cancel a pending or running job
    Cancel { id: String },
    /// Queue metrics
    Stats,
    /// Delete terminal jobs older than N days
    Cleanup {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum DecisionsAction {
    /// Decisions active on a date (default: today)
    Active {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        project: Option<String>,
    },
    /// List decisions
    List {
        /// Include superseded decisions
        #[arg(long)]
        all: bool,
        #[arg(long)]
        project: Option<String>,
    },
    /// Full supersession chain of a decision
    History { id: i64 },
    /// Close a decision today and open its successor
    Supersede {
        id: i64,
        text: String,
        #[arg(long)]
        valid_from: Option<NaiveDate>,
    },
    /// Update a decision's temporal fields
    Ratify {
        id: i64,
        #[arg(long)]
        valid_from: Option<NaiveDate>,
        #[arg(long)]
        valid_to: Option<NaiveDate>,
        #[arg(long)]
        superseded_by: Option<i64>,
    },
    /// Graphviz DOT export of the supersession graph
    Graph {
        #[arg(long)]
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mnemo=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Data directory initialized at {}", cfg.data.root.display());
        }

        Commands::Ingest {
            path,
            project,
            recursive,
            enqueue,
        } => {
            let engine = Engine::new(cfg).await?;
            if enqueue {
                let id = engine
                    .submit_ingest(&path, project.as_deref(), recursive, 5)
                    .await?;
                println!("enqueued ingest job {}", id);
            } else {
                let stats = engine
                    .ingestor
                    .run(&path, project.as_deref(), recursive)
                    .await?;
                println!("ingest {}", path.display());
                println!("  files processed: {}", stats.files_processed);
                println!("  files skipped:   {}", stats.files_skipped);
                println!("  chunks indexed:  {}", stats.chunks_indexed);
                println!("  entities found:  {}", stats.entities_extracted);
                println!("ok");
            }
        }

        Commands::Ask {
            query,
            mode,
            project,
            limit,
        } => {
            let engine = Engine::new(cfg).await?;
            engine.warmup().await?;
            let response = engine
                .query(QueryRequest {
                    text: query,
                    mode,
                    limit,
                    project,
                    cursor_context: None,
                    current_file_path: None,
                    stack_trace: None,
                    budget_tokens: None,
                })
                .await;

            if response.context.is_empty() {
                println!("{}", response.message);
            } else {
                println!("{}", response.context);
            }
            println!();
            println!("{}", response.efficiency_report.render());
            println!(
                "[{} | {} items | {} tokens | {} ms | {}]",
                response.response_type,
                response.stats.items_count,
                response.stats.used_tokens,
                response.stats.used_latency_ms,
                response.stats.search_method
            );
        }

        Commands::Fetch {
            file_path,
            start_line,
            end_line,
            hash,
        } => {
            let engine = Engine::new(cfg).await?;
            match engine.fetch_exact(file_path, start_line, end_line, hash).await {
                Ok(result) => {
                    if let Some(warning) = &result.warning {
                        eprintln!("warning: {}", warning);
                    }
                    println!("{}", result.content);
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Serve { watch } => {
            let engine = Arc::new(Engine::new(cfg).await?);
            engine.spawn_warmup();

            let mut worker = engine.build_worker();
            worker.start();

            if let Some(watch_path) = watch {
                let queue = engine.queue.clone();
                let opts = watcher::WatchOptions::new(
                    "default",
                    engine.config.watcher.debounce_secs,
                    engine.config.watcher.max_batch_size,
                    engine.config.ingest.extensions.clone(),
                );
                let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
                tokio::spawn(async move {
                    if let Err(e) =
                        watcher::run_watcher(&watch_path, true, queue, opts, shutdown_rx).await
                    {
                        tracing::error!("watcher exited: {}", e);
                    }
                });
            }

            server::run_server(engine).await?;
            worker.stop().await;
        }

        Commands::Watch { path, project } => {
            let engine = Arc::new(Engine::new(cfg).await?);
            let mut worker = engine.build_worker();
            worker.start();

            let project = project.unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "default".to_string())
            });
            let opts = watcher::WatchOptions::new(
                &project,
                engine.config.watcher.debounce_secs,
                engine.config.watcher.max_batch_size,
                engine.config.ingest.extensions.clone(),
            );
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

            let queue = engine.queue.clone();
            let watch_path = path.clone();
            let watch_task = tokio::spawn(async move {
                watcher::run_watcher(&watch_path, true, queue, opts, shutdown_rx).await
            });

            println!("watching {} (ctrl-c to stop)", path.display());
            tokio::signal::ctrl_c().await?;
            let _ = shutdown_tx.send(true);
            let _ = watch_task.await;
            worker.stop().await;
        }

        Commands::Jobs { action } => {
            let engine = Engine::new(cfg).await?;
            match action {
                JobsAction::List { limit } => {
                    let jobs = engine.queue.list(limit).await?;
                    if jobs.is_empty() {
                        println!("No jobs.");
                    }
                    for job in jobs {
                        println!(
                            "{}  {:<12} {:<9} {:>3}%  {}",
                            job.id, job.job_type, job.status.as_str(), job.progress, job.created_at
                        );
                    }
                }
                JobsAction::Show { id } => match engine.queue.get(&id).await? {
                    Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                    None => {
                        eprintln!("Error: job not found: {}", id);
                        std::process::exit(1);
                    }
                },
                JobsAction::Cancel { id } => {
                    if engine.queue.cancel(&id).await? {
                        println!("cancelled {}", id);
                    } else {
                        eprintln!("Error: job not cancellable: {}", id);
                        std::process::exit(1);
                    }
                }
                JobsAction::Stats => {
                    let stats = engine.queue.stats().await?;
                    println!("Jobs: {}", stats.total);
                    for (status, count) in &stats.counts_by_status {
                        println!("  {:<10} {}", status, count);
                    }
                    println!("  success rate: {:.1}%", stats.success_rate);
                    println!("  avg latency:  {:.2}s", stats.avg_latency_seconds);
                }
                JobsAction::Cleanup { days } => {
                    let removed = engine.queue.cleanup_old(days).await?;
                    println!("removed {} terminal jobs older than {} days", removed, days);
                }
            }
        }

        Commands::Decisions { action } => {
            let engine = Engine::new(cfg).await?;
            match action {
                DecisionsAction::Active { date, project } => {
                    let date = date.unwrap_or_else(|| engine.now_date());
                    let decisions = engine
                        .metadata
                        .get_active_decisions(date, project.as_deref())
                        .await?;
                    print_decisions(&decisions);
                }
                DecisionsAction::List { all, project } => {
                    let decisions = engine.metadata.list_decisions(project.as_deref(), all).await?;
                    print_decisions(&decisions);
                }
                DecisionsAction::History { id } => {
                    let chain = engine.get_decision_history(id).await?;
                    if chain.is_empty() {
                        println!("No decision with id {}.", id);
                    }
                    for (i, d) in chain.iter().enumerate() {
                        let marker = if d.superseded_by.is_some() { "superseded" } else { "active" };
                        println!("{}. #{} [{}] {}", i + 1, d.id, marker, d.content);
                    }
                }
                DecisionsAction::Supersede { id, text, valid_from } => {
                    let outcome = engine.supersede_decision(id, &text, valid_from).await?;
                    println!(
                        "decision #{} closed on {}, superseded by #{}",
                        outcome.old_id, outcome.closed_on, outcome.new_id
                    );
                }
                DecisionsAction::Ratify {
                    id,
                    valid_from,
                    valid_to,
                    superseded_by,
                } => {
                    if engine
                        .ratify_decision(id, valid_from, valid_to, superseded_by)
                        .await?
                    {
                        println!("decision #{} updated", id);
                    } else {
                        eprintln!("Error: decision not found: {}", id);
                        std::process::exit(1);
                    }
                }
                DecisionsAction::Graph { project } => {
                    let decisions = engine.metadata.list_decisions(project.as_deref(), true).await?;
                    println!("{}", render_decision_graph_dot(&decisions));
                }
            }
        }

        Commands::Stats => {
            let engine = Engine::new(cfg).await?;
            let stats = engine.stats().await?;
            println!("Mnemo — Database Stats");
            println!("======================");
            println!();
            println!("  Files:    {}", stats.files);
            println!("  Chunks:   {}", stats.fts_rows);
            println!("  Entities: {}", stats.entities);
            println!("  Vectors:  {}", stats.vectors);
            if !stats.projects.is_empty() {
                println!();
                println!("  {:<24} {:>6} {:>9}", "PROJECT", "FILES", "ENTITIES");
                println!("  {}", "-".repeat(42));
                for (project, files, entities) in &stats.projects {
                    println!("  {:<24} {:>6} {:>9}", project, files, entities);
                }
            }
        }

        Commands::Savings => {
            let engine = Engine::new(cfg).await?;
            let (queries, potential, actual, saved, usd) = engine.metadata.savings_summary().await?;
            println!("Savings Ledger");
            println!("==============");
            println!("  queries:          {}", queries);
            println!("  potential tokens: {}", potential);
            println!("  actual tokens:    {}", actual);
            println!("  saved tokens:     {}", saved);
            println!("  estimated saved:  ${:.6}", usd);
        }

        Commands::Rebuild => {
            let engine = Engine::new(cfg).await?;
            let stats = engine.rebuild_from_archive().await?;
            println!("rebuild complete");
            println!("  files:    {}", stats.files);
            println!("  chunks:   {}", stats.fts_rows);
            println!("  entities: {}", stats.entities);
            println!("  vectors:  {}", stats.vectors);
        }
    }

    Ok(())
}

fn print_decisions(decisions: &[Entity]) {
    if decisions.is_empty() {
        println!("No decisions.");
        return;
    }
    for d in decisions {
        let window = match (d.valid_from, d.valid_to) {
            (Some(from), Some(to)) => format!(" [{} -> {}]", from, to),
            (Some(from), None) => format!(" [{} ->]", from),
            (None, Some(to)) => format!(" [-> {}]", to),
            (None, None) => String::new(),
        };
        let marker = if d.superseded_by.is_some() {
            format!(" (superseded by #{})", d.superseded_by.unwrap())
        } else {
            String::new()
        };
        println!("#{} {}{}{}", d.id, d.content, window, marker);
    }
}

/// Graphviz DOT rendering of the decision supersession graph, one cluster
/// per project.
fn render_decision_graph_dot(decisions: &[Entity]) -> String {
    let mut lines = vec![
        "digraph decisions {".to_string(),
        "  rankdir=LR;".to_string(),
        "  node [shape=box style=\"rounded,filled\"];".to_string(),
    ];

    let mut projects: Vec<&str> = decisions.iter().map(|d| d.project.as_str()).collect();
    projects.sort();
    projects.dedup();

    for project in projects {
        let safe = project.replace(['-', ' ', '.'], "_");
        lines.push(format!("  subgraph cluster_{} {{", safe));
        lines.push(format!("    label = \"{}\";", project));

        for d in decisions.iter().filter(|d| d.project == project) {
            let color = if d.superseded_by.is_some() {
                "#ffcccc"
            } else {
                "#ccffcc"
            };
            let label: String = d.content.chars().take(40).collect::<String>().replace('"', "'");
            lines.push(format!(
                "    d{} [label=\"#{}\\n{}\" fillcolor=\"{}\"];",
                d.id, d.id, label, color
            ));
            if let Some(next) = d.superseded_by {
                lines.push(format!(
                    "    d{} -> d{} [style=dashed label=\"superseded by\"];",
                    d.id, next
                ));
            }
        }
        lines.push("  }".to_string());
    }

    lines.push("}".to_string());
    lines.join("\n")
}
