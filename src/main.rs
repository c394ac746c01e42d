use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowhost_agent::{validate_dir, validate_file, DefinitionStore, Runtime, ValidationReport};
use flowhost_core::config::AppConfig;
use flowhost_core::types::FlowEvent;

#[derive(Parser)]
#[command(name = "flowhost", version, about = "Hosted runtime for declarative agents and their flows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowhost.toml")]
    config: PathBuf,

    /// Debug logging (RUST_LOG still wins when set)
    #[arg(short, long)]
    verbose: bool,

    /// Print flow events to stderr while running
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent on a single query and exit
    Run {
        agent_id: String,
        /// The query; read from stdin when omitted
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
        /// Chat session to continue
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Validate a definition file or a directory of definitions
    Validate {
        /// Defaults to the configured agents directory
        path: Option<PathBuf>,
    },
    /// List agent definitions and their validation status
    List,
    /// Start the HTTP gateway
    Serve,
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Some(AppConfig::load(&cli.config)?)
    } else {
        None
    };
    init_tracing(config.as_ref(), cli.verbose);
    let config = config.unwrap_or_else(|| {
        warn!(path = %cli.config.display(), "No config file found, using defaults");
        AppConfig::default()
    });

    let store = Arc::new(DefinitionStore::new(config.agents_dir()));

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { path } => {
            let path = path.unwrap_or_else(|| config.agents_dir());
            let report = validate_path(&path).await?;
            print_report(&report);
            if !report.is_clean() {
                anyhow::bail!("{} invalid definition(s)", report.invalid.len());
            }
        }
        Commands::List => {
            let listed = store.list().await?;
            if listed.is_empty() {
                println!("No agent definitions in {}", store.dir().display());
            }
            for status in listed {
                if !status.valid {
                    println!("  ✗ {} ({})", status.id, status.error.unwrap_or_default());
                    continue;
                }
                let def = store.get(&status.id).await?;
                let summary = def.persona_summary();
                let mode = if def.flow_template.is_some() { "flow" } else { "single-shot" };
                println!("  ✓ {} [{}, {}] {}", status.id, def.model, mode, summary);
            }
        }
        Commands::Run {
            agent_id,
            query,
            session,
        } => {
            let text = if query.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                query.join(" ")
            };
            if text.trim().is_empty() {
                anyhow::bail!("empty query");
            }

            let runtime = Runtime::builder(config, store).build();
            let printer = cli.trace.then(|| spawn_event_printer(&runtime));

            let result = runtime.query(&agent_id, &text, session.as_deref()).await;
            if let Some(printer) = printer {
                printer.abort();
            }

            match result {
                Ok(outcome) => {
                    println!("{}", outcome.response);
                    info!(
                        session_id = %outcome.session_id,
                        execution_time = outcome.execution_time,
                        "Query complete"
                    );
                }
                Err(e) => {
                    let node = e.failed_node().map(|n| format!(" at node '{n}'")).unwrap_or_default();
                    anyhow::bail!("[{}]{node}: {e}", e.kind());
                }
            }
        }
        Commands::Serve => {
            let gateway_config = config.gateway.clone().unwrap_or_default();
            let runtime = Runtime::builder(config, store.clone()).build();
            if cli.trace {
                spawn_event_printer(&runtime);
            }
            let server = flowhost_gateway::GatewayServer::new(gateway_config, runtime, store);
            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
    }

    Ok(())
}

fn init_tracing(config: Option<&AppConfig>, verbose: bool) {
    let default_level = match (verbose, config) {
        (true, _) => "debug".to_string(),
        (false, Some(c)) => c.log.level.clone(),
        (false, None) => "info".to_string(),
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("flowhost={default_level},warn")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    if config.is_some_and(|c| c.log.json) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn validate_path(path: &Path) -> flowhost_core::error::Result<ValidationReport> {
    if path.is_file() {
        let mut report = ValidationReport::default();
        match validate_file(path).await {
            Ok((id, _)) => report.valid.push(id),
            Err(e) => report.invalid.push((path.display().to_string(), e.to_string())),
        }
        Ok(report)
    } else {
        validate_dir(path).await
    }
}

fn print_report(report: &ValidationReport) {
    for id in &report.valid {
        println!("  ✓ {id}");
    }
    for (id, error) in &report.invalid {
        println!("  ✗ {id}: {error}");
    }
    println!(
        "{} valid, {} invalid",
        report.valid.len(),
        report.invalid.len()
    );
}

fn spawn_event_printer(runtime: &Runtime) -> tokio::task::JoinHandle<()> {
    let mut rx = runtime.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            eprintln!("{}", format_event(&event));
        }
    })
}

fn format_event(event: &FlowEvent) -> String {
    match event {
        FlowEvent::RunStarted { agent_id, depth } => format!("[{agent_id}] run started (depth {depth})"),
        FlowEvent::NodeStarted { agent_id, node, index } => format!("[{agent_id}] -> {node} (#{index})"),
        FlowEvent::NodeCompleted {
            agent_id,
            node,
            step_index,
            elapsed_ms,
        } => format!("[{agent_id}] <- {node} steps[{step_index}] {elapsed_ms}ms"),
        FlowEvent::ConditionEvaluated {
            agent_id,
            node,
            verdict,
            target,
        } => format!("[{agent_id}] {node}: {verdict} => {target}"),
        FlowEvent::Delegated { from, to, depth } => format!("[{from}] delegating to {to} (depth {depth})"),
        FlowEvent::RunCompleted {
            agent_id,
            steps,
            elapsed_ms,
        } => format!("[{agent_id}] done, {steps} step(s) in {elapsed_ms}ms"),
        FlowEvent::RunFailed {
            agent_id,
            node,
            kind,
            error,
        } => match node {
            Some(node) => format!("[{agent_id}] FAILED at {node} ({kind}): {error}"),
            None => format!("[{agent_id}] FAILED ({kind}): {error}"),
        },
    }
}
