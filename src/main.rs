//! stackup - converge a declared stack onto a control plane
//!
//! Usage:
//!   stackup plan                         → show what apply would do
//!   stackup apply --image web:1.4        → converge, publish, wait for health
//!   stackup apply -t registry.app        → converge one resource and its prerequisites
//!   stackup destroy                      → tear down in reverse order
//!   stackup status                       → recorded state per resource
//!   stackup config                       → print the effective configuration

mod config;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use config::StackupConfig;
use stackup_core::{ResourceId, Stack};
use stackup_engine::{
    CommandPublisher, DeploymentDriver, DeploymentResult, HttpProbe, LocalFsJournal, LocalFsStore,
    MemoryStore, NullJournal, RunJournal, StateStore,
};
use stackup_provider::{ClientRegistry, ControlPlane, HttpControlPlane, MemoryControlPlane};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "stackup",
    about = "Minimal deployment orchestrator: declared resources in, running service out",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Stack declaration (TOML)
    #[arg(short, long, global = true, default_value = "stack.toml")]
    file: PathBuf,

    /// stackup configuration (TOML)
    #[arg(short, long, global = true, default_value = "stackup.toml")]
    config: PathBuf,

    /// Write JSON logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved order and pending action per resource
    Plan {
        /// Limit to these resources and their prerequisites
        #[arg(short, long = "target")]
        targets: Vec<String>,
        /// Image reference to publish
        #[arg(long)]
        image: Option<String>,
        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Converge the stack and wait for services to become healthy
    Apply {
        #[arg(short, long = "target")]
        targets: Vec<String>,
        #[arg(long)]
        image: Option<String>,
    },
    /// Destroy every managed resource, dependents first
    Destroy,
    /// Show recorded state
    Status {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;
    let config = StackupConfig::load(&cli.config)?;

    match &cli.command {
        Commands::Config => {
            print!("{}", config.to_toml());
        }
        Commands::Plan {
            targets,
            image,
            json,
        } => {
            let driver = build_driver(&cli.file, &config)?;
            let targets = parse_targets(targets)?;
            let plan = driver
                .plan(targets.as_deref(), image.as_deref())
                .await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                for entry in &plan.entries {
                    println!("  {:<36} {}", entry.resource.address(), entry.action);
                }
                println!("\n{} to change, {} total", plan.mutations(), plan.entries.len());
            }
        }
        Commands::Apply { targets, image } => {
            let driver = build_driver(&cli.file, &config)?;
            let targets = parse_targets(targets)?;
            let cancel = cancel_on_ctrl_c();
            match driver
                .apply(targets.as_deref(), image.as_deref(), &cancel)
                .await
            {
                DeploymentResult::Deployed { endpoint, applied } => {
                    for (id, result) in &applied {
                        println!("  {:<36} {}", id.address(), result);
                    }
                    match endpoint {
                        Some(url) => println!("\nDeployed: {}", url),
                        None => println!("\nApplied {} resources", applied.len()),
                    }
                }
                DeploymentResult::Failed(failure) => {
                    if let Some(payload) = failure.payload() {
                        eprintln!("{}", payload);
                    }
                    return Err(anyhow!("{}", failure));
                }
            }
        }
        Commands::Destroy => {
            let driver = build_driver(&cli.file, &config)?;
            let done = driver.destroy().await.map_err(|f| anyhow!("{}", f))?;
            for (id, teardown) in &done {
                println!("  {:<36} {}", id.address(), teardown);
            }
        }
        Commands::Status { json } => {
            let driver = build_driver(&cli.file, &config)?;
            let entries = driver.status().await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for e in &entries {
                    let status = e
                        .status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".into());
                    let note = if e.declared { "" } else { "  (no longer declared)" };
                    println!(
                        "  {:<36} {:<10} {}{}",
                        e.resource.address(),
                        status,
                        e.outputs.get("url").map(String::as_str).unwrap_or(""),
                        note
                    );
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(
    log_file: Option<&Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stackup=info".into());
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return Ok(None);
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("--log-file needs a file name: {}", path.display()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .init();
    Ok(Some(guard))
}

fn parse_targets(raw: &[String]) -> anyhow::Result<Option<Vec<ResourceId>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.iter()
        .map(|t| ResourceId::parse(t).with_context(|| format!("bad target '{}'", t)))
        .collect::<anyhow::Result<Vec<_>>>()
        .map(Some)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("ctrl-c received, cancelling");
        trigger.cancel();
    });
    cancel
}

fn build_driver(stack_file: &Path, config: &StackupConfig) -> anyhow::Result<DeploymentDriver> {
    let stack = Stack::load(stack_file)
        .with_context(|| format!("loading stack from {}", stack_file.display()))?;

    let (api, store, journal): (Arc<dyn ControlPlane>, Arc<dyn StateStore>, Arc<dyn RunJournal>) =
        match &config.provider.endpoint {
            Some(endpoint) => {
                let mut api = HttpControlPlane::new(
                    endpoint.clone(),
                    Duration::from_secs(config.provider.request_timeout_secs),
                )?;
                match config.token() {
                    Some(token) => api = api.with_token(token),
                    None => warn!(
                        "{} is not set; calling the control plane without a token",
                        config.provider.token_env
                    ),
                }
                (
                    Arc::new(api),
                    Arc::new(LocalFsStore::new(&config.state.dir)),
                    Arc::new(LocalFsJournal::new(config.runs_dir())),
                )
            }
            None => {
                warn!("no provider endpoint configured; running against the in-process control plane, nothing leaves this process");
                (
                    Arc::new(MemoryControlPlane::new()),
                    Arc::new(MemoryStore::new()),
                    Arc::new(NullJournal),
                )
            }
        };

    let clients = Arc::new(ClientRegistry::standard(api, config.context.clone()));
    Ok(DeploymentDriver::new(
        stack,
        clients,
        store,
        journal,
        Arc::new(CommandPublisher::new(config.publisher.program.clone())),
        Arc::new(HttpProbe::new()),
    )
    .with_retry(config.retry.clone()))
}
