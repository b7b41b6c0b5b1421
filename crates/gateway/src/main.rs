use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use forge_domain::config::Config;
use forge_gateway::api;
use forge_gateway::bootstrap::build_app_state;

#[derive(Parser)]
#[command(name = "forge-sidecar", about = "Multi-tenant agent sidecar")]
struct Cli {
    /// Path to the YAML or JSON configuration file.
    #[arg(short, long, default_value = "forge.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP sidecar (the default).
    Serve,
    /// Validate the configuration file and exit.
    Validate,
    /// Internal: verifier worker process. Spawned by the pool, speaks
    /// framed JSON on stdin/stdout.
    #[command(hide = true)]
    VerifierWorker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            serve(Arc::new(config)).await
        }
        Some(Command::Validate) => {
            let config = load_config(&cli.config)?;
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            let failed = issues.iter().any(|i| {
                i.severity == forge_domain::config::ConfigSeverity::Error
            });
            if failed {
                std::process::exit(1);
            }
            println!("configuration ok");
            Ok(())
        }
        Some(Command::VerifierWorker) => {
            // No tracing init: stdout is the protocol channel.
            forge_verify::worker::run_worker().context("verifier worker loop")
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,forge_gateway=debug")),
        )
        .init();
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        Config::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        tracing::info!(path = %path.display(), "no config file; using defaults");
        Ok(Config::default())
    }
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    if !config.sidecar.enabled {
        anyhow::bail!("sidecar.enabled is false; nothing to do");
    }

    let state = build_app_state(config.clone()).await?;
    let app = api::router(state);

    let addr = format!("{}:{}", config.sidecar.host, config.sidecar.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "forge sidecar listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server loop")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
