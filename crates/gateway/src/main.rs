use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dr_checkpoint::FsCheckpointStore;
use dr_context::FileFetcher;
use dr_domain::config::Config;
use dr_gateway::api;
use dr_gateway::cli::{Cli, Command, ConfigCommand};
use dr_gateway::runtime::{
    resume_interrupted_tasks, ControlMap, HttpEmitter, NullEmitter, ProgressEmitter,
    ToolFileFetcher, UnconfiguredExecutor,
};
use dr_gateway::state::AppState;
use dr_providers::ModelCatalog;
use dr_tools::{ToolExecutor, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = dr_gateway::cli::load_config(&cli.config)?;
            config.validate()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            if !dr_gateway::cli::validate(&cli.config)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => dr_gateway::cli::show(&cli.config),
        Some(Command::Version) => {
            println!("drover {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let catalog = Arc::new(ModelCatalog::from_config(&config.models));
    let registry = Arc::new(ToolRegistry::from_config(&config.tools));
    let store = Arc::new(FsCheckpointStore::new(Path::new(
        &config.checkpoints.state_dir,
    ))?);

    let emitter: Arc<dyn ProgressEmitter> = match &config.emitter.webhook_url {
        Some(url) => Arc::new(HttpEmitter::new(url)),
        None => Arc::new(NullEmitter),
    };
    let executor: Arc<dyn ToolExecutor> = Arc::new(UnconfiguredExecutor);
    let fetcher: Arc<dyn FileFetcher> = Arc::new(ToolFileFetcher::new(executor.clone()));

    let app = AppState {
        config: config.clone(),
        catalog,
        registry,
        store,
        emitter,
        executor,
        fetcher,
        controls: Arc::new(ControlMap::new()),
    };

    // Pick interrupted tasks back up before accepting new work.
    resume_interrupted_tasks(app.clone()).await;

    let router = api::router(app).layer(tower_http::trace::TraceLayer::new_for_http());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "drover listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received; running tasks keep their checkpoints");
}
