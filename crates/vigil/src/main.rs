mod cli;
mod error;
mod feed;

use std::io::IsTerminal;

use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use vigil_config::{Config, LogFormat, LoggingSection};
use vigil_core::{Engine, SupervisionEvent};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::DaemonError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match load(&cli.global) {
        Ok(config) => {
            init_tracing(&cli.global, &config.logging);
            run(cli.command.unwrap_or_default(), config).await
        }
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn load(global: &GlobalOpts) -> Result<Config, DaemonError> {
    vigil_config::load_config(global.config.as_deref()).map_err(|source| DaemonError::Config {
        path: global
            .config
            .clone()
            .unwrap_or_else(vigil_config::config_path)
            .display()
            .to_string(),
        source,
    })
}

/// `RUST_LOG` wins, then `-v`, then `[logging] level`.
fn init_tracing(global: &GlobalOpts, logging: &LoggingSection) {
    let level = match global.verbose {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if global.log_json || logging.format == LogFormat::Json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

async fn run(command: Command, config: Config) -> Result<(), DaemonError> {
    match command {
        Command::PrintConfig => {
            print!("{}", config.to_toml_string().map_err(DaemonError::Render)?);
            Ok(())
        }
        Command::Check => {
            let engine = build_engine(&config)?;
            let applied = config
                .apply_topology(&engine)
                .map_err(|source| DaemonError::Topology { source })?;
            println!("configuration OK ({applied} topology definitions)");
            Ok(())
        }
        Command::Run => serve(config, false).await,
        Command::Stdin => serve(config, true).await,
    }
}

fn build_engine(config: &Config) -> Result<Engine, DaemonError> {
    let engine_config = config.engine_config().map_err(|source| DaemonError::Config {
        path: "engine configuration".into(),
        source,
    })?;
    Ok(Engine::new(engine_config)?)
}

async fn serve(config: Config, read_stdin: bool) -> Result<(), DaemonError> {
    let engine = build_engine(&config)?;
    let applied = config
        .apply_topology(&engine)
        .map_err(|source| DaemonError::Topology { source })?;
    info!(applied, "topology configured");

    let events = engine.subscribe_supervision();
    engine.start().await?;
    let logger = tokio::spawn(log_supervision(events));

    if read_stdin {
        let ingest = engine.ingest()?;
        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            feed::feed_lines(stdin, ingest).await;
        });
    }

    tokio::signal::ctrl_c().await.map_err(DaemonError::Signal)?;
    info!("shutdown requested");

    engine.shutdown().await;
    logger.abort();
    Ok(())
}

async fn log_supervision(mut events: broadcast::Receiver<SupervisionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) if event.status.invalidates_tags() => warn!(
                kind = %event.kind,
                entity_id = %event.entity_id,
                status = %event.status,
                "{}",
                event.message
            ),
            Ok(event) => info!(
                kind = %event.kind,
                entity_id = %event.entity_id,
                status = %event.status,
                "{}",
                event.message
            ),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "supervision event log fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("supervision event log stopped");
}
