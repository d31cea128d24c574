//! Squall CLI: telemetry router daemon.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use squall::config::Config;
use squall::manager::{Manager, ManagerOptions};
use squall::plugins::Registry;

/// Squall - pluggable telemetry router
#[derive(Parser, Debug)]
#[command(name = "squall")]
#[command(about = "Routes wire telemetry through handler plugins to sink applications")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/squall.conf.yaml")]
    config: PathBuf,
}

fn init_tracing(config: &Config) {
    // RUST_LOG overrides the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_directive()));

    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed loading configuration {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config);
    info!(
        plugin_dir = %config.plugin_dir.display(),
        "plugins are statically linked; pluginDir is informational"
    );

    let mut manager = Manager::new(
        Registry::builtin(),
        ManagerOptions {
            block_event_bus: config.block_event_bus,
            handler_error_capacity: config.handler_errors,
            ..Default::default()
        },
    );

    for transport in &config.transports {
        if let Err(e) = manager.init_transport(&transport.name, transport.config.clone()) {
            error!(transport = %transport.name, error = %e, "failed configuring transport");
            continue;
        }
        if let Err(e) = manager.set_transport_handlers(&transport.name, &transport.handlers) {
            error!(transport = %transport.name, error = %e, "transport handlers failed to load");
            continue;
        }
        info!(transport = %transport.name, "loaded transport");
    }

    if manager.transport_count() == 0 {
        error!("no transport survived initialization, nothing to ingest");
        return ExitCode::FAILURE;
    }

    for application in &config.applications {
        match manager.init_application(&application.name, application.config.clone()) {
            Ok(()) => info!(application = %application.name, "loaded application plugin"),
            Err(e) if e.is_not_receiver() => {
                warn!(application = %application.name, "{e}");
            }
            Err(e) => {
                error!(application = %application.name, error = %e, "failed configuring application");
            }
        }
    }

    // Surface handler decode failures; without this drain the bounded
    // channel fills up and further errors are dropped.
    if let Some(mut failures) = manager.take_handler_failures() {
        tokio::spawn(async move {
            while let Some(failure) = failures.recv().await {
                warn!(
                    handler = %failure.handler,
                    error = %failure.error,
                    "handler failed to decode frame"
                );
            }
        });
    }

    manager.run_transports();
    manager.run_applications();
    manager.run_until_shutdown().await;

    ExitCode::SUCCESS
}
