//! `goblin` binary: parses the CLI, loads config, and runs the gateway
//! until a shutdown signal arrives (spec §6).

mod cli;
mod signals;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Command};
use goblin_gateway::config::{Config, ConfigError};
use goblin_gateway::engine::Engine;
use tracing::{error, info};

/// Exit codes per spec §6: 0 success, 1 unexpected, 2 bad args, 3 config
/// error, 4 connection error, 7 not found.
mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const UNEXPECTED: u8 = 1;
    pub const BAD_ARGS: u8 = 2;
    pub const CONFIG_ERROR: u8 = 3;
    pub const CONNECTION_ERROR: u8 = 4;
    pub const NOT_FOUND: u8 = 7;
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap already printed usage/help to stderr/stdout.
            let _ = e.print();
            return ExitCode::from(exit_code::BAD_ARGS);
        }
    };

    goblin_core::logging::init(&cli.log_level);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::from(exit_code::UNEXPECTED);
        }
    };

    runtime.block_on(run(cli))
}

fn exit_code_for_config_error(e: &ConfigError) -> u8 {
    match e {
        ConfigError::Read(_, io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
            exit_code::NOT_FOUND
        }
        _ => exit_code::CONFIG_ERROR,
    }
}

async fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Validate { config } => match Config::load(&config) {
            Ok(_) => {
                info!(path = %config.display(), "config is valid");
                ExitCode::from(exit_code::SUCCESS)
            }
            Err(e) => {
                error!(error = %e, "config validation failed");
                ExitCode::from(exit_code_for_config_error(&e))
            }
        },
        Command::Run { config, port } => run_gateway(config, port).await,
    }
}

async fn run_gateway(config_path: std::path::PathBuf, port_override: Option<u16>) -> ExitCode {
    let mut config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            return ExitCode::from(exit_code_for_config_error(&e));
        }
    };
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let build = goblin_core::build::BuildInfo::new();
    info!(name = build.name, version = build.version, "starting");

    let engine = Engine::new(config);
    engine.sync_all_upstreams().await;
    engine.spawn_idle_eviction();

    let watcher = match engine.spawn_config_watch(config_path.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            error!(error = %e, "failed to watch config file, hot reload disabled");
            None
        }
    };

    let app = goblin_gateway::frontend::build_router(engine.clone());
    let addr = format!("{}:{}", engine.config().gateway.host, engine.config().gateway.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr, "failed to bind listener");
            return ExitCode::from(exit_code::CONNECTION_ERROR);
        }
    };
    info!(addr, "listening");

    let shutdown_engine = engine.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        signals::wait_for_shutdown().await;
        info!("shutdown signal received, draining upstreams");
        shutdown_engine.shutdown().await;
    });

    if let Err(e) = serve.await {
        error!(error = %e, "server exited with error");
        drop(watcher);
        return ExitCode::from(exit_code::UNEXPECTED);
    }

    drop(watcher);
    ExitCode::from(exit_code::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_maps_to_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = ConfigError::Read(std::path::PathBuf::from("/no/such/file.json"), io_err);
        assert_eq!(exit_code_for_config_error(&err), exit_code::NOT_FOUND);
    }

    #[test]
    fn unreadable_config_file_maps_to_config_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ConfigError::Read(std::path::PathBuf::from("/etc/shadow"), io_err);
        assert_eq!(exit_code_for_config_error(&err), exit_code::CONFIG_ERROR);
    }

    #[test]
    fn invalid_config_maps_to_config_error() {
        let err = ConfigError::Invalid("duplicate server name".to_string());
        assert_eq!(exit_code_for_config_error(&err), exit_code::CONFIG_ERROR);
    }
}
