//! Binary entrypoint for the umbra theme service.
use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand, ValueEnum};
use logging::LogArgs;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*};
use umbra_config::{Config, ConfigError, DEFAULT_BIND, load, resolve_config_path};
use umbra_platform::Theme;
use umbra_server::{
    Client, Error as ServiceError, Service,
    protocol::{Command as Wire, Request, Response},
};

#[derive(Parser, Debug)]
#[command(name = "umbra", about = "Light/dark theme switching service", version)]
/// Command-line interface for the `umbra` binary.
struct Cli {
    /// Optional subcommand; defaults to `run`.
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the config file
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Path to the state file (overrides general.state_path)
    #[arg(long, value_name = "PATH", global = true)]
    state: Option<PathBuf>,

    /// Logging controls
    #[command(flatten)]
    log: LogArgs,
}

#[derive(Subcommand, Debug)]
/// Top-level CLI subcommands.
enum Command {
    /// Run the service in the foreground.
    Run,
    /// Load and validate the configuration then exit.
    Check {
        /// Dump the validated configuration as JSON to stdout
        #[arg(long)]
        dump: bool,
    },
    /// Send one command to a running service.
    Ctl {
        /// Command to send.
        command: CtlCommand,
        /// Argument for `set-theme` (light, dark or auto).
        value: Option<String>,
        /// Control server address (defaults to service.bind from the config)
        #[arg(long)]
        addr: Option<SocketAddr>,
        /// Shared secret (defaults to service.token from the config)
        #[arg(long)]
        token: Option<String>,
    },
}

/// Commands accepted by `umbra ctl`.
#[derive(ValueEnum, Debug, Clone, Copy)]
enum CtlCommand {
    /// Report the recorded theme.
    GetTheme,
    /// Apply a theme.
    SetTheme,
    /// Flip the theme.
    ToggleTheme,
    /// Re-read the config file.
    ReloadConfig,
    /// Report service status.
    GetStatus,
    /// Liveness check.
    Ping,
    /// Stop the service.
    Shutdown,
}

impl CtlCommand {
    /// Wire request for this command.
    fn request(self, value: Option<&str>) -> Result<Request, String> {
        Ok(match self {
            Self::GetTheme => Wire::GetTheme,
            Self::SetTheme => {
                let value = value.ok_or("set-theme needs a value: light, dark or auto")?;
                Wire::SetTheme(value.parse::<Theme>().map_err(|e| e.to_string())?)
            }
            Self::ToggleTheme => Wire::ToggleTheme,
            Self::ReloadConfig => Wire::ReloadConfig,
            Self::GetStatus => Wire::GetStatus,
            Self::Ping => Wire::Ping,
            Self::Shutdown => Wire::Shutdown,
        }
        .to_request())
    }
}

/// Print a config error the way `check` does.
fn report_config_error(e: &ConfigError) {
    eprintln!("{}", e.pretty());
}

/// `umbra check`.
fn check(path: &Path, dump: bool) -> ExitCode {
    match load(path) {
        Ok(cfg) => {
            if dump {
                match serde_json::to_string_pretty(&cfg) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Failed to serialize config: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                println!("OK");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            report_config_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// `umbra run`.
async fn run(path: &Path, state: Option<&Path>) -> ExitCode {
    let token = CancellationToken::new();
    let mut service = Service::new(path);
    if let Some(s) = state {
        service = service.with_state_path(s);
    }
    let running = match service.start(token.clone()).await {
        Ok(r) => r,
        Err(e) => {
            error!(fatal = true, error = %e, "startup_failed");
            if let ServiceError::Config(ce) = &e {
                report_config_error(ce);
            }
            return ExitCode::FAILURE;
        }
    };

    let interrupt = token.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt_received");
                interrupt.cancel();
            }
            Err(e) => warn!(error = %e, "signal_handler_unavailable"),
        }
    });

    match running.wait().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(fatal = true, error = %e, "service_failed");
            ExitCode::FAILURE
        }
    }
}

/// `umbra ctl`.
async fn ctl(
    config_path: &Path,
    command: CtlCommand,
    value: Option<&str>,
    addr: Option<SocketAddr>,
    token: Option<String>,
) -> ExitCode {
    let req = match command.request(value) {
        Ok(r) => r,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };
    // Fill in what the flags left out from the config, if it loads.
    let cfg: Option<Config> = if addr.is_none() || token.is_none() {
        load(config_path).ok()
    } else {
        None
    };
    let addr = addr
        .or_else(|| cfg.as_ref().map(|c| c.service.bind))
        .or_else(|| DEFAULT_BIND.parse().ok());
    let Some(addr) = addr else {
        eprintln!("no control server address");
        return ExitCode::FAILURE;
    };
    let token = token.or_else(|| cfg.and_then(|c| c.service.token));

    let mut conn = match Client::new(addr).with_token(token).connect().await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("cannot reach umbra at {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };
    match conn.call(req).await {
        Ok(Response::Ok { payload }) => {
            if !payload.is_null() {
                match serde_json::to_string_pretty(&payload) {
                    Ok(json) => println!("{json}"),
                    Err(_) => println!("{payload}"),
                }
            }
            ExitCode::SUCCESS
        }
        Ok(Response::Error { code, message }) => {
            eprintln!("{code}: {message}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let env_filter = logging::env_filter_from_spec(&cli.log.spec());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().compact().with_writer(io::stderr))
        .try_init()
        .ok();

    let config_path = resolve_config_path(cli.config.as_deref());
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config_path, cli.state.as_deref()).await,
        Command::Check { dump } => check(&config_path, dump),
        Command::Ctl {
            command,
            value,
            addr,
            token,
        } => ctl(&config_path, command, value.as_deref(), addr, token).await,
    }
}
