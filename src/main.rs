//! Solar telemetry service entry point

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use solar_telemetry::config::ServiceConfig;
use solar_telemetry::observability::{init_default_logging, init_logging, metrics, LogFormat};
use solar_telemetry::transport::mqtt::MqttClient;
use solar_telemetry::transport::Transport;
use solar_telemetry::{CommandPublisher, ServiceError, ServiceResult, TelemetryService};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::{
    signal,
    time::{sleep, Duration},
};
use tracing::{error, info, warn, Level};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["solar-telemetry.toml", "config/solar-telemetry.toml"];

/// MQTT ingestion and soiling detection for solar panel telemetry
#[derive(Parser)]
#[command(name = "solar-telemetry")]
#[command(about = "Solar panel telemetry ingestion and soiling detection")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and ingest readings until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Publish a single command to a device and exit
    Command {
        /// Target device id
        device_id: String,
        /// Command name, e.g. "start_cleaning"
        command: String,
        /// Extra parameter as key=value; the value is parsed as JSON when possible
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        n => {
            let level = if n > 1 { Level::TRACE } else { Level::DEBUG };
            let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
            init_logging(level, format, true);
        }
    }

    info!("Starting solar-telemetry v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_service(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Command {
            device_id,
            command,
            params,
        } => send_command(&config, &device_id, &command, &params).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> ServiceResult<ServiceConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ServiceConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ServiceConfig::load_from_file(&path)?);
        }
    }

    Err(ServiceError::invalid_input(
        "no configuration file found; pass -c/--config or create solar-telemetry.toml",
    ))
}

async fn run_service(config: ServiceConfig) -> ServiceResult<()> {
    info!(service_id = %config.service.id, "Service starting");

    let service = TelemetryService::from_config(config);
    service.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Waiting for sensor readings on MQTT...");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = monitor_connection_health(service.transport()) => {
            error!("MQTT connection permanently lost, shutting down...");
        }
    }

    service.shutdown().await;
    Ok(())
}

fn handle_config_command(config: &ServiceConfig, show: bool) -> ServiceResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| ServiceError::invalid_input(format!("cannot render configuration: {e}")))?;
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn send_command(
    config: &ServiceConfig,
    device_id: &str,
    command: &str,
    raw_params: &[String],
) -> ServiceResult<()> {
    let params = parse_params(raw_params)?;

    let client_id = format!("{}-cmd-{}", config.client_id(), short_suffix());
    let transport = Arc::new(MqttClient::new(client_id, config.mqtt.clone()));
    if !transport.connect().await {
        let reason = transport
            .last_disconnect()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Err(solar_telemetry::LifecycleError::ConnectionFailed(reason).into());
    }

    let publisher = CommandPublisher::new(transport.clone());
    let sent = publisher.publish_command(device_id, command, params).await;
    transport.disconnect().await;

    if !sent {
        return Err(ServiceError::CommandNotSent {
            device_id: device_id.to_string(),
            command: command.to_string(),
        });
    }

    let snapshot = metrics().snapshot();
    info!(device_id, command, sent = snapshot.commands.sent, "Command published");
    Ok(())
}

fn parse_params(raw: &[String]) -> ServiceResult<Option<Map<String, Value>>> {
    if raw.is_empty() {
        return Ok(None);
    }

    let mut params = Map::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(ServiceError::invalid_input(format!(
                "parameter '{entry}' must be key=value"
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ServiceError::invalid_input(format!(
                "parameter '{entry}' has an empty key"
            )));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        if params.insert(key.to_string(), value).is_some() {
            warn!(key, "Parameter given more than once, last value wins");
        }
    }
    Ok(Some(params))
}

fn short_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Resolve once the MQTT network loop has given up
async fn monitor_connection_health(transport: &Arc<MqttClient>) {
    loop {
        if transport.is_permanently_disconnected().await {
            break;
        }
        sleep(Duration::from_millis(500)).await;
    }
}
