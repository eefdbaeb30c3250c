//! mqtt-courier - managed MQTT client on the command line
//!
//! Connects using a TOML configuration, keeps the connection alive through
//! broker outages, prints every delivered message and publishes stdin lines
//! to the configured outbound topic.

use clap::{Parser, Subcommand, ValueEnum};
use mqtt_courier::client::{ConnectionState, FailureKind, MqttClient, Notification};
use mqtt_courier::config::ClientConfig;
use mqtt_courier::lifecycle_span;
use mqtt_courier::observability::init_default_logging;
use mqtt_courier::output::{render_json, render_line};
use mqtt_courier::transport::library::TRANSPORT_LIBRARY;
use std::path::PathBuf;
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn, Instrument};

/// Managed MQTT publish/subscribe client
#[derive(Parser)]
#[command(name = "mqtt-courier")]
#[command(about = "Managed MQTT client with automatic reconnect")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured broker (mqtt://host:port)
    #[arg(long, value_name = "URL", env = "MQTT_COURIER_BROKER")]
    broker: Option<String>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and relay messages until interrupted
    Run {
        /// How delivered messages are printed
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Exit code when the broker stayed unreachable through every retry
const EXIT_RETRY_EXHAUSTED: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting mqtt-courier v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Some(broker) = &cli.broker {
        if let Err(e) = config.override_broker(broker) {
            error!("Invalid --broker: {}", e);
            process::exit(1);
        }
    }

    let result = match cli.command {
        Commands::Run { format } => {
            run_client(config, format)
                .instrument(lifecycle_span!(command = "run"))
                .await
        }
        Commands::Config { show } => handle_config_command(&config, show),
    };

    match result {
        Ok(0) => info!("Application shutdown complete"),
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            process::exit(1);
        }
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ClientConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["courier.toml", "config/courier.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(ClientConfig::load_from_file(&path)?);
                }
            }

            Err("no configuration file found; pass -c/--config or create courier.toml".into())
        }
    }
}

async fn run_client(
    config: ClientConfig,
    format: OutputFormat,
) -> Result<i32, Box<dyn std::error::Error>> {
    let (client, mut notifications) = MqttClient::with_rumqttc(config.client_options())?;
    info!(client_id = client.client_id(), "Client created");

    client.connect(config.connection_config()?).await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = config.outbound.is_some();
    let mut first_connect = true;
    let mut exit_code = 0;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            notification = notifications.recv() => match notification {
                Some(Notification::Connected) => {
                    if first_connect {
                        first_connect = false;
                        on_first_connect(&client, &config).await;
                    }
                }
                Some(Notification::Disconnected) => info!("Disconnected from broker"),
                Some(failure @ Notification::ConnectionFailed { .. }) => {
                    if let Notification::ConnectionFailed { kind, reason } = &failure {
                        warn!(?kind, "Connection failed: {}", reason);
                    }
                    if let Some(code) = terminal_exit_code(&failure) {
                        error!("Giving up on the broker connection");
                        exit_code = code;
                        break;
                    }
                }
                Some(Notification::MessageReceived(message)) => {
                    let now = chrono::Local::now();
                    match format {
                        OutputFormat::Text => println!("{}", render_line(&message, &now)),
                        OutputFormat::Json => println!("{}", render_json(&message, &now)),
                    }
                }
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => publish_line(&client, &config, line).await,
                Ok(None) => {
                    info!("Stdin closed, no more outbound messages");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    client.shutdown().await?;
    info!(
        live_instances = TRANSPORT_LIBRARY.live_instances(),
        "Client shut down"
    );
    Ok(exit_code)
}

/// Exit code for a failure the controller will not retry on its own
fn terminal_exit_code(notification: &Notification) -> Option<i32> {
    if !notification.is_terminal_failure() {
        return None;
    }
    match notification {
        Notification::ConnectionFailed {
            kind: FailureKind::RetryExhausted,
            ..
        } => Some(EXIT_RETRY_EXHAUSTED),
        _ => Some(1),
    }
}

/// Subscribe to the configured topics and send the greeting. Later reconnects
/// are resubscribed by the controller itself.
async fn on_first_connect(client: &MqttClient, config: &ClientConfig) {
    for (topic, qos) in config.subscription_list() {
        if let Err(e) = client.subscribe(topic.as_str(), qos).await {
            warn!(topic = %topic, "Subscribe failed: {}", e);
        }
    }

    if let Some(outbound) = &config.outbound {
        if let Some(greeting) = &outbound.greeting {
            if let Err(e) = client
                .publish(
                    outbound.topic.as_str(),
                    greeting.as_bytes(),
                    outbound.qos(),
                    outbound.retain,
                )
                .await
            {
                warn!("Greeting not sent: {}", e);
            }
        }
    }
}

async fn publish_line(client: &MqttClient, config: &ClientConfig, line: String) {
    let Some(outbound) = &config.outbound else {
        return;
    };
    if line.trim().is_empty() {
        return;
    }
    if client.state() != ConnectionState::Connected {
        warn!(state = %client.state(), "Dropping outbound line while not connected");
        return;
    }
    if let Err(e) = client
        .publish(
            outbound.topic.as_str(),
            line.into_bytes(),
            outbound.qos(),
            outbound.retain,
        )
        .await
    {
        warn!("Publish failed: {}", e);
    }
}

fn handle_config_command(
    config: &ClientConfig,
    show: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let connection = config.connection_config()?;
    info!(endpoint = %connection.endpoint(), "Configuration is valid");

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }
    Ok(0)
}
