//! nats-link - command line front end for the NATS connection manager

use clap::{Parser, Subcommand};
use nats_link::config::ProviderConfig;
use nats_link::observability::LogSettings;
use nats_link::provider::{ConnectionManager, Notification, NotificationObserver};
use nats_link::transport::{PublishOptions, RequestOptions, SubscribeOptions};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info};

/// Client-side NATS connection manager
#[derive(Parser)]
#[command(name = "nats-link")]
#[command(about = "Manage a NATS connection: watch its lifecycle, publish, request, subscribe")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server URL, overrides the configured list (repeatable)
    #[arg(short, long = "server", value_name = "URL", env = "NATS_URL")]
    servers: Vec<String>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print lifecycle notifications until interrupted
    Watch,
    /// Publish a text message
    Pub {
        subject: String,
        data: Option<String>,
    },
    /// Send a text request and print the reply
    Req {
        subject: String,
        data: Option<String>,
        /// Request timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },
    /// Subscribe and print received messages
    Sub {
        subject: String,
        /// Queue group
        #[arg(long)]
        queue: Option<String>,
        /// Exit after this many messages
        #[arg(long)]
        count: Option<u64>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// Prints every notification as a JSON line on stdout
struct PrintingObserver;

impl NotificationObserver for PrintingObserver {
    fn on_status(&self, notification: &Notification) {
        match serde_json::to_string(notification) {
            Ok(line) => println!("{line}"),
            Err(e) => error!("Failed to encode notification: {}", e),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LogSettings::from_env().with_verbosity(cli.verbose).init();

    let mut config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if !cli.servers.is_empty() {
        config.connection.servers = cli.servers.clone();
    }

    let result = match cli.command {
        Commands::Watch => watch(config).await,
        Commands::Pub { subject, data } => publish(config, &subject, data.as_deref()).await,
        Commands::Req {
            subject,
            data,
            timeout_ms,
        } => request(config, &subject, data.as_deref(), timeout_ms).await,
        Commands::Sub {
            subject,
            queue,
            count,
        } => subscribe(config, &subject, queue, count).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ProviderConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ProviderConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["nats-link.toml", "config/nats-link.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(ProviderConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found, using defaults");
            Ok(ProviderConfig::default())
        }
    }
}

/// Build a manager and open it in the foreground
async fn connect(
    mut config: ProviderConfig,
    observer: Arc<dyn NotificationObserver>,
) -> Result<Arc<ConnectionManager>, Box<dyn std::error::Error>> {
    config.provider.auto_connect = false;
    let manager = ConnectionManager::from_config(&config, observer)?;
    manager.connect().await;
    if !manager.is_connected() {
        return Err(format!(
            "Failed to connect to NATS cluster at {}",
            config.connection.servers.join(",")
        )
        .into());
    }
    Ok(manager)
}

async fn watch(config: ProviderConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = config;
    config.provider.auto_connect = true;
    let manager = ConnectionManager::from_config(&config, Arc::new(PrintingObserver))?;
    let mut flags_rx = manager.watch_flags();

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Watching NATS connection, press Ctrl-C to stop");

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
            changed = flags_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let flags = *flags_rx.borrow_and_update();
                info!(
                    closed = flags.closed,
                    connecting = flags.connecting,
                    reconnecting = flags.reconnecting,
                    connected = flags.connected,
                    "Connection flags changed"
                );
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn publish(
    config: ProviderConfig,
    subject: &str,
    data: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = connect(config, Arc::new(nats_link::provider::TracingObserver)).await?;
    manager
        .publish_text(subject, data, &PublishOptions::default())
        .await?;
    info!(subject, "Published message");
    manager.shutdown().await;
    Ok(())
}

async fn request(
    config: ProviderConfig,
    subject: &str,
    data: Option<&str>,
    timeout_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = connect(config, Arc::new(nats_link::provider::TracingObserver)).await?;
    let options = RequestOptions::with_timeout(Duration::from_millis(timeout_ms));

    let outcome = manager.request_text(subject, data, &options).await;
    manager.shutdown().await;

    let reply = outcome?;
    println!("{}", reply.data);
    Ok(())
}

async fn subscribe(
    config: ProviderConfig,
    subject: &str,
    queue: Option<String>,
    count: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = connect(config, Arc::new(nats_link::provider::TracingObserver)).await?;
    let options = SubscribeOptions { queue, max: count };
    let mut subscription = manager.subscribe(subject, &options).await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(subject, sid = subscription.sid(), "Listening for messages");

    loop {
        tokio::select! {
            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,
            message = subscription.next() => match message {
                Some(message) => {
                    println!("[{}] {}", message.subject, nats_link::codec::load_text(&message.payload));
                }
                None => {
                    info!(subject, "Subscription ended");
                    break;
                }
            },
        }
    }

    subscription.unsubscribe().await?;
    manager.shutdown().await;
    Ok(())
}

fn handle_config_command(
    config: ProviderConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
