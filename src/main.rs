//! Main entry point for the Pickup Room service
//!
//! This is the production entry point that initializes and runs the pickup
//! engine with logging, monitoring endpoints and graceful shutdown. In
//! console mode chat lines are read from stdin, which is how the engine is
//! driven without a chat connector attached.

use anyhow::Result;
use clap::Parser;
use pickup_room::announce::{ChatPublisher, ConsolePublisher, LogPublisher};
use pickup_room::command::parse_player;
use pickup_room::config::AppConfig;
use pickup_room::service::{AppState, HealthCheck, HealthStatus, ServiceHandle};
use pickup_room::types::{Platform, PlayerIdentity};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

/// Pickup Room - pickup-game queues for bridged game-community chats
#[derive(Parser)]
#[command(
    name = "pickup-room",
    version,
    about = "Pickup-game matchmaking and expiry engine for IRC, Discord and Matrix chats",
    long_about = "Pickup Room keeps one queue per gametype, forms a match as soon as a queue \
                 is full, expires stale reservations with a warning first, and lets players \
                 subscribe to gametypes to be pinged when somebody promotes a queue."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Load state, perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// State file override
    #[arg(long, value_name = "FILE", help = "Override the persisted state file")]
    state_file: Option<PathBuf>,

    /// Read chat lines from stdin
    #[arg(
        long,
        help = "Read chat lines from stdin, as `[platform:]handle !command args` or `!command args`"
    )]
    console: bool,

    /// Platform of console players given without a prefix
    #[arg(long, value_name = "PLATFORM", default_value = "irc")]
    platform: Platform,

    /// Console handle used for lines that start with a command
    #[arg(long = "as", value_name = "HANDLE", default_value = "console")]
    handle: String,

    /// Handles allowed to run admin commands in console mode
    #[arg(long = "admin", value_name = "HANDLE")]
    admins: Vec<String>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Load the persisted state, check it and exit with the matching code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = AppState::new(config.clone(), Arc::new(LogPublisher)).await?;
    let handle = ServiceHandle::new(config.service.name, app_state.manager(), true);

    match HealthCheck::check(&handle).await {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            println!("  Gametypes: {}", health.stats.gametypes);
            println!("  Players Waiting: {}", health.stats.players_waiting);
            println!("  Subscriptions: {}", health.stats.subscriptions);
            println!("  Uptime: {}", health.stats.uptime_info);

            if health.status == HealthStatus::Healthy {
                std::process::exit(0);
            } else {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Split a console line into the speaking player and the chat text
fn console_speaker(line: &str, args: &Args) -> (PlayerIdentity, String) {
    let line = line.trim();
    if line.starts_with('!') {
        return (
            PlayerIdentity::new(args.platform, args.handle.clone()),
            line.to_string(),
        );
    }

    match line.split_once(char::is_whitespace) {
        Some((speaker, rest)) => (
            parse_player(speaker, args.platform),
            rest.trim().to_string(),
        ),
        None => (
            PlayerIdentity::new(args.platform, args.handle.clone()),
            line.to_string(),
        ),
    }
}

/// Feed stdin lines into the dispatcher until EOF or a shutdown signal
async fn run_console(app_state: &AppState, args: &Args) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Console ready, type !help for a list of commands");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Console input closed");
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }

                let (speaker, text) = console_speaker(&line, args);
                let is_admin = args.admins.iter().any(|admin| *admin == speaker.handle);
                app_state.handle_chat_line(speaker, is_admin, &text).await;
            }
            _ = wait_for_shutdown_signal() => return Ok(()),
        }
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("🚀 Pickup Room Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!(
        "   Warn after: {}s, expire after: {}s",
        config.pickup.warn_time_seconds, config.pickup.timeout_seconds
    );
    info!("   Captains: {:?}", config.pickup.captain_policy);
    info!("   Partial start: {:?}", config.pickup.partial_start_policy);
    match &config.persistence.state_file {
        Some(path) => info!("   State file: {}", path.display()),
        None => info!("   State file: none (in memory)"),
    }
    info!("   Configured gametypes: {}", config.gametypes.len());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    if let Some(state_file) = &args.state_file {
        config.persistence.state_file = Some(state_file.clone());
    }

    pickup_room::config::validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    let publisher: Arc<dyn ChatPublisher> = if args.console {
        Arc::new(ConsolePublisher::new(args.platform))
    } else {
        Arc::new(LogPublisher)
    };

    info!("Initializing service components...");
    let mut app_state = match AppState::new(config.clone(), publisher).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("✅ Pickup Room Service is running");

    if args.console {
        if let Err(e) = run_console(&app_state, &args).await {
            error!("Console input failed: {}", e);
        }
    } else {
        info!("Press Ctrl+C to shutdown gracefully...");
        wait_for_shutdown_signal().await;
    }

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    let shutdown_timeout = config.shutdown_timeout();
    match tokio::time::timeout(shutdown_timeout, app_state.shutdown()).await {
        Ok(Ok(())) => {
            info!("✅ Graceful shutdown completed successfully");
        }
        Ok(Err(e)) => {
            error!("Shutdown failed: {}", e);
        }
        Err(_) => {
            warn!("⚠️  Shutdown timeout exceeded, forcing exit");
        }
    }

    info!("🛑 Pickup Room Service stopped");
    Ok(())
}
