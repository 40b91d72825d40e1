//! Activity Agent CLI
//!
//! Samples windowed processes and ships them to a collection server.

use activity_agent::{
    client::ApiClient, AgentConfig, CollectionLoop, CollectorEvent, Credentials, VERSION,
};
use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "activity-agent")]
#[command(version = VERSION)]
#[command(about = "Samples windowed processes and ships them to a collection server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start collecting and delivering activity records
    Start {
        #[command(flatten)]
        overrides: Overrides,

        /// Seconds between collection ticks
        #[arg(long)]
        interval: Option<u64>,

        #[command(flatten)]
        login: Login,
    },

    /// Check that the server is up, then log in once to verify credentials
    Check {
        #[command(flatten)]
        overrides: Overrides,

        #[command(flatten)]
        login: Login,
    },

    /// Write the configuration file, applying any overrides
    Init {
        #[command(flatten)]
        overrides: Overrides,

        /// Seconds between collection ticks
        #[arg(long)]
        interval: Option<u64>,

        /// Login name to store
        #[arg(long)]
        username: Option<String>,
    },

    /// Show configuration
    Config,
}

#[derive(Args)]
struct Overrides {
    /// Collection server base URL
    #[arg(long)]
    server: Option<String>,

    /// User the records are attributed to
    #[arg(long)]
    user_id: Option<u64>,

    /// Maximum records per batch
    #[arg(long)]
    chunk_size: Option<usize>,
}

#[derive(Args)]
struct Login {
    /// Login name (falls back to the configured username)
    #[arg(long, env = "ACTIVITY_AGENT_USERNAME")]
    username: Option<String>,

    /// Login password
    #[arg(long, env = "ACTIVITY_AGENT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut AgentConfig) {
        if let Some(server) = self.server {
            config.server_url = server;
        }
        if let Some(user_id) = self.user_id {
            config.user_id = user_id;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
    }
}

impl Login {
    fn credentials(self, config: &AgentConfig) -> Result<Credentials> {
        let Some(username) = self.username.or_else(|| config.username.clone()) else {
            bail!("no username: pass --username, set ACTIVITY_AGENT_USERNAME or store one with `init`");
        };
        let Some(password) = self.password else {
            bail!("no password: pass --password or set ACTIVITY_AGENT_PASSWORD");
        };
        Ok(Credentials::new(username, password))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            overrides,
            interval,
            login,
        } => cmd_start(overrides, interval, login).await,
        Commands::Check { overrides, login } => cmd_check(overrides, login).await,
        Commands::Init {
            overrides,
            interval,
            username,
        } => cmd_init(overrides, interval, username),
        Commands::Config => cmd_config(),
    }
}

async fn cmd_start(overrides: Overrides, interval: Option<u64>, login: Login) -> Result<()> {
    let mut config = AgentConfig::load().context("could not load configuration")?;
    overrides.apply(&mut config);
    let interval_secs = interval.unwrap_or_else(|| config.interval.as_secs());
    let user_id = config.user_id;
    let credentials = login.credentials(&config)?;

    println!("Activity Agent v{VERSION}");
    println!();
    println!("  Server: {}", config.server_url);
    println!("  User ID: {user_id}");
    println!("  Interval: {interval_secs}s");
    println!("  Batch size: {}", config.chunk_size);
    println!();

    let mut agent = CollectionLoop::new(config)?;
    agent
        .start(user_id, interval_secs, credentials)
        .await
        .context("could not start collection")?;

    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;

    // Print events on the blocking pool until Ctrl+C.
    let events = agent.events().clone();
    let printer = tokio::task::spawn_blocking(move || {
        while running.load(Ordering::SeqCst) {
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => print_event(&event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });
    printer.await.context("event printer failed")?;

    println!();
    println!("Stopping collection...");
    agent.shutdown().await;
    for event in agent.events().try_iter() {
        print_event(&event);
    }

    println!();
    println!("{}", agent.stats().summary());
    Ok(())
}

fn print_event(event: &CollectorEvent) {
    let now = Local::now().format("%H:%M:%S");
    match event {
        CollectorEvent::Started { user_id, interval } => {
            println!("[{now}] Monitoring started for user {user_id} (interval: {}s)", interval.as_secs());
        }
        CollectorEvent::TickCompleted(result) => {
            if result.process_count == 0 {
                println!("[{now}] No active processes found");
            } else {
                println!(
                    "[{now}] Sent {} process records in {} batches",
                    result.process_count, result.batch_count
                );
            }
        }
        CollectorEvent::TickFailed(failure) => {
            eprintln!(
                "[{now}] Collection failed after {}/{} records: {}",
                failure.delivered.process_count, failure.sampled, failure.error
            );
        }
        CollectorEvent::ConnectionChanged(status) => println!("[{now}] Connection: {status}"),
        CollectorEvent::Stopped => println!("[{now}] Monitoring stopped"),
    }
}

async fn cmd_check(overrides: Overrides, login: Login) -> Result<()> {
    let mut config = AgentConfig::load().context("could not load configuration")?;
    overrides.apply(&mut config);
    config.validate()?;
    let credentials = login.credentials(&config)?;

    let client = ApiClient::new(&config.server_url, config.request_timeout)?;
    println!("Connecting to {}...", config.server_url);

    match client.server_available().await {
        Ok(true) => println!("Server is up"),
        Ok(false) => bail!("server at {} is not accepting requests", config.server_url),
        Err(e) => bail!("{}: {e}", client.connection_status()),
    }

    match client.login(&credentials).await {
        Ok(_) => {
            println!("Connected: credentials accepted for '{}'", credentials.username);
            Ok(())
        }
        Err(e) => bail!("connection failed: {e}"),
    }
}

fn cmd_init(overrides: Overrides, interval: Option<u64>, username: Option<String>) -> Result<()> {
    let mut config = AgentConfig::load().unwrap_or_default();
    overrides.apply(&mut config);
    if let Some(secs) = interval {
        config.interval = config.validate_interval(secs)?;
    }
    if username.is_some() {
        config.username = username;
    }
    config.validate()?;
    config.save().context("could not save configuration")?;

    println!("Configuration written to {:?}", AgentConfig::config_path());
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = AgentConfig::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", AgentConfig::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
