//! SMS Relay CLI
//!
//! Entry points for the forwarding pipeline: `relay` handles one receive
//! event from the platform hook, the remaining commands manage per-slot
//! configuration, statistics, the error log, and the line registry.

use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use sms_relay::config::Config;
use sms_relay::dispatch::{Dispatcher, ReceiveEvent};
use sms_relay::forward::Forwarder;
use sms_relay::line::{Capabilities, FileLineRegistry, LineResolver};
use sms_relay::store::{SlotStore, SqliteStore};
use sms_relay::webhook::HttpTransport;
use sms_relay::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// SMS Relay - forward incoming messages to webhook endpoints
#[derive(Parser)]
#[command(name = "sms-relay")]
#[command(about = "Relay incoming SMS to per-SIM webhook endpoints")]
struct Cli {
    /// Data directory (default: ~/.sms-relay)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward one receive event, read as JSON from stdin
    Relay,

    /// Send a synthetic test message through a slot's webhook
    TestSend {
        /// SIM slot index
        slot: usize,
    },

    /// Update a slot's webhook configuration
    Set {
        /// SIM slot index
        slot: usize,

        /// Webhook URL (empty string to unset)
        #[arg(long)]
        url: Option<String>,

        /// Custom User-Agent header
        #[arg(long)]
        user_agent: Option<String>,

        /// Display name for the slot
        #[arg(long)]
        name: Option<String>,
    },

    /// Show per-slot configuration and delivery statistics
    Stats,

    /// Print the error log
    Logs,

    /// Clear the error log
    ClearLogs,

    /// List registered lines
    Lines,

    /// Register or update a line
    AddLine {
        /// Line identifier (subscription id)
        line_id: i64,

        /// SIM slot index
        slot: usize,

        /// The line's own phone number
        #[arg(long)]
        number: Option<String>,
    },

    /// Remove a line from the registry
    RemoveLine {
        /// Line identifier
        line_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = match cli.data_dir {
        Some(dir) => Config::with_data_dir(dir),
        None => Config::default(),
    };

    match cli.command {
        Commands::Relay => cmd_relay(&config).await,
        Commands::TestSend { slot } => cmd_test_send(&config, slot).await,
        Commands::Set {
            slot,
            url,
            user_agent,
            name,
        } => cmd_set(&config, slot, url, user_agent, name),
        Commands::Stats => cmd_stats(&config),
        Commands::Logs => cmd_logs(&config),
        Commands::ClearLogs => cmd_clear_logs(&config),
        Commands::Lines => cmd_lines(&config),
        Commands::AddLine {
            line_id,
            slot,
            number,
        } => cmd_add_line(&config, line_id, slot, number),
        Commands::RemoveLine { line_id } => cmd_remove_line(&config, line_id),
    }
}

fn open_store(config: &Config) -> Result<SlotStore> {
    Ok(SlotStore::new(Arc::new(SqliteStore::open(
        &config.store_file,
    )?)))
}

fn build_dispatcher(config: &Config) -> Result<(Dispatcher, SlotStore)> {
    let store = open_store(config)?;

    let mut registry = FileLineRegistry::new(config);
    registry.load()?;

    let resolver = Arc::new(LineResolver::new(
        Arc::new(registry),
        Capabilities::from_config(config),
    ));
    let forwarder = Arc::new(Forwarder::new(store.clone(), Arc::new(HttpTransport::new())));

    Ok((Dispatcher::new(resolver, forwarder, store.clone()), store))
}

// ============================================================================
// CLI Commands
// ============================================================================

async fn cmd_relay(config: &Config) -> Result<()> {
    let event: ReceiveEvent = serde_json::from_reader(std::io::stdin().lock())?;
    let (dispatcher, _store) = build_dispatcher(config)?;

    let handles = dispatcher.on_message_received(event);
    let count = handles.len();
    info!(attempts = count, "receive event dispatched");

    // Drain before the process exits; the trigger itself never awaits
    for handle in handles {
        let _ = handle.await;
    }

    println!("Dispatched {} message(s)", count);
    Ok(())
}

async fn cmd_test_send(config: &Config, slot: usize) -> Result<()> {
    let (dispatcher, _store) = build_dispatcher(config)?;

    match dispatcher.on_test_send(slot) {
        Ok(handle) => {
            let _ = handle.await;
            println!("Test message dispatched for slot {}", slot);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_set(
    config: &Config,
    slot: usize,
    url: Option<String>,
    user_agent: Option<String>,
    name: Option<String>,
) -> Result<()> {
    let store = open_store(config)?;

    if let Some(url) = url {
        store.set_webhook_url(slot, &url)?;
        println!("Slot {} webhook URL set", slot);
    }
    if let Some(user_agent) = user_agent {
        store.set_user_agent(slot, &user_agent)?;
        println!("Slot {} user agent set", slot);
    }
    if let Some(name) = name {
        store.set_slot_name(slot, &name)?;
        println!("Slot {} name set", slot);
    }

    Ok(())
}

fn cmd_stats(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let mut registry = FileLineRegistry::new(config);
    registry.load()?;

    // Dual-SIM default when no lines are registered yet
    let slots = if registry.is_empty() {
        vec![0, 1]
    } else {
        registry.slots()
    };

    for slot in slots {
        let stats = store.stats(slot);
        let url = store.webhook_url(slot);
        println!("{} (slot {})", store.display_name(slot), slot);
        println!(
            "  webhook: {}",
            if url.is_empty() {
                "(not configured)"
            } else {
                url.as_str()
            }
        );
        println!(
            "  forwarded: {} total, {} successful, {} failed",
            stats.total, stats.successful, stats.failed
        );
    }

    Ok(())
}

fn cmd_logs(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let logs = store.error_logs();

    if logs.is_empty() {
        println!("No errors logged");
        return Ok(());
    }

    for entry in logs {
        println!("{}", format_log_entry(&entry));
    }

    Ok(())
}

fn cmd_clear_logs(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    store.clear_error_logs()?;
    println!("Error log cleared");
    Ok(())
}

fn cmd_lines(config: &Config) -> Result<()> {
    let mut registry = FileLineRegistry::new(config);
    registry.load()?;

    if registry.is_empty() {
        println!("No lines registered");
        return Ok(());
    }

    let mut lines: Vec<_> = registry.all().iter().collect();
    lines.sort_by_key(|(line_id, _)| **line_id);
    for (line_id, info) in lines {
        println!(
            "line {} -> slot {} ({})",
            line_id,
            info.slot,
            info.number.as_deref().unwrap_or("no number")
        );
    }

    Ok(())
}

fn cmd_add_line(config: &Config, line_id: i64, slot: usize, number: Option<String>) -> Result<()> {
    let mut registry = FileLineRegistry::new(config);
    registry.load()?;
    registry.register(line_id, slot, number)?;
    println!("Registered line {} on slot {}", line_id, slot);
    Ok(())
}

fn cmd_remove_line(config: &Config, line_id: i64) -> Result<()> {
    let mut registry = FileLineRegistry::new(config);
    registry.load()?;

    if registry.remove(line_id)?.is_some() {
        println!("Removed line {}", line_id);
    } else {
        println!("Line {} not registered", line_id);
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Render a stored `<epoch-ms>|[<tag>] <message>` entry for display
fn format_log_entry(entry: &str) -> String {
    if let Some((timestamp, message)) = entry.split_once('|') {
        if let Some(when) = timestamp
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        {
            return format!("{} {}", when.format("%Y-%m-%d %H:%M:%S"), message);
        }
    }
    entry.to_string()
}
