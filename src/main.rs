//! creditors-agent entry point
//!
//! One binary, several long-running modes; an operator runs one process
//! per mode and scales consumers/flushers independently:
//!
//! ```text
//! --migrate                                        apply schema migrations, exit
//! --flush configure|prepare|finalize               outbox flusher for one signal kind
//! --consume                                        inbound event consumer
//! --scan accounts|transfers|retention|creditors    one reconciliation sweep
//! ```
//!
//! Every mode resumes purely from durable state; killing and restarting
//! a process loses nothing.

use std::sync::Arc;
use std::time::Duration;

use creditors_agent::config::AppConfig;
use creditors_agent::db::Database;
use creditors_agent::inbound::EventConsumer;
use creditors_agent::outbox::{FlusherConfig, SignalFlusher, SignalKind};
use creditors_agent::scanner::{
    AccountScanner, CreditorScanner, RetentionScanner, TransferScanner,
};
use creditors_agent::transport::NatsTransport;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_mode_value(flag: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env);
    let _log_guard = creditors_agent::logging::init_logging(&app_config);

    tracing::info!("Starting creditors-agent in {} environment", env);

    let db = Database::connect(&app_config.postgres_url).await?;

    if has_flag("--migrate") {
        db.run_migrations().await?;
        println!("Schema migrations applied");
        return Ok(());
    }

    if let Some(kind_name) = get_mode_value("--flush") {
        let kind = match kind_name.as_str() {
            "configure" => SignalKind::ConfigureAccount,
            "prepare" => SignalKind::PrepareTransfer,
            "finalize" => SignalKind::FinalizeTransfer,
            other => anyhow::bail!(
                "Unknown signal kind: {} (expected configure|prepare|finalize)",
                other
            ),
        };

        let transport = Arc::new(NatsTransport::connect(&app_config.transport.nats_url).await?);
        let flusher = SignalFlusher::new(
            db.pool().clone(),
            transport,
            kind,
            app_config.transport.outbound_prefix.clone(),
            FlusherConfig {
                poll_interval: Duration::from_secs(app_config.outbox.poll_interval_secs),
                batch_size: app_config.outbox.batch_size,
                retry_min: Duration::from_secs(app_config.outbox.retry_min_secs),
            },
        );
        flusher.run().await;
    }

    if has_flag("--consume") {
        let transport = Arc::new(NatsTransport::connect(&app_config.transport.nats_url).await?);
        let consumer = EventConsumer::new(
            db.pool().clone(),
            transport,
            app_config.agent.clone(),
            &app_config.transport,
        );
        consumer.run().await;
    }

    if let Some(sweep) = get_mode_value("--scan") {
        let pool = db.pool().clone();
        let scanner_config = app_config.scanner.clone();
        match sweep.as_str() {
            "accounts" => AccountScanner::new(pool, scanner_config).run().await,
            "transfers" => TransferScanner::new(pool, scanner_config).run().await,
            "retention" => RetentionScanner::new(pool, scanner_config).run().await,
            "creditors" => CreditorScanner::new(pool, scanner_config).run().await,
            other => anyhow::bail!(
                "Unknown sweep: {} (expected accounts|transfers|retention|creditors)",
                other
            ),
        }
    }

    eprintln!("No mode selected. Usage:");
    eprintln!("  creditors-agent [--env <name>] --migrate");
    eprintln!("  creditors-agent [--env <name>] --flush configure|prepare|finalize");
    eprintln!("  creditors-agent [--env <name>] --consume");
    eprintln!("  creditors-agent [--env <name>] --scan accounts|transfers|retention|creditors");
    std::process::exit(2);
}
