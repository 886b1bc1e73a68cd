use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL for the agent state store
    pub postgres_url: String,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
}

/// Creditor-id shard owned by this agent instance.
///
/// Events for creditors outside the range are logged and dropped; they
/// belong to a different agent instance.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    pub min_creditor_id: i64,
    pub max_creditor_id: i64,
}

impl AgentConfig {
    pub fn owns(&self, creditor_id: i64) -> bool {
        self.min_creditor_id <= creditor_id && creditor_id <= self.max_creditor_id
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            min_creditor_id: i64::MIN,
            max_creditor_id: i64::MAX,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransportConfig {
    pub nats_url: String,
    /// Subject prefix for outbound command signals; the signal kind
    /// name is appended, e.g. `creditors.out.configure_account`.
    pub outbound_prefix: String,
    /// Subject the inbound event consumer subscribes to.
    pub inbound_subject: String,
    /// Queue group shared by consumer replicas.
    pub queue_group: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            outbound_prefix: "creditors.out".to_string(),
            inbound_subject: "creditors.in".to_string(),
            queue_group: "creditors-agent".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutboxConfig {
    pub poll_interval_secs: u64,
    pub batch_size: i64,
    /// Base retry delay; actual delay backs off exponentially per attempt.
    pub retry_min_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            batch_size: 1000,
            retry_min_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScannerConfig {
    pub accounts_scan_secs: u64,
    pub transfers_scan_secs: u64,
    pub retention_scan_secs: u64,
    pub creditors_scan_secs: u64,
    /// Re-send an account configuration after this many hours without
    /// an acknowledging account update.
    pub pending_retry_hours: i64,
    /// Mark a still-pending account configuration as failed after this
    /// many days.
    pub pending_fail_days: i64,
    pub log_retention_days: i64,
    pub ledger_retention_days: i64,
    /// Finalized transfers are pruned after this many days.
    pub transfer_retention_days: i64,
    /// Purged accounts are removed after this many days.
    pub purged_account_retention_days: i64,
    /// Deactivated creditors (and never-activated leftovers) are removed
    /// after this many days.
    pub creditor_grace_days: i64,
    pub batch_size: i64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            accounts_scan_secs: 3600,
            transfers_scan_secs: 3600,
            retention_scan_secs: 86400,
            creditors_scan_secs: 86400,
            pending_retry_hours: 24,
            pending_fail_days: 14,
            log_retention_days: 90,
            ledger_retention_days: 90,
            transfer_retention_days: 14,
            purged_account_retention_days: 14,
            creditor_grace_days: 14,
            batch_size: 1000,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
