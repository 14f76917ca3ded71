use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::destination::DestinationType;
use crate::vault::CredentialVault;

/// Environment variable that overrides `[vault].key`.
pub const VAULT_KEY_ENV: &str = "XFERQ_VAULT_KEY";

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; defaults to `$XDG_STATE_HOME/xferq/tasks.db`.
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Passphrase, or 64 hex characters for a raw 256-bit key.
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval_ms: u64,
    /// A task attempted more recently than this is not selected again, and a
    /// claim whose heartbeat is older than this is expired.
    pub claim_staleness_secs: u64,
    pub max_concurrent_tasks: usize,
    /// Only serve downloads bound for this destination type.
    pub destination_filter: Option<DestinationType>,
    /// Cloud access tokens on results older than this are purged.
    pub token_retention_days: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            claim_staleness_secs: 300,
            max_concurrent_tasks: 4,
            destination_filter: None,
            token_retention_days: 30,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn claim_staleness(&self) -> Duration {
        Duration::from_secs(self.claim_staleness_secs)
    }

    pub fn token_retention(&self) -> Duration {
        Duration::from_secs(self.token_retention_days.saturating_mul(24 * 60 * 60))
    }
}

/// Global configuration loaded from `~/.config/xferq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XferqConfig {
    /// Identity this instance claims tasks under. Generated on first run.
    pub owner_id: String,
    /// Instances known to be gone; their claims are cleared at startup.
    #[serde(default)]
    pub dead_owner_ids: Vec<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for XferqConfig {
    fn default() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            owner_id: format!("xferq-{}", &suffix[..12]),
            dead_owner_ids: Vec::new(),
            store: StoreConfig::default(),
            vault: VaultConfig::default(),
            worker: WorkerConfig::default(),
            retry: None,
        }
    }
}

impl XferqConfig {
    /// Key material from the environment, else from the file.
    pub fn vault_key(&self) -> Option<String> {
        std::env::var(VAULT_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.vault.key.clone())
    }

    pub fn build_vault(&self) -> Result<CredentialVault> {
        let key = self.vault_key().with_context(|| {
            format!(
                "no vault key configured: set [vault].key or {}",
                VAULT_KEY_ENV
            )
        })?;
        Ok(CredentialVault::from_key_material(&key)?)
    }

    /// This instance plus the configured dead ones.
    pub fn recovery_owners(&self) -> Vec<String> {
        let mut owners = vec![self.owner_id.clone()];
        for id in &self.dead_owner_ids {
            if !owners.contains(id) {
                owners.push(id.clone());
            }
        }
        owners
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("xferq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<XferqConfig> {
    load_or_init_at(&config_path()?)
}

pub fn load_or_init_at(path: &Path) -> Result<XferqConfig> {
    if !path.exists() {
        let default_cfg = XferqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: XferqConfig =
        toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = XferqConfig::default();
        assert!(cfg.owner_id.starts_with("xferq-"));
        assert_eq!(cfg.store.max_connections, 8);
        assert_eq!(cfg.worker.max_concurrent_tasks, 4);
        assert_eq!(cfg.worker.claim_staleness(), Duration::from_secs(300));
        assert!(cfg.retry.is_none());
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let cfg: XferqConfig = toml::from_str(r#"owner_id = "node-a""#).unwrap();
        assert_eq!(cfg.owner_id, "node-a");
        assert!(cfg.dead_owner_ids.is_empty());
        assert_eq!(cfg.worker.poll_interval(), Duration::from_secs(2));
        assert!(cfg.vault.key.is_none());
    }

    #[test]
    fn config_toml_sections() {
        let toml = r#"
            owner_id = "node-a"
            dead_owner_ids = ["node-b", "node-a"]

            [store]
            path = "/var/lib/xferq/tasks.db"
            max_connections = 2

            [vault]
            key = "correct horse"

            [worker]
            poll_interval_ms = 500
            claim_staleness_secs = 60
            max_concurrent_tasks = 16
            destination_filter = "CLOUD_BUCKET"

            [retry]
            max_attempts = 3
            base_delay_secs = 0.5
            max_delay_secs = 15
        "#;
        let cfg: XferqConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.store.path, Some(PathBuf::from("/var/lib/xferq/tasks.db")));
        assert_eq!(cfg.store.max_connections, 2);
        assert_eq!(cfg.vault.key.as_deref(), Some("correct horse"));
        assert_eq!(cfg.worker.destination_filter, Some(DestinationType::CloudBucket));
        assert_eq!(cfg.worker.max_concurrent_tasks, 16);
        assert_eq!(cfg.worker.token_retention_days, 30);
        assert_eq!(cfg.retry.as_ref().unwrap().max_attempts, 3);
        assert_eq!(cfg.recovery_owners(), vec!["node-a", "node-b"]);
    }

    #[test]
    fn load_or_init_writes_and_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let created = load_or_init_at(&path).unwrap();
        assert!(path.exists());
        let reread = load_or_init_at(&path).unwrap();
        assert_eq!(created.owner_id, reread.owner_id);
    }

    #[test]
    fn vault_requires_a_key() {
        let mut cfg: XferqConfig = toml::from_str(r#"owner_id = "n""#).unwrap();
        if std::env::var(VAULT_KEY_ENV).is_err() {
            assert!(cfg.build_vault().is_err());
        }
        cfg.vault.key = Some("k".into());
        assert!(cfg.build_vault().is_ok());
    }
}
