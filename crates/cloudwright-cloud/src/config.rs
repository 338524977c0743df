//! Reconciliation budgets
//!
//! Every wait has its own attempt budget. Defaults follow what the control
//! plane needs in practice; a JSON file can override any subset of them.

use crate::error::{CloudError, Result};
use crate::poll::{PollSpec, millis};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Environment variable naming a JSON config file
pub const CONFIG_PATH_ENV: &str = "CLOUDWRIGHT_CONFIG_PATH";

/// Retry configuration for operations that are re-issued with backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,

    /// Cap for the growing delay
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay to use after `current`
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_multiplier).min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

/// Poll budgets for every wait performed by the controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Instance status convergence (start / stop / reboot / rebuild / ready)
    pub instance_status: PollSpec,
    pub instance_discovery: PollSpec,
    /// Instance id disappearing after delete
    pub instance_deletion: PollSpec,

    /// Attachment appearing or disappearing after connect / disconnect
    pub network_connection: PollSpec,
    pub network_discovery: PollSpec,
    /// All non-default attachments gone before a network delete
    pub network_release: PollSpec,
    pub network_delete_retry: RetryConfig,

    pub volume_discovery: PollSpec,
    /// Volume reaching `ALLOCATED`
    pub volume_allocated: PollSpec,
    /// Volume showing up on the instance, or `ATTACHING` clearing
    pub volume_attach: PollSpec,
    pub volume_detach: PollSpec,

    pub bucket_discovery: PollSpec,
    pub cluster_discovery: PollSpec,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            instance_status: PollSpec::secs(120, 5),
            instance_discovery: PollSpec::secs(120, 5),
            instance_deletion: PollSpec::secs(100, 5),
            network_connection: PollSpec::secs(30, 1),
            network_discovery: PollSpec::secs(60, 5),
            network_release: PollSpec::secs(10, 2),
            network_delete_retry: RetryConfig::default(),
            volume_discovery: PollSpec::secs(10, 1),
            volume_allocated: PollSpec::secs(30, 1),
            volume_attach: PollSpec::secs(120, 5),
            volume_detach: PollSpec::secs(60, 5),
            bucket_discovery: PollSpec::secs(10, 5),
            cluster_discovery: PollSpec::secs(10, 5),
        }
    }
}

impl ReconcileConfig {
    /// Load from a JSON file. Missing keys keep their defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            CloudError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: ReconcileConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!("Loaded reconcile config from {}", path.display());
        Ok(config)
    }

    /// Load from `CLOUDWRIGHT_CONFIG_PATH` when set, defaults otherwise
    pub async fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(CloudError::InvalidConfig(format!(
                        "{} points to a missing file: {}",
                        CONFIG_PATH_ENV,
                        path.display()
                    )));
                }
                Self::load(path).await
            }
            _ => Ok(Self::default()),
        }
    }

    /// Write as pretty JSON
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content).await?;
        Ok(())
    }

    /// Reject budgets that could never be satisfied
    pub fn validate(&self) -> Result<()> {
        let polls = [
            ("instance_status", self.instance_status),
            ("instance_discovery", self.instance_discovery),
            ("instance_deletion", self.instance_deletion),
            ("network_connection", self.network_connection),
            ("network_discovery", self.network_discovery),
            ("network_release", self.network_release),
            ("volume_discovery", self.volume_discovery),
            ("volume_allocated", self.volume_allocated),
            ("volume_attach", self.volume_attach),
            ("volume_detach", self.volume_detach),
            ("bucket_discovery", self.bucket_discovery),
            ("cluster_discovery", self.cluster_discovery),
        ];
        for (name, spec) in polls {
            if spec.max_attempts == 0 {
                return Err(CloudError::InvalidConfig(format!(
                    "{}.max_attempts must be at least 1",
                    name
                )));
            }
        }

        let retry = &self.network_delete_retry;
        if retry.max_attempts == 0 {
            return Err(CloudError::InvalidConfig(
                "network_delete_retry.max_attempts must be at least 1".into(),
            ));
        }
        if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
            return Err(CloudError::InvalidConfig(
                "network_delete_retry.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        Ok(())
    }
}
