//! Instance power-state transitions
//!
//! Each transition issues at most one mutating call and then polls the
//! instance until its normalized status reaches the target class. Running
//! out of attempts yields [`CloudError::NotReady`] carrying the last
//! observed status; callers decide whether that is fatal.

use crate::api::VirakApi;
use crate::status::{INSTANCE_RUNNING, INSTANCE_STOPPED, INSTANCE_UP, is_ready, is_running, is_stopped};
use cloudwright_cloud::{CloudError, Diagnostics, PollOutcome, PollSpec, Result, poll_for};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Desired power state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Running,
    Stopped,
    /// Reboot once if running; a no-op otherwise
    Reboot,
}

impl std::fmt::Display for DesiredState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DesiredState::Running => write!(f, "running"),
            DesiredState::Stopped => write!(f, "stopped"),
            DesiredState::Reboot => write!(f, "reboot"),
        }
    }
}

impl std::str::FromStr for DesiredState {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(DesiredState::Running),
            "stopped" => Ok(DesiredState::Stopped),
            "reboot" => Ok(DesiredState::Reboot),
            other => Err(CloudError::InvalidConfig(format!(
                "desired state must be one of running, stopped, reboot (got '{}')",
                other
            ))),
        }
    }
}

/// Drives one instance through start / stop / reboot / rebuild
pub struct LifecycleController<'a> {
    api: &'a dyn VirakApi,
    zone_id: &'a str,
    instance_id: &'a str,
    poll: PollSpec,
}

impl<'a> LifecycleController<'a> {
    pub fn new(api: &'a dyn VirakApi, zone_id: &'a str, instance_id: &'a str, poll: PollSpec) -> Self {
        Self {
            api,
            zone_id,
            instance_id,
            poll,
        }
    }

    pub async fn current_status(&self) -> Result<String> {
        let detail = self
            .api
            .show_instance(self.zone_id, self.instance_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to read instance {}", self.instance_id), e))?;
        Ok(detail.status)
    }

    /// Start the instance unless it already runs. Returns the final status.
    pub async fn ensure_running(&self) -> Result<String> {
        let status = self.current_status().await?;
        if is_running(&status) {
            debug!(instance = %self.instance_id, %status, "Instance already running");
            return Ok(status);
        }

        info!(instance = %self.instance_id, %status, "Starting instance");
        self.api
            .start_instance(self.zone_id, self.instance_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to start instance {}", self.instance_id), e))?;

        self.wait_for_status(is_running, INSTANCE_RUNNING).await
    }

    /// Stop the instance if it runs, then wait for a stopped status.
    ///
    /// The wait happens even when no stop was issued; another actor may be
    /// moving the instance at the same time.
    pub async fn ensure_stopped(&self) -> Result<String> {
        let status = self.current_status().await?;
        if is_running(&status) {
            info!(instance = %self.instance_id, %status, "Stopping instance");
            self.api
                .stop_instance(self.zone_id, self.instance_id, false)
                .await
                .map_err(|e| {
                    CloudError::api(format!("Unable to stop instance {}", self.instance_id), e)
                })?;
        }

        self.wait_for_status(is_stopped, INSTANCE_STOPPED).await
    }

    /// Reboot a running instance. Anything else only records a warning.
    pub async fn reboot(&self, diags: &mut Diagnostics) -> Result<String> {
        let status = self.current_status().await?;
        if !is_running(&status) {
            diags.warning(
                "Reboot Skipped",
                format!(
                    "Instance '{}' is not running (status: {}), cannot reboot",
                    self.instance_id, status
                ),
            );
            return Ok(status);
        }

        info!(instance = %self.instance_id, "Rebooting instance");
        self.api
            .reboot_instance(self.zone_id, self.instance_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to reboot instance {}", self.instance_id), e))?;

        self.wait_for_status(is_running, INSTANCE_RUNNING).await
    }

    /// Replace the boot image. Only `UP` counts as done afterwards.
    pub async fn rebuild(&self, vm_image_id: &str) -> Result<String> {
        self.ensure_stopped().await?;

        info!(instance = %self.instance_id, image = %vm_image_id, "Rebuilding instance");
        self.api
            .rebuild_instance(self.zone_id, self.instance_id, vm_image_id)
            .await
            .map_err(|e| {
                CloudError::api(format!("Unable to rebuild instance {}", self.instance_id), e)
            })?;

        self.wait_for_ready().await
    }

    /// Wait for the exact ready status
    pub async fn wait_for_ready(&self) -> Result<String> {
        self.wait_for_status(is_ready, INSTANCE_UP).await
    }

    /// Move the instance towards `desired`
    pub async fn apply(&self, desired: DesiredState, diags: &mut Diagnostics) -> Result<String> {
        match desired {
            DesiredState::Running => self.ensure_running().await,
            DesiredState::Stopped => self.ensure_stopped().await,
            DesiredState::Reboot => self.reboot(diags).await,
        }
    }

    /// Poll until `accept` holds for the raw status
    pub async fn wait_for_status(&self, accept: fn(&str) -> bool, expected: &str) -> Result<String> {
        let last_status = Mutex::new(String::new());
        let (api, zone_id, instance_id, last) =
            (self.api, self.zone_id, self.instance_id, &last_status);

        let outcome = poll_for(self.poll, move || async move {
            let detail = api.show_instance(zone_id, instance_id).await?;
            *last.lock().await = detail.status.clone();
            Ok(accept(&detail.status).then_some(detail.status))
        })
        .await;

        match outcome {
            PollOutcome::Satisfied(status) => {
                debug!(instance = %self.instance_id, %status, "Instance reached status");
                Ok(status)
            }
            PollOutcome::Exhausted { .. } => Err(CloudError::NotReady {
                resource: "Instance",
                id: self.instance_id.to_string(),
                expected: expected.to_string(),
                status: last_status.into_inner(),
            }),
            PollOutcome::Errored(err) => Err(err),
        }
    }
}
