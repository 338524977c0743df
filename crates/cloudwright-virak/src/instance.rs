//! Instance entry points
//!
//! Every mutating entry point holds the instance and volume locks for its
//! whole run: instance creation is discovered by diffing the instance list
//! and initial volumes are discovered by diffing the volume list.

use crate::api::{CreateInstanceRequest, InstanceDetail};
use crate::lifecycle::{DesiredState, LifecycleController};
use crate::network_attachments::{NetworkReconciler, primary_ip};
use crate::plan::{LifecyclePlan, plan_lifecycle};
use crate::provider::VirakProvider;
use crate::status::INSTANCE_UP;
use crate::volume_attachments::VolumeReconciler;
use cloudwright_cloud::{
    AttachmentRecord, CloudError, Diagnostics, PollOutcome, ResourceKind, ResourceRef, Result,
    VolumeSpec, find_new, poll_until, snapshot_ids,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Longest instance name the API accepts
pub const MAX_INSTANCE_NAME_LEN: usize = 63;

const UNKNOWN_CREDENTIAL: &str = "unknown";

/// Desired configuration of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub zone_id: String,
    pub name: String,
    pub service_offering_id: String,
    pub vm_image_id: String,

    /// Networks to attach, in request order. The first one becomes the
    /// default interface at creation.
    pub network_ids: Vec<String>,

    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,

    #[serde(default)]
    pub desired_state: Option<DesiredState>,
}

impl InstanceSpec {
    pub fn desired_networks(&self) -> BTreeSet<String> {
        self.network_ids.iter().cloned().collect()
    }

    /// Checks that must pass before any mutation
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CloudError::InvalidConfig("instance name must not be empty".into()));
        }
        if self.name.len() > MAX_INSTANCE_NAME_LEN {
            return Err(CloudError::InvalidConfig(format!(
                "instance name must be {} characters or less",
                MAX_INSTANCE_NAME_LEN
            )));
        }
        if self.network_ids.is_empty() {
            return Err(CloudError::InvariantViolation(format!(
                "instance '{}' must have at least one network",
                self.name
            )));
        }
        Ok(())
    }
}

/// Observed state of an instance after an entry point ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub instance: ResourceRef,
    pub name: String,
    pub service_offering_id: String,
    pub vm_image_id: String,
    pub status: String,
    pub username: String,
    pub password: String,

    /// Attachments, default first
    pub networks: Vec<AttachmentRecord>,

    /// Networks this tool attached and therefore may detach
    pub managed_networks: BTreeSet<String>,

    pub ip_address: Option<String>,

    pub volumes: Vec<VolumeSpec>,
    pub volume_ids: Vec<String>,

    pub desired_state: Option<DesiredState>,
}

impl InstanceState {
    fn apply_detail(&mut self, detail: &InstanceDetail) {
        self.status = if detail.status.is_empty() {
            INSTANCE_UP.to_string()
        } else {
            detail.status.clone()
        };
        self.username = credential(&detail.username);
        self.password = credential(&detail.password);
    }

    fn apply_networks(&mut self, networks: Vec<AttachmentRecord>) {
        self.ip_address = primary_ip(&networks);
        self.networks = networks;
    }
}

fn credential(value: &str) -> String {
    if value.is_empty() {
        UNKNOWN_CREDENTIAL.to_string()
    } else {
        value.to_string()
    }
}

/// Preview the power-state operations an apply of `desired` would run
pub fn lifecycle_preview(prior: Option<&InstanceState>, desired: &InstanceSpec) -> Option<LifecyclePlan> {
    match prior {
        None => plan_lifecycle(None, desired.desired_state, false, true),
        Some(prior) => {
            let state_changed = prior.desired_state != desired.desired_state;
            let image_changed = prior.vm_image_id != desired.vm_image_id;
            if !state_changed && !image_changed {
                return None;
            }
            plan_lifecycle(
                Some(prior.status.as_str()),
                desired.desired_state,
                image_changed,
                false,
            )
        }
    }
}

impl VirakProvider {
    fn lifecycle<'a>(&'a self, zone_id: &'a str, instance_id: &'a str) -> LifecycleController<'a> {
        LifecycleController::new(self.api(), zone_id, instance_id, self.config().instance_status)
    }

    fn network_reconciler<'a>(&'a self, zone_id: &'a str, instance_id: &'a str) -> NetworkReconciler<'a> {
        NetworkReconciler::new(self.api(), zone_id, instance_id, self.config())
    }

    fn volume_reconciler<'a>(&'a self, zone_id: &'a str, instance_id: &'a str) -> VolumeReconciler<'a> {
        VolumeReconciler::new(self.api(), zone_id, instance_id, self.config())
    }

    /// Create an instance and bring it to `spec`
    pub async fn create_instance(&self, spec: &InstanceSpec, diags: &mut Diagnostics) -> Result<InstanceState> {
        spec.validate()?;
        let zone_id = spec.zone_id.as_str();
        let _lock = self.lock(&[ResourceKind::Instance, ResourceKind::Volume]).await;

        self.check_networks_exist(zone_id, &spec.network_ids).await?;

        let before = self
            .api()
            .list_instances(zone_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to list instances in zone {}", zone_id), e))?;
        let existing = snapshot_ids(&before);

        info!(zone = %zone_id, name = %spec.name, "Creating instance");
        let request = CreateInstanceRequest {
            name: spec.name.clone(),
            service_offering_id: spec.service_offering_id.clone(),
            vm_image_id: spec.vm_image_id.clone(),
            network_ids: spec.network_ids.clone(),
        };
        self.api()
            .create_instance(zone_id, &request)
            .await
            .map_err(|e| {
                CloudError::api(
                    format!("Failed to create instance '{}' in zone {}", spec.name, zone_id),
                    e,
                )
            })?;

        let api = self.api();
        let instance = find_new(
            zone_id,
            self.config().instance_discovery,
            move || api.list_instances(zone_id),
            &existing,
            &spec.name,
        )
        .await?;
        let instance_id = instance.id.as_str();
        info!(instance = %instance, "Instance created");

        let lifecycle = self.lifecycle(zone_id, instance_id);
        lifecycle.wait_for_ready().await?;

        let detail = self.show_instance(zone_id, instance_id).await?;
        let networks = self
            .network_reconciler(zone_id, instance_id)
            .await_connections(&spec.network_ids)
            .await?;
        let volume_ids = self
            .volume_reconciler(zone_id, instance_id)
            .create_all(&spec.volumes, diags)
            .await?;

        let mut state = InstanceState {
            instance: instance.clone(),
            name: spec.name.clone(),
            service_offering_id: spec.service_offering_id.clone(),
            vm_image_id: spec.vm_image_id.clone(),
            status: String::new(),
            username: String::new(),
            password: String::new(),
            networks: Vec::new(),
            managed_networks: spec.desired_networks(),
            ip_address: None,
            volumes: spec.volumes.clone(),
            volume_ids,
            desired_state: spec.desired_state,
        };
        state.apply_detail(&detail);
        state.apply_networks(networks);

        // A fresh instance is already up; only a stop changes anything
        if spec.desired_state == Some(DesiredState::Stopped) {
            state.status = lifecycle.ensure_stopped().await?;
        }

        Ok(state)
    }

    /// Refresh `prior` from the API. Returns `None` when the instance is gone.
    pub async fn read_instance(&self, prior: &InstanceState, diags: &mut Diagnostics) -> Result<Option<InstanceState>> {
        let zone_id = prior.instance.zone_id.as_str();
        let instance_id = prior.instance.id.as_str();

        let detail = match self.api().show_instance(zone_id, instance_id).await {
            Ok(detail) => detail,
            Err(err) if err.is_not_found() => {
                debug!(instance = %prior.instance, "Instance no longer exists");
                return Ok(None);
            }
            Err(err) => {
                return Err(CloudError::api(format!("Unable to read instance {}", instance_id), err));
            }
        };

        let mut state = prior.clone();
        state.apply_detail(&detail);
        state.volume_ids.retain(|id| detail.has_volume(id));

        match self.network_reconciler(zone_id, instance_id).observe().await {
            Ok(networks) => state.apply_networks(networks),
            Err(err) => {
                warn!(instance = %prior.instance, error = %err, "Keeping previous network attachments");
                diags.warning(
                    "Network Listing Failed",
                    format!(
                        "Unable to list networks for instance '{}', keeping the previous attachments: {}",
                        instance_id, err
                    ),
                );
            }
        }

        Ok(Some(state))
    }

    /// Move an existing instance from `prior` to `spec`.
    ///
    /// Order: rebuild, power state, networks, volumes, refresh.
    pub async fn update_instance(
        &self,
        prior: &InstanceState,
        spec: &InstanceSpec,
        diags: &mut Diagnostics,
    ) -> Result<InstanceState> {
        spec.validate()?;
        let zone_id = prior.instance.zone_id.as_str();
        let instance_id = prior.instance.id.as_str();
        let _lock = self.lock(&[ResourceKind::Instance, ResourceKind::Volume]).await;

        let lifecycle = self.lifecycle(zone_id, instance_id);
        if prior.vm_image_id != spec.vm_image_id {
            lifecycle.rebuild(&spec.vm_image_id).await?;
        }
        if prior.desired_state != spec.desired_state {
            if let Some(desired) = spec.desired_state {
                lifecycle.apply(desired, diags).await?;
            }
        }

        let desired_networks = spec.desired_networks();
        let networks = self
            .network_reconciler(zone_id, instance_id)
            .reconcile(&desired_networks, &prior.managed_networks, diags)
            .await?;

        let volume_ids = self
            .volume_reconciler(zone_id, instance_id)
            .reconcile(&spec.volumes, &prior.volumes, diags)
            .await?;

        let detail = self.show_instance(zone_id, instance_id).await?;

        let mut state = prior.clone();
        state.vm_image_id = spec.vm_image_id.clone();
        state.desired_state = spec.desired_state;
        state.managed_networks = desired_networks;
        state.volumes = spec.volumes.clone();
        state.volume_ids = volume_ids;
        state.apply_detail(&detail);
        state.apply_networks(networks);
        Ok(state)
    }

    /// Tear an instance down: volumes and extra networks first, then the
    /// instance itself
    pub async fn delete_instance(&self, state: &InstanceState, diags: &mut Diagnostics) -> Result<()> {
        let zone_id = state.instance.zone_id.as_str();
        let instance_id = state.instance.id.as_str();
        let _lock = self.lock(&[ResourceKind::Instance, ResourceKind::Volume]).await;

        match self.api().show_instance(zone_id, instance_id).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                debug!(instance = %state.instance, "Instance already deleted");
                return Ok(());
            }
            Err(err) => {
                return Err(CloudError::api(format!("Unable to read instance {}", instance_id), err));
            }
        }

        // Volumes can only be detached from a running instance
        if let Err(err) = self.lifecycle(zone_id, instance_id).ensure_running().await {
            if !err.is_timeout() {
                return Err(err);
            }
            diags.warn_error("Instance Start Timeout", &err);
        }

        self.volume_reconciler(zone_id, instance_id).detach_all(diags).await?;
        self.network_reconciler(zone_id, instance_id).disconnect_all(diags).await;

        info!(instance = %state.instance, "Deleting instance");
        match self.api().delete_instance(zone_id, instance_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(instance = %state.instance, "Instance vanished before delete");
                return Ok(());
            }
            Err(err) => {
                return Err(CloudError::api(format!("Failed to delete instance {}", instance_id), err));
            }
        }

        let api = self.api();
        let outcome = poll_until(self.config().instance_deletion, move || async move {
            let instances = api.list_instances(zone_id).await?;
            Ok(!instances.iter().any(|i| i.id == instance_id))
        })
        .await;

        match outcome {
            PollOutcome::Satisfied(()) => Ok(()),
            PollOutcome::Exhausted { attempts } => {
                diags.warning(
                    "Instance Deletion Not Confirmed",
                    format!(
                        "Instance '{}' was still listed after {} checks. The deletion may still be in progress.",
                        instance_id, attempts
                    ),
                );
                Ok(())
            }
            PollOutcome::Errored(err) => Err(err),
        }
    }

    async fn show_instance(&self, zone_id: &str, instance_id: &str) -> Result<InstanceDetail> {
        self.api()
            .show_instance(zone_id, instance_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to read instance {}", instance_id), e))
    }

    async fn check_networks_exist(&self, zone_id: &str, network_ids: &[String]) -> Result<()> {
        let networks = self
            .api()
            .list_networks(zone_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to list networks in zone {}", zone_id), e))?;

        let missing: Vec<&str> = network_ids
            .iter()
            .filter(|id| !networks.iter().any(|n| &n.id == *id))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CloudError::InvalidConfig(format!(
                "networks not found in zone {}: {}",
                zone_id,
                missing.join(", ")
            )))
        }
    }
}
