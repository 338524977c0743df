//! Standalone volume entry points
//!
//! A standalone volume is attached to at most one instance. Moving it between
//! instances and deleting it both go through `ALLOCATED`.

use crate::api::VolumeSummary;
use crate::provider::VirakProvider;
use crate::status::{VOLUME_ALLOCATED, is_stable, normalize_volume_status};
use crate::volume_attachments::VolumeReconciler;
use cloudwright_cloud::{
    ApiErrorKind, CloudError, Diagnostics, PollOutcome, PollSpec, ResourceKind, ResourceRef,
    Result, VolumeLifecycleState, VolumeSpec, find_new, poll_until, snapshot_ids,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Desired standalone volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeResourceSpec {
    pub zone_id: String,
    #[serde(flatten)]
    pub volume: VolumeSpec,

    /// Instance to attach to, if any
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeState {
    pub volume: ResourceRef,
    pub name: String,
    pub size: u64,

    /// Not reported by the API; carried over from `VolumeResourceSpec`
    pub service_offering_id: String,

    pub status: String,
    pub attached_instance_id: Option<String>,
}

impl VolumeState {
    fn apply_summary(&mut self, summary: &VolumeSummary) {
        self.name = summary.name.clone();
        self.size = summary.size;
        self.status = summary.status.clone();
        self.attached_instance_id = holder_of(summary, self.attached_instance_id.as_deref());
    }
}

/// The instance holding a volume. When the listing does not say, the last
/// known holder is kept unless the volume is free.
fn holder_of(summary: &VolumeSummary, last_known: Option<&str>) -> Option<String> {
    summary
        .attached_instance_id
        .clone()
        .filter(|id| !id.is_empty())
        .or_else(|| {
            let free = normalize_volume_status(&summary.status) == VolumeLifecycleState::Allocated;
            if free { None } else { last_known.map(str::to_string) }
        })
}

impl VirakProvider {
    /// Create a volume and optionally attach it
    pub async fn create_volume(&self, spec: &VolumeResourceSpec, diags: &mut Diagnostics) -> Result<VolumeState> {
        let zone_id = spec.zone_id.as_str();
        let volume = &spec.volume;
        if volume.name.is_empty() {
            return Err(CloudError::InvalidConfig("volume name must not be empty".into()));
        }
        let _lock = self.lock(&[ResourceKind::Volume]).await;

        if let Some(instance_id) = spec.instance_id.as_deref() {
            self.api().show_instance(zone_id, instance_id).await.map_err(|e| {
                CloudError::InvalidConfig(format!(
                    "instance '{}' for volume '{}' cannot be used: {}",
                    instance_id, volume.name, e
                ))
            })?;
        }

        let before = self.list_zone_volumes(zone_id).await?;
        let existing = snapshot_ids(&before);

        info!(zone = %zone_id, name = %volume.name, size = volume.size, "Creating volume");
        self.api()
            .create_volume(zone_id, &volume.service_offering_id, volume.size, &volume.name)
            .await
            .map_err(|e| {
                CloudError::api(
                    format!(
                        "Failed to create volume '{}' in zone {} with offering {} and size {} GB",
                        volume.name, zone_id, volume.service_offering_id, volume.size
                    ),
                    e,
                )
            })?;

        let api = self.api();
        let volume_ref = find_new(
            zone_id,
            self.config().volume_discovery,
            move || api.list_volumes(zone_id),
            &existing,
            &volume.name,
        )
        .await?;

        self.wait_for_volume_status(zone_id, &volume_ref.id, VolumeLifecycleState::Allocated, self.config().volume_allocated)
            .await
            .into_result_with(|attempts| {
                CloudError::Timeout(format!(
                    "volume '{}' did not reach {} status after {} attempts",
                    volume_ref.id, VOLUME_ALLOCATED, attempts
                ))
            })?;

        let mut state = VolumeState {
            volume: volume_ref,
            name: volume.name.clone(),
            size: volume.size,
            service_offering_id: volume.service_offering_id.clone(),
            status: VOLUME_ALLOCATED.to_string(),
            attached_instance_id: None,
        };

        if let Some(instance_id) = spec.instance_id.as_deref() {
            self.attach_standalone(zone_id, &state.volume.id, instance_id, diags).await?;
            state.attached_instance_id = Some(instance_id.to_string());
            if let Ok(Some(summary)) = self.find_volume(zone_id, &state.volume.id).await {
                state.status = summary.status;
            }
        }

        Ok(state)
    }

    /// Refresh `prior`. Returns `None` when the volume is gone.
    pub async fn read_volume(&self, prior: &VolumeState) -> Result<Option<VolumeState>> {
        let Some(summary) = self.find_volume(&prior.volume.zone_id, &prior.volume.id).await? else {
            debug!(volume = %prior.volume, "Volume no longer exists");
            return Ok(None);
        };

        let mut state = prior.clone();
        state.apply_summary(&summary);
        Ok(Some(state))
    }

    /// Move the volume to `target`, or detach it when `target` is `None`.
    ///
    /// Both instances must be in a stable power state first.
    pub async fn move_volume_attachment(
        &self,
        prior: &VolumeState,
        target: Option<&str>,
        diags: &mut Diagnostics,
    ) -> Result<VolumeState> {
        let zone_id = prior.volume.zone_id.as_str();
        let volume_id = prior.volume.id.as_str();
        let _lock = self.lock(&[ResourceKind::Volume]).await;

        let summary = self.require_volume(zone_id, volume_id).await?;
        let holder = holder_of(&summary, prior.attached_instance_id.as_deref());

        if holder.as_deref() != target {
            if let Some(holder) = holder.as_deref() {
                self.wait_instance_stable(zone_id, holder).await?;

                info!(volume = %volume_id, instance = %holder, "Detaching volume");
                self.api()
                    .detach_volume(zone_id, volume_id, holder)
                    .await
                    .map_err(|e| {
                        CloudError::api(
                            format!("Failed to detach volume '{}' from instance '{}'", volume_id, holder),
                            e,
                        )
                    })?;

                let freed = self
                    .wait_for_volume_status(zone_id, volume_id, VolumeLifecycleState::Allocated, self.config().volume_detach)
                    .await;
                if !freed.is_satisfied() {
                    diags.warning(
                        "Volume Detachment Timeout",
                        format!(
                            "Volume '{}' detachment from instance '{}' did not complete. The volume may still be detaching.",
                            volume_id, holder
                        ),
                    );
                }
            }

            if let Some(target) = target {
                self.wait_instance_stable(zone_id, target).await?;
                self.attach_standalone(zone_id, volume_id, target, diags).await?;
            }
        } else {
            debug!(volume = %volume_id, "Volume attachment unchanged");
        }

        let summary = self.require_volume(zone_id, volume_id).await?;
        let mut state = prior.clone();
        state.apply_summary(&summary);
        state.attached_instance_id = target.map(str::to_string);
        Ok(state)
    }

    /// Detach the volume from its holder and delete it once `ALLOCATED`
    pub async fn delete_volume(&self, state: &VolumeState, diags: &mut Diagnostics) -> Result<()> {
        let zone_id = state.volume.zone_id.as_str();
        let volume_id = state.volume.id.as_str();
        let _lock = self.lock(&[ResourceKind::Volume]).await;

        let Some(summary) = self.find_volume(zone_id, volume_id).await? else {
            debug!(volume = %state.volume, "Volume already deleted");
            return Ok(());
        };

        if let Some(holder) = holder_of(&summary, state.attached_instance_id.as_deref()) {
            self.detach_before_delete(state, &holder, diags).await?;
        }

        let fresh = self.find_volume(zone_id, volume_id).await?;
        let status = fresh.map(|v| v.status).unwrap_or_default();
        if normalize_volume_status(&status) != VolumeLifecycleState::Allocated {
            return Err(CloudError::InvariantViolation(format!(
                "volume '{}' ({}) has status '{}' and cannot be deleted; expected {}",
                state.name, volume_id, status, VOLUME_ALLOCATED
            )));
        }

        info!(volume = %state.volume, "Deleting volume");
        match self.api().delete_volume(zone_id, volume_id).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(CloudError::api(
                format!("Failed to delete volume '{}' ({})", state.name, volume_id),
                err,
            )),
        }
    }

    /// Detach ahead of deletion.
    ///
    /// A vanished holder or an unclassified failure is only a warning; the
    /// status check before the delete still guards it. Permission and
    /// conflict failures stop the deletion.
    async fn detach_before_delete(&self, state: &VolumeState, holder: &str, diags: &mut Diagnostics) -> Result<()> {
        let zone_id = state.volume.zone_id.as_str();
        let volume_id = state.volume.id.as_str();
        info!(volume = %volume_id, instance = %holder, "Detaching volume before delete");

        match self.api().detach_volume(zone_id, volume_id, holder).await {
            Ok(()) => self
                .wait_for_volume_status(zone_id, volume_id, VolumeLifecycleState::Allocated, self.config().volume_detach)
                .await
                .into_result(format!(
                    "detachment of volume '{}' ({}) from instance '{}'",
                    state.name, volume_id, holder
                )),
            Err(err) => match err.api_kind() {
                ApiErrorKind::NotFound => {
                    diags.warning(
                        "Volume Detachment Skipped",
                        format!(
                            "Volume '{}' ({}) is attached to instance '{}' but the instance appears to be destroyed. Proceeding with deletion: {}",
                            state.name, volume_id, holder, err
                        ),
                    );
                    Ok(())
                }
                ApiErrorKind::NotAttached => {
                    debug!(volume = %volume_id, instance = %holder, "Volume already detached");
                    Ok(())
                }
                ApiErrorKind::Forbidden => Err(CloudError::api(
                    format!(
                        "Cannot detach volume '{}' ({}) from instance '{}', permission denied",
                        state.name, volume_id, holder
                    ),
                    err,
                )),
                ApiErrorKind::Conflict => Err(CloudError::api(
                    format!(
                        "Volume '{}' ({}) is in use by instance '{}' and cannot be detached",
                        state.name, volume_id, holder
                    ),
                    err,
                )),
                ApiErrorKind::NetworkConnected | ApiErrorKind::Other => {
                    warn!(volume = %volume_id, error = %err, "Detach failed, attempting delete anyway");
                    diags.warning(
                        "Volume Detachment Failed",
                        format!(
                            "Failed to detach volume '{}' ({}) from instance '{}'. Proceeding with deletion attempt: {}",
                            state.name, volume_id, holder, err
                        ),
                    );
                    Ok(())
                }
            },
        }
    }

    async fn attach_standalone(
        &self,
        zone_id: &str,
        volume_id: &str,
        instance_id: &str,
        diags: &mut Diagnostics,
    ) -> Result<()> {
        info!(volume = %volume_id, instance = %instance_id, "Attaching volume");
        self.api()
            .attach_volume(zone_id, volume_id, instance_id)
            .await
            .map_err(|e| {
                CloudError::api(
                    format!("Failed to attach volume '{}' to instance '{}'", volume_id, instance_id),
                    e,
                )
            })?;

        VolumeReconciler::new(self.api(), zone_id, instance_id, self.config())
            .wait_while_attaching(volume_id, diags)
            .await;
        Ok(())
    }

    async fn wait_instance_stable(&self, zone_id: &str, instance_id: &str) -> Result<()> {
        let api = self.api();
        poll_until(self.config().instance_status, move || async move {
            let detail = api.show_instance(zone_id, instance_id).await?;
            Ok(is_stable(&detail.status))
        })
        .await
        .into_result(format!("instance '{}' to reach a stable state", instance_id))
    }

    async fn wait_for_volume_status(
        &self,
        zone_id: &str,
        volume_id: &str,
        target: VolumeLifecycleState,
        spec: PollSpec,
    ) -> PollOutcome<()> {
        let api = self.api();
        poll_until(spec, move || async move {
            let volumes = api.list_volumes(zone_id).await?;
            Ok(volumes
                .iter()
                .any(|v| v.id == volume_id && normalize_volume_status(&v.status) == target))
        })
        .await
    }

    async fn list_zone_volumes(&self, zone_id: &str) -> Result<Vec<VolumeSummary>> {
        self.api()
            .list_volumes(zone_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to list volumes in zone {}", zone_id), e))
    }

    async fn find_volume(&self, zone_id: &str, volume_id: &str) -> Result<Option<VolumeSummary>> {
        Ok(self
            .list_zone_volumes(zone_id)
            .await?
            .into_iter()
            .find(|v| v.id == volume_id))
    }

    async fn require_volume(&self, zone_id: &str, volume_id: &str) -> Result<VolumeSummary> {
        self.find_volume(zone_id, volume_id).await?.ok_or_else(|| {
            CloudError::ResourceNotFound(format!("volume '{}' in zone {}", volume_id, zone_id))
        })
    }
}
