//! Instance data-volume reconciliation
//!
//! Volumes are matched by name. A name that disappears from the desired
//! list is detached and deleted; a new name is created and attached. Volumes
//! present on both sides are left alone, size and offering changes included.

use crate::api::{InstanceDetail, VirakApi, VolumeSummary};
use crate::status::{VOLUME_ALLOCATED, normalize_volume_status};
use cloudwright_cloud::{
    CloudError, Diagnostics, PollOutcome, ReconcileConfig, Result, VolumeLifecycleState,
    VolumeSpec, find_new, poll_until, snapshot_ids,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Presence delta between two named volume lists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumePlan {
    pub removed: Vec<VolumeSpec>,
    pub added: Vec<VolumeSpec>,
    pub kept: Vec<VolumeSpec>,
}

impl VolumePlan {
    /// Compare by name. Unnamed specs are ignored.
    pub fn compute(desired: &[VolumeSpec], existing: &[VolumeSpec]) -> Self {
        let desired_names: HashSet<&str> = desired
            .iter()
            .filter(|v| !v.name.is_empty())
            .map(|v| v.name.as_str())
            .collect();
        let existing_names: HashSet<&str> = existing
            .iter()
            .filter(|v| !v.name.is_empty())
            .map(|v| v.name.as_str())
            .collect();

        let mut plan = VolumePlan::default();
        for spec in existing.iter().filter(|v| !v.name.is_empty()) {
            if !desired_names.contains(spec.name.as_str()) {
                plan.removed.push(spec.clone());
            }
        }
        for spec in desired.iter().filter(|v| !v.name.is_empty()) {
            if existing_names.contains(spec.name.as_str()) {
                plan.kept.push(spec.clone());
            } else {
                plan.added.push(spec.clone());
            }
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// The volume called `name` that belongs to `instance_id`: one the instance
/// lists or one whose holder is the instance. Otherwise the only volume with
/// that name, if there is exactly one.
fn select_named<'v>(
    volumes: &'v [VolumeSummary],
    name: &str,
    instance_id: &str,
    held: &[String],
) -> Option<&'v VolumeSummary> {
    let named: Vec<&VolumeSummary> = volumes.iter().filter(|v| v.name == name).collect();
    named
        .iter()
        .copied()
        .find(|v| held.contains(&v.id) || v.attached_instance_id.as_deref() == Some(instance_id))
        .or(match named.as_slice() {
            [only] => Some(*only),
            _ => None,
        })
}

/// Applies volume plans for one instance.
///
/// Callers hold the instance and volume locks.
pub struct VolumeReconciler<'a> {
    api: &'a dyn VirakApi,
    zone_id: &'a str,
    instance_id: &'a str,
    config: &'a ReconcileConfig,
}

impl<'a> VolumeReconciler<'a> {
    pub fn new(
        api: &'a dyn VirakApi,
        zone_id: &'a str,
        instance_id: &'a str,
        config: &'a ReconcileConfig,
    ) -> Self {
        Self {
            api,
            zone_id,
            instance_id,
            config,
        }
    }

    /// Reconcile and return the ids of the desired volumes, in desired order.
    ///
    /// Removals run before additions. The first failure in either loop
    /// aborts; running again picks up where it stopped.
    pub async fn reconcile(
        &self,
        desired: &[VolumeSpec],
        existing: &[VolumeSpec],
        diags: &mut Diagnostics,
    ) -> Result<Vec<String>> {
        let plan = VolumePlan::compute(desired, existing);
        debug!(
            instance = %self.instance_id,
            removed = plan.removed.len(),
            added = plan.added.len(),
            kept = plan.kept.len(),
            "Volume plan"
        );

        for spec in &plan.removed {
            self.remove(&spec.name).await?;
        }

        let mut created = HashMap::new();
        for spec in &plan.added {
            let id = self.create_and_attach(spec, diags).await?;
            created.insert(spec.name.clone(), id);
        }

        self.resolve_ids(desired, created, diags).await
    }

    /// Create every spec in order and attach it
    pub async fn create_all(&self, specs: &[VolumeSpec], diags: &mut Diagnostics) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            ids.push(self.create_and_attach(spec, diags).await?);
        }
        Ok(ids)
    }

    /// Detach (when attached) and delete the volume called `name`.
    ///
    /// Deletion is only issued once the volume is seen `ALLOCATED`. When
    /// several volumes share the name and none belongs to this instance,
    /// nothing is touched.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let volumes = self.list_volumes().await?;
        if !volumes.iter().any(|v| v.name == name) {
            debug!(volume = %name, "Volume already gone");
            return Ok(());
        }

        let instance = self.show_instance("volume removal").await?;
        let Some(volume) = select_named(&volumes, name, self.instance_id, &instance.data_volumes) else {
            warn!(
                volume = %name,
                instance = %self.instance_id,
                "Several volumes share this name and none is attached to the instance; skipping removal"
            );
            return Ok(());
        };

        let mut detached = false;
        if instance.has_volume(&volume.id) {
            self.detach(&volume.id, name).await?;
            detached = true;
        }

        let known_allocated =
            !detached && normalize_volume_status(&volume.status) == VolumeLifecycleState::Allocated;
        if !known_allocated {
            self.wait_until_allocated(&volume.id, name).await?;
        }

        info!(volume = %volume.id, name = %name, "Deleting volume");
        self.api
            .delete_volume(self.zone_id, &volume.id)
            .await
            .map_err(|e| {
                CloudError::api(format!("Failed to delete volume '{}' ({})", name, volume.id), e)
            })?;
        Ok(())
    }

    /// Create, discover, attach. Returns the new volume id.
    pub async fn create_and_attach(&self, spec: &VolumeSpec, diags: &mut Diagnostics) -> Result<String> {
        let before = self.list_volumes().await?;
        let existing = snapshot_ids(&before);

        info!(name = %spec.name, size = spec.size, "Creating volume");
        self.api
            .create_volume(self.zone_id, &spec.service_offering_id, spec.size, &spec.name)
            .await
            .map_err(|e| {
                CloudError::api(
                    format!(
                        "Failed to create volume '{}' in zone {} with offering {} and size {} GB",
                        spec.name, self.zone_id, spec.service_offering_id, spec.size
                    ),
                    e,
                )
            })?;

        let api = self.api;
        let zone_id = self.zone_id;
        let volume = find_new(
            zone_id,
            self.config.volume_discovery,
            move || api.list_volumes(zone_id),
            &existing,
            &spec.name,
        )
        .await?;

        self.attach(&volume.id, diags).await?;
        Ok(volume.id)
    }

    /// Attach a volume and wait for the instance to list it. A timeout is
    /// only a warning.
    pub async fn attach(&self, volume_id: &str, diags: &mut Diagnostics) -> Result<()> {
        info!(volume = %volume_id, instance = %self.instance_id, "Attaching volume");
        self.api
            .attach_volume(self.zone_id, volume_id, self.instance_id)
            .await
            .map_err(|e| {
                CloudError::api(
                    format!(
                        "Failed to attach volume '{}' to instance '{}'",
                        volume_id, self.instance_id
                    ),
                    e,
                )
            })?;

        let outcome = self.poll_attached(volume_id, true).await;
        match outcome {
            PollOutcome::Satisfied(()) => Ok(()),
            PollOutcome::Exhausted { attempts } => {
                diags.warning(
                    "Volume Attachment Timeout",
                    format!(
                        "Volume '{}' attachment to instance '{}' was not confirmed after {} attempts.",
                        volume_id, self.instance_id, attempts
                    ),
                );
                Ok(())
            }
            PollOutcome::Errored(err) => Err(err),
        }
    }

    /// Detach a volume and wait until the instance no longer lists it
    pub async fn detach(&self, volume_id: &str, name: &str) -> Result<()> {
        info!(volume = %volume_id, instance = %self.instance_id, "Detaching volume");
        self.api
            .detach_volume(self.zone_id, volume_id, self.instance_id)
            .await
            .map_err(|e| {
                CloudError::api(
                    format!(
                        "Failed to detach volume '{}' ({}) from instance '{}'",
                        name, volume_id, self.instance_id
                    ),
                    e,
                )
            })?;

        self.poll_attached(volume_id, false)
            .await
            .into_result(format!(
                "detachment of volume '{}' ({}) from instance '{}'",
                name, volume_id, self.instance_id
            ))
    }

    /// Detach everything before the instance is deleted. Problems are
    /// warnings; the first failed detach stops the loop.
    pub async fn detach_all(&self, diags: &mut Diagnostics) -> Result<()> {
        let instance = self.show_instance("volume detachment").await?;

        for volume_id in &instance.data_volumes {
            self.wait_while_attaching(volume_id, diags).await;

            if let Err(err) = self.detach(volume_id, volume_id).await {
                if err.is_timeout() {
                    diags.warn_error("Volume Detachment Timeout", &err);
                    continue;
                }
                warn!(volume = %volume_id, error = %err, "Volume detach failed");
                diags.warn_error("Volume Detachment Warning", &err);
                break;
            }
        }
        Ok(())
    }

    /// Wait for a pending `ATTACHING` to settle. Timeouts are warnings; a
    /// volume missing from the listing counts as settled.
    pub async fn wait_while_attaching(&self, volume_id: &str, diags: &mut Diagnostics) {
        let (api, zone_id) = (self.api, self.zone_id);
        let outcome = poll_until(self.config.volume_attach, move || async move {
            let volumes = api.list_volumes(zone_id).await?;
            Ok(volumes
                .iter()
                .find(|v| v.id == volume_id)
                .is_none_or(|v| normalize_volume_status(&v.status) != VolumeLifecycleState::Attaching))
        })
        .await;

        if !outcome.is_satisfied() {
            diags.warning(
                "Volume Attachment Incomplete",
                format!("Volume '{}' remained in ATTACHING status for too long.", volume_id),
            );
        }
    }

    /// Poll until the volume reports `ALLOCATED`. Not getting there is an
    /// invariant violation: the volume must not be deleted.
    async fn wait_until_allocated(&self, volume_id: &str, name: &str) -> Result<()> {
        let (api, zone_id) = (self.api, self.zone_id);
        let outcome = poll_until(self.config.volume_allocated, move || async move {
            let volumes = api.list_volumes(zone_id).await?;
            Ok(volumes.iter().any(|v| {
                v.id == volume_id
                    && normalize_volume_status(&v.status) == VolumeLifecycleState::Allocated
            }))
        })
        .await;

        outcome.into_result_with(|attempts| {
            CloudError::InvariantViolation(format!(
                "volume '{}' ({}) is not in {} status after {} checks and cannot be deleted",
                name, volume_id, VOLUME_ALLOCATED, attempts
            ))
        })
    }

    /// Poll the instance's attached volume list until it does (or does not)
    /// contain `volume_id`
    async fn poll_attached(&self, volume_id: &str, attached: bool) -> PollOutcome<()> {
        let (api, zone_id, instance_id) = (self.api, self.zone_id, self.instance_id);
        let spec = if attached {
            self.config.volume_attach
        } else {
            self.config.volume_detach
        };

        poll_until(spec, move || async move {
            let instance = api.show_instance(zone_id, instance_id).await?;
            Ok(instance.has_volume(volume_id) == attached)
        })
        .await
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeSummary>> {
        self.api
            .list_volumes(self.zone_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to list volumes in zone {}", self.zone_id), e))
    }

    async fn show_instance(&self, purpose: &str) -> Result<InstanceDetail> {
        self.api
            .show_instance(self.zone_id, self.instance_id)
            .await
            .map_err(|e| {
                CloudError::api(
                    format!("Unable to read instance {} for {}", self.instance_id, purpose),
                    e,
                )
            })
    }

    /// Map desired names to ids. Names not created in this run are looked
    /// up once, preferring volumes the instance holds; anything still
    /// unresolved or ambiguous is left out with a warning.
    async fn resolve_ids(
        &self,
        desired: &[VolumeSpec],
        created: HashMap<String, String>,
        diags: &mut Diagnostics,
    ) -> Result<Vec<String>> {
        let mut lookup: Option<(Vec<VolumeSummary>, InstanceDetail)> = None;
        let mut ids = Vec::with_capacity(desired.len());

        for spec in desired.iter().filter(|v| !v.name.is_empty()) {
            if let Some(id) = created.get(&spec.name) {
                ids.push(id.clone());
                continue;
            }

            if lookup.is_none() {
                let volumes = self.list_volumes().await?;
                let instance = self.show_instance("volume lookup").await?;
                lookup = Some((volumes, instance));
            }
            let found = lookup.as_ref().and_then(|(volumes, instance)| {
                select_named(volumes, &spec.name, self.instance_id, &instance.data_volumes)
            });

            match found {
                Some(volume) => ids.push(volume.id.clone()),
                None => {
                    warn!(name = %spec.name, "Volume could not be resolved");
                    diags.warning(
                        "Volume Not Resolved",
                        format!(
                            "Volume '{}' of instance '{}' was not found or is ambiguous and is left out of the volume list.",
                            spec.name, self.instance_id
                        ),
                    );
                }
            }
        }
        Ok(ids)
    }
}
