//! Instance network attachment reconciliation
//!
//! The delta is computed by [`NetworkPlan`] from a fresh observation, then
//! applied one mutation at a time: drift first, then managed detaches, then
//! attaches. Connect and disconnect failures abort the run. A verification
//! poll that runs out only produces a warning since the mutation was already
//! accepted.

use crate::api::{InstanceNetwork, VirakApi};
use cloudwright_cloud::{
    AttachmentRecord, CloudError, Diagnostics, PollOutcome, PollSpec, ReconcileConfig,
    ResourceRef, Result, poll_for, poll_until,
};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Convert an API attachment into a record
pub fn attachment_record(zone_id: &str, attachment: &InstanceNetwork) -> AttachmentRecord {
    AttachmentRecord {
        instance: ResourceRef::new(zone_id, &attachment.instance_id),
        network: ResourceRef::new(zone_id, &attachment.network_id),
        attachment_id: attachment.id.clone(),
        is_default: attachment.is_default,
        ip_address: attachment.ip_address.clone(),
        mac_address: attachment.mac_address.clone(),
    }
}

/// Order default first, then by network id, keeping the first record per
/// network
pub fn order_attachments(mut records: Vec<AttachmentRecord>) -> Vec<AttachmentRecord> {
    records.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.network.id.cmp(&b.network.id))
    });

    let mut seen = HashSet::new();
    records.retain(|r| seen.insert(r.network.id.clone()));
    records
}

/// The instance's address: the default interface's IP, else the first
/// non-empty one
pub fn primary_ip(records: &[AttachmentRecord]) -> Option<String> {
    records
        .iter()
        .find(|r| r.is_default && !r.ip_address.is_empty())
        .or_else(|| records.iter().find(|r| !r.ip_address.is_empty()))
        .map(|r| r.ip_address.clone())
}

/// Attach / detach delta for one instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkPlan {
    /// Observed attachments nobody manages; detached before anything else
    pub drift: Vec<AttachmentRecord>,

    /// Managed attachments no longer desired
    pub to_detach: Vec<AttachmentRecord>,

    /// Desired networks not attached yet
    pub to_attach: Vec<String>,

    /// Default interface that would have been detached and is kept instead
    pub retained_default: Option<AttachmentRecord>,

    /// No desired network carries the default flag
    pub needs_new_default: bool,

    /// Networks to detach that are no longer observed
    pub already_detached: Vec<String>,
}

impl NetworkPlan {
    /// Compute the delta.
    ///
    /// Drift is `observed - desired - prior`; it is folded into the managed
    /// set, so `to_detach` covers `prior - desired` and `to_attach` covers
    /// `desired - prior - drift`. Networks already observed are never
    /// attached again and the default interface is never detached.
    pub fn compute(
        desired: &BTreeSet<String>,
        observed: &[AttachmentRecord],
        prior: &BTreeSet<String>,
    ) -> Result<Self> {
        if desired.is_empty() {
            return Err(CloudError::InvariantViolation(
                "at least one network must remain attached to the instance".into(),
            ));
        }

        let mut plan = NetworkPlan::default();
        let mut observed_networks = BTreeSet::new();

        for record in observed {
            let network_id = &record.network.id;
            if !observed_networks.insert(network_id.clone()) {
                continue;
            }
            if desired.contains(network_id) {
                continue;
            }

            if record.is_default {
                plan.retained_default = Some(record.clone());
            } else if prior.contains(network_id) {
                plan.to_detach.push(record.clone());
            } else {
                plan.drift.push(record.clone());
            }
        }

        plan.already_detached = prior
            .iter()
            .filter(|id| !desired.contains(*id) && !observed_networks.contains(*id))
            .cloned()
            .collect();

        plan.to_attach = desired
            .iter()
            .filter(|id| !observed_networks.contains(*id))
            .cloned()
            .collect();

        if plan.retained_default.is_some() {
            plan.needs_new_default = !observed
                .iter()
                .any(|r| r.is_default && desired.contains(&r.network.id));
        }

        Ok(plan)
    }

    /// Whether applying the plan issues any mutation
    pub fn is_empty(&self) -> bool {
        self.drift.is_empty() && self.to_detach.is_empty() && self.to_attach.is_empty()
    }

    /// Every attachment the plan will disconnect, in order
    pub fn detachments(&self) -> impl Iterator<Item = &AttachmentRecord> {
        self.drift.iter().chain(self.to_detach.iter())
    }
}

/// Applies network plans for one instance.
///
/// Callers hold the instance lock.
pub struct NetworkReconciler<'a> {
    api: &'a dyn VirakApi,
    zone_id: &'a str,
    instance_id: &'a str,
    config: &'a ReconcileConfig,
}

impl<'a> NetworkReconciler<'a> {
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

    /// Bring the instance's attachments to `desired` and return the fresh,
    /// ordered observation.
    pub async fn reconcile(
        &self,
        desired: &BTreeSet<String>,
        prior: &BTreeSet<String>,
        diags: &mut Diagnostics,
    ) -> Result<Vec<AttachmentRecord>> {
        if desired.is_empty() {
            return Err(CloudError::InvariantViolation(format!(
                "instance {} must keep at least one network attached",
                self.instance_id
            )));
        }

        let observed = self.observe().await?;
        let plan = NetworkPlan::compute(desired, &observed, prior)?;
        if plan.is_empty() && plan.retained_default.is_none() && plan.already_detached.is_empty() {
            debug!(instance = %self.instance_id, "Network attachments already match");
            return Ok(observed);
        }

        if let Some(default) = &plan.retained_default {
            info!(
                instance = %self.instance_id,
                network = %default.network.id,
                "Keeping default network attached"
            );
            if plan.needs_new_default {
                diags.warning(
                    "Default Network Change",
                    format!(
                        "Network '{}' is the default interface of instance '{}' and will not be disconnected. None of the desired networks is the default, so a new default network will need to be assigned.",
                        default.network.id, self.instance_id
                    ),
                );
            }
        }

        for record in &plan.drift {
            warn!(
                instance = %self.instance_id,
                network = %record.network.id,
                "Detaching unmanaged network attachment"
            );
            diags.warning(
                "Unmanaged Network Attachment",
                format!(
                    "Instance '{}' is attached to network '{}' which is not managed; detaching it.",
                    self.instance_id, record.network.id
                ),
            );
        }

        for network_id in &plan.already_detached {
            diags.warning(
                "Network Already Detached",
                format!(
                    "Network '{}' is no longer attached to instance '{}'.",
                    network_id, self.instance_id
                ),
            );
        }

        for record in plan.detachments() {
            self.detach(record, diags).await?;
        }

        for network_id in &plan.to_attach {
            self.attach(network_id, diags).await?;
        }

        self.observe().await
    }

    /// Fresh attachments of this instance, ordered and de-duplicated.
    ///
    /// A network deleted since the listing is skipped. Any other listing
    /// failure aborts; a partial view must never feed a plan.
    pub async fn observe(&self) -> Result<Vec<AttachmentRecord>> {
        self.collect(None).await
    }

    /// Like [`observe`](Self::observe), but a network whose attachments
    /// cannot be listed is skipped with a warning.
    pub async fn observe_lenient(&self, diags: &mut Diagnostics) -> Result<Vec<AttachmentRecord>> {
        self.collect(Some(diags)).await
    }

    async fn collect(&self, mut lenient: Option<&mut Diagnostics>) -> Result<Vec<AttachmentRecord>> {
        let networks = self
            .api
            .list_networks(self.zone_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to list networks in zone {}", self.zone_id), e))?;

        let mut records = Vec::new();
        for network in &networks {
            let attachments = match self
                .api
                .list_network_instances(self.zone_id, &network.id, Some(self.instance_id))
                .await
            {
                Ok(attachments) => attachments,
                Err(err) if err.is_not_found() => {
                    debug!(network = %network.id, "Network deleted during observation");
                    continue;
                }
                Err(err) => match lenient.as_deref_mut() {
                    Some(diags) => {
                        warn!(network = %network.id, error = %err, "Skipping network during observation");
                        diags.warning(
                            "Network Listing Incomplete",
                            format!(
                                "Unable to list attachments of network '{}' for instance '{}': {}",
                                network.id, self.instance_id, err
                            ),
                        );
                        continue;
                    }
                    None => {
                        return Err(CloudError::api(
                            format!(
                                "Unable to list attachments of network {} for instance {}",
                                network.id, self.instance_id
                            ),
                            err,
                        ));
                    }
                },
            };

            records.extend(
                attachments
                    .iter()
                    .filter(|a| a.instance_id == self.instance_id)
                    .map(|a| attachment_record(self.zone_id, a)),
            );
        }

        let records = order_attachments(records);
        debug!(instance = %self.instance_id, count = records.len(), "Observed network attachments");
        Ok(records)
    }

    /// Disconnect one attachment and wait until it is gone
    pub async fn detach(&self, record: &AttachmentRecord, diags: &mut Diagnostics) -> Result<()> {
        let network_id = record.network.id.as_str();
        info!(instance = %self.instance_id, network = %network_id, "Disconnecting network");

        self.api
            .disconnect_instance_from_network(
                self.zone_id,
                network_id,
                self.instance_id,
                &record.attachment_id,
            )
            .await
            .map_err(|e| {
                CloudError::api(
                    format!(
                        "Unable to disconnect instance {} from network {}",
                        self.instance_id, network_id
                    ),
                    e,
                )
            })?;

        if !self.wait_for_detachment(network_id, &record.attachment_id).await {
            diags.warning(
                "Network Disconnection Timeout",
                format!(
                    "Instance '{}' disconnection from network '{}' was not verified within {} attempts. The disconnection may still be in progress.",
                    self.instance_id, network_id, self.config.network_connection.max_attempts
                ),
            );
        }
        Ok(())
    }

    /// Connect one network and wait for its attachment record
    pub async fn attach(
        &self,
        network_id: &str,
        diags: &mut Diagnostics,
    ) -> Result<Option<AttachmentRecord>> {
        info!(instance = %self.instance_id, network = %network_id, "Connecting network");

        self.api
            .connect_instance_to_network(self.zone_id, network_id, self.instance_id)
            .await
            .map_err(|e| {
                CloudError::api(
                    format!(
                        "Unable to connect instance {} to network {}",
                        self.instance_id, network_id
                    ),
                    e,
                )
            })?;

        match self.wait_for_attachment(network_id).await {
            PollOutcome::Satisfied(record) => Ok(Some(record)),
            _ => {
                diags.warning(
                    "Network Connection Timeout",
                    format!(
                        "Instance '{}' connection to network '{}' was not established within {} attempts. The connection may still be provisioning.",
                        self.instance_id, network_id, self.config.network_connection.max_attempts
                    ),
                );
                Ok(None)
            }
        }
    }

    /// Wait for networks requested at creation time. Missing connections are
    /// fatal here.
    pub async fn await_connections(&self, network_ids: &[String]) -> Result<Vec<AttachmentRecord>> {
        let mut records = Vec::with_capacity(network_ids.len());
        for network_id in network_ids {
            let record = self
                .wait_for_attachment(network_id)
                .await
                .into_result_with(|attempts| {
                    CloudError::Timeout(format!(
                        "instance {} was created but network {} connection was not established after {} attempts",
                        self.instance_id, network_id, attempts
                    ))
                })?;
            records.push(record);
        }
        Ok(order_attachments(records))
    }

    /// Disconnect every non-default network before deletion. Failures are
    /// only warnings.
    pub async fn disconnect_all(&self, diags: &mut Diagnostics) {
        let observed = match self.observe_lenient(diags).await {
            Ok(observed) => observed,
            Err(err) => {
                diags.warning(
                    "Network Listing Failed",
                    format!(
                        "Unable to list networks in zone {} before deleting instance '{}': {}. Networks may need manual cleanup.",
                        self.zone_id, self.instance_id, err
                    ),
                );
                return;
            }
        };

        for record in observed.iter().filter(|r| !r.is_default) {
            if let Err(err) = self.detach(record, diags).await {
                diags.warn_error("Network Disconnection Failed", &err);
            }
        }
    }

    fn attachment_poll(&self) -> PollSpec {
        self.config.network_connection
    }

    /// Poll until the network shows an attachment for this instance.
    /// Listing errors count as "not yet".
    async fn wait_for_attachment(&self, network_id: &str) -> PollOutcome<AttachmentRecord> {
        let (api, zone_id, instance_id) = (self.api, self.zone_id, self.instance_id);

        poll_for(self.attachment_poll(), move || async move {
            match api
                .list_network_instances(zone_id, network_id, Some(instance_id))
                .await
            {
                Ok(attachments) => Ok(attachments
                    .iter()
                    .find(|a| a.instance_id == instance_id && a.network_id == network_id)
                    .map(|a| attachment_record(zone_id, a))),
                Err(err) => {
                    debug!(network = %network_id, error = %err, "Attachment check failed");
                    Ok(None)
                }
            }
        })
        .await
    }

    /// Poll until `attachment_id` is gone. Returns whether that was seen.
    async fn wait_for_detachment(&self, network_id: &str, attachment_id: &str) -> bool {
        let (api, zone_id, instance_id) = (self.api, self.zone_id, self.instance_id);

        poll_until(self.attachment_poll(), move || async move {
            match api
                .list_network_instances(zone_id, network_id, Some(instance_id))
                .await
            {
                Ok(attachments) => Ok(!attachments
                    .iter()
                    .any(|a| a.id == attachment_id && a.instance_id == instance_id)),
                Err(err) => {
                    debug!(network = %network_id, error = %err, "Detachment check failed");
                    Ok(false)
                }
            }
        })
        .await
        .is_satisfied()
    }
}
