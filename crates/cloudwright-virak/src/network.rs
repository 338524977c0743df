//! Private network entry points

use crate::api::{InstanceNetwork, NetworkSummary};
use crate::provider::VirakProvider;
use cloudwright_cloud::{
    ApiErrorKind, CloudError, Diagnostics, PollOutcome, ResourceKind, ResourceRef, Result,
    find_new, poll_until, retry_with_backoff, snapshot_ids,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Network flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    L2,
    /// Routed network; the API also calls it `Isolated`
    #[serde(alias = "Isolated")]
    L3,
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::L2 => write!(f, "L2"),
            NetworkType::L3 => write!(f, "L3"),
        }
    }
}

impl std::str::FromStr for NetworkType {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "L2" => Ok(NetworkType::L2),
            "L3" | "Isolated" => Ok(NetworkType::L3),
            other => Err(CloudError::InvalidConfig(format!(
                "network type must be L2, L3 or Isolated (got '{}')",
                other
            ))),
        }
    }
}

/// Desired network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub zone_id: String,
    pub name: String,
    pub network_offering_id: String,
    pub network_type: NetworkType,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub netmask: Option<String>,
}

impl NetworkSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CloudError::InvalidConfig("network name must not be empty".into()));
        }
        if self.network_type == NetworkType::L3 && (self.gateway.is_none() || self.netmask.is_none()) {
            return Err(CloudError::InvalidConfig(
                "gateway and netmask are required for L3/Isolated networks".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub network: ResourceRef,
    pub name: String,
    pub network_offering_id: String,
    pub network_type: NetworkType,
    pub gateway: Option<String>,
    pub netmask: Option<String>,
    pub status: String,
}

impl NetworkState {
    fn apply_summary(&mut self, summary: &NetworkSummary) {
        self.name = summary.name.clone();
        self.status = summary.status.clone();
        if summary.gateway.is_some() {
            self.gateway = summary.gateway.clone();
        }
        if summary.netmask.is_some() {
            self.netmask = summary.netmask.clone();
        }
    }
}

impl VirakProvider {
    /// Create a network and return it once it is listed
    pub async fn create_network(&self, spec: &NetworkSpec) -> Result<NetworkState> {
        spec.validate()?;
        let zone_id = spec.zone_id.as_str();
        let _lock = self.lock(&[ResourceKind::Network]).await;

        let before = self
            .api()
            .list_networks(zone_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to list networks in zone {}", zone_id), e))?;
        if before.iter().any(|n| n.name == spec.name) {
            return Err(CloudError::InvalidConfig(format!(
                "a network named '{}' already exists in zone {}",
                spec.name, zone_id
            )));
        }
        let existing = snapshot_ids(&before);

        info!(zone = %zone_id, name = %spec.name, network_type = %spec.network_type, "Creating network");
        let created = match (spec.network_type, &spec.gateway, &spec.netmask) {
            (NetworkType::L3, Some(gateway), Some(netmask)) => {
                self.api()
                    .create_l3_network(zone_id, &spec.network_offering_id, &spec.name, gateway, netmask)
                    .await
            }
            _ => {
                self.api()
                    .create_l2_network(zone_id, &spec.network_offering_id, &spec.name)
                    .await
            }
        };
        created.map_err(|e| {
            CloudError::api(
                format!("Failed to create network '{}' in zone {}", spec.name, zone_id),
                e,
            )
        })?;

        let api = self.api();
        let network = find_new(
            zone_id,
            self.config().network_discovery,
            move || api.list_networks(zone_id),
            &existing,
            &spec.name,
        )
        .await?;

        let mut state = NetworkState {
            network,
            name: spec.name.clone(),
            network_offering_id: spec.network_offering_id.clone(),
            network_type: spec.network_type,
            gateway: spec.gateway.clone(),
            netmask: spec.netmask.clone(),
            status: String::new(),
        };
        let summary = self
            .api()
            .show_network(zone_id, &state.network.id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to read network {}", state.network.id), e))?;
        state.apply_summary(&summary);
        Ok(state)
    }

    /// Refresh `prior`. Returns `None` when the network is gone.
    pub async fn read_network(&self, prior: &NetworkState) -> Result<Option<NetworkState>> {
        match self.api().show_network(&prior.network.zone_id, &prior.network.id).await {
            Ok(summary) => {
                let mut state = prior.clone();
                state.apply_summary(&summary);
                Ok(Some(state))
            }
            Err(err) if err.is_not_found() => {
                debug!(network = %prior.network, "Network no longer exists");
                Ok(None)
            }
            Err(err) => Err(CloudError::api(
                format!("Unable to read network {}", prior.network.id),
                err,
            )),
        }
    }

    /// Disconnect every instance except through its default interface, then
    /// delete the network.
    ///
    /// The delete is retried with backoff only while the API still reports
    /// connected instances.
    pub async fn delete_network(&self, state: &NetworkState, diags: &mut Diagnostics) -> Result<()> {
        let zone_id = state.network.zone_id.as_str();
        let network_id = state.network.id.as_str();
        let _lock = self.lock(&[ResourceKind::Network]).await;

        let attachments = match self.api().list_network_instances(zone_id, network_id, None).await {
            Ok(attachments) => attachments,
            Err(err) if err.is_not_found() => {
                debug!(network = %state.network, "Network already deleted");
                return Ok(());
            }
            Err(err) => {
                return Err(CloudError::api(
                    format!("Unable to list instances of network {}", network_id),
                    err,
                ));
            }
        };
        debug!(network = %state.network, count = attachments.len(), "Network attachments before delete");

        for attachment in attachments.iter().filter(|a| a.network_id == network_id) {
            if attachment.is_default {
                debug!(
                    instance = %attachment.instance_id,
                    attachment = %attachment.id,
                    "Skipping default interface"
                );
                continue;
            }
            self.release_attachment(zone_id, network_id, attachment, diags).await?;
        }

        let api = self.api();
        let released = poll_until(self.config().network_release, move || async move {
            Ok(match api.list_network_instances(zone_id, network_id, None).await {
                Ok(remaining) => !remaining.iter().any(|a| !a.is_default),
                Err(err) => {
                    debug!(network = %network_id, error = %err, "Release check failed");
                    false
                }
            })
        })
        .await;
        if !released.is_satisfied() {
            warn!(network = %network_id, "Could not verify network release, deleting anyway");
        }

        info!(network = %state.network, "Deleting network");
        let deleted = retry_with_backoff(
            &self.config().network_delete_retry,
            move || api.delete_network(zone_id, network_id),
            |err| err.api_kind() == ApiErrorKind::NetworkConnected,
        )
        .await;

        match deleted {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(network = %state.network, "Network already deleted");
                Ok(())
            }
            Err(err) => Err(CloudError::api(format!("Unable to delete network {}", network_id), err)),
        }
    }

    async fn release_attachment(
        &self,
        zone_id: &str,
        network_id: &str,
        attachment: &InstanceNetwork,
        diags: &mut Diagnostics,
    ) -> Result<()> {
        let instance_id = attachment.instance_id.as_str();
        let attachment_id = attachment.id.as_str();
        info!(instance = %instance_id, network = %network_id, "Disconnecting instance from network");

        self.api()
            .disconnect_instance_from_network(zone_id, network_id, instance_id, attachment_id)
            .await
            .map_err(|e| {
                CloudError::api(
                    format!(
                        "Unable to disconnect instance {} from network {}",
                        instance_id, network_id
                    ),
                    e,
                )
            })?;

        let api = self.api();
        let outcome = poll_until(self.config().network_connection, move || async move {
            Ok(match api.list_network_instances(zone_id, network_id, Some(instance_id)).await {
                Ok(remaining) => !remaining.iter().any(|a| a.id == attachment_id),
                Err(_) => false,
            })
        })
        .await;

        if let PollOutcome::Exhausted { attempts } = outcome {
            diags.warning(
                "Network Disconnection Timeout",
                format!(
                    "Instance '{}' disconnection from network '{}' was not verified after {} attempts.",
                    instance_id, network_id, attempts
                ),
            );
        }
        Ok(())
    }
}
