//! Virak Cloud control-plane interface
//!
//! The HTTP client lives outside this crate. Controllers only need the calls
//! below; every call is zone-scoped and mutations return as soon as the
//! request is accepted, before the effect is observable.

use async_trait::async_trait;
use cloudwright_cloud::{Listed, Result};
use serde::{Deserialize, Serialize};

/// Zone-scoped Virak Cloud API
#[async_trait]
pub trait VirakApi: Send + Sync {
    // Instances
    async fn list_instances(&self, zone_id: &str) -> Result<Vec<InstanceSummary>>;
    async fn show_instance(&self, zone_id: &str, instance_id: &str) -> Result<InstanceDetail>;
    async fn create_instance(&self, zone_id: &str, request: &CreateInstanceRequest) -> Result<()>;
    async fn start_instance(&self, zone_id: &str, instance_id: &str) -> Result<()>;
    async fn stop_instance(&self, zone_id: &str, instance_id: &str, forced: bool) -> Result<()>;
    async fn reboot_instance(&self, zone_id: &str, instance_id: &str) -> Result<()>;
    async fn rebuild_instance(
        &self,
        zone_id: &str,
        instance_id: &str,
        vm_image_id: &str,
    ) -> Result<()>;
    async fn delete_instance(&self, zone_id: &str, instance_id: &str) -> Result<()>;

    // Networks
    async fn list_networks(&self, zone_id: &str) -> Result<Vec<NetworkSummary>>;
    async fn show_network(&self, zone_id: &str, network_id: &str) -> Result<NetworkSummary>;
    async fn create_l2_network(
        &self,
        zone_id: &str,
        network_offering_id: &str,
        name: &str,
    ) -> Result<()>;
    async fn create_l3_network(
        &self,
        zone_id: &str,
        network_offering_id: &str,
        name: &str,
        gateway: &str,
        netmask: &str,
    ) -> Result<()>;
    async fn delete_network(&self, zone_id: &str, network_id: &str) -> Result<()>;
    async fn connect_instance_to_network(
        &self,
        zone_id: &str,
        network_id: &str,
        instance_id: &str,
    ) -> Result<()>;
    async fn disconnect_instance_from_network(
        &self,
        zone_id: &str,
        network_id: &str,
        instance_id: &str,
        attachment_id: &str,
    ) -> Result<()>;
    /// Attachments of a network, optionally narrowed to one instance
    async fn list_network_instances(
        &self,
        zone_id: &str,
        network_id: &str,
        instance_id: Option<&str>,
    ) -> Result<Vec<InstanceNetwork>>;

    // Volumes
    async fn list_volumes(&self, zone_id: &str) -> Result<Vec<VolumeSummary>>;
    async fn create_volume(
        &self,
        zone_id: &str,
        service_offering_id: &str,
        size: u64,
        name: &str,
    ) -> Result<()>;
    async fn attach_volume(&self, zone_id: &str, volume_id: &str, instance_id: &str)
    -> Result<()>;
    async fn detach_volume(&self, zone_id: &str, volume_id: &str, instance_id: &str)
    -> Result<()>;
    async fn delete_volume(&self, zone_id: &str, volume_id: &str) -> Result<()>;

    // Object storage and Kubernetes
    async fn list_buckets(&self, zone_id: &str) -> Result<Vec<BucketSummary>>;
    async fn create_bucket(&self, zone_id: &str, name: &str, policy: &str) -> Result<()>;
    async fn list_kubernetes_clusters(&self, zone_id: &str) -> Result<Vec<ClusterSummary>>;
    async fn create_kubernetes_cluster(
        &self,
        zone_id: &str,
        request: &CreateClusterRequest,
    ) -> Result<()>;
}

/// Instance as returned by the list call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

impl Listed for InstanceSummary {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// Instance as returned by the show call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDetail {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Ids of the data volumes currently attached
    #[serde(default)]
    pub data_volumes: Vec<String>,
}

impl InstanceDetail {
    pub fn has_volume(&self, volume_id: &str) -> bool {
        self.data_volumes.iter().any(|v| v == volume_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub service_offering_id: String,
    pub vm_image_id: String,
    pub network_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    /// "L2" or "L3"
    #[serde(default, rename = "type")]
    pub network_type: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub netmask: Option<String>,
}

impl Listed for NetworkSummary {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// One instance attached to a network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceNetwork {
    /// Attachment id
    pub id: String,
    pub instance_id: String,
    pub network_id: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub mac_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size: u64,
    /// Instance the volume is attached to, if any
    #[serde(default)]
    pub attached_instance_id: Option<String>,
}

impl Listed for VolumeSummary {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

impl Listed for BucketSummary {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

impl Listed for ClusterSummary {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    pub kubernetes_version_id: String,
    pub service_offering_id: String,
    pub ssh_key_id: String,
    pub network_id: String,
    pub ha_enabled: bool,
    pub cluster_size: u32,
    #[serde(default)]
    pub description: String,
}
