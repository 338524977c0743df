//! Shared resource model

use serde::{Deserialize, Serialize};

/// Reference to a remote resource. Immutable once the API has assigned it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub zone_id: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(zone_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.zone_id, self.id)
    }
}

/// One instance-to-network binding as reported by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub instance: ResourceRef,
    pub network: ResourceRef,

    /// Attachment id assigned by the API
    pub attachment_id: String,

    /// Whether this is the instance's default interface
    pub is_default: bool,

    pub ip_address: String,
    pub mac_address: String,
}

/// Desired volume, keyed by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,

    /// Size in GB
    pub size: u64,

    pub service_offering_id: String,
}

impl VolumeSpec {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        service_offering_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            service_offering_id: service_offering_id.into(),
        }
    }
}

/// Normalized instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceLifecycleState {
    Running,
    Stopped,
    /// Anything else (starting, stopping, rebuilding, ...)
    Transitional,
}

impl std::fmt::Display for InstanceLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceLifecycleState::Running => write!(f, "running"),
            InstanceLifecycleState::Stopped => write!(f, "stopped"),
            InstanceLifecycleState::Transitional => write!(f, "transitional"),
        }
    }
}

/// Normalized volume status. Deletion is only permitted from `Allocated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeLifecycleState {
    Allocated,
    Attaching,
    Attached,
    Other,
}

impl std::fmt::Display for VolumeLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeLifecycleState::Allocated => write!(f, "allocated"),
            VolumeLifecycleState::Attaching => write!(f, "attaching"),
            VolumeLifecycleState::Attached => write!(f, "attached"),
            VolumeLifecycleState::Other => write!(f, "other"),
        }
    }
}

/// Collections whose mutations are serialized process-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Instance,
    Network,
    Volume,
    Bucket,
    KubernetesCluster,
}

impl ResourceKind {
    pub const COUNT: usize = 5;

    pub const ALL: [ResourceKind; Self::COUNT] = [
        ResourceKind::Instance,
        ResourceKind::Network,
        ResourceKind::Volume,
        ResourceKind::Bucket,
        ResourceKind::KubernetesCluster,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Instance => write!(f, "instance"),
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::Volume => write!(f, "volume"),
            ResourceKind::Bucket => write!(f, "bucket"),
            ResourceKind::KubernetesCluster => write!(f, "kubernetes-cluster"),
        }
    }
}
