//! Virak Cloud controllers for cloudwright
//!
//! Reconciles instances, private networks and block volumes against the
//! Virak Cloud control plane. The API accepts mutations asynchronously and
//! returns no identifiers for created resources, so every entry point
//! serializes mutations per collection, discovers new resources by listing
//! diff and polls until each effect is observable.
//!
//! # Features
//!
//! - Instance create / read / update / delete with power-state control
//! - Network attachment reconciliation that never drops the default interface
//! - Volume attachment reconciliation that only deletes `ALLOCATED` volumes
//! - Standalone networks, volumes, buckets and Kubernetes clusters
//!
//! # Example
//!
//! ```ignore
//! use cloudwright_cloud::Diagnostics;
//! use cloudwright_virak::{InstanceSpec, VirakProvider};
//!
//! let provider = VirakProvider::from_env(api).await?;
//! let mut diags = Diagnostics::new();
//! let state = provider.create_instance(&spec, &mut diags).await?;
//! for warning in diags.warnings() {
//!     eprintln!("{}: {}", warning.summary, warning.detail);
//! }
//! ```

pub mod api;
pub mod instance;
pub mod lifecycle;
pub mod network;
pub mod network_attachments;
pub mod plan;
pub mod provider;
pub mod status;
pub mod storage;
pub mod volume;
pub mod volume_attachments;

pub use api::{
    BucketSummary, ClusterSummary, CreateClusterRequest, CreateInstanceRequest, InstanceDetail,
    InstanceNetwork, InstanceSummary, NetworkSummary, VirakApi, VolumeSummary,
};
pub use instance::{InstanceSpec, InstanceState, MAX_INSTANCE_NAME_LEN, lifecycle_preview};
pub use lifecycle::{DesiredState, LifecycleController};
pub use network::{NetworkSpec, NetworkState, NetworkType};
pub use network_attachments::{NetworkPlan, NetworkReconciler};
pub use plan::{LifecycleOperation, LifecyclePlan, plan_lifecycle};
pub use provider::VirakProvider;
pub use storage::{BucketSpec, BucketState, ClusterState};
pub use volume::{VolumeResourceSpec, VolumeState};
pub use volume_attachments::{VolumePlan, VolumeReconciler};
