//! Object storage buckets and Kubernetes clusters
//!
//! Both are only created and read here. Buckets are discovered by listing
//! diff; clusters carry unique names and are found by name.

use crate::api::{BucketSummary, ClusterSummary, CreateClusterRequest};
use crate::provider::VirakProvider;
use cloudwright_cloud::{
    CloudError, ResourceKind, ResourceRef, Result, find_named, find_new, snapshot_ids,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub zone_id: String,
    pub name: String,
    /// Access policy, e.g. `Private` or `Public`
    pub policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    pub bucket: ResourceRef,
    pub name: String,
    pub policy: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub cluster: ResourceRef,
    pub name: String,
    pub status: String,
}

impl VirakProvider {
    pub async fn create_bucket(&self, spec: &BucketSpec) -> Result<BucketState> {
        let zone_id = spec.zone_id.as_str();
        let _lock = self.lock(&[ResourceKind::Bucket]).await;

        let before = self
            .api()
            .list_buckets(zone_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to list buckets in zone {}", zone_id), e))?;
        let existing = snapshot_ids(&before);

        info!(zone = %zone_id, name = %spec.name, "Creating bucket");
        self.api()
            .create_bucket(zone_id, &spec.name, &spec.policy)
            .await
            .map_err(|e| CloudError::api(format!("Failed to create bucket '{}'", spec.name), e))?;

        let api = self.api();
        let bucket = find_new(
            zone_id,
            self.config().bucket_discovery,
            move || api.list_buckets(zone_id),
            &existing,
            &spec.name,
        )
        .await?;

        let status = self
            .find_bucket(zone_id, &bucket.id)
            .await?
            .map(|b| b.status)
            .unwrap_or_default();

        Ok(BucketState {
            bucket,
            name: spec.name.clone(),
            policy: spec.policy.clone(),
            status,
        })
    }

    pub async fn read_bucket(&self, prior: &BucketState) -> Result<Option<BucketState>> {
        let found = self.find_bucket(&prior.bucket.zone_id, &prior.bucket.id).await?;
        Ok(found.map(|summary| BucketState {
            name: summary.name,
            status: summary.status,
            ..prior.clone()
        }))
    }

    /// Create a cluster and find it by its (unique) name
    pub async fn create_kubernetes_cluster(
        &self,
        zone_id: &str,
        request: &CreateClusterRequest,
    ) -> Result<ClusterState> {
        let _lock = self.lock(&[ResourceKind::KubernetesCluster]).await;

        let before = self.list_clusters(zone_id).await?;
        if before.iter().any(|c| c.name == request.name) {
            return Err(CloudError::InvalidConfig(format!(
                "a Kubernetes cluster named '{}' already exists in zone {}",
                request.name, zone_id
            )));
        }

        info!(zone = %zone_id, name = %request.name, size = request.cluster_size, "Creating Kubernetes cluster");
        self.api()
            .create_kubernetes_cluster(zone_id, request)
            .await
            .map_err(|e| {
                CloudError::api(format!("Failed to create Kubernetes cluster '{}'", request.name), e)
            })?;

        let api = self.api();
        let cluster = find_named(
            zone_id,
            self.config().cluster_discovery,
            move || api.list_kubernetes_clusters(zone_id),
            &request.name,
        )
        .await?;

        let status = self
            .list_clusters(zone_id)
            .await?
            .into_iter()
            .find(|c| c.id == cluster.id)
            .map(|c| c.status)
            .unwrap_or_default();
        debug!(cluster = %cluster, %status, "Kubernetes cluster discovered");

        Ok(ClusterState {
            cluster,
            name: request.name.clone(),
            status,
        })
    }

    pub async fn read_kubernetes_cluster(&self, prior: &ClusterState) -> Result<Option<ClusterState>> {
        let found = self
            .list_clusters(&prior.cluster.zone_id)
            .await?
            .into_iter()
            .find(|c| c.id == prior.cluster.id);
        Ok(found.map(|summary| ClusterState {
            cluster: prior.cluster.clone(),
            name: summary.name,
            status: summary.status,
        }))
    }

    async fn find_bucket(&self, zone_id: &str, bucket_id: &str) -> Result<Option<BucketSummary>> {
        let buckets = self
            .api()
            .list_buckets(zone_id)
            .await
            .map_err(|e| CloudError::api(format!("Unable to list buckets in zone {}", zone_id), e))?;
        Ok(buckets.into_iter().find(|b| b.id == bucket_id))
    }

    async fn list_clusters(&self, zone_id: &str) -> Result<Vec<ClusterSummary>> {
        self.api()
            .list_kubernetes_clusters(zone_id)
            .await
            .map_err(|e| {
                CloudError::api(format!("Unable to list Kubernetes clusters in zone {}", zone_id), e)
            })
    }
}
