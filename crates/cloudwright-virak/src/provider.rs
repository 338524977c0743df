//! Virak Cloud provider
//!
//! Holds the API client, the mutation guard and the poll budgets. The
//! per-resource entry points live in [`crate::instance`], [`crate::network`],
//! [`crate::volume`] and [`crate::storage`].

use crate::api::VirakApi;
use cloudwright_cloud::{CollectionLock, ReconcileConfig, ResourceKind, Result, SerializationGuard};
use std::sync::Arc;

/// Virak Cloud provider
pub struct VirakProvider {
    api: Arc<dyn VirakApi>,
    guard: Arc<SerializationGuard>,
    config: ReconcileConfig,
}

impl VirakProvider {
    /// Provider using the process-wide guard and default poll budgets
    pub fn new(api: Arc<dyn VirakApi>) -> Self {
        Self {
            api,
            guard: SerializationGuard::shared(),
            config: ReconcileConfig::default(),
        }
    }

    /// Provider with poll budgets from `CLOUDWRIGHT_CONFIG_PATH`, if set
    pub async fn from_env(api: Arc<dyn VirakApi>) -> Result<Self> {
        let config = ReconcileConfig::from_env().await?;
        Ok(Self::new(api).with_config(config))
    }

    pub fn with_guard(mut self, guard: Arc<SerializationGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn api(&self) -> &dyn VirakApi {
        self.api.as_ref()
    }

    pub fn guard(&self) -> &Arc<SerializationGuard> {
        &self.guard
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub(crate) async fn lock(&self, kinds: &[ResourceKind]) -> CollectionLock {
        self.guard.lock(kinds).await
    }
}

impl std::fmt::Debug for VirakProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirakProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
