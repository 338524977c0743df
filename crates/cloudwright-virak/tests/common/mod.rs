//! In-memory Virak API used by the integration tests
//!
//! Mutations take effect immediately unless a lag is configured. Every call
//! is recorded as `"<op> <args>"` so tests can assert on what was issued.

#![allow(dead_code)]

use async_trait::async_trait;
use cloudwright_cloud::{CloudError, Result};
use cloudwright_virak::{
    BucketSummary, ClusterSummary, CreateClusterRequest, CreateInstanceRequest, InstanceDetail,
    InstanceNetwork, InstanceSummary, NetworkSummary, VirakApi, VolumeSummary,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub const ZONE: &str = "zone-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
struct FakeInstance {
    summary: InstanceSummary,
    username: String,
    password: String,
    data_volumes: Vec<String>,
    /// Shows left before `status` becomes the target
    pending: Option<(u32, String)>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u32,
    instances: BTreeMap<String, FakeInstance>,
    networks: BTreeMap<String, NetworkSummary>,
    attachments: Vec<InstanceNetwork>,
    volumes: BTreeMap<String, VolumeSummary>,
    buckets: BTreeMap<String, BucketSummary>,
    clusters: BTreeMap<String, ClusterSummary>,
    calls: Vec<String>,
    /// op -> (remaining failures, message)
    failures: HashMap<String, (u32, String)>,
    /// id -> listings left before it shows up
    hidden: HashMap<String, u32>,
    /// Listings a newly created resource stays invisible for
    creation_lag: u32,
    /// Shows a power transition takes
    status_lag: u32,
    /// Volumes that never leave their current status
    stuck_volumes: Vec<String>,
    /// Networks whose attachments stay listed after a disconnect
    lingering_networks: Vec<String>,
    /// Networks whose new attachments never show up
    unlisted_networks: Vec<String>,
    /// Volumes an attach never adds to the instance
    unlisted_volumes: Vec<String>,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn visible(&mut self, id: &str) -> bool {
        match self.hidden.get_mut(id) {
            None | Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
        }
    }

    fn hide_new(&mut self, id: &str) {
        if self.creation_lag > 0 {
            self.hidden.insert(id.to_string(), self.creation_lag);
        }
    }

    fn record(&mut self, op: &str, args: &[&str]) -> Result<()> {
        let call = if args.is_empty() {
            op.to_string()
        } else {
            format!("{} {}", op, args.join(" "))
        };
        self.calls.push(call);

        if let Some((remaining, message)) = self.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CloudError::ApiError(message.clone()));
            }
        }
        Ok(())
    }

    fn instance_mut(&mut self, id: &str) -> Result<&mut FakeInstance> {
        self.instances
            .get_mut(id)
            .ok_or_else(|| CloudError::ApiError(format!("404: instance {} not found", id)))
    }

    fn transition(&mut self, id: &str, interim: &str, target: &str) -> Result<()> {
        let lag = self.status_lag;
        let instance = self.instance_mut(id)?;
        if lag == 0 {
            instance.summary.status = target.to_string();
        } else {
            instance.summary.status = interim.to_string();
            instance.pending = Some((lag, target.to_string()));
        }
        Ok(())
    }

    fn set_volume_status(&mut self, id: &str, status: &str, holder: Option<&str>) {
        if self.stuck_volumes.iter().any(|v| v == id) {
            return;
        }
        if let Some(volume) = self.volumes.get_mut(id) {
            volume.status = status.to_string();
            volume.attached_instance_id = holder.map(str::to_string);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeVirak {
    state: Arc<Mutex<FakeState>>,
}

impl FakeVirak {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn VirakApi> {
        Arc::new(self.clone())
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    // Seeding

    pub fn add_network(&self, name: &str) -> String {
        self.with(|s| {
            let id = s.next_id("net");
            s.networks.insert(
                id.clone(),
                NetworkSummary {
                    id: id.clone(),
                    name: name.to_string(),
                    status: "Implemented".into(),
                    network_type: "L2".into(),
                    gateway: None,
                    netmask: None,
                },
            );
            id
        })
    }

    pub fn add_instance(&self, name: &str, status: &str) -> String {
        self.with(|s| {
            let id = s.next_id("i");
            s.instances.insert(
                id.clone(),
                FakeInstance {
                    summary: InstanceSummary {
                        id: id.clone(),
                        name: name.to_string(),
                        status: status.to_string(),
                    },
                    username: "admin".into(),
                    password: "secret".into(),
                    data_volumes: Vec::new(),
                    pending: None,
                },
            );
            id
        })
    }

    /// Attach a network without recording a call
    pub fn attach_network(&self, instance_id: &str, network_id: &str, is_default: bool) -> String {
        self.with(|s| connect(s, instance_id, network_id, is_default))
    }

    pub fn add_volume(&self, name: &str, holder: Option<&str>) -> String {
        self.with(|s| {
            let id = s.next_id("vol");
            let status = if holder.is_some() { "ATTACHED" } else { "ALLOCATED" };
            s.volumes.insert(
                id.clone(),
                VolumeSummary {
                    id: id.clone(),
                    name: name.to_string(),
                    status: status.into(),
                    size: 10,
                    attached_instance_id: holder.map(str::to_string),
                },
            );
            if let Some(holder) = holder {
                if let Some(instance) = s.instances.get_mut(holder) {
                    instance.data_volumes.push(id.clone());
                }
            }
            id
        })
    }

    // Scripting

    /// Fail the next `times` calls of `op`
    pub fn fail(&self, op: &str, times: u32, message: &str) {
        self.with(|s| {
            s.failures
                .insert(op.to_string(), (times, message.to_string()));
        });
    }

    pub fn fail_always(&self, op: &str, message: &str) {
        self.fail(op, u32::MAX, message);
    }

    pub fn set_creation_lag(&self, listings: u32) {
        self.with(|s| s.creation_lag = listings);
    }

    pub fn set_status_lag(&self, shows: u32) {
        self.with(|s| s.status_lag = shows);
    }

    pub fn set_volume_status(&self, volume_id: &str, status: &str) {
        self.with(|s| {
            if let Some(volume) = s.volumes.get_mut(volume_id) {
                volume.status = status.to_string();
            }
        });
    }

    /// Keep the volume in its current status whatever happens to it
    pub fn freeze_volume(&self, volume_id: &str) {
        self.with(|s| s.stuck_volumes.push(volume_id.to_string()));
    }

    /// Accept disconnects from `network_id` but keep listing the attachment
    pub fn keep_attachments_listed(&self, network_id: &str) {
        self.with(|s| s.lingering_networks.push(network_id.to_string()));
    }

    /// Accept connects to `network_id` but never list the new attachment
    pub fn hide_new_attachments(&self, network_id: &str) {
        self.with(|s| s.unlisted_networks.push(network_id.to_string()));
    }

    /// Accept attaches of `volume_id` but keep it off the instance's list
    pub fn hide_attached_volume(&self, volume_id: &str) {
        self.with(|s| s.unlisted_volumes.push(volume_id.to_string()));
    }

    // Inspection

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn calls_of(&self, op: &str) -> Vec<String> {
        let prefix = format!("{} ", op);
        self.calls()
            .into_iter()
            .filter(|c| c == op || c.starts_with(&prefix))
            .collect()
    }

    /// Calls that change remote state
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !(c.starts_with("list_") || c.starts_with("show_")))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    pub fn instance_status(&self, instance_id: &str) -> Option<String> {
        self.with(|s| s.instances.get(instance_id).map(|i| i.summary.status.clone()))
    }

    pub fn instance_exists(&self, instance_id: &str) -> bool {
        self.with(|s| s.instances.contains_key(instance_id))
    }

    pub fn instance_by_name(&self, name: &str) -> Option<String> {
        self.with(|s| {
            s.instances
                .values()
                .find(|i| i.summary.name == name)
                .map(|i| i.summary.id.clone())
        })
    }

    pub fn data_volumes(&self, instance_id: &str) -> Vec<String> {
        self.with(|s| {
            s.instances
                .get(instance_id)
                .map(|i| i.data_volumes.clone())
                .unwrap_or_default()
        })
    }

    /// Network ids attached to an instance, sorted
    pub fn networks_of(&self, instance_id: &str) -> Vec<String> {
        self.with(|s| {
            let mut ids: Vec<String> = s
                .attachments
                .iter()
                .filter(|a| a.instance_id == instance_id)
                .map(|a| a.network_id.clone())
                .collect();
            ids.sort();
            ids
        })
    }

    pub fn network_exists(&self, network_id: &str) -> bool {
        self.with(|s| s.networks.contains_key(network_id))
    }

    pub fn volume(&self, volume_id: &str) -> Option<VolumeSummary> {
        self.with(|s| s.volumes.get(volume_id).cloned())
    }

    pub fn volume_by_name(&self, name: &str) -> Option<VolumeSummary> {
        self.with(|s| s.volumes.values().find(|v| v.name == name).cloned())
    }
}

fn connect(s: &mut FakeState, instance_id: &str, network_id: &str, is_default: bool) -> String {
    let id = s.next_id("att");
    let host = s.attachments.len() + 10;
    s.attachments.push(InstanceNetwork {
        id: id.clone(),
        instance_id: instance_id.to_string(),
        network_id: network_id.to_string(),
        is_default,
        ip_address: format!("10.0.0.{}", host),
        mac_address: format!("02:00:00:00:00:{:02x}", host),
    });
    id
}

#[async_trait]
impl VirakApi for FakeVirak {
    async fn list_instances(&self, _zone_id: &str) -> Result<Vec<InstanceSummary>> {
        self.with(|s| {
            s.record("list_instances", &[])?;
            let all: Vec<InstanceSummary> = s.instances.values().map(|i| i.summary.clone()).collect();
            Ok(all.into_iter().filter(|i| s.visible(&i.id)).collect())
        })
    }

    async fn show_instance(&self, _zone_id: &str, instance_id: &str) -> Result<InstanceDetail> {
        self.with(|s| {
            s.record("show_instance", &[instance_id])?;
            let instance = s.instance_mut(instance_id)?;
            if let Some((remaining, target)) = instance.pending.take() {
                if remaining <= 1 {
                    instance.summary.status = target;
                } else {
                    instance.pending = Some((remaining - 1, target));
                }
            }
            Ok(InstanceDetail {
                id: instance.summary.id.clone(),
                name: instance.summary.name.clone(),
                status: instance.summary.status.clone(),
                username: instance.username.clone(),
                password: instance.password.clone(),
                data_volumes: instance.data_volumes.clone(),
            })
        })
    }

    async fn create_instance(&self, _zone_id: &str, request: &CreateInstanceRequest) -> Result<()> {
        self.with(|s| {
            s.record("create_instance", &[request.name.as_str()])?;
            let id = s.next_id("i");
            s.instances.insert(
                id.clone(),
                FakeInstance {
                    summary: InstanceSummary {
                        id: id.clone(),
                        name: request.name.clone(),
                        status: "UP".into(),
                    },
                    username: String::new(),
                    password: "generated".into(),
                    data_volumes: Vec::new(),
                    pending: None,
                },
            );
            for (index, network_id) in request.network_ids.iter().enumerate() {
                connect(s, &id, network_id, index == 0);
            }
            s.hide_new(&id);
            Ok(())
        })
    }

    async fn start_instance(&self, _zone_id: &str, instance_id: &str) -> Result<()> {
        self.with(|s| {
            s.record("start_instance", &[instance_id])?;
            s.transition(instance_id, "Starting", "Running")
        })
    }

    async fn stop_instance(&self, _zone_id: &str, instance_id: &str, _forced: bool) -> Result<()> {
        self.with(|s| {
            s.record("stop_instance", &[instance_id])?;
            s.transition(instance_id, "Stopping", "Stopped")
        })
    }

    async fn reboot_instance(&self, _zone_id: &str, instance_id: &str) -> Result<()> {
        self.with(|s| {
            s.record("reboot_instance", &[instance_id])?;
            s.transition(instance_id, "Rebooting", "Running")
        })
    }

    async fn rebuild_instance(&self, _zone_id: &str, instance_id: &str, vm_image_id: &str) -> Result<()> {
        self.with(|s| {
            s.record("rebuild_instance", &[instance_id, vm_image_id])?;
            s.transition(instance_id, "Rebuilding", "UP")
        })
    }

    async fn delete_instance(&self, _zone_id: &str, instance_id: &str) -> Result<()> {
        self.with(|s| {
            s.record("delete_instance", &[instance_id])?;
            s.instance_mut(instance_id)?;
            s.instances.remove(instance_id);
            s.attachments.retain(|a| a.instance_id != instance_id);
            Ok(())
        })
    }

    async fn list_networks(&self, _zone_id: &str) -> Result<Vec<NetworkSummary>> {
        self.with(|s| {
            s.record("list_networks", &[])?;
            let all: Vec<NetworkSummary> = s.networks.values().cloned().collect();
            Ok(all.into_iter().filter(|n| s.visible(&n.id)).collect())
        })
    }

    async fn show_network(&self, _zone_id: &str, network_id: &str) -> Result<NetworkSummary> {
        self.with(|s| {
            s.record("show_network", &[network_id])?;
            s.networks
                .get(network_id)
                .cloned()
                .ok_or_else(|| CloudError::ApiError(format!("404: network {} not found", network_id)))
        })
    }

    async fn create_l2_network(&self, _zone_id: &str, offering: &str, name: &str) -> Result<()> {
        self.with(|s| {
            s.record("create_l2_network", &[offering, name])?;
            let id = s.next_id("net");
            s.networks.insert(
                id.clone(),
                NetworkSummary {
                    id: id.clone(),
                    name: name.to_string(),
                    status: "Allocated".into(),
                    network_type: "L2".into(),
                    gateway: None,
                    netmask: None,
                },
            );
            s.hide_new(&id);
            Ok(())
        })
    }

    async fn create_l3_network(
        &self,
        _zone_id: &str,
        offering: &str,
        name: &str,
        gateway: &str,
        netmask: &str,
    ) -> Result<()> {
        self.with(|s| {
            s.record("create_l3_network", &[offering, name, gateway, netmask])?;
            let id = s.next_id("net");
            s.networks.insert(
                id.clone(),
                NetworkSummary {
                    id: id.clone(),
                    name: name.to_string(),
                    status: "Allocated".into(),
                    network_type: "Isolated".into(),
                    gateway: Some(gateway.to_string()),
                    netmask: Some(netmask.to_string()),
                },
            );
            s.hide_new(&id);
            Ok(())
        })
    }

    async fn delete_network(&self, _zone_id: &str, network_id: &str) -> Result<()> {
        self.with(|s| {
            s.record("delete_network", &[network_id])?;
            if !s.networks.contains_key(network_id) {
                return Err(CloudError::ApiError(format!("404: network {} not found", network_id)));
            }
            if s.attachments.iter().any(|a| a.network_id == network_id) {
                return Err(CloudError::ApiError("The network is connected to instances".into()));
            }
            s.networks.remove(network_id);
            Ok(())
        })
    }

    async fn connect_instance_to_network(
        &self,
        _zone_id: &str,
        network_id: &str,
        instance_id: &str,
    ) -> Result<()> {
        self.with(|s| {
            s.record("connect_instance_to_network", &[network_id, instance_id])?;
            if !s.unlisted_networks.iter().any(|n| n == network_id) {
                connect(s, instance_id, network_id, false);
            }
            Ok(())
        })
    }

    async fn disconnect_instance_from_network(
        &self,
        _zone_id: &str,
        network_id: &str,
        instance_id: &str,
        attachment_id: &str,
    ) -> Result<()> {
        self.with(|s| {
            s.record(
                "disconnect_instance_from_network",
                &[network_id, instance_id, attachment_id],
            )?;
            if !s.lingering_networks.iter().any(|n| n == network_id) {
                s.attachments.retain(|a| a.id != attachment_id);
            }
            Ok(())
        })
    }

    async fn list_network_instances(
        &self,
        _zone_id: &str,
        network_id: &str,
        instance_id: Option<&str>,
    ) -> Result<Vec<InstanceNetwork>> {
        self.with(|s| {
            s.record("list_network_instances", &[network_id])?;
            if !s.networks.contains_key(network_id) {
                return Err(CloudError::ApiError(format!("404: network {} not found", network_id)));
            }
            Ok(s.attachments
                .iter()
                .filter(|a| a.network_id == network_id)
                .filter(|a| instance_id.is_none_or(|id| a.instance_id == id))
                .cloned()
                .collect())
        })
    }

    async fn list_volumes(&self, _zone_id: &str) -> Result<Vec<VolumeSummary>> {
        self.with(|s| {
            s.record("list_volumes", &[])?;
            let all: Vec<VolumeSummary> = s.volumes.values().cloned().collect();
            Ok(all.into_iter().filter(|v| s.visible(&v.id)).collect())
        })
    }

    async fn create_volume(&self, _zone_id: &str, offering: &str, size: u64, name: &str) -> Result<()> {
        self.with(|s| {
            s.record("create_volume", &[offering, name])?;
            let id = s.next_id("vol");
            s.volumes.insert(
                id.clone(),
                VolumeSummary {
                    id: id.clone(),
                    name: name.to_string(),
                    status: "ALLOCATED".into(),
                    size,
                    attached_instance_id: None,
                },
            );
            s.hide_new(&id);
            Ok(())
        })
    }

    async fn attach_volume(&self, _zone_id: &str, volume_id: &str, instance_id: &str) -> Result<()> {
        self.with(|s| {
            s.record("attach_volume", &[volume_id, instance_id])?;
            let listed = !s.unlisted_volumes.iter().any(|v| v == volume_id);
            let instance = s.instance_mut(instance_id)?;
            if listed {
                instance.data_volumes.push(volume_id.to_string());
            }
            s.set_volume_status(volume_id, "ATTACHED", Some(instance_id));
            Ok(())
        })
    }

    async fn detach_volume(&self, _zone_id: &str, volume_id: &str, instance_id: &str) -> Result<()> {
        self.with(|s| {
            s.record("detach_volume", &[volume_id, instance_id])?;
            s.instance_mut(instance_id)?.data_volumes.retain(|v| v != volume_id);
            s.set_volume_status(volume_id, "ALLOCATED", None);
            Ok(())
        })
    }

    async fn delete_volume(&self, _zone_id: &str, volume_id: &str) -> Result<()> {
        self.with(|s| {
            s.record("delete_volume", &[volume_id])?;
            match s.volumes.get(volume_id) {
                None => Err(CloudError::ApiError(format!("404: volume {} not found", volume_id))),
                Some(v) if v.status != "ALLOCATED" => {
                    Err(CloudError::ApiError("409: volume is attached".into()))
                }
                Some(_) => {
                    s.volumes.remove(volume_id);
                    Ok(())
                }
            }
        })
    }

    async fn list_buckets(&self, _zone_id: &str) -> Result<Vec<BucketSummary>> {
        self.with(|s| {
            s.record("list_buckets", &[])?;
            let all: Vec<BucketSummary> = s.buckets.values().cloned().collect();
            Ok(all.into_iter().filter(|b| s.visible(&b.id)).collect())
        })
    }

    async fn create_bucket(&self, _zone_id: &str, name: &str, policy: &str) -> Result<()> {
        self.with(|s| {
            s.record("create_bucket", &[name, policy])?;
            let id = s.next_id("bkt");
            s.buckets.insert(
                id.clone(),
                BucketSummary {
                    id: id.clone(),
                    name: name.to_string(),
                    status: "Active".into(),
                },
            );
            s.hide_new(&id);
            Ok(())
        })
    }

    async fn list_kubernetes_clusters(&self, _zone_id: &str) -> Result<Vec<ClusterSummary>> {
        self.with(|s| {
            s.record("list_kubernetes_clusters", &[])?;
            let all: Vec<ClusterSummary> = s.clusters.values().cloned().collect();
            Ok(all.into_iter().filter(|c| s.visible(&c.id)).collect())
        })
    }

    async fn create_kubernetes_cluster(&self, _zone_id: &str, request: &CreateClusterRequest) -> Result<()> {
        self.with(|s| {
            s.record("create_kubernetes_cluster", &[request.name.as_str()])?;
            let id = s.next_id("k8s");
            s.clusters.insert(
                id.clone(),
                ClusterSummary {
                    id: id.clone(),
                    name: request.name.clone(),
                    status: "Creating".into(),
                },
            );
            s.hide_new(&id);
            Ok(())
        })
    }
}
