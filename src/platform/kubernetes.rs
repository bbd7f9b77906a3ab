//! Kubernetes Adapters
//!
//! Reflector-backed caches for the objects the probes and the gate read,
//! and the status publisher writing conditions to the `ClusterCSIDriver`.

use crate::checks::CheckStatus;
use crate::config::AdminAckConfig;
use crate::crd::{
    ClusterCSIDriver, OperatorCondition, OperatorStatus, VSphereStorageDriver, CLUSTER_CSI_DRIVER_OBJECT,
};
use crate::domain::ports::{admin_ack_value_is_true, AdminAckLookup, InfrastructureInfo, KubeApiInterface, OperatorStatusClient};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Node, PersistentVolume};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Status writes retried on a resourceVersion conflict
const MAX_CONFLICT_RETRIES: u32 = 3;

// =============================================================================
// Reflector-backed Snapshot
// =============================================================================

/// Cluster object caches kept current by watchers
#[derive(Clone)]
pub struct ReflectorApi {
    nodes: Store<Node>,
    persistent_volumes: Store<PersistentVolume>,
    csi_drivers: Store<CSIDriver>,
    csi_nodes: Store<CSINode>,
    cluster_csi_drivers: Store<ClusterCSIDriver>,
    admin_acks: Store<ConfigMap>,
    admin_ack_ref: ObjectRef<ConfigMap>,
    infrastructure: InfrastructureInfo,
}

/// Fires once per observed object change
pub type ChangeTriggers = BoxStream<'static, ()>;

impl ReflectorApi {
    /// Start the watchers.
    ///
    /// The caches only move while the returned trigger stream is polled.
    pub fn start(client: Client, admin_ack: &AdminAckConfig, infrastructure: InfrastructureInfo) -> (Self, ChangeTriggers) {
        let name_selector = format!("metadata.name={}", CLUSTER_CSI_DRIVER_OBJECT);
        let ack_selector = format!("metadata.name={}", admin_ack.config_map);

        let (nodes, nodes_changed) = reflect(Api::<Node>::all(client.clone()), watcher::Config::default());
        let (persistent_volumes, pvs_changed) =
            reflect(Api::<PersistentVolume>::all(client.clone()), watcher::Config::default());
        let (csi_drivers, drivers_changed) =
            reflect(Api::<CSIDriver>::all(client.clone()), watcher::Config::default());
        let (csi_nodes, csi_nodes_changed) =
            reflect(Api::<CSINode>::all(client.clone()), watcher::Config::default());
        let (cluster_csi_drivers, operator_changed) = reflect(
            Api::<ClusterCSIDriver>::all(client.clone()),
            watcher::Config::default().fields(&name_selector),
        );
        let (admin_acks, acks_changed) = reflect(
            Api::<ConfigMap>::namespaced(client, &admin_ack.namespace),
            watcher::Config::default().fields(&ack_selector),
        );

        info!(
            admin_ack_namespace = %admin_ack.namespace,
            admin_ack_config_map = %admin_ack.config_map,
            "Started cluster object watchers"
        );

        let triggers = stream::select_all(vec![
            nodes_changed,
            pvs_changed,
            drivers_changed,
            csi_nodes_changed,
            operator_changed,
            acks_changed,
        ])
        .boxed();

        let api = Self {
            nodes,
            persistent_volumes,
            csi_drivers,
            csi_nodes,
            cluster_csi_drivers,
            admin_acks,
            admin_ack_ref: ObjectRef::new(&admin_ack.config_map).within(&admin_ack.namespace),
            infrastructure,
        };
        (api, triggers)
    }

    /// Wait for the initial list of every watched kind
    pub async fn wait_until_ready(&self) -> Result<()> {
        let not_ready = |e| Error::Internal(format!("Object cache closed: {}", e));
        self.nodes.wait_until_ready().await.map_err(not_ready)?;
        self.persistent_volumes.wait_until_ready().await.map_err(not_ready)?;
        self.csi_drivers.wait_until_ready().await.map_err(not_ready)?;
        self.csi_nodes.wait_until_ready().await.map_err(not_ready)?;
        self.cluster_csi_drivers.wait_until_ready().await.map_err(not_ready)?;
        self.admin_acks.wait_until_ready().await.map_err(not_ready)?;
        debug!("Object caches synced");
        Ok(())
    }
}

fn reflect<K>(api: Api<K>, config: watcher::Config) -> (Store<K>, ChangeTriggers)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    let (reader, writer) = reflector::store();
    let kind = K::kind(&K::DynamicType::default()).to_string();

    let changes = reflector::reflector(writer, watcher(api, config).default_backoff())
        .touched_objects()
        .filter_map(move |event| {
            let outcome = match event {
                Ok(_) => Some(()),
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Watch error");
                    None
                }
            };
            futures::future::ready(outcome)
        })
        .boxed();

    (reader, changes)
}

impl KubeApiInterface for ReflectorApi {
    fn list_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.state()
    }

    fn get_csi_driver(&self, name: &str) -> Option<Arc<CSIDriver>> {
        self.csi_drivers.get(&ObjectRef::new(name))
    }

    fn list_csi_nodes(&self) -> Vec<Arc<CSINode>> {
        self.csi_nodes.state()
    }

    fn list_persistent_volumes(&self) -> Vec<Arc<PersistentVolume>> {
        self.persistent_volumes.state()
    }

    fn storage_driver(&self) -> Option<VSphereStorageDriver> {
        self.cluster_csi_drivers
            .get(&ObjectRef::new(CLUSTER_CSI_DRIVER_OBJECT))
            .and_then(|object| object.spec.storage_driver)
    }

    fn infrastructure(&self) -> InfrastructureInfo {
        self.infrastructure.clone()
    }
}

impl AdminAckLookup for ReflectorApi {
    fn is_acknowledged(&self, status: CheckStatus) -> bool {
        self.admin_acks
            .get(&self.admin_ack_ref)
            .map(|config_map| {
                let data = config_map.data.as_ref();
                admin_ack_value_is_true(data.and_then(|d| d.get(&status.admin_ack_key())))
            })
            .unwrap_or(false)
    }
}

// =============================================================================
// Status Publisher
// =============================================================================

/// Publishes conditions to the `ClusterCSIDriver` status subresource
pub struct KubeStatusClient {
    api: Api<ClusterCSIDriver>,
    name: String,
}

impl KubeStatusClient {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
            name: CLUSTER_CSI_DRIVER_OBJECT.to_string(),
        }
    }

    async fn fetch(&self) -> Result<ClusterCSIDriver> {
        self.api
            .get_opt(&self.name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "ClusterCSIDriver".into(),
                name: self.name.clone(),
            })
    }
}

#[async_trait]
impl OperatorStatusClient for KubeStatusClient {
    async fn conditions(&self) -> Result<Vec<OperatorCondition>> {
        let object = self.fetch().await?;
        Ok(object.status.map(|s| s.conditions).unwrap_or_default())
    }

    async fn publish(&self, conditions: Vec<OperatorCondition>) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let object = self.fetch().await?;
            let patch = status_patch(&object, &conditions, Utc::now());

            match self
                .api
                .patch_status(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(_) => {
                    debug!(name = %self.name, count = conditions.len(), "Published operator conditions");
                    return Ok(());
                }
                Err(kube::Error::Api(response)) if response.code == 409 && attempt < MAX_CONFLICT_RETRIES => {
                    debug!(name = %self.name, attempt, "Status update conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Merge patch replacing the conditions, guarded by the read resourceVersion
fn status_patch(object: &ClusterCSIDriver, conditions: &[OperatorCondition], now: DateTime<Utc>) -> serde_json::Value {
    let mut status: OperatorStatus = object.status.clone().unwrap_or_default();
    for condition in conditions {
        status.set_condition(condition.clone(), now);
    }
    status.observed_generation = object.metadata.generation.or(status.observed_generation);

    serde_json::json!({
        "metadata": { "resourceVersion": object.resource_version() },
        "status": status,
    })
}
