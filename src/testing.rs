//! In-memory fakes for every port, shared by the unit tests.

use crate::checks::probes::{CheckEnvironment, Probe};
use crate::checks::CheckResult;
use crate::crd::{OperatorCondition, OperatorStatus, MANAGED_BY_OPERATOR_ANNOTATION, VSPHERE_CSI_DRIVER_NAME};
use crate::domain::ports::{
    Clock, ConnectionFactory, HostInfo, KubeApiInterface, OperatorStatusClient, SyncController,
    VCenterAbout, VSphereConnection,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{
    Node, NodeStatus, PersistentVolume, PersistentVolumeSpec, VsphereVirtualDiskVolumeSource,
};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode, CSINodeDriver, CSINodeSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// vCenter
// =============================================================================

#[derive(Debug, Default)]
struct FakeVCenterState {
    version: String,
    hosts: BTreeMap<String, String>,
    vm_hardware: BTreeMap<String, String>,
    alive: bool,
    fail_api_calls: bool,
}

/// Scriptable vCenter endpoint
#[derive(Debug)]
pub struct FakeVCenter {
    state: Mutex<FakeVCenterState>,
    api_calls: AtomicUsize,
}

impl FakeVCenter {
    pub fn new(version: &str) -> Self {
        Self {
            state: Mutex::new(FakeVCenterState {
                version: version.to_string(),
                alive: true,
                ..Default::default()
            }),
            api_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_version(&self, version: &str) {
        self.state.lock().version = version.to_string();
    }

    pub fn set_host_version(&self, host: &str, version: &str) {
        self.state
            .lock()
            .hosts
            .insert(host.to_string(), version.to_string());
    }

    pub fn set_vm_hardware(&self, vm: &str, hardware: &str) {
        self.state
            .lock()
            .vm_hardware
            .insert(vm.to_string(), hardware.to_string());
    }

    pub fn set_alive(&self, alive: bool) {
        self.state.lock().alive = alive;
    }

    pub fn fail_api_calls(&self, fail: bool) {
        self.state.lock().fail_api_calls = fail;
    }

    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, operation: &str) -> Result<()> {
        self.api_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.lock().fail_api_calls {
            return Err(Error::VCenterApi {
                operation: operation.to_string(),
                reason: "simulated failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VSphereConnection for FakeVCenter {
    fn server(&self) -> &str {
        "vcenter.test.local"
    }

    async fn is_alive(&self) -> bool {
        if self.enter("session").await.is_err() {
            return false;
        }
        self.state.lock().alive
    }

    async fn about(&self) -> Result<VCenterAbout> {
        self.enter("about").await?;
        Ok(VCenterAbout {
            version: self.state.lock().version.clone(),
            build: "1".into(),
        })
    }

    async fn list_hosts(&self) -> Result<Vec<HostInfo>> {
        self.enter("list hosts").await?;
        Ok(self
            .state
            .lock()
            .hosts
            .iter()
            .map(|(name, version)| HostInfo {
                name: name.clone(),
                version: version.clone(),
            })
            .collect())
    }

    async fn vm_hardware_version(&self, vm_name: &str) -> Result<Option<String>> {
        self.enter("vm hardware").await?;
        Ok(self.state.lock().vm_hardware.get(vm_name).cloned())
    }
}

/// Hands out one shared `FakeVCenter`, or fails on demand
pub struct FakeConnectionFactory {
    pub vcenter: Arc<FakeVCenter>,
    fail: AtomicBool,
    connects: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeConnectionFactory {
    pub fn new(vcenter: Arc<FakeVCenter>) -> Self {
        Self {
            vcenter,
            fail: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            delay: Mutex::new(None),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for FakeConnectionFactory {
    async fn connect(&self) -> Result<Arc<dyn VSphereConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::VCenterConnection {
                server: "vcenter.test.local".into(),
                reason: "connection to vcenter failed".into(),
            });
        }
        Ok(self.vcenter.clone() as Arc<dyn VSphereConnection>)
    }
}

// =============================================================================
// Sub-controllers and status
// =============================================================================

/// Sub-controller that counts its invocations
#[derive(Debug)]
pub struct CountingController {
    name: String,
    calls: AtomicUsize,
    with_connection: AtomicUsize,
    fail: AtomicBool,
}

impl CountingController {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            with_connection: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Invocations that were handed a live session
    pub fn calls_with_connection(&self) -> usize {
        self.with_connection.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SyncController for CountingController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sync(
        &self,
        connection: Option<&dyn VSphereConnection>,
        _api: &dyn KubeApiInterface,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if connection.is_some() {
            self.with_connection.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::SubControllerSync {
                controller: self.name.clone(),
                reason: "simulated failure".into(),
            });
        }
        Ok(())
    }
}

/// Status publisher backed by an in-memory `OperatorStatus`
#[derive(Debug, Default)]
pub struct InMemoryStatusClient {
    status: Mutex<OperatorStatus>,
    writes: AtomicUsize,
}

impl InMemoryStatusClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn condition(&self, condition_type: &str) -> Option<OperatorCondition> {
        self.status.lock().condition(condition_type).cloned()
    }
}

#[async_trait]
impl OperatorStatusClient for InMemoryStatusClient {
    async fn conditions(&self) -> Result<Vec<OperatorCondition>> {
        Ok(self.status.lock().conditions.clone())
    }

    async fn publish(&self, conditions: Vec<OperatorCondition>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let mut status = self.status.lock();
        for condition in conditions {
            status.set_condition(condition, now);
        }
        Ok(())
    }
}

/// Clock moved by hand
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// =============================================================================
// Probes
// =============================================================================

/// Probe returning a scripted result and counting evaluations
pub struct CountingProbe {
    name: String,
    result: Mutex<CheckResult>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl CountingProbe {
    pub fn new(name: &str, result: CheckResult) -> Self {
        Self {
            name: name.to_string(),
            result: Mutex::new(result),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_result(&self, result: CheckResult) {
        *self.result.lock() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for CountingProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, _env: &CheckEnvironment<'_>) -> CheckResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.lock().clone()
    }
}

// =============================================================================
// Cluster objects
// =============================================================================

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

pub fn node(name: &str) -> Node {
    Node {
        metadata: meta(name),
        ..Default::default()
    }
}

/// Node optionally reporting an in-tree vSphere volume in use
pub fn node_with_inline_volume(name: &str, has_inline_volume: bool) -> Node {
    let volumes_in_use = if has_inline_volume {
        vec![format!(
            "kubernetes.io/vsphere-volume/[vsanDatastore] 00000000-0000/{}-disk.vmdk",
            name
        )]
    } else {
        Vec::new()
    };
    Node {
        metadata: meta(name),
        status: Some(NodeStatus {
            volumes_in_use: Some(volumes_in_use),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn intree_pv(name: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: meta(name),
        spec: Some(PersistentVolumeSpec {
            vsphere_volume: Some(VsphereVirtualDiskVolumeSource {
                volume_path: format!("[vsanDatastore] kubevols/{}.vmdk", name),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// vSphere CSIDriver object, annotated as ours when `owned`
pub fn csi_driver(owned: bool) -> CSIDriver {
    let mut metadata = meta(VSPHERE_CSI_DRIVER_NAME);
    if owned {
        metadata.annotations = Some(BTreeMap::from([(
            MANAGED_BY_OPERATOR_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
    }
    CSIDriver {
        metadata,
        ..Default::default()
    }
}

/// CSINode with the vSphere driver registered
pub fn csi_node(name: &str) -> CSINode {
    CSINode {
        metadata: meta(name),
        spec: CSINodeSpec {
            drivers: vec![CSINodeDriver {
                name: VSPHERE_CSI_DRIVER_NAME.to_string(),
                node_id: name.to_string(),
                ..Default::default()
            }],
        },
    }
}
