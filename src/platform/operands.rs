//! Gated Sub-controllers
//!
//! The operand registers the owned CSIDriver object; the storage class
//! controller creates the default StorageClass. Both use server-side apply
//! so repeated syncs are no-ops on an unchanged cluster.

use crate::config::StorageClassConfig;
use crate::crd::{MANAGED_BY_OPERATOR_ANNOTATION, VSPHERE_CSI_DRIVER_NAME};
use crate::domain::ports::{KubeApiInterface, SyncController, VSphereConnection};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::storage::v1::{CSIDriver, CSIDriverSpec, StorageClass};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Field manager for every object this operator applies
pub const FIELD_MANAGER: &str = "vsphere-csi-driver-operator";

const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

// =============================================================================
// Driver Registration
// =============================================================================

/// Applies the CSIDriver object carrying the installation marker
pub struct OperandController {
    api: Api<CSIDriver>,
}

impl OperandController {
    pub fn new(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

/// CSIDriver object owned by this operator
pub fn owned_csi_driver() -> CSIDriver {
    CSIDriver {
        metadata: ObjectMeta {
            name: Some(VSPHERE_CSI_DRIVER_NAME.to_string()),
            annotations: Some(BTreeMap::from([(
                MANAGED_BY_OPERATOR_ANNOTATION.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        spec: CSIDriverSpec {
            attach_required: Some(true),
            pod_info_on_mount: Some(false),
            fs_group_policy: Some("ReadWriteOnceWithFSType".to_string()),
            volume_lifecycle_modes: Some(vec!["Persistent".to_string()]),
            ..Default::default()
        },
    }
}

#[async_trait]
impl SyncController for OperandController {
    fn name(&self) -> &str {
        "csi-driver-registration"
    }

    async fn sync(&self, connection: Option<&dyn VSphereConnection>, _api: &dyn KubeApiInterface) -> Result<()> {
        if connection.is_none() {
            debug!("Syncing driver registration without a vCenter session");
        }

        let driver = owned_csi_driver();
        self.api
            .patch(
                VSPHERE_CSI_DRIVER_NAME,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&driver),
            )
            .await?;

        debug!(driver = VSPHERE_CSI_DRIVER_NAME, "Applied CSIDriver");
        Ok(())
    }
}

// =============================================================================
// Storage Class
// =============================================================================

/// Applies the default StorageClass for the driver
pub struct StorageClassController {
    api: Api<StorageClass>,
    config: StorageClassConfig,
}

impl StorageClassController {
    pub fn new(client: Client, config: StorageClassConfig) -> Self {
        Self {
            api: Api::all(client),
            config,
        }
    }
}

/// StorageClass provisioned by the vSphere driver
pub fn storage_class(config: &StorageClassConfig) -> StorageClass {
    let annotations = config.is_default.then(|| {
        BTreeMap::from([(DEFAULT_CLASS_ANNOTATION.to_string(), "true".to_string())])
    });
    let parameters = config
        .storage_policy_name
        .as_ref()
        .map(|policy| BTreeMap::from([("storagepolicyname".to_string(), policy.clone())]));

    StorageClass {
        metadata: ObjectMeta {
            name: Some(config.name.clone()),
            annotations,
            ..Default::default()
        },
        provisioner: VSPHERE_CSI_DRIVER_NAME.to_string(),
        parameters,
        reclaim_policy: Some("Delete".to_string()),
        volume_binding_mode: Some("WaitForFirstConsumer".to_string()),
        allow_volume_expansion: Some(true),
        ..Default::default()
    }
}

#[async_trait]
impl SyncController for StorageClassController {
    fn name(&self) -> &str {
        "storage-class"
    }

    async fn sync(&self, _connection: Option<&dyn VSphereConnection>, _api: &dyn KubeApiInterface) -> Result<()> {
        let class = storage_class(&self.config);
        self.api
            .patch(
                &self.config.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&class),
            )
            .await?;

        info!(name = %self.config.name, default = self.config.is_default, "Applied StorageClass");
        Ok(())
    }
}
