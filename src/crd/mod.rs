//! Custom Resource Definitions for the vSphere CSI Driver Operator
//!
//! - ClusterCSIDriver: operator configuration and published conditions

pub mod cluster_csi_driver;

pub use cluster_csi_driver::*;
