//! Platform Adapters
//!
//! Concrete implementations of the domain ports:
//! - vCenter REST sessions
//! - Kubernetes object caches and the status publisher
//! - the gated sub-controllers

pub mod kubernetes;
pub mod operands;
pub mod vsphere;

pub use kubernetes::{ChangeTriggers, KubeStatusClient, ReflectorApi};
pub use operands::{OperandController, StorageClassController, FIELD_MANAGER};
pub use vsphere::{RestConnection, RestConnectionFactory};
