//! vSphere Controller
//!
//! Connection management, condition reconciliation, the sub-controller gate
//! and the loop that drives them.

pub mod conditions;
pub mod connection;
pub mod events;
pub mod gate;
pub mod runner;
pub mod vsphere_controller;

pub use conditions::{reconcile_condition, ConditionUpdate, REASON_AS_EXPECTED};
pub use connection::{Connected, ConnectionManager};
pub use events::{ControllerEvent, EventBus};
pub use gate::{decide, foreign_driver, installation_marker, GateDecision};
pub use runner::ControllerRunner;
pub use vsphere_controller::{ControllerDeps, VSphereController};
