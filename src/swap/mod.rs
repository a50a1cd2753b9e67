//! Exclusive model-backend swapping on a shared endpoint.

pub mod catalog;
pub mod controller;
pub mod supervisor;

pub use catalog::{ModelCatalog, ModelDescriptor, ModelRole};
pub use controller::{ModelStatus, ModelSwapController, SwapTimings};
pub use supervisor::{Supervisor, SystemdSupervisor};
