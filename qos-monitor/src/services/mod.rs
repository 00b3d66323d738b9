//! Service layer: the operator control surface and the container wiring
//! every collaborator together.

pub mod container;
pub mod monitor;

pub use container::ServiceContainer;
pub use monitor::MonitorService;
