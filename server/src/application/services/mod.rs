//! Application services: use-case orchestration.
//!
//! Services import only from `crate::domain` and `crate::application::ports`
//! and never from `crate::infra` or `crate::api`.

pub mod instance_manager;
pub mod reaper;

pub use instance_manager::{Collaborators, InstanceManager, ManagerSettings, WeakInstanceManager};
