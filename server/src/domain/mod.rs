//! Domain layer: pure lifecycle types, rules and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::application`,
//! `crate::api`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod error;
pub mod instance;
pub mod port_pool;

pub use error::InstanceError;
pub use instance::{InstanceRecord, bundle_url, validate_app_id};
pub use port_pool::PortPool;
