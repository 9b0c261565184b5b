//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution,
//! filesystem access, HTTP probing and tunnel clients.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::api` are forbidden.

pub mod command_runner;
pub mod dev_server;
pub mod probe;
mod signals;
pub mod tunnel;
pub mod workspace;

pub use command_runner::TokioCommandRunner;
pub use dev_server::{DevServerSupervisor, SupervisedProcess};
pub use probe::HttpReadinessProbe;
pub use tunnel::{CommandTunnel, LocalTunnel};
pub use workspace::FsWorkspaceProvisioner;
