pub mod config;
pub mod types;

pub use config::{ConfigError, PORT_PLACEHOLDER, ServerConfig, TunnelKind, expand_port};
pub use types::*;
