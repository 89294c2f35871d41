//! cp-core: Core abstractions and configuration for cloud-proxy
//!
//! This crate provides the shared types, the collaborator traits (cloud
//! provider and tunnel transport) and the configuration structure used by
//! the fleet engine and the CLI.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::CloudProxyError;
pub use types::{InstanceId, MachineId, ShutdownTrigger};
