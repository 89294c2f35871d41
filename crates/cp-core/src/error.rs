//! Core error types for cloud-proxy

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{InstanceId, MachineId};

/// Top-level error type for the cloud-proxy ecosystem
#[derive(Error, Debug)]
pub enum CloudProxyError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Region allocation error
    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    /// Provider call outside of a single machine's lifecycle failed
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Instance creation failed
    #[error("Provision error: {0}")]
    Provision(#[from] ProvisionError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Region allocation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// No available region survived the filter
    #[error("no regions to use")]
    NoRegions,

    /// Zero instances were requested
    #[error("instance count must be at least 1")]
    ZeroCount,
}

/// Errors reported by an [`InstanceProvider`](crate::traits::InstanceProvider)
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The HTTP request could not be completed
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-success status
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The provider answered with something we could not interpret
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    /// The instance is unknown to the provider
    #[error("instance not found: {0}")]
    NotFound(InstanceId),
}

/// Instance creation failed for one region
#[derive(Error, Debug)]
#[error("failed to create {count} instance(s) in region {region}: {source}")]
pub struct ProvisionError {
    pub region: String,
    pub count: u32,
    #[source]
    pub source: ProviderError,
}

/// Address lookup failed for one machine
#[derive(Error, Debug)]
#[error("could not resolve the address of {name}: {source}")]
pub struct ReadinessError {
    pub name: String,
    #[source]
    pub source: ProviderError,
}

/// Instance deletion failed for one machine
#[derive(Error, Debug)]
#[error("could not delete {name}: {source}")]
pub struct DestroyError {
    pub name: String,
    #[source]
    pub source: ProviderError,
}

/// Tunnel lifecycle errors
#[derive(Error, Debug)]
pub enum TunnelError {
    /// A tunnel is already running for this machine
    #[error("machine {0} already has an active socks proxy, disconnect it first")]
    AlreadyActive(MachineId),

    /// No tunnel is running for this machine
    #[error("machine {0} does not have an active tunnel")]
    NotActive(MachineId),

    /// The machine has no resolved address yet
    #[error("machine {0} is not ready (no address)")]
    NotReady(MachineId),

    /// The machine's teardown has begun; no new tunnels
    #[error("machine {0} is being torn down")]
    TornDown(MachineId),

    /// The transport process could not be started
    #[error("failed to start tunnel process `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The transport process could not be terminated
    #[error("failed to stop tunnel process: {0}")]
    Stop(#[source] std::io::Error),
}

impl TunnelError {
    /// Whether this error only reports a state mismatch (nothing was attempted)
    pub fn is_state_warning(&self) -> bool {
        matches!(
            self,
            TunnelError::AlreadyActive(_)
                | TunnelError::NotActive(_)
                | TunnelError::NotReady(_)
                | TunnelError::TornDown(_)
        )
    }
}
