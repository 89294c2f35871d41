//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Console-facing identifier of a machine, assigned from creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MachineId(pub usize);

impl MachineId {
    /// Get the raw index
    pub fn get(&self) -> usize {
        self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for MachineId {
    fn from(id: usize) -> Self {
        Self(id)
    }
}

/// Provider-assigned identifier of a compute instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An instance as reported by the provider after creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Provider id
    pub id: InstanceId,
    /// Provider-assigned name
    pub name: String,
    /// Region the instance was created in
    pub region: String,
}

/// Request to create a batch of instances in one region
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Names, one per instance
    pub names: Vec<String>,
    /// Region slug
    pub region: String,
    /// Identifier of the SSH key installed on the instances
    pub key_id: String,
    /// Size slug
    pub size: String,
    /// Image slug
    pub image: String,
}

impl CreateRequest {
    /// Number of instances requested
    pub fn count(&self) -> usize {
        self.names.len()
    }
}

/// What started the shutdown sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// The operator typed `q`
    Quit,
    /// The process received an interrupt or terminate signal
    Interrupt,
}

impl ShutdownTrigger {
    /// Process exit code associated with this trigger
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownTrigger::Quit => 0,
            ShutdownTrigger::Interrupt => 1,
        }
    }
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::Quit => write!(f, "quit"),
            ShutdownTrigger::Interrupt => write!(f, "interrupt"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_exit_codes() {
        assert_eq!(ShutdownTrigger::Quit.exit_code(), 0);
        assert_eq!(ShutdownTrigger::Interrupt.exit_code(), 1);
    }

    #[test]
    fn test_machine_id_display() {
        assert_eq!(format!("{}", MachineId(7)), "7");
        assert_eq!(MachineId::from(3).get(), 3);
    }
}
