//! cp-fleet: Provisioning, tunnel supervision and teardown
//!
//! Spreads droplets over regions, builds the machine registry, runs one
//! `ssh -D` tunnel per ready machine and tears the whole fleet down exactly
//! once when the run ends.

pub mod allocator;
pub mod cleanup;
pub mod machine;
pub mod provider;
pub mod provision;
pub mod reports;
pub mod tunnel;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use allocator::{allocate, RegionAllocation};
pub use cleanup::{CleanupCoordinator, CleanupReport};
pub use machine::{MachineRecord, MachineRegistry, MachineSnapshot, Retirement};
pub use provision::{start_tunnels, Provisioner, StartupSummary};
pub use tunnel::{SshTransport, TunnelLauncher, TunnelSupervisor};
