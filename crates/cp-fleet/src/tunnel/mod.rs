//! SOCKS tunnel subprocess management

mod ssh;
mod supervisor;

pub use ssh::{ssh_args, SshTransport};
pub use supervisor::{TunnelLauncher, TunnelSupervisor};
