//! Collaborator trait definitions

mod provider;
mod transport;

pub use provider::InstanceProvider;
pub use transport::{DiagnosticStream, TunnelProcess, TunnelSpec, TunnelTransport};
