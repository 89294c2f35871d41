//! Tunnel transport traits

use std::path::PathBuf;

use tokio::io::AsyncRead;

/// Diagnostic (stderr) stream of a tunnel process
pub type DiagnosticStream = Box<dyn AsyncRead + Send + Unpin>;

/// Everything a transport needs to open one dynamic port forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Local port the SOCKS5 listener binds to
    pub local_port: u16,
    /// Remote address to connect to
    pub address: String,
    /// Remote login user
    pub user: String,
    /// Private key used to authenticate
    pub identity: PathBuf,
}

impl TunnelSpec {
    /// `user@address` destination string
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }
}

/// A running tunnel subprocess
pub trait TunnelProcess: Send + Sync {
    /// OS process id, if known
    fn pid(&self) -> Option<u32>;

    /// Take the diagnostic stream. Returns `None` after the first call.
    fn take_diagnostics(&mut self) -> Option<DiagnosticStream>;

    /// Request termination. Does not wait for the process to exit.
    fn kill(&mut self) -> std::io::Result<()>;
}

/// Something able to start tunnel subprocesses
pub trait TunnelTransport: Send + Sync {
    /// Program name, used in error messages
    fn program(&self) -> &str;

    /// Start a tunnel process for `spec`
    fn spawn(&self, spec: &TunnelSpec) -> std::io::Result<Box<dyn TunnelProcess>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination() {
        let spec = TunnelSpec {
            local_port: 1080,
            address: "203.0.113.7".to_string(),
            user: "root".to_string(),
            identity: PathBuf::from("/tmp/id"),
        };
        assert_eq!(spec.destination(), "root@203.0.113.7");
    }
}
