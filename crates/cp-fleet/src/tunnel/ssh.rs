//! OpenSSH client transport
//!
//! Opens `ssh -N -D <port>` to the remote machine. There is no structured
//! success signal: the tunnel is up when the process keeps running and the
//! local port accepts SOCKS5 connections.

use std::process::Stdio;

use tokio::process::{Child, Command};

use cp_core::traits::{DiagnosticStream, TunnelProcess, TunnelSpec, TunnelTransport};

/// Spawns the system `ssh` binary
#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
}

impl SshTransport {
    /// Use `program` as the ssh executable
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new("ssh")
    }
}

/// Command-line arguments for a dynamic forward without remote command
pub fn ssh_args(spec: &TunnelSpec) -> Vec<String> {
    vec![
        "-N".to_string(),
        "-D".to_string(),
        spec.local_port.to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-i".to_string(),
        spec.identity.display().to_string(),
        spec.destination(),
    ]
}

impl TunnelTransport for SshTransport {
    fn program(&self) -> &str {
        &self.program
    }

    fn spawn(&self, spec: &TunnelSpec) -> std::io::Result<Box<dyn TunnelProcess>> {
        let child = Command::new(&self.program)
            .args(ssh_args(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        Ok(Box::new(SshProcess { child }))
    }
}

struct SshProcess {
    child: Child,
}

impl TunnelProcess for SshProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_diagnostics(&mut self) -> Option<DiagnosticStream> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as DiagnosticStream)
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}
