//! Lifecycle of one tunnel subprocess
//!
//! A [`TunnelSupervisor`] owns the running process, the local listener port
//! and a background task that drains the process's diagnostic stream. The
//! drain keeps the subprocess from blocking on a full stderr pipe; it ends
//! when the supervisor's cancellation token fires or the stream closes.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cp_core::config::ProxyConfig;
use cp_core::error::TunnelError;
use cp_core::traits::{DiagnosticStream, TunnelProcess, TunnelSpec, TunnelTransport};

/// Builds tunnel specs from the run configuration and hands them to a transport
#[derive(Clone)]
pub struct TunnelLauncher {
    transport: Arc<dyn TunnelTransport>,
    user: String,
    identity: PathBuf,
}

impl TunnelLauncher {
    /// Create a launcher with explicit login settings
    pub fn new(
        transport: Arc<dyn TunnelTransport>,
        user: impl Into<String>,
        identity: PathBuf,
    ) -> Self {
        Self {
            transport,
            user: user.into(),
            identity,
        }
    }

    /// Create a launcher from the run configuration
    pub fn from_config(transport: Arc<dyn TunnelTransport>, config: &ProxyConfig) -> Self {
        Self::new(transport, config.ssh_user.clone(), config.identity_path())
    }

    /// Spec for a dynamic forward on `local_port` through `address`
    pub fn spec(&self, address: &str, local_port: u16) -> TunnelSpec {
        TunnelSpec {
            local_port,
            address: address.to_string(),
            user: self.user.clone(),
            identity: self.identity.clone(),
        }
    }

    /// Spawn the transport and start supervising it
    pub fn launch(
        &self,
        label: &str,
        address: &str,
        local_port: u16,
    ) -> Result<TunnelSupervisor, TunnelError> {
        let spec = self.spec(address, local_port);
        let process = self
            .transport
            .spawn(&spec)
            .map_err(|source| TunnelError::Spawn {
                program: self.transport.program().to_string(),
                source,
            })?;

        tracing::debug!(
            "Spawned {} for {} on port {} (pid {:?})",
            self.transport.program(),
            spec.destination(),
            local_port,
            process.pid()
        );

        Ok(TunnelSupervisor::start(label, process, local_port))
    }
}

/// A running tunnel: process handle, listener port and drain task
pub struct TunnelSupervisor {
    local_port: u16,
    process: Box<dyn TunnelProcess>,
    stop: CancellationToken,
    drain: JoinHandle<()>,
}

impl TunnelSupervisor {
    /// Take ownership of a spawned process and start draining its diagnostics
    pub fn start(label: &str, mut process: Box<dyn TunnelProcess>, local_port: u16) -> Self {
        let stop = CancellationToken::new();
        let drain = match process.take_diagnostics() {
            Some(stream) => {
                tokio::spawn(drain_diagnostics(label.to_string(), stream, stop.clone()))
            }
            None => tokio::spawn(async {}),
        };

        Self {
            local_port,
            process,
            stop,
            drain,
        }
    }

    /// Local SOCKS listener port
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// OS process id of the transport, if known
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Terminate the process and wait for the drain task to finish
    ///
    /// The drain task is stopped even when the kill fails; the kill error is
    /// returned afterwards.
    pub async fn stop(mut self) -> Result<(), TunnelError> {
        let killed = self.process.kill().map_err(TunnelError::Stop);
        self.stop.cancel();

        if let Err(e) = self.drain.await {
            tracing::warn!("Diagnostic drain task for port {} failed: {}", self.local_port, e);
        }

        killed
    }
}

// Lines are raw bytes; remote banners are not necessarily UTF-8
async fn drain_diagnostics(label: String, stream: DiagnosticStream, stop: CancellationToken) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(machine = %label, "Tunnel diagnostic stream closed");
                    break;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    tracing::debug!(machine = %label, "tunnel: {}", line.trim_end());
                }
                Err(e) => {
                    tracing::warn!(machine = %label, "Failed to read tunnel diagnostics: {}", e);
                    break;
                }
            }
        }
    }
}
