//! Fleet teardown
//!
//! Stops every tunnel and deletes every instance. Two contexts can ask for
//! it: the console (`q`) and the interrupt handler. [`CleanupCoordinator::shutdown`]
//! lets exactly one of them run the teardown; the other waits for it to
//! finish and learns which trigger won, so both exit with the same code.
//!
//! # Continue on error
//!
//! A failure for one machine (kill or delete) is logged and the pass moves on
//! to the next machine. Nothing is retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use cp_core::traits::InstanceProvider;
use cp_core::types::ShutdownTrigger;

use crate::machine::MachineRegistry;

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Tunnels stopped during this pass
    pub tunnels_stopped: usize,
    /// Instances deleted during this pass
    pub destroyed: usize,
    /// Names of instances whose deletion failed
    pub failed: Vec<String>,
}

/// Runs the teardown of a registry at most once
pub struct CleanupCoordinator {
    registry: Arc<MachineRegistry>,
    provider: Arc<dyn InstanceProvider>,
    claimed: AtomicBool,
    winner: OnceLock<ShutdownTrigger>,
    done: CancellationToken,
}

impl CleanupCoordinator {
    /// Coordinator for `registry`, deleting through `provider`
    pub fn new(registry: Arc<MachineRegistry>, provider: Arc<dyn InstanceProvider>) -> Self {
        Self {
            registry,
            provider,
            claimed: AtomicBool::new(false),
            winner: OnceLock::new(),
            done: CancellationToken::new(),
        }
    }

    /// Whether a shutdown has been claimed
    pub fn is_shutting_down(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Run the full teardown once, whichever context asks first
    ///
    /// The first caller performs the cleanup. Any other caller, concurrent or
    /// later, waits until that cleanup has completed. Every caller gets the
    /// trigger of the winning call.
    pub async fn shutdown(&self, trigger: ShutdownTrigger) -> ShutdownTrigger {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.winner.set(trigger);
            tracing::info!("Shutdown requested ({}), cleaning up", trigger);

            let report = self.cleanup().await;
            tracing::info!(
                "Cleanup finished: {} tunnel(s) stopped, {} instance(s) deleted, {} failure(s)",
                report.tunnels_stopped,
                report.destroyed,
                report.failed.len()
            );

            self.done.cancel();
        } else {
            tracing::debug!("Shutdown ({}) already in progress, waiting", trigger);
            self.done.cancelled().await;
        }

        self.winner.get().copied().unwrap_or(trigger)
    }

    /// One teardown pass over the registry, in registry order
    ///
    /// Safe to call repeatedly: stopped tunnels are not killed again and
    /// instances whose deletion was already attempted are skipped. Each
    /// machine is retired under its own lock, so it refuses new tunnels from
    /// the moment the pass reaches it.
    pub async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for machine in self.registry.all() {
            let retirement = machine.retire(self.provider.as_ref()).await;

            // A failed kill still clears the tunnel; count it as stopped
            if retirement.tunnel.is_some() {
                report.tunnels_stopped += 1;
            }

            match retirement.destroy {
                Ok(true) => {
                    tracing::info!("Deleted droplet name: {}", machine.name());
                    report.destroyed += 1;
                }
                Ok(false) => {
                    tracing::debug!("Droplet {} already handled, skipping", machine.name());
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    report.failed.push(machine.name().to_string());
                }
            }
        }

        report
    }
}
