//! Per-instance state
//!
//! Identity fields are fixed at construction. Everything that changes during
//! a session (address, tunnel, teardown progress) sits behind one async mutex
//! so the console and the interrupt handler never observe a half-updated
//! record or kill the same process twice.
//!
//! Once teardown has begun a record refuses new tunnels, so nothing can
//! connect to an instance that is being or has been deleted.

use tokio::sync::Mutex;

use cp_core::error::{DestroyError, ReadinessError, TunnelError};
use cp_core::traits::InstanceProvider;
use cp_core::types::{Instance, InstanceId, MachineId};

use crate::tunnel::{TunnelLauncher, TunnelSupervisor};

/// Teardown progress of the underlying instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Not yet asked to delete
    Pending,
    /// Teardown started and the deletion is in flight
    Claimed,
    /// Deleted by the provider
    Destroyed,
    /// Deletion was attempted and failed; never retried
    Failed,
}

struct MachineState {
    address: String,
    tunnel: Option<TunnelSupervisor>,
    teardown: Teardown,
}

/// Point-in-time copy of a record, for rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSnapshot {
    pub id: MachineId,
    pub instance_id: InstanceId,
    pub name: String,
    pub region: String,
    pub address: String,
    pub listener_port: Option<u16>,
    pub teardown: Teardown,
}

impl MachineSnapshot {
    /// Whether a tunnel is running
    pub fn tunnel_active(&self) -> bool {
        self.listener_port.is_some()
    }

    /// Whether the address has been resolved
    pub fn is_ready(&self) -> bool {
        !self.address.is_empty()
    }
}

/// Outcome of [`MachineRecord::retire`]
#[derive(Debug)]
pub struct Retirement {
    /// Result of stopping the tunnel, `None` if none was running
    pub tunnel: Option<Result<(), TunnelError>>,
    /// Result of the deletion, `Ok(false)` if it was already attempted
    pub destroy: Result<bool, DestroyError>,
}

/// One provisioned instance and its tunnel
pub struct MachineRecord {
    id: MachineId,
    instance_id: InstanceId,
    name: String,
    region: String,
    state: Mutex<MachineState>,
}

impl MachineRecord {
    /// Record for a freshly created instance
    pub fn new(id: MachineId, instance: Instance) -> Self {
        Self {
            id,
            instance_id: instance.id,
            name: instance.name,
            region: instance.region,
            state: Mutex::new(MachineState {
                address: String::new(),
                tunnel: None,
                teardown: Teardown::Pending,
            }),
        }
    }

    /// Console identifier
    pub fn id(&self) -> MachineId {
        self.id
    }

    /// Provider identifier
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Provider-assigned name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region slug
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Resolved address, empty while not ready
    pub async fn address(&self) -> String {
        self.state.lock().await.address.clone()
    }

    /// Whether the address has been resolved
    pub async fn is_ready(&self) -> bool {
        !self.state.lock().await.address.is_empty()
    }

    /// Whether a tunnel is running
    pub async fn tunnel_active(&self) -> bool {
        self.state.lock().await.tunnel.is_some()
    }

    /// Listener port of the running tunnel
    pub async fn listener_port(&self) -> Option<u16> {
        self.state
            .lock()
            .await
            .tunnel
            .as_ref()
            .map(TunnelSupervisor::local_port)
    }

    /// Teardown progress
    pub async fn teardown(&self) -> Teardown {
        self.state.lock().await.teardown
    }

    /// Consistent copy of the record
    pub async fn snapshot(&self) -> MachineSnapshot {
        let state = self.state.lock().await;
        MachineSnapshot {
            id: self.id,
            instance_id: self.instance_id,
            name: self.name.clone(),
            region: self.region.clone(),
            address: state.address.clone(),
            listener_port: state.tunnel.as_ref().map(TunnelSupervisor::local_port),
            teardown: state.teardown,
        }
    }

    /// Ask the provider for the current address, once
    ///
    /// Returns whether the machine is ready afterwards. On failure the
    /// address is left untouched.
    pub async fn resolve_address(
        &self,
        provider: &dyn InstanceProvider,
    ) -> Result<bool, ReadinessError> {
        let address = provider
            .get_address(self.instance_id)
            .await
            .map_err(|source| ReadinessError {
                name: self.name.clone(),
                source,
            })?;

        let mut state = self.state.lock().await;
        if let Some(address) = address.filter(|a| !a.is_empty()) {
            state.address = address;
        }
        Ok(!state.address.is_empty())
    }

    /// Start a tunnel listening on `local_port`
    pub async fn start_tunnel(
        &self,
        launcher: &TunnelLauncher,
        local_port: u16,
    ) -> Result<(), TunnelError> {
        let mut state = self.state.lock().await;
        if state.teardown != Teardown::Pending {
            return Err(TunnelError::TornDown(self.id));
        }
        if state.tunnel.is_some() {
            return Err(TunnelError::AlreadyActive(self.id));
        }
        if state.address.is_empty() {
            return Err(TunnelError::NotReady(self.id));
        }

        let tunnel = launcher.launch(&self.name, &state.address, local_port)?;
        state.tunnel = Some(tunnel);

        tracing::info!(
            "SSH proxy started on port {} on {} ({})",
            local_port,
            self.name,
            state.address
        );
        Ok(())
    }

    /// Stop the running tunnel
    ///
    /// The tunnel state is cleared even when the kill fails; the kill error
    /// is still reported.
    pub async fn stop_tunnel(&self) -> Result<(), TunnelError> {
        let tunnel = self.state.lock().await.tunnel.take();

        match tunnel {
            Some(tunnel) => self.halt(tunnel).await,
            None => Err(TunnelError::NotActive(self.id)),
        }
    }

    async fn halt(&self, tunnel: TunnelSupervisor) -> Result<(), TunnelError> {
        let port = tunnel.local_port();
        let result = tunnel.stop().await;
        match &result {
            Ok(()) => tracing::info!("Stopped proxy on port {} for {}", port, self.name),
            Err(e) => tracing::warn!("Proxy on port {} for {}: {}", port, self.name, e),
        }
        result
    }

    /// Delete the instance, at most once for the lifetime of the record
    ///
    /// Returns `Ok(false)` when a deletion was already attempted. Tunnel
    /// state is not touched; stop the tunnel first.
    pub async fn destroy(&self, provider: &dyn InstanceProvider) -> Result<bool, DestroyError> {
        let mut state = self.state.lock().await;
        if state.teardown != Teardown::Pending {
            return Ok(false);
        }
        state.teardown = Teardown::Claimed;
        self.delete(&mut state, provider).await
    }

    /// Stop the tunnel and delete the instance as one step
    ///
    /// The record is claimed under its lock before anything else happens and
    /// the lock is held throughout, so a concurrent `start_tunnel` either
    /// finishes first (and its tunnel is stopped here) or is refused.
    pub async fn retire(&self, provider: &dyn InstanceProvider) -> Retirement {
        let mut state = self.state.lock().await;
        let pending = state.teardown == Teardown::Pending;
        if pending {
            state.teardown = Teardown::Claimed;
        }

        let tunnel = match state.tunnel.take() {
            Some(tunnel) => Some(self.halt(tunnel).await),
            None => None,
        };

        let destroy = if pending {
            self.delete(&mut state, provider).await
        } else {
            Ok(false)
        };

        Retirement { tunnel, destroy }
    }

    async fn delete(
        &self,
        state: &mut MachineState,
        provider: &dyn InstanceProvider,
    ) -> Result<bool, DestroyError> {
        match provider.delete_instance(self.instance_id).await {
            Ok(()) => {
                state.teardown = Teardown::Destroyed;
                Ok(true)
            }
            Err(source) => {
                state.teardown = Teardown::Failed;
                Err(DestroyError {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvider, FakeTransport};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn record(id: u64) -> MachineRecord {
        MachineRecord::new(
            MachineId(0),
            Instance {
                id: InstanceId(id),
                name: format!("cloud-proxy-{}", id),
                region: "nyc1".to_string(),
            },
        )
    }

    fn launcher(transport: &FakeTransport) -> TunnelLauncher {
        TunnelLauncher::new(Arc::new(transport.clone()), "root", PathBuf::from("/keys/id"))
    }

    async fn ready_record(provider: &FakeProvider) -> MachineRecord {
        let machine = record(1);
        assert!(machine.resolve_address(provider).await.unwrap());
        machine
    }

    #[tokio::test]
    async fn test_new_record_is_not_ready() {
        let machine = record(1);
        assert!(!machine.is_ready().await);
        assert!(!machine.tunnel_active().await);
        assert_eq!(machine.listener_port().await, None);
        assert_eq!(machine.teardown().await, Teardown::Pending);
    }

    #[tokio::test]
    async fn test_resolve_address() {
        let provider = FakeProvider::new(&["nyc1"]);
        let machine = ready_record(&provider).await;
        assert_eq!(machine.address().await, "10.0.0.1");
        assert_eq!(provider.lookups().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_without_public_address() {
        let provider = FakeProvider::new(&["nyc1"]);
        provider.set_address(1, None);

        let machine = record(1);
        assert!(!machine.resolve_address(&provider).await.unwrap());
        assert!(!machine.is_ready().await);
    }

    #[tokio::test]
    async fn test_resolve_failure_leaves_address_empty() {
        let provider = FakeProvider::new(&["nyc1"]);
        provider.fail_lookup_of(1);

        let machine = record(1);
        let err = machine.resolve_address(&provider).await.unwrap_err();
        assert!(err.to_string().contains("cloud-proxy-1"));
        assert!(!machine.is_ready().await);
    }

    #[tokio::test]
    async fn test_start_tunnel_sets_state() {
        let provider = FakeProvider::new(&["nyc1"]);
        let transport = FakeTransport::new();
        let machine = ready_record(&provider).await;

        machine.start_tunnel(&launcher(&transport), 55555).await.unwrap();

        assert!(machine.tunnel_active().await);
        assert_eq!(machine.listener_port().await, Some(55555));
        let spec = &transport.specs()[0];
        assert_eq!(spec.address, "10.0.0.1");
        assert_eq!(spec.local_port, 55555);

        machine.stop_tunnel().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_tunnel_twice() {
        let provider = FakeProvider::new(&["nyc1"]);
        let transport = FakeTransport::new();
        let machine = ready_record(&provider).await;
        let launcher = launcher(&transport);

        machine.start_tunnel(&launcher, 55555).await.unwrap();
        let err = machine.start_tunnel(&launcher, 55556).await.unwrap_err();

        assert!(matches!(err, TunnelError::AlreadyActive(MachineId(0))));
        assert_eq!(transport.spawned(), 1);
        // The original tunnel is untouched
        assert_eq!(machine.listener_port().await, Some(55555));
        assert_eq!(transport.kills(), 0);

        machine.stop_tunnel().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_tunnel_not_ready() {
        let transport = FakeTransport::new();
        let machine = record(1);

        let err = machine.start_tunnel(&launcher(&transport), 55555).await.unwrap_err();
        assert!(matches!(err, TunnelError::NotReady(_)));
        assert_eq!(transport.spawned(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_state_unchanged() {
        let provider = FakeProvider::new(&["nyc1"]);
        let transport = FakeTransport::new();
        transport.fail_spawns(true);
        let machine = ready_record(&provider).await;

        let err = machine.start_tunnel(&launcher(&transport), 55555).await.unwrap_err();
        assert!(matches!(err, TunnelError::Spawn { .. }));
        assert!(!machine.tunnel_active().await);
        assert_eq!(machine.listener_port().await, None);
    }

    #[tokio::test]
    async fn test_stop_inactive_tunnel() {
        let transport = FakeTransport::new();
        let machine = record(1);

        let err = machine.stop_tunnel().await.unwrap_err();
        assert!(matches!(err, TunnelError::NotActive(_)));
        assert_eq!(transport.kills(), 0);
    }

    #[tokio::test]
    async fn test_stop_twice_kills_once() {
        let provider = FakeProvider::new(&["nyc1"]);
        let transport = FakeTransport::new();
        let machine = ready_record(&provider).await;

        machine.start_tunnel(&launcher(&transport), 55555).await.unwrap();
        machine.stop_tunnel().await.unwrap();
        assert!(machine.stop_tunnel().await.is_err());

        assert_eq!(transport.kills(), 1);
        assert!(!machine.tunnel_active().await);
    }

    #[tokio::test]
    async fn test_kill_failure_clears_state() {
        let provider = FakeProvider::new(&["nyc1"]);
        let transport = FakeTransport::new();
        let machine = ready_record(&provider).await;

        machine.start_tunnel(&launcher(&transport), 55555).await.unwrap();
        transport.fail_kills(true);

        assert!(matches!(machine.stop_tunnel().await, Err(TunnelError::Stop(_))));
        assert!(!machine.tunnel_active().await);
        assert_eq!(machine.listener_port().await, None);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let provider = FakeProvider::new(&["nyc1"]);
        let transport = FakeTransport::new();
        let machine = ready_record(&provider).await;
        let launcher = launcher(&transport);

        machine.start_tunnel(&launcher, 55555).await.unwrap();
        machine.stop_tunnel().await.unwrap();
        machine.start_tunnel(&launcher, 1080).await.unwrap();

        assert_eq!(machine.listener_port().await, Some(1080));
        assert_eq!(transport.spawned(), 2);
        machine.stop_tunnel().await.unwrap();
    }

    #[tokio::test]
    async fn test_retire_stops_and_destroys() {
        let provider = FakeProvider::new(&["nyc1"]);
        let transport = FakeTransport::new();
        let machine = ready_record(&provider).await;
        machine.start_tunnel(&launcher(&transport), 55555).await.unwrap();

        let retirement = machine.retire(&provider).await;

        assert!(matches!(retirement.tunnel, Some(Ok(()))));
        assert!(matches!(retirement.destroy, Ok(true)));
        assert!(!machine.tunnel_active().await);
        assert_eq!(transport.kills(), 1);
        assert_eq!(machine.teardown().await, Teardown::Destroyed);

        let again = machine.retire(&provider).await;
        assert!(again.tunnel.is_none());
        assert!(matches!(again.destroy, Ok(false)));
        assert_eq!(provider.deletes().len(), 1);
    }

    #[tokio::test]
    async fn test_no_tunnel_after_retire() {
        let provider = FakeProvider::new(&["nyc1"]);
        let transport = FakeTransport::new();
        let machine = ready_record(&provider).await;
        machine.retire(&provider).await;

        let err = machine.start_tunnel(&launcher(&transport), 1080).await.unwrap_err();

        assert!(matches!(err, TunnelError::TornDown(MachineId(0))));
        assert_eq!(transport.spawned(), 0);
        assert!(!machine.tunnel_active().await);
    }

    #[tokio::test]
    async fn test_no_tunnel_after_failed_destroy() {
        let provider = FakeProvider::new(&["nyc1"]);
        provider.fail_delete_of(1);
        let transport = FakeTransport::new();
        let machine = ready_record(&provider).await;

        assert!(machine.retire(&provider).await.destroy.is_err());
        assert!(matches!(
            machine.start_tunnel(&launcher(&transport), 1080).await,
            Err(TunnelError::TornDown(_))
        ));
        assert_eq!(transport.spawned(), 0);
    }

    #[tokio::test]
    async fn test_destroy_once() {
        let provider = FakeProvider::new(&["nyc1"]);
        let machine = record(1);

        assert!(machine.destroy(&provider).await.unwrap());
        assert!(!machine.destroy(&provider).await.unwrap());
        assert_eq!(provider.deletes().len(), 1);
        assert_eq!(machine.teardown().await, Teardown::Destroyed);
    }

    #[tokio::test]
    async fn test_failed_destroy_not_retried() {
        let provider = FakeProvider::new(&["nyc1"]);
        provider.fail_delete_of(1);
        let machine = record(1);

        assert!(machine.destroy(&provider).await.is_err());
        assert!(!machine.destroy(&provider).await.unwrap());
        assert_eq!(provider.deletes().len(), 1);
        assert_eq!(machine.teardown().await, Teardown::Failed);
    }
}
