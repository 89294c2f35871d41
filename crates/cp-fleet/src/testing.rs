//! In-memory provider and transport fakes
//!
//! Compiled for this crate's tests and for downstream crates that enable
//! the `testing` feature.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, DuplexStream};

use cp_core::error::ProviderError;
use cp_core::traits::{
    DiagnosticStream, InstanceProvider, TunnelProcess, TunnelSpec, TunnelTransport,
};
use cp_core::types::{CreateRequest, Instance, InstanceId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct ProviderState {
    regions: Vec<String>,
    next_id: u64,
    created: Vec<Instance>,
    requests: Vec<CreateRequest>,
    addresses: HashMap<InstanceId, Option<String>>,
    failing_regions: HashSet<String>,
    failing_lookups: HashSet<InstanceId>,
    failing_deletes: HashSet<InstanceId>,
    lookups: Vec<InstanceId>,
    deletes: Vec<InstanceId>,
}

/// Fake cloud provider
///
/// Instances get ids starting at 1 and the address `10.0.0.<id>` unless
/// overridden with [`FakeProvider::set_address`].
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl FakeProvider {
    /// Provider offering `regions` in that order
    pub fn new(regions: &[&str]) -> Self {
        let state = ProviderState {
            regions: regions.iter().map(|r| r.to_string()).collect(),
            next_id: 1,
            ..ProviderState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Override the address reported for `id`
    pub fn set_address(&self, id: u64, address: Option<&str>) {
        lock(&self.state)
            .addresses
            .insert(InstanceId(id), address.map(str::to_string));
    }

    /// Make creation in `region` fail
    pub fn fail_create_in(&self, region: &str) {
        lock(&self.state).failing_regions.insert(region.to_string());
    }

    /// Make the address lookup of `id` fail
    pub fn fail_lookup_of(&self, id: u64) {
        lock(&self.state).failing_lookups.insert(InstanceId(id));
    }

    /// Make the deletion of `id` fail
    pub fn fail_delete_of(&self, id: u64) {
        lock(&self.state).failing_deletes.insert(InstanceId(id));
    }

    /// Create requests received so far
    pub fn requests(&self) -> Vec<CreateRequest> {
        lock(&self.state).requests.clone()
    }

    /// Instances created so far
    pub fn created(&self) -> Vec<Instance> {
        lock(&self.state).created.clone()
    }

    /// Delete calls received so far, failed ones included
    pub fn deletes(&self) -> Vec<InstanceId> {
        lock(&self.state).deletes.clone()
    }

    /// Address lookups received so far
    pub fn lookups(&self) -> Vec<InstanceId> {
        lock(&self.state).lookups.clone()
    }
}

#[async_trait]
impl InstanceProvider for FakeProvider {
    async fn list_regions(&self) -> Result<Vec<String>, ProviderError> {
        Ok(lock(&self.state).regions.clone())
    }

    async fn create_instances(
        &self,
        request: &CreateRequest,
    ) -> Result<Vec<Instance>, ProviderError> {
        let mut state = lock(&self.state);
        state.requests.push(request.clone());

        if state.failing_regions.contains(&request.region) {
            return Err(ProviderError::Api {
                status: 422,
                message: format!("region {} is unavailable", request.region),
            });
        }

        let mut instances = Vec::with_capacity(request.count());
        for name in &request.names {
            let id = InstanceId(state.next_id);
            state.next_id += 1;
            instances.push(Instance {
                id,
                name: name.clone(),
                region: request.region.clone(),
            });
        }
        state.created.extend(instances.iter().cloned());
        Ok(instances)
    }

    async fn get_address(&self, id: InstanceId) -> Result<Option<String>, ProviderError> {
        let mut state = lock(&self.state);
        state.lookups.push(id);

        if state.failing_lookups.contains(&id) {
            return Err(ProviderError::InvalidResponse("lookup failed".to_string()));
        }
        Ok(state
            .addresses
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Some(format!("10.0.0.{}", id.0))))
    }

    async fn delete_instance(&self, id: InstanceId) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        state.deletes.push(id);

        if state.failing_deletes.contains(&id) {
            return Err(ProviderError::Api {
                status: 500,
                message: "delete failed".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct TransportState {
    specs: Vec<TunnelSpec>,
    writers: Vec<Option<DuplexStream>>,
    kills: usize,
    fail_spawns: bool,
    fail_kills: bool,
}

/// Fake tunnel transport
///
/// Each spawned process gets an in-memory diagnostic pipe whose write half
/// stays with the transport, so the stream only ends when the test says so.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    /// New transport that spawns successfully
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent spawns fail with `NotFound`
    pub fn fail_spawns(&self, fail: bool) {
        lock(&self.state).fail_spawns = fail;
    }

    /// Make subsequent kills fail
    pub fn fail_kills(&self, fail: bool) {
        lock(&self.state).fail_kills = fail;
    }

    /// Number of processes spawned
    pub fn spawned(&self) -> usize {
        lock(&self.state).specs.len()
    }

    /// Specs of every spawned process, in spawn order
    pub fn specs(&self) -> Vec<TunnelSpec> {
        lock(&self.state).specs.clone()
    }

    /// Number of kill requests, failed ones included
    pub fn kills(&self) -> usize {
        lock(&self.state).kills
    }

    /// Write to the diagnostic stream of the `index`-th spawned process
    pub async fn write_diagnostics(&self, index: usize, bytes: &[u8]) {
        let writer = lock(&self.state).writers.get_mut(index).and_then(Option::take);
        if let Some(mut writer) = writer {
            let _ = writer.write_all(bytes).await;
            if let Some(slot) = lock(&self.state).writers.get_mut(index) {
                *slot = Some(writer);
            }
        }
    }

    /// Close the diagnostic stream of the `index`-th spawned process
    pub fn close_diagnostics(&self, index: usize) {
        if let Some(slot) = lock(&self.state).writers.get_mut(index) {
            slot.take();
        }
    }
}

impl TunnelTransport for FakeTransport {
    fn program(&self) -> &str {
        "fake-ssh"
    }

    fn spawn(&self, spec: &TunnelSpec) -> std::io::Result<Box<dyn TunnelProcess>> {
        let mut state = lock(&self.state);
        if state.fail_spawns {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "fake-ssh: not found",
            ));
        }

        let (reader, writer) = tokio::io::duplex(256);
        let pid = 1000 + state.specs.len() as u32;
        state.specs.push(spec.clone());
        state.writers.push(Some(writer));

        Ok(Box::new(FakeProcess {
            pid,
            diagnostics: Some(reader),
            transport: Arc::clone(&self.state),
        }))
    }
}

struct FakeProcess {
    pid: u32,
    diagnostics: Option<DuplexStream>,
    transport: Arc<Mutex<TransportState>>,
}

impl TunnelProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn take_diagnostics(&mut self) -> Option<DiagnosticStream> {
        self.diagnostics
            .take()
            .map(|reader| Box::new(reader) as DiagnosticStream)
    }

    fn kill(&mut self) -> std::io::Result<()> {
        let mut state = lock(&self.transport);
        state.kills += 1;
        if state.fail_kills {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "process already exited",
            ));
        }
        Ok(())
    }
}
