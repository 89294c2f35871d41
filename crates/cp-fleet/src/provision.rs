//! Fleet provisioning
//!
//! allocate regions → create instances per region → fixed boot wait →
//! build the registry → one address lookup per machine → start tunnels on
//! sequential ports.
//!
//! Creation failures are fatal and nothing already created is rolled back;
//! the operator is told which instances may need manual cleanup.

use std::sync::Arc;

use cp_core::config::ProxyConfig;
use cp_core::error::{CloudProxyError, ProvisionError};
use cp_core::traits::InstanceProvider;
use cp_core::types::{CreateRequest, Instance, MachineId};

use crate::allocator::{allocate, RegionAllocation};
use crate::machine::MachineRegistry;
use crate::tunnel::TunnelLauncher;

/// Random, hostname-safe instance names: `<prefix>-<8 hex chars>`
pub fn instance_names(prefix: &str, count: u32) -> Vec<String> {
    (0..count)
        .map(|_| format!("{}-{:08x}", prefix, rand::random::<u32>()))
        .collect()
}

/// Result of the initial tunnel startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupSummary {
    /// Machines with a running tunnel and its port
    pub started: Vec<(MachineId, u16)>,
    /// Machines without an address after the single lookup
    pub not_ready: Vec<MachineId>,
    /// Ready machines whose tunnel could not be spawned
    pub failed: Vec<MachineId>,
}

/// Drives instance creation for one run
pub struct Provisioner<'a> {
    config: &'a ProxyConfig,
    provider: Arc<dyn InstanceProvider>,
}

impl<'a> Provisioner<'a> {
    /// Provisioner for `config` using `provider`
    pub fn new(config: &'a ProxyConfig, provider: Arc<dyn InstanceProvider>) -> Self {
        Self { config, provider }
    }

    /// Query the provider's regions and spread the requested count over them
    pub async fn plan(&self) -> Result<RegionAllocation, CloudProxyError> {
        let available = self.provider.list_regions().await?;
        tracing::debug!("Provider offers {} region(s): {:?}", available.len(), available);

        let allocation = allocate(&available, &self.config.regions, self.config.count)?;
        Ok(allocation)
    }

    /// Create the instances of `allocation`, region by region
    pub async fn create(
        &self,
        allocation: &RegionAllocation,
    ) -> Result<Vec<Instance>, CloudProxyError> {
        let mut instances: Vec<Instance> = Vec::new();

        for (region, count) in allocation.iter() {
            tracing::info!("Creating {} droplets to region {}", count, region);

            let request = CreateRequest {
                names: instance_names(&self.config.name_prefix, count),
                region: region.to_string(),
                key_id: self.config.key_id().to_string(),
                size: self.config.droplet_size.clone(),
                image: self.config.droplet_image.clone(),
            };

            match self.provider.create_instances(&request).await {
                Ok(created) => instances.extend(created),
                Err(source) => {
                    if !instances.is_empty() {
                        let names: Vec<&str> = instances.iter().map(|i| i.name.as_str()).collect();
                        tracing::warn!(
                            "Already created and not rolled back: {}",
                            names.join(", ")
                        );
                    }
                    return Err(ProvisionError {
                        region: region.to_string(),
                        count,
                        source,
                    }
                    .into());
                }
            }
        }

        Ok(instances)
    }

    /// Plan, create, wait for boot and build the registry
    pub async fn provision(&self) -> Result<MachineRegistry, CloudProxyError> {
        let allocation = self.plan().await?;
        let instances = self.create(&allocation).await?;

        tracing::info!(
            "Droplets deployed. Waiting {} seconds...",
            self.config.boot_wait.as_secs()
        );
        tokio::time::sleep(self.config.boot_wait).await;

        Ok(MachineRegistry::from_instances(instances))
    }
}

/// Resolve every machine's address once and start tunnels on ready ones
///
/// Ports are handed out sequentially from `start_port` in registry order.
/// The counter advances for every ready machine, including one whose spawn
/// fails, and does not advance for machines that are not ready.
pub async fn start_tunnels(
    registry: &MachineRegistry,
    provider: &dyn InstanceProvider,
    launcher: &TunnelLauncher,
    start_port: u16,
) -> StartupSummary {
    let mut summary = StartupSummary::default();
    let mut next_port = Some(start_port);

    for machine in registry.all() {
        let ready = match machine.resolve_address(provider).await {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        };

        if !ready {
            tracing::warn!("Droplet name: {} is not ready yet. Skipping...", machine.name());
            summary.not_ready.push(machine.id());
            continue;
        }

        let Some(port) = next_port else {
            tracing::warn!("No local port left for {}", machine.name());
            summary.failed.push(machine.id());
            continue;
        };
        next_port = port.checked_add(1);

        match machine.start_tunnel(launcher, port).await {
            Ok(()) => summary.started.push((machine.id(), port)),
            Err(e) => {
                tracing::warn!(
                    "Could not start SSH proxy on droplet name: {}: {}",
                    machine.name(),
                    e
                );
                summary.failed.push(machine.id());
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvider, FakeTransport};
    use cp_core::error::AllocationError;
    use std::path::PathBuf;
    use std::time::Duration;

    fn config(count: u32, regions: &str) -> ProxyConfig {
        ProxyConfig {
            token: Some("t".to_string()),
            key_id: Some("aa:bb".to_string()),
            count,
            regions: regions.to_string(),
            boot_wait: Duration::from_secs(100),
            ..ProxyConfig::default()
        }
    }

    fn launcher(transport: &FakeTransport) -> TunnelLauncher {
        TunnelLauncher::new(Arc::new(transport.clone()), "root", PathBuf::from("/k"))
    }

    #[test]
    fn test_instance_names() {
        let names = instance_names("cloud-proxy", 3);
        assert_eq!(names.len(), 3);
        for name in names {
            let suffix = name.strip_prefix("cloud-proxy-").unwrap();
            assert_eq!(suffix.len(), 8);
            assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[tokio::test]
    async fn test_plan_uses_filter() {
        let provider = FakeProvider::new(&["nyc1", "sfo2", "ams3"]);
        let config = config(5, "ams3,nyc1");

        let allocation = Provisioner::new(&config, Arc::new(provider)).plan().await.unwrap();
        assert_eq!(allocation.get("nyc1"), Some(3));
        assert_eq!(allocation.get("ams3"), Some(2));
        assert_eq!(allocation.get("sfo2"), None);
    }

    #[tokio::test]
    async fn test_plan_without_regions() {
        let provider = FakeProvider::new(&["nyc1"]);
        let config = config(2, "lon1");

        let err = Provisioner::new(&config, Arc::new(provider)).plan().await.unwrap_err();
        assert!(matches!(err, CloudProxyError::Allocation(AllocationError::NoRegions)));
    }

    #[tokio::test]
    async fn test_create_requests_per_region() {
        let provider = FakeProvider::new(&["nyc1", "nyc2"]);
        let config = config(3, "*");
        let provisioner = Provisioner::new(&config, Arc::new(provider.clone()));

        let allocation = provisioner.plan().await.unwrap();
        let instances = provisioner.create(&allocation).await.unwrap();

        assert_eq!(instances.len(), 3);
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].region, "nyc1");
        assert_eq!(requests[0].count(), 2);
        assert_eq!(requests[1].region, "nyc2");
        assert_eq!(requests[1].count(), 1);
        assert!(requests.iter().all(|r| r.key_id == "aa:bb"));
    }

    #[tokio::test]
    async fn test_create_failure_is_fatal_without_rollback() {
        let provider = FakeProvider::new(&["nyc1", "nyc2"]);
        provider.fail_create_in("nyc2");
        let config = config(4, "*");
        let provisioner = Provisioner::new(&config, Arc::new(provider.clone()));

        let allocation = provisioner.plan().await.unwrap();
        let err = provisioner.create(&allocation).await.unwrap_err();

        match err {
            CloudProxyError::Provision(e) => assert_eq!(e.region, "nyc2"),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(provider.created().len(), 2);
        assert!(provider.deletes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_waits_for_boot() {
        let provider = FakeProvider::new(&["nyc1"]);
        let config = config(2, "*");
        let started = tokio::time::Instant::now();

        let registry = Provisioner::new(&config, Arc::new(provider)).provision().await.unwrap();

        assert_eq!(registry.len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_startup() {
        let provider = FakeProvider::new(&["nyc1", "nyc2"]);
        // Instance 2 has no public address yet
        provider.set_address(2, None);
        let transport = FakeTransport::new();
        let config = config(4, "*");

        let provisioner = Provisioner::new(&config, Arc::new(provider.clone()));
        let allocation = provisioner.plan().await.unwrap();
        assert_eq!(allocation.get("nyc1"), Some(2));
        assert_eq!(allocation.get("nyc2"), Some(2));

        let registry = provisioner.provision().await.unwrap();
        let summary = start_tunnels(&registry, &provider, &launcher(&transport), 55555).await;

        assert_eq!(
            summary.started,
            vec![
                (MachineId(0), 55555),
                (MachineId(2), 55556),
                (MachineId(3), 55557)
            ]
        );
        assert_eq!(summary.not_ready, vec![MachineId(1)]);
        assert!(summary.failed.is_empty());
        assert_eq!(registry.active_ports().await, vec![55555, 55556, 55557]);
        // One lookup per machine, no polling
        assert_eq!(provider.lookups().len(), 4);

        for machine in registry.all() {
            let _ = machine.stop_tunnel().await;
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_skips_machine() {
        let provider = FakeProvider::new(&["nyc1"]);
        let transport = FakeTransport::new();
        let config = config(2, "*");
        let provisioner = Provisioner::new(&config, Arc::new(provider.clone()));
        let instances = provisioner.create(&provisioner.plan().await.unwrap()).await.unwrap();
        provider.fail_lookup_of(1);

        let registry = MachineRegistry::from_instances(instances);
        let summary = start_tunnels(&registry, &provider, &launcher(&transport), 1080).await;

        assert_eq!(summary.not_ready, vec![MachineId(0)]);
        assert_eq!(summary.started, vec![(MachineId(1), 1080)]);

        registry.find_by_id(MachineId(1)).unwrap().stop_tunnel().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_consumes_port() {
        let provider = FakeProvider::new(&["nyc1"]);
        let transport = FakeTransport::new();
        transport.fail_spawns(true);
        let config = config(2, "*");
        let provisioner = Provisioner::new(&config, Arc::new(provider.clone()));
        let instances = provisioner.create(&provisioner.plan().await.unwrap()).await.unwrap();

        let registry = MachineRegistry::from_instances(instances);
        let summary = start_tunnels(&registry, &provider, &launcher(&transport), 1080).await;

        assert!(summary.started.is_empty());
        assert_eq!(summary.failed, vec![MachineId(0), MachineId(1)]);
    }
}
