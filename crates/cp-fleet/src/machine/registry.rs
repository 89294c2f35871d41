//! Ordered, fixed-membership collection of machine records

use cp_core::types::{Instance, MachineId};

use super::{MachineRecord, MachineSnapshot};

/// All machines of one run, in creation order
///
/// Membership never changes after construction; only the records' tunnel
/// and teardown state does.
pub struct MachineRegistry {
    machines: Vec<MachineRecord>,
}

impl MachineRegistry {
    /// Build records from creation results, numbering them from 0
    pub fn from_instances(instances: Vec<Instance>) -> Self {
        let machines = instances
            .into_iter()
            .enumerate()
            .map(|(i, instance)| MachineRecord::new(MachineId(i), instance))
            .collect();
        Self { machines }
    }

    /// Every record in registry order
    pub fn all(&self) -> impl Iterator<Item = &MachineRecord> + Clone + '_ {
        self.machines.iter()
    }

    /// Look up a record by console id
    pub fn find_by_id(&self, id: MachineId) -> Option<&MachineRecord> {
        self.machines.iter().find(|m| m.id() == id)
    }

    /// Consistent copies of every record, in registry order
    pub async fn snapshot(&self) -> Vec<MachineSnapshot> {
        let mut snapshots = Vec::with_capacity(self.machines.len());
        for machine in &self.machines {
            snapshots.push(machine.snapshot().await);
        }
        snapshots
    }

    /// Listener ports of the running tunnels, in registry order
    pub async fn active_ports(&self) -> Vec<u16> {
        let mut ports = Vec::new();
        for machine in &self.machines {
            if let Some(port) = machine.listener_port().await {
                ports.push(port);
            }
        }
        ports
    }

    /// Number of machines
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// Whether the registry holds no machines
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}
