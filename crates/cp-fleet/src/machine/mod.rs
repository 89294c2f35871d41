//! Machine records and the registry holding them

mod record;
mod registry;

pub use record::{MachineRecord, MachineSnapshot, Retirement, Teardown};
pub use registry::MachineRegistry;
