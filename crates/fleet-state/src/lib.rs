pub mod audit;
pub mod error;
pub mod firmware;
pub mod processor;
pub mod store;
pub mod tasks;

pub use audit::{AuditWriter, WriteJob};
pub use error::{Result, StateError};
pub use firmware::{DirectoryInventory, FirmwareInventory};
pub use processor::MessageProcessor;
pub use store::SensorStateStore;
pub use tasks::{PeriodicTasks, TaskIntervals};
