pub mod distributor;
pub mod machine;

pub use distributor::{Distributor, DistributorConfig};
pub use machine::{StallThresholds, SyncEvent, SyncState, SyncStateMachine};
