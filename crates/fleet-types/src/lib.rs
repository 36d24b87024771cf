pub mod command;
pub mod message;
pub mod record;
pub mod snapshot;
pub mod telemetry;
pub mod topic;

pub use command::SensorCommand;
pub use message::InboundMessage;
pub use record::{SensorRecord, GENERIC_MESSAGE_CAPACITY};
pub use snapshot::FleetSnapshot;
pub use telemetry::TelemetryPatch;
