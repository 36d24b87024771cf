pub mod commander;
pub mod composer;
pub mod subscriber;

pub use commander::{ChannelCommandSink, CommandSink, MqttCommander};
pub use composer::{CommandComposer, FrameComposer};
pub use subscriber::TelemetrySubscriber;
