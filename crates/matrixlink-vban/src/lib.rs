//! MatrixLink VBAN - UDP text-command client for a remote matrix engine.
//!
//! This crate provides:
//! - The 28-byte VBAN header codec for text commands, RT-packet
//!   subscriptions and inbound telemetry
//! - A command channel connected to one remote engine
//! - Background resubscription and telemetry decoding
//! - Timed preset switching and per-control commands

pub mod channel;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod sequencer;
pub mod subscriber;
pub mod telemetry;

pub use channel::{ChannelOptions, CommandChannel};
pub use codec::Packet;
pub use endpoint::{Endpoint, StreamName};
pub use error::{VbanError, VbanResult};
pub use events::{TelemetryEvent, TelemetryHub};
pub use sequencer::{CommandSink, PresetSequencer, STEP_DELAY};
pub use subscriber::{RESUBSCRIBE_INTERVAL, TelemetrySubscriber};
pub use telemetry::TelemetryState;
