//! `strider-bridge` – Telemetry Bridge
//!
//! Streams robot state to a relay over a persistent WebSocket connection and
//! feeds relayed operator commands back into the network command source.
//!
//! # Modules
//!
//! - [`codec`] – JSON text encoding of the [`TelemetryMessage`] wire protocol.
//! - [`bridge`] – [`TelemetryBridge`]: the reconnecting client that runs on
//!   its own thread and reactor, isolated from the control loop.
//!
//! [`TelemetryMessage`]: strider_types::TelemetryMessage

pub mod bridge;
pub mod codec;

pub use bridge::{BridgeConfig, BridgeHandle, BridgeStats, TelemetryBridge};
