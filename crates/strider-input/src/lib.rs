//! `strider-input` – Operator Command Sources
//!
//! Converts asynchronous human and network input into the single
//! [`SharedCommand`] snapshot that the control loop reads once per policy
//! tick.
//!
//! # Modules
//!
//! | Module | Contents |
//! |---|---|
//! | [`command`] | [`SharedCommand`] and the [`CommandSource`] trait |
//! | [`keyboard`] | level-triggered [`KeyboardSource`] with an event-translation thread |
//! | [`joystick`] | polling [`JoystickSource`] with a dead-zone |
//! | [`network`] | [`NetworkCommandSource`] fed by the telemetry bridge |
//! | [`worker`] | supervised threads with cooperative stop and bounded join |
//!
//! # Example
//!
//! ```rust
//! use strider_input::{CommandSource, SharedCommand, SourceSet};
//! use strider_input::network::NetworkCommandSource;
//!
//! let shared = SharedCommand::new();
//! let network = NetworkCommandSource::new(shared.clone());
//! let inbox = network.inbox();
//!
//! let mut sources = SourceSet::new(shared.clone());
//! sources.push(Box::new(network));
//! sources.start_all().unwrap();
//!
//! inbox.deliver(strider_types::CommandRelay { x_vel: 0.5, ..Default::default() });
//! assert_eq!(sources.get_command().x_vel, 0.5);
//! sources.stop_all();
//! ```

pub mod command;
pub mod joystick;
pub mod keyboard;
pub mod network;
pub mod worker;

pub use command::{CommandSource, SharedCommand};
pub use joystick::{JoystickConfig, JoystickSource};
pub use keyboard::KeyboardSource;
pub use network::{NetworkCommandSource, RelayInbox};
pub use worker::{JoinOutcome, LogOnce, StopSignal, Worker};

use strider_types::{CommandVector, StriderError};
use tracing::info;

/// All command sources attached to one control loop.  Every source writes
/// into the same [`SharedCommand`], so the loop reads a single snapshot.
pub struct SourceSet {
    shared: SharedCommand,
    sources: Vec<Box<dyn CommandSource>>,
}

impl SourceSet {
    pub fn new(shared: SharedCommand) -> Self {
        Self {
            shared,
            sources: Vec::new(),
        }
    }

    pub fn push(&mut self, source: Box<dyn CommandSource>) {
        self.sources.push(source);
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Start every source.
    ///
    /// # Errors
    ///
    /// Propagates the first start failure; sources started before it are
    /// stopped again.
    pub fn start_all(&mut self) -> Result<(), StriderError> {
        for i in 0..self.sources.len() {
            if let Err(e) = self.sources[i].start() {
                for started in &mut self.sources[..i] {
                    started.stop();
                }
                return Err(e);
            }
        }
        info!(sources = ?self.names(), "command sources started");
        Ok(())
    }

    pub fn stop_all(&mut self) {
        for source in &mut self.sources {
            source.stop();
        }
    }
}

impl CommandSource for SourceSet {
    fn name(&self) -> &str {
        "all"
    }

    fn start(&mut self) -> Result<(), StriderError> {
        self.start_all()
    }

    fn get_command(&self) -> CommandVector {
        self.shared.snapshot()
    }

    fn stop(&mut self) {
        self.stop_all();
    }
}
