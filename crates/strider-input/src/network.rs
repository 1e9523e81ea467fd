//! Network-relay command source.
//!
//! The telemetry bridge owns the connection; this source only owns the
//! snapshot.  The bridge holds a [`RelayInbox`] and calls
//! [`RelayInbox::deliver`] for every inbound `command` message; the whole
//! command is published in one guarded write.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use strider_types::{CommandRelay, CommandVector, StriderError};
use tracing::{debug, info};

use crate::command::{CommandSource, SharedCommand};

/// Write handle given to the telemetry bridge.
#[derive(Clone, Debug)]
pub struct RelayInbox {
    shared: SharedCommand,
    active: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
}

impl RelayInbox {
    /// Publish a relayed command.  Ignored while the owning source is not
    /// started.  Returns `true` if the command was applied.
    pub fn deliver(&self, command: CommandRelay) -> bool {
        if !self.active.load(Ordering::Acquire) {
            debug!(source = "network", "relay command dropped; source inactive");
            return false;
        }
        self.shared.publish(CommandVector::from(command));
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Number of commands applied so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// [`CommandSource`] fed by the telemetry bridge.
pub struct NetworkCommandSource {
    inbox: RelayInbox,
}

impl NetworkCommandSource {
    pub fn new(shared: SharedCommand) -> Self {
        Self {
            inbox: RelayInbox {
                shared,
                active: Arc::new(AtomicBool::new(false)),
                delivered: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    /// Handle for the bridge to write through.
    pub fn inbox(&self) -> RelayInbox {
        self.inbox.clone()
    }
}

impl CommandSource for NetworkCommandSource {
    fn name(&self) -> &str {
        "network"
    }

    fn start(&mut self) -> Result<(), StriderError> {
        if !self.inbox.active.swap(true, Ordering::AcqRel) {
            info!(source = "network", "accepting relayed commands");
        }
        Ok(())
    }

    fn get_command(&self) -> CommandVector {
        self.inbox.shared.snapshot()
    }

    fn stop(&mut self) {
        self.inbox.active.store(false, Ordering::Release);
    }
}
