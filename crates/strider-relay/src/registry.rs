//! [`ConnectionRegistry`] – who is connected to the relay, in which role.
//!
//! One producer slot (the simulation / robot) and any number of consumers
//! (viewers).  Every connection owns a bounded outbox of
//! [`OUTBOX_CAPACITY`] frames; the registry only holds the sending halves,
//! so routing a frame never waits on a slow socket.  A peer whose outbox is
//! full has stopped reading and is disconnected.

use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{info, warn};
use uuid::Uuid;

/// Frames queued per connection before the peer counts as stalled.
pub const OUTBOX_CAPACITY: usize = 256;

/// Per-connection outbound text queue.
pub type Outbox = Sender<String>;

/// A fresh outbox and the receiving half its connection drains.
pub fn outbox() -> (Outbox, Receiver<String>) {
    mpsc::channel(OUTBOX_CAPACITY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    producer: Option<(Uuid, Outbox)>,
    consumers: HashMap<Uuid, Outbox>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `id` as the producer.  Returns the id of the producer it
    /// replaced, whose outbox is dropped so its connection winds down.
    pub fn register_producer(&mut self, id: Uuid, outbox: Outbox) -> Option<Uuid> {
        let replaced = self.producer.replace((id, outbox)).map(|(old, _)| old);
        match replaced {
            Some(old) => info!(producer = %id, replaced = %old, "producer replaced"),
            None => info!(producer = %id, "producer connected"),
        }
        replaced
    }

    pub fn register_consumer(&mut self, id: Uuid, outbox: Outbox) {
        self.consumers.insert(id, outbox);
        info!(consumer = %id, consumers = self.consumers.len(), "consumer connected");
    }

    /// Forget `id`.  A stale producer id never clears a newer producer.
    pub fn remove(&mut self, id: Uuid) -> Option<Role> {
        if self.producer.as_ref().is_some_and(|(pid, _)| *pid == id) {
            self.producer = None;
            info!(producer = %id, "producer disconnected");
            return Some(Role::Producer);
        }
        if self.consumers.remove(&id).is_some() {
            info!(consumer = %id, consumers = self.consumers.len(), "consumer disconnected");
            return Some(Role::Consumer);
        }
        None
    }

    /// Queue `text` for every consumer, pruning ones whose connection is
    /// gone or whose outbox is full.  Returns the number of consumers reached.
    pub fn broadcast_state(&mut self, text: &str) -> usize {
        self.consumers.retain(|id, outbox| match outbox.try_send(text.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(consumer = %id, capacity = OUTBOX_CAPACITY, "consumer stalled; disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        self.consumers.len()
    }

    /// Queue `text` for the producer.  Returns `false` when there is none.
    /// A producer that is gone or stalled is dropped from the slot.
    pub fn forward_command(&mut self, text: &str) -> bool {
        let Some((id, outbox)) = &self.producer else {
            return false;
        };
        match outbox.try_send(text.to_string()) {
            Ok(()) => true,
            Err(e) => {
                if matches!(e, TrySendError::Full(_)) {
                    warn!(producer = %id, capacity = OUTBOX_CAPACITY, "producer stalled; disconnecting");
                }
                self.producer = None;
                false
            }
        }
    }

    pub fn has_producer(&self) -> bool {
        self.producer.is_some()
    }

    pub fn producer_id(&self) -> Option<Uuid> {
        self.producer.as_ref().map(|(id, _)| *id)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}
