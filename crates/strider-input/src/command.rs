//! Shared command snapshot and the [`CommandSource`] contract.
//!
//! Every input variant (keyboard, joystick, network relay) owns a complete
//! [`CommandVector`] of its own and publishes *copies* of it into one
//! [`SharedCommand`].  The lock is held only for the copy, never across I/O,
//! so the control loop's [`SharedCommand::snapshot`] can never observe fields
//! from two different writes.  Concurrent writers resolve last-write-wins.

use std::sync::{Arc, Mutex, MutexGuard};

use strider_types::{CommandVector, StriderError};

/// Many-writer / one-reader command cell.  Clone it cheaply – all clones
/// share the same snapshot.
#[derive(Clone, Debug, Default)]
pub struct SharedCommand {
    inner: Arc<Mutex<CommandVector>>,
}

impl SharedCommand {
    /// A cell holding the zero command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole command vector.
    pub fn publish(&self, command: CommandVector) {
        *self.lock() = command;
    }

    /// Copy out the current command vector.  Never blocks on I/O.
    pub fn snapshot(&self) -> CommandVector {
        *self.lock()
    }

    /// Reset to the zero command.
    pub fn clear(&self) {
        self.publish(CommandVector::default());
    }

    fn lock(&self) -> MutexGuard<'_, CommandVector> {
        // Writers only ever store a complete `Copy` value, so a poisoned
        // guard still holds a whole vector.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An independently scheduled producer of operator commands.
///
/// The control loop depends only on this interface: it starts the source,
/// reads snapshots, and stops it at shutdown.
pub trait CommandSource: Send {
    /// Stable identifier for logs, e.g. `"keyboard"`.
    fn name(&self) -> &str;

    /// Begin producing commands on the source's own thread.
    ///
    /// A missing input device is not an error: the source logs once and
    /// keeps yielding the zero command.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Channel`] if the worker thread cannot be
    /// spawned.
    fn start(&mut self) -> Result<(), StriderError>;

    /// The latest command.  Non-blocking; the zero vector before any input.
    fn get_command(&self) -> CommandVector;

    /// Ask the source to stop and wait a bounded time for its thread.
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_at_zero() {
        let shared = SharedCommand::new();
        assert_eq!(shared.snapshot(), CommandVector::default());
    }

    #[test]
    fn publish_replaces_whole_vector() {
        let shared = SharedCommand::new();
        shared.publish(CommandVector {
            x_vel: 1.0,
            scram: true,
            height_index: 7,
            ..CommandVector::default()
        });
        shared.publish(CommandVector {
            y_vel: -1.0,
            ..CommandVector::default()
        });
        let cmd = shared.snapshot();
        assert_eq!(cmd.velocities(), [0.0, -1.0, 0.0]);
        assert!(!cmd.scram);
        assert_eq!(cmd.height_index, 0);
    }

    /// Each writer publishes vectors whose three velocity channels all carry
    /// the same writer-specific value; a torn read would mix values.
    #[test]
    fn concurrent_writers_never_produce_torn_reads() {
        let shared = SharedCommand::new();
        let writers: Vec<_> = (1..=4)
            .map(|w| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for i in 0..5_000 {
                        let v = (w * 100_000 + i) as f64;
                        shared.publish(CommandVector {
                            x_vel: v,
                            y_vel: v,
                            ang_vel: v,
                            height_index: w,
                            ..CommandVector::default()
                        });
                    }
                })
            })
            .collect();

        for _ in 0..20_000 {
            let cmd = shared.snapshot();
            assert_eq!(cmd.x_vel, cmd.y_vel);
            assert_eq!(cmd.y_vel, cmd.ang_vel);
            if cmd.height_index != 0 {
                assert_eq!((cmd.x_vel as i32) / 100_000, cmd.height_index);
            }
        }
        for w in writers {
            w.join().unwrap();
        }
    }

    #[test]
    fn clear_resets_to_zero() {
        let shared = SharedCommand::new();
        shared.publish(CommandVector {
            ang_vel: 0.5,
            ..CommandVector::default()
        });
        shared.clear();
        assert_eq!(shared.snapshot(), CommandVector::default());
    }
}
