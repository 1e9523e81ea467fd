//! [`Worker`] – supervised background thread with cooperative shutdown.
//!
//! Every background unit (input translation, joystick polling, the telemetry
//! reactor) runs inside a `Worker`:
//!
//! * the body receives a [`StopSignal`] and is expected to return soon after
//!   it flips;
//! * a panic inside the body is caught and logged on the worker's own thread,
//!   so it never unwinds into the control loop;
//! * [`Worker::shutdown`] waits at most a caller-supplied timeout and then
//!   abandons a hung thread instead of blocking process exit;
//! * dropping a `Worker` raises its stop flag and detaches the thread
//!   quietly, for bodies parked in a blocking read.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use strider_types::StriderError;
use tracing::{error, warn};

/// Granularity of [`StopSignal::sleep`] and the join poll.
const POLL_SLICE: Duration = Duration::from_millis(5);

// ────────────────────────────────────────────────────────────────────────────
// StopSignal
// ────────────────────────────────────────────────────────────────────────────

/// Cooperative stop flag shared between a worker and its owner.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.  Idempotent.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for `duration`, waking early if a stop is requested.
    ///
    /// Returns `true` if the signal was stopped before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(POLL_SLICE));
        }
    }

    /// The raw flag, for APIs that take an `AtomicBool` (e.g. a Ctrl-C
    /// handler).
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

impl From<Arc<AtomicBool>> for StopSignal {
    fn from(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Worker
// ────────────────────────────────────────────────────────────────────────────

/// How a [`Worker::shutdown`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The thread returned normally within the timeout.
    Joined,
    /// The thread had panicked; the panic was contained.
    Panicked,
    /// The thread did not finish within the timeout and was detached.
    Abandoned,
}

/// Handle to a supervised background thread.
pub struct Worker {
    name: String,
    signal: StopSignal,
    panicked: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a new named thread.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Channel`] if the OS refuses to create the
    /// thread.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self, StriderError>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let name = name.into();
        let signal = StopSignal::new();
        let panicked = Arc::new(AtomicBool::new(false));

        let thread_signal = signal.clone();
        let thread_panicked = Arc::clone(&panicked);
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("strider-{name}"))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| body(thread_signal)));
                if let Err(payload) = result {
                    thread_panicked.store(true, Ordering::Release);
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(worker = %thread_name, %reason, "worker panicked; last published snapshot is retained");
                }
            })
            .map_err(|e| StriderError::Channel(format!("failed to spawn worker {name}: {e}")))?;

        Ok(Self {
            name,
            signal,
            panicked,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A clone of the worker's stop signal.
    pub fn signal(&self) -> StopSignal {
        self.signal.clone()
    }

    /// `true` once the body has returned or panicked.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// `true` if the body panicked.
    pub fn has_panicked(&self) -> bool {
        self.panicked.load(Ordering::Acquire)
    }

    /// Request a stop and wait up to `timeout` for the thread to exit.
    pub fn shutdown(&mut self, timeout: Duration) -> JoinOutcome {
        self.signal.stop();
        let Some(handle) = self.handle.take() else {
            return self.finished_outcome();
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(worker = %self.name, ?timeout, "worker did not stop in time; abandoning it");
                // Dropping the handle detaches the thread.
                return JoinOutcome::Abandoned;
            }
            thread::sleep(POLL_SLICE);
        }
        // The body's panic was already caught inside the thread.
        let _ = handle.join();
        self.finished_outcome()
    }

    fn finished_outcome(&self) -> JoinOutcome {
        if self.has_panicked() {
            JoinOutcome::Panicked
        } else {
            JoinOutcome::Joined
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.signal.stop();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LogOnce
// ────────────────────────────────────────────────────────────────────────────

/// One-shot latch for "logged once" degradations.
#[derive(Debug, Default)]
pub struct LogOnce {
    fired: AtomicBool,
}

impl LogOnce {
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Returns `true` exactly once, on the first call.
    pub fn first(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }
}
