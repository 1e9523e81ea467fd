//! Level-triggered keyboard command source.
//!
//! Key devices deliver discrete press/release events.  A dedicated
//! translation thread folds them into *held* state: while a direction key is
//! down its axis reads `±max_vel`, and releasing it returns the axis to
//! exactly zero.  There is no impulse or edge behaviour.
//!
//! | Key | Effect while held |
//! |---|---|
//! | `Forward` / `Backward` | `x_vel = ±max_vel` |
//! | `Left` / `Right` | `y_vel = ±max_vel` |
//! | `YawLeft` / `YawRight` | `ang_vel = ±max_vel` |
//! | `Scram` | latches `scram = true` (release does not clear it) |

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use strider_types::{CommandVector, StriderError};
use tracing::{debug, info, warn};

use crate::command::{CommandSource, SharedCommand};
use crate::worker::{JoinOutcome, LogOnce, Worker};

/// Default speed per held axis key, in m/s (rad/s for yaw).
pub const DEFAULT_MAX_VEL: f64 = 1.0;

/// How long the translation thread blocks on the device before re-checking
/// its stop signal.
const EVENT_POLL: Duration = Duration::from_millis(20);

/// Bounded join applied by [`KeyboardSource::stop`].
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Logical keys understood by the keyboard source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Forward,
    Backward,
    Left,
    Right,
    YawLeft,
    YawRight,
    Scram,
}

impl Key {
    /// Parse a key token such as `"w"`, `"up"`, `"q"` or `"space"`.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "w" | "up" => Some(Key::Forward),
            "s" | "down" => Some(Key::Backward),
            "a" | "left" => Some(Key::Left),
            "d" | "right" => Some(Key::Right),
            "q" => Some(Key::YawLeft),
            "e" => Some(Key::YawRight),
            "space" | "scram" => Some(Key::Scram),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Pressed(Key),
    Released(Key),
}

impl KeyEvent {
    /// Parse `"+w"` (press), `"-w"` (release) or a bare `"w"` (press).
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix('-') {
            Key::parse(rest).map(KeyEvent::Released)
        } else {
            Key::parse(line.strip_prefix('+').unwrap_or(line)).map(KeyEvent::Pressed)
        }
    }
}

/// Anything that yields key events.
pub trait KeyDevice: Send {
    /// Wait up to `timeout` for the next event.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::DeviceUnavailable`] once the device is gone
    /// for good.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<KeyEvent>, StriderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Held-key state
// ────────────────────────────────────────────────────────────────────────────

/// Folds press/release events into a level-triggered command.
#[derive(Debug, Clone)]
pub struct HeldKeys {
    max_vel: f64,
    command: CommandVector,
}

impl HeldKeys {
    pub fn new(max_vel: f64) -> Self {
        Self {
            max_vel,
            command: CommandVector::default(),
        }
    }

    /// Apply one event.  Returns `true` if the command changed.
    pub fn apply(&mut self, event: KeyEvent) -> bool {
        let before = self.command;
        let max = self.max_vel;
        let c = &mut self.command;
        match event {
            KeyEvent::Pressed(Key::Forward) => c.x_vel = max,
            KeyEvent::Pressed(Key::Backward) => c.x_vel = -max,
            KeyEvent::Pressed(Key::Left) => c.y_vel = max,
            KeyEvent::Pressed(Key::Right) => c.y_vel = -max,
            KeyEvent::Pressed(Key::YawLeft) => c.ang_vel = max,
            KeyEvent::Pressed(Key::YawRight) => c.ang_vel = -max,
            KeyEvent::Pressed(Key::Scram) => c.scram = true,
            KeyEvent::Released(Key::Forward | Key::Backward) => c.x_vel = 0.0,
            KeyEvent::Released(Key::Left | Key::Right) => c.y_vel = 0.0,
            KeyEvent::Released(Key::YawLeft | Key::YawRight) => c.ang_vel = 0.0,
            KeyEvent::Released(Key::Scram) => {}
        }
        self.command != before
    }

    pub fn command(&self) -> CommandVector {
        self.command
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Devices
// ────────────────────────────────────────────────────────────────────────────

/// Sending half of an in-process key device.
#[derive(Clone, Debug)]
pub struct KeySender {
    tx: Sender<KeyEvent>,
}

impl KeySender {
    pub fn press(&self, key: Key) -> Result<(), StriderError> {
        self.send(KeyEvent::Pressed(key))
    }

    pub fn release(&self, key: Key) -> Result<(), StriderError> {
        self.send(KeyEvent::Released(key))
    }

    pub fn send(&self, event: KeyEvent) -> Result<(), StriderError> {
        self.tx
            .send(event)
            .map_err(|e| StriderError::Channel(format!("key channel closed: {e}")))
    }
}

/// Key device fed through an in-process channel.
pub struct ChannelKeyDevice {
    rx: Receiver<KeyEvent>,
}

/// Create a connected [`KeySender`] / [`ChannelKeyDevice`] pair.
pub fn key_channel() -> (KeySender, ChannelKeyDevice) {
    let (tx, rx) = mpsc::channel();
    (KeySender { tx }, ChannelKeyDevice { rx })
}

impl KeyDevice for ChannelKeyDevice {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<KeyEvent>, StriderError> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StriderError::DeviceUnavailable(
                "key event channel disconnected".to_string(),
            )),
        }
    }
}

/// Key device reading one event per line from standard input
/// (`+w` press, `-w` release).
///
/// The blocking stdin reader lives on its own worker.  Dropping the device
/// raises the worker's stop flag and detaches the thread without waiting,
/// since it is normally parked in `read_line`.
pub struct StdinKeyDevice {
    inner: ChannelKeyDevice,
    _reader: Worker,
}

impl StdinKeyDevice {
    /// Start the stdin reader.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Channel`] if the reader thread cannot be
    /// spawned.
    pub fn open() -> Result<Self, StriderError> {
        let (sender, inner) = key_channel();
        let reader = Worker::spawn("stdin-keys", move |signal| {
            let stdin = std::io::stdin();
            let mut line = String::new();
            while !signal.is_stopped() {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => match KeyEvent::parse(&line) {
                        Some(event) => {
                            if sender.send(event).is_err() {
                                break;
                            }
                        }
                        None => debug!(input = line.trim(), "ignoring unknown key token"),
                    },
                }
            }
        })?;
        Ok(Self { inner, _reader: reader })
    }
}

impl KeyDevice for StdinKeyDevice {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<KeyEvent>, StriderError> {
        self.inner.next_event(timeout)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// KeyboardSource
// ────────────────────────────────────────────────────────────────────────────

/// Level-triggered [`CommandSource`] driven by a [`KeyDevice`].
pub struct KeyboardSource {
    shared: SharedCommand,
    max_vel: f64,
    device: Option<Box<dyn KeyDevice>>,
    worker: Option<Worker>,
    unavailable: LogOnce,
}

impl KeyboardSource {
    /// Create a source publishing into `shared`.  `device = None` models a
    /// machine with no keyboard attached.
    pub fn new(shared: SharedCommand, max_vel: f64, device: Option<Box<dyn KeyDevice>>) -> Self {
        Self {
            shared,
            max_vel,
            device,
            worker: None,
            unavailable: LogOnce::new(),
        }
    }
}

impl CommandSource for KeyboardSource {
    fn name(&self) -> &str {
        "keyboard"
    }

    fn start(&mut self) -> Result<(), StriderError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(mut device) = self.device.take() else {
            if self.unavailable.first() {
                warn!(source = "keyboard", "no key device available; command stays at zero");
            }
            return Ok(());
        };

        let shared = self.shared.clone();
        let mut held = HeldKeys::new(self.max_vel);
        self.worker = Some(Worker::spawn("keyboard", move |signal| {
            info!(source = "keyboard", "listening for key events");
            while !signal.is_stopped() {
                match device.next_event(EVENT_POLL) {
                    Ok(Some(event)) => {
                        if held.apply(event) {
                            shared.publish(held.command());
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(source = "keyboard", error = %e, "key device lost; last command retained");
                        break;
                    }
                }
            }
        })?);
        Ok(())
    }

    fn get_command(&self) -> CommandVector {
        self.shared.snapshot()
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take()
            && worker.shutdown(STOP_TIMEOUT) == JoinOutcome::Abandoned
        {
            warn!(source = "keyboard", "keyboard thread abandoned at shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for(shared: &SharedCommand, pred: impl Fn(&CommandVector) -> bool) -> CommandVector {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let cmd = shared.snapshot();
            if pred(&cmd) || Instant::now() > deadline {
                return cmd;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn held_key_is_level_triggered() {
        let mut held = HeldKeys::new(1.0);
        assert!(held.apply(KeyEvent::Pressed(Key::Forward)));
        // Repeated press (key auto-repeat) does not change anything.
        assert!(!held.apply(KeyEvent::Pressed(Key::Forward)));
        assert_eq!(held.command().x_vel, 1.0);
        assert!(held.apply(KeyEvent::Released(Key::Forward)));
        assert_eq!(held.command().x_vel, 0.0);
    }

    #[test]
    fn opposite_keys_share_an_axis() {
        let mut held = HeldKeys::new(0.5);
        held.apply(KeyEvent::Pressed(Key::Left));
        held.apply(KeyEvent::Pressed(Key::Right));
        assert_eq!(held.command().y_vel, -0.5);
        held.apply(KeyEvent::Released(Key::Left));
        assert_eq!(held.command().y_vel, 0.0);
    }

    #[test]
    fn scram_latches() {
        let mut held = HeldKeys::new(1.0);
        held.apply(KeyEvent::Pressed(Key::Scram));
        held.apply(KeyEvent::Released(Key::Scram));
        assert!(held.command().scram);
    }

    #[test]
    fn parse_line_protocol() {
        assert_eq!(KeyEvent::parse("+w"), Some(KeyEvent::Pressed(Key::Forward)));
        assert_eq!(KeyEvent::parse("-up\n"), Some(KeyEvent::Released(Key::Forward)));
        assert_eq!(KeyEvent::parse("E"), Some(KeyEvent::Pressed(Key::YawRight)));
        assert_eq!(KeyEvent::parse("+space"), Some(KeyEvent::Pressed(Key::Scram)));
        assert_eq!(KeyEvent::parse("+x"), None);
    }

    #[test]
    fn source_publishes_held_state_and_resets_on_release() {
        let shared = SharedCommand::new();
        let (keys, device) = key_channel();
        let mut source = KeyboardSource::new(shared.clone(), 1.0, Some(Box::new(device)));
        source.start().unwrap();

        keys.press(Key::YawLeft).unwrap();
        let cmd = wait_for(&shared, |c| c.ang_vel == 1.0);
        assert_eq!(cmd.ang_vel, 1.0);
        assert_eq!(source.get_command().ang_vel, 1.0);

        keys.release(Key::YawLeft).unwrap();
        let cmd = wait_for(&shared, |c| c.ang_vel == 0.0);
        assert_eq!(cmd.ang_vel, 0.0);

        source.stop();
    }

    #[test]
    fn missing_device_yields_zero_command() {
        let shared = SharedCommand::new();
        let mut source = KeyboardSource::new(shared, 1.0, None);
        source.start().unwrap();
        source.start().unwrap();
        assert_eq!(source.get_command(), CommandVector::default());
        source.stop();
    }

    #[test]
    fn disconnected_device_retains_last_command() {
        let shared = SharedCommand::new();
        let (keys, device) = key_channel();
        let mut source = KeyboardSource::new(shared.clone(), 1.0, Some(Box::new(device)));
        source.start().unwrap();
        keys.press(Key::Forward).unwrap();
        wait_for(&shared, |c| c.x_vel == 1.0);
        drop(keys);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(shared.snapshot().x_vel, 1.0);
        source.stop();
    }
}
