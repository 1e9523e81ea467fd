//! Polling gamepad command source.
//!
//! A worker thread polls a [`GamepadDevice`] every `poll_interval`, maps the
//! raw axes and buttons to a [`CommandVector`], and publishes the whole
//! vector when it differs from the last one published.  An untouched pad
//! therefore leaves commands from other sources in place.  Axis readings whose magnitude is below the dead-zone resolve to
//! exactly `0.0`, so stick drift never reaches the policy.
//!
//! | Control | Command |
//! |---|---|
//! | axis 1 (inverted) | `x_vel = -a1 * max_vel` |
//! | axis 0 (inverted) | `y_vel = -a0 * max_vel` |
//! | axis 2 (inverted) | `ang_vel = -a2 * max_ang_vel` |
//! | button 5 | `scram` |
//! | button 4 | `waist_switch` |
//! | button 0 / 3 | `height_index` +1 / -1 per poll, clamped to `0..=299` |

use std::time::Duration;

use strider_types::{CommandVector, StriderError};
use tracing::{info, warn};

use crate::command::{CommandSource, SharedCommand};
use crate::worker::{JoinOutcome, LogOnce, Worker};

pub const DEFAULT_DEAD_ZONE: f64 = 0.1;
pub const DEFAULT_MAX_VEL: f64 = 2.0;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Highest selectable stance height.
pub const MAX_HEIGHT_INDEX: i32 = 299;

const AXIS_X: usize = 1;
const AXIS_Y: usize = 0;
const AXIS_YAW: usize = 2;
const BUTTON_HEIGHT_UP: usize = 0;
const BUTTON_HEIGHT_DOWN: usize = 3;
const BUTTON_WAIST: usize = 4;
const BUTTON_SCRAM: usize = 5;

const STOP_TIMEOUT: Duration = Duration::from_secs(1);

// ────────────────────────────────────────────────────────────────────────────
// Device
// ────────────────────────────────────────────────────────────────────────────

/// Raw gamepad reading.  Missing axes read as `0.0`, missing buttons as
/// released.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GamepadState {
    /// Normalised axis values in `[-1, 1]`.
    pub axes: Vec<f64>,
    pub buttons: Vec<bool>,
}

impl GamepadState {
    pub fn axis(&self, index: usize) -> f64 {
        self.axes.get(index).copied().unwrap_or(0.0)
    }

    pub fn button(&self, index: usize) -> bool {
        self.buttons.get(index).copied().unwrap_or(false)
    }
}

/// A pollable gamepad.
pub trait GamepadDevice: Send {
    /// Read the current axis and button state without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::DeviceUnavailable`] if the device went away.
    fn poll(&mut self) -> Result<GamepadState, StriderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Mapping
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoystickConfig {
    pub dead_zone: f64,
    pub max_vel: f64,
    pub max_ang_vel: f64,
    pub poll_interval: Duration,
}

impl Default for JoystickConfig {
    fn default() -> Self {
        Self {
            dead_zone: DEFAULT_DEAD_ZONE,
            max_vel: DEFAULT_MAX_VEL,
            max_ang_vel: DEFAULT_MAX_VEL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Returns exactly `0.0` when `|value| < dead_zone`, otherwise `value`.
pub fn apply_dead_zone(value: f64, dead_zone: f64) -> f64 {
    if value.abs() < dead_zone { 0.0 } else { value }
}

/// Stateful gamepad-to-command mapping.  The height selector integrates
/// button presses across polls.
#[derive(Debug, Clone)]
pub struct JoystickMapper {
    config: JoystickConfig,
    height_index: i32,
}

impl JoystickMapper {
    pub fn new(config: JoystickConfig) -> Self {
        Self {
            config,
            height_index: 0,
        }
    }

    pub fn map(&mut self, state: &GamepadState) -> CommandVector {
        let dz = self.config.dead_zone;

        if state.button(BUTTON_HEIGHT_UP) {
            self.height_index += 1;
        } else if state.button(BUTTON_HEIGHT_DOWN) {
            self.height_index -= 1;
        }
        self.height_index = self.height_index.clamp(0, MAX_HEIGHT_INDEX);

        CommandVector {
            x_vel: apply_dead_zone(-state.axis(AXIS_X), dz) * self.config.max_vel,
            y_vel: apply_dead_zone(-state.axis(AXIS_Y), dz) * self.config.max_vel,
            ang_vel: apply_dead_zone(-state.axis(AXIS_YAW), dz) * self.config.max_ang_vel,
            scram: state.button(BUTTON_SCRAM),
            height_index: self.height_index,
            waist_switch: state.button(BUTTON_WAIST),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// JoystickSource
// ────────────────────────────────────────────────────────────────────────────

/// Polling [`CommandSource`] backed by a [`GamepadDevice`].
pub struct JoystickSource {
    shared: SharedCommand,
    config: JoystickConfig,
    device: Option<Box<dyn GamepadDevice>>,
    worker: Option<Worker>,
    unavailable: LogOnce,
}

impl JoystickSource {
    pub fn new(shared: SharedCommand, config: JoystickConfig, device: Option<Box<dyn GamepadDevice>>) -> Self {
        Self {
            shared,
            config,
            device,
            worker: None,
            unavailable: LogOnce::new(),
        }
    }

    /// Build a source on the first gamepad found on this machine, if any.
    pub fn discover(shared: SharedCommand, config: JoystickConfig) -> Self {
        Self::new(shared, config, discover_device())
    }
}

impl CommandSource for JoystickSource {
    fn name(&self) -> &str {
        "joystick"
    }

    fn start(&mut self) -> Result<(), StriderError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(mut device) = self.device.take() else {
            if self.unavailable.first() {
                let err = StriderError::DeviceUnavailable("no gamepad detected".to_string());
                warn!(source = "joystick", error = %err, "command stays at zero");
            }
            return Ok(());
        };

        let shared = self.shared.clone();
        let config = self.config;
        let mut mapper = JoystickMapper::new(config);
        let mut last = CommandVector::default();
        self.worker = Some(Worker::spawn("joystick", move |signal| {
            info!(source = "joystick", interval_ms = config.poll_interval.as_millis() as u64, "polling gamepad");
            loop {
                match device.poll() {
                    Ok(state) => {
                        let command = mapper.map(&state);
                        if command != last {
                            shared.publish(command);
                            last = command;
                        }
                    }
                    Err(e) => {
                        warn!(source = "joystick", error = %e, "gamepad lost; last command retained");
                        break;
                    }
                }
                if signal.sleep(config.poll_interval) {
                    break;
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
            warn!(source = "joystick", "joystick thread abandoned at shutdown");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Linux joystick API backend
// ────────────────────────────────────────────────────────────────────────────

#[cfg(target_os = "linux")]
pub use linux::LinuxJoystick;

/// The first gamepad on this machine, or `None`.
pub fn discover_device() -> Option<Box<dyn GamepadDevice>> {
    #[cfg(target_os = "linux")]
    {
        LinuxJoystick::open(linux::DEFAULT_DEVICE)
            .ok()
            .map(|js| Box::new(js) as Box<dyn GamepadDevice>)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(target_os = "linux")]
mod linux {
    //! `/dev/input/jsN` reader.  Each event is 8 bytes: `u32` timestamp,
    //! `i16` value, `u8` type, `u8` number (little endian).

    use std::fs::{File, OpenOptions};
    use std::io::{ErrorKind, Read};
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::Path;

    use strider_types::StriderError;

    use super::{GamepadDevice, GamepadState};

    pub const DEFAULT_DEVICE: &str = "/dev/input/js0";

    const EVENT_BUTTON: u8 = 0x01;
    const EVENT_AXIS: u8 = 0x02;
    const EVENT_INIT: u8 = 0x80;

    pub struct LinuxJoystick {
        file: File,
        state: GamepadState,
    }

    impl LinuxJoystick {
        /// Open a joystick device node in non-blocking mode.
        ///
        /// # Errors
        ///
        /// Returns [`StriderError::DeviceUnavailable`] if the node cannot be
        /// opened.
        pub fn open(path: impl AsRef<Path>) -> Result<Self, StriderError> {
            let path = path.as_ref();
            let file = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(path)
                .map_err(|e| StriderError::DeviceUnavailable(format!("{}: {e}", path.display())))?;
            Ok(Self {
                file,
                state: GamepadState::default(),
            })
        }

        fn apply(&mut self, event: [u8; 8]) {
            let value = i16::from_le_bytes([event[4], event[5]]);
            let kind = event[6] & !EVENT_INIT;
            let number = event[7] as usize;
            match kind {
                EVENT_AXIS => {
                    if self.state.axes.len() <= number {
                        self.state.axes.resize(number + 1, 0.0);
                    }
                    self.state.axes[number] = (f64::from(value) / f64::from(i16::MAX)).clamp(-1.0, 1.0);
                }
                EVENT_BUTTON => {
                    if self.state.buttons.len() <= number {
                        self.state.buttons.resize(number + 1, false);
                    }
                    self.state.buttons[number] = value != 0;
                }
                _ => {}
            }
        }
    }

    impl GamepadDevice for LinuxJoystick {
        fn poll(&mut self) -> Result<GamepadState, StriderError> {
            let mut event = [0u8; 8];
            loop {
                match self.file.read_exact(&mut event) {
                    Ok(()) => self.apply(event),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => return Err(StriderError::DeviceUnavailable(format!("joystick read failed: {e}"))),
                }
            }
            Ok(self.state.clone())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn missing_node_is_unavailable() {
            let err = LinuxJoystick::open("/dev/input/js-does-not-exist").err().unwrap();
            assert!(matches!(err, StriderError::DeviceUnavailable(_)));
        }
    }
}
