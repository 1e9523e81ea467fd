use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operator command consumed by the observation builder once per policy tick.
///
/// Every field is written and read as one unit; see
/// `strider_input::SharedCommand` for the snapshot contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandVector {
    /// Forward velocity command (m/s, body frame).
    pub x_vel: f64,
    /// Lateral velocity command (m/s, body frame).
    pub y_vel: f64,
    /// Yaw-rate command (rad/s).
    pub ang_vel: f64,
    /// Operator emergency stop.
    pub scram: bool,
    /// Stance height selector (0 = nominal).
    pub height_index: i32,
    /// Waist joint enable for robots that carry one.
    pub waist_switch: bool,
}

impl CommandVector {
    /// The three velocity channels in observation order.
    pub fn velocities(&self) -> [f64; 3] {
        [self.x_vel, self.y_vel, self.ang_vel]
    }
}

/// Per-joint position and velocity, read from the engine once per tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
}

impl JointState {
    /// A zeroed state for `n` joints.
    pub fn zeros(n: usize) -> Self {
        Self {
            position: vec![0.0; n],
            velocity: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }
}

/// Free-body pose of the robot base.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasePose {
    /// World-frame position `[x, y, z]` in metres.
    pub position: [f64; 3],
    /// Orientation quaternion `[w, x, y, z]`.
    pub orientation: [f64; 4],
}

impl Default for BasePose {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Free-body velocity of the robot base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseVelocity {
    /// Linear velocity (m/s).
    pub linear: [f64; 3],
    /// Body angular velocity (rad/s).
    pub angular: [f64; 3],
}

/// Joint-space setpoint held by the PD controller between policy updates.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetState {
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
}

impl TargetState {
    /// A target that holds `posture` with zero velocity.
    pub fn hold(posture: &[f64]) -> Self {
        Self {
            position: posture.to_vec(),
            velocity: vec![0.0; posture.len()],
        }
    }
}

/// Outbound snapshot written by the control loop and read by the telemetry
/// bridge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotState {
    /// Wall-clock capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub base: BasePose,
    pub joints: JointState,
}

impl RobotState {
    /// Capture `base` and `joints` stamped with the current wall-clock time.
    pub fn capture(base: BasePose, joints: JointState) -> Self {
        Self {
            timestamp_ms: now_millis(),
            base,
            joints,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ────────────────────────────────────────────────────────────────────────────
// Wire protocol
// ────────────────────────────────────────────────────────────────────────────

/// Robot state as carried on the telemetry wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub base_pos: [f64; 3],
    /// `[w, x, y, z]`
    pub base_quat: [f64; 4],
    pub joint_pos: Vec<f64>,
    #[serde(default)]
    pub joint_vel: Vec<f64>,
    #[serde(default)]
    pub joint_names: Vec<String>,
}

/// Operator command as carried on the telemetry wire.
///
/// Browser viewers only send the velocity channels; the remaining fields
/// default to their neutral value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRelay {
    #[serde(default)]
    pub x_vel: f64,
    #[serde(default)]
    pub y_vel: f64,
    #[serde(default)]
    pub ang_vel: f64,
    #[serde(default)]
    pub scram: bool,
    #[serde(default)]
    pub height_index: i32,
    #[serde(default)]
    pub waist_switch: bool,
}

impl From<CommandRelay> for CommandVector {
    fn from(c: CommandRelay) -> Self {
        Self {
            x_vel: c.x_vel,
            y_vel: c.y_vel,
            ang_vel: c.ang_vel,
            scram: c.scram,
            height_index: c.height_index,
            waist_switch: c.waist_switch,
        }
    }
}

impl From<CommandVector> for CommandRelay {
    fn from(c: CommandVector) -> Self {
        Self {
            x_vel: c.x_vel,
            y_vel: c.y_vel,
            ang_vel: c.ang_vel,
            scram: c.scram,
            height_index: c.height_index,
            waist_switch: c.waist_switch,
        }
    }
}

/// Every message exchanged over a telemetry connection, discriminated by the
/// `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryMessage {
    /// First message of the simulation producer.
    #[serde(rename = "sim_connect")]
    Handshake,
    /// First message of a browser viewer.
    #[serde(rename = "web_connect")]
    ViewerHandshake,
    #[serde(rename = "state")]
    StateUpdate(StateUpdate),
    #[serde(rename = "command")]
    CommandRelay(CommandRelay),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared by every Strider crate.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum StriderError {
    #[error("Device Unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Policy Invocation Failed: {0}")]
    PolicyInvocation(String),

    #[error("Engine Load Failed: {0}")]
    EngineLoad(String),

    #[error("Engine Fault: {0}")]
    Engine(String),

    #[error("Connection Error: {0}")]
    Connection(String),

    #[error("Malformed Message: {0}")]
    MalformedMessage(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Channel Error: {0}")]
    Channel(String),
}

impl StriderError {
    /// `true` for errors that must abort the control loop after zeroing the
    /// actuators.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StriderError::PolicyInvocation(_) | StriderError::EngineLoad(_) | StriderError::Engine(_)
        )
    }
}
