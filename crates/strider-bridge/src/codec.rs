//! JSON text codec for the telemetry wire protocol.
//!
//! | Direction | Message |
//! |---|---|
//! | producer → relay | `{"type":"sim_connect"}` once per connection |
//! | producer → relay | `{"type":"state", "timestamp", "base_pos", "base_quat", "joint_pos", "joint_vel", "joint_names"}` |
//! | relay → producer | `{"type":"command", "x_vel", "y_vel", "ang_vel", ...}` |

use strider_types::{RobotState, StateUpdate, StriderError, TelemetryMessage};

/// Serialise any telemetry message.
///
/// # Errors
///
/// Returns [`StriderError::MalformedMessage`] if the message holds values
/// JSON cannot represent.
pub fn encode(message: &TelemetryMessage) -> Result<String, StriderError> {
    serde_json::to_string(message).map_err(|e| StriderError::MalformedMessage(format!("encode failed: {e}")))
}

/// Parse one text frame.
///
/// # Errors
///
/// Returns [`StriderError::MalformedMessage`] for invalid JSON, an unknown
/// `type`, or missing required fields.
pub fn decode(text: &str) -> Result<TelemetryMessage, StriderError> {
    serde_json::from_str(text).map_err(|e| StriderError::MalformedMessage(format!("{e}")))
}

/// The producer handshake frame.
pub fn handshake() -> String {
    r#"{"type":"sim_connect"}"#.to_string()
}

/// Wire form of a state snapshot.
pub fn state_update(state: &RobotState, joint_names: &[String]) -> StateUpdate {
    StateUpdate {
        timestamp: state.timestamp_ms,
        base_pos: state.base.position,
        base_quat: state.base.orientation,
        joint_pos: state.joints.position.clone(),
        joint_vel: state.joints.velocity.clone(),
        joint_names: joint_names.to_vec(),
    }
}

/// Encode a state snapshot as a `state` frame.
///
/// # Errors
///
/// See [`encode`].
pub fn encode_state(state: &RobotState, joint_names: &[String]) -> Result<String, StriderError> {
    encode(&TelemetryMessage::StateUpdate(state_update(state, joint_names)))
}
