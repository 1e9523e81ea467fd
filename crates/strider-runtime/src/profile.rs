//! Named robot parameter sets.
//!
//! A [`RobotProfile`] carries everything the control loop needs to know about
//! one robot + policy pairing: timing, observation layout, PD gains, torque
//! limits, the default posture the policy's actions are relative to, and the
//! observation/action scaling used during training.
//!
//! | Profile | dt | decimation | joints | frame_stack | single obs |
//! |---|---|---|---|---|---|
//! | `go2` (default) | 0.005 | 4 | 12 | 6 | 45 |
//! | `tinydog` | 0.0013 | 13 | 13 (waist at index 6) | 8 | 48 |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strider_types::StriderError;

/// Width of the fixed observation prefix: command (3), angular velocity (3),
/// gravity projection (3).
pub const OBS_PREFIX: usize = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotProfile {
    pub name: String,

    /// Physics timestep in seconds.
    pub dt: f64,
    /// Physics ticks per policy invocation.
    pub decimation: u32,
    /// Wall-clock warm-up before the policy takes over.
    pub warmup: Duration,

    pub num_actions: usize,
    pub num_single_obs: usize,
    pub frame_stack: usize,

    pub kps: Vec<f64>,
    pub kds: Vec<f64>,
    pub torque_limits: Vec<f64>,
    /// Posture the policy's actions are offsets from.
    pub default_angles: Vec<f64>,
    /// Posture the engine is loaded in.
    pub init_angles: Vec<f64>,
    pub joint_names: Vec<String>,

    pub action_scale: f64,
    /// Per-channel scale for `[x_vel, y_vel, ang_vel]`.
    pub command_scale: [f64; 3],
    pub ang_vel_scale: f64,
    pub dof_pos_scale: f64,
    pub dof_vel_scale: f64,
    pub clip_observations: f64,
    pub clip_actions: f64,
}

impl RobotProfile {
    /// Unitree Go2 with the DreamWaQ locomotion policy.
    pub fn go2() -> Self {
        const HIP: f64 = 0.0;
        const THIGH: f64 = 0.8;
        const CALF: f64 = -1.5;

        let default_angles = [HIP, THIGH, CALF].repeat(4);
        let mut init_angles = default_angles.clone();
        // Rear thighs start slightly more flexed.
        init_angles[7] = 1.0;
        init_angles[10] = 1.0;

        Self {
            name: "go2".to_string(),
            dt: 0.005,
            decimation: 4,
            warmup: Duration::from_millis(500),
            num_actions: 12,
            num_single_obs: 45,
            frame_stack: 6,
            kps: vec![28.0; 12],
            kds: vec![0.7; 12],
            torque_limits: [23.7, 23.7, 45.43].repeat(4),
            default_angles,
            init_angles,
            joint_names: leg_joint_names(),
            action_scale: 0.25,
            // The yaw channel runs at 0.5; training used 0.25.
            command_scale: [2.0, 2.0, 0.5],
            ang_vel_scale: 0.25,
            dof_pos_scale: 1.0,
            dof_vel_scale: 0.05,
            clip_observations: 100.0,
            clip_actions: 100.0,
        }
    }

    /// Small quadruped with an actuated waist between the front and rear
    /// leg pairs.
    pub fn tinydog() -> Self {
        const HIP: f64 = 0.0;
        const THIGH: f64 = 0.7;
        const CALF: f64 = 1.3;
        const WAIST: usize = 6;

        let default_angles = vec![
            -HIP, -THIGH, CALF, HIP, THIGH, -CALF, 0.0, HIP, THIGH, -CALF, -HIP, -THIGH, CALF,
        ];

        let mut kps = vec![7.0; 13];
        let mut kds = vec![0.2; 13];
        let mut torque_limits = vec![5.0; 13];
        kps[WAIST] = 20.0;
        kds[WAIST] = 0.5;
        torque_limits[WAIST] = 15.0;

        let mut joint_names = leg_joint_names();
        joint_names.insert(WAIST, "waist_joint".to_string());

        Self {
            name: "tinydog".to_string(),
            dt: 0.0013,
            decimation: 13,
            warmup: Duration::from_millis(500),
            num_actions: 13,
            num_single_obs: 48,
            frame_stack: 8,
            kps,
            kds,
            torque_limits,
            init_angles: default_angles.clone(),
            default_angles,
            joint_names,
            action_scale: 0.25,
            command_scale: [2.0, 2.0, 0.25],
            ang_vel_scale: 0.25,
            dof_pos_scale: 1.0,
            dof_vel_scale: 0.05,
            clip_observations: 100.0,
            clip_actions: 100.0,
        }
    }

    /// Look a profile up by name.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Config`] for an unknown name.
    pub fn by_name(name: &str) -> Result<Self, StriderError> {
        match name {
            "go2" => Ok(Self::go2()),
            "tinydog" => Ok(Self::tinydog()),
            other => Err(StriderError::Config(format!(
                "unknown robot profile '{other}' (expected one of: {})",
                Self::NAMES.join(", ")
            ))),
        }
    }

    pub const NAMES: &'static [&'static str] = &["go2", "tinydog"];

    /// Number of actuated joints.
    pub fn num_joints(&self) -> usize {
        self.default_angles.len()
    }

    /// Length of the flattened history handed to the policy.
    pub fn history_len(&self) -> usize {
        self.frame_stack * self.num_single_obs
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Config`] if the observation width does not
    /// match the joint and action counts, any per-joint array has the wrong
    /// length, or a timing value is out of range.
    pub fn validate(&self) -> Result<(), StriderError> {
        let n = self.num_joints();
        if n == 0 {
            return Err(StriderError::Config(format!("profile '{}' has no joints", self.name)));
        }
        if self.num_actions != n {
            return Err(StriderError::Config(format!(
                "profile '{}': num_actions {} != {} joints",
                self.name, self.num_actions, n
            )));
        }
        let expected_obs = OBS_PREFIX + 2 * n + self.num_actions;
        if self.num_single_obs != expected_obs {
            return Err(StriderError::Config(format!(
                "profile '{}': num_single_obs {} != {} (9 + 2*{} + {})",
                self.name, self.num_single_obs, expected_obs, n, self.num_actions
            )));
        }
        let arrays = [
            ("kps", self.kps.len()),
            ("kds", self.kds.len()),
            ("torque_limits", self.torque_limits.len()),
            ("init_angles", self.init_angles.len()),
            ("joint_names", self.joint_names.len()),
        ];
        for (label, len) in arrays {
            if len != n {
                return Err(StriderError::Config(format!(
                    "profile '{}': {label} has {len} entries, expected {n}",
                    self.name
                )));
            }
        }
        if self.decimation == 0 {
            return Err(StriderError::Config(format!("profile '{}': decimation must be >= 1", self.name)));
        }
        if self.frame_stack == 0 {
            return Err(StriderError::Config(format!("profile '{}': frame_stack must be >= 1", self.name)));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(StriderError::Config(format!("profile '{}': invalid dt {}", self.name, self.dt)));
        }
        Ok(())
    }
}

impl Default for RobotProfile {
    fn default() -> Self {
        Self::go2()
    }
}

fn leg_joint_names() -> Vec<String> {
    ["FL", "FR", "RL", "RR"]
        .iter()
        .flat_map(|leg| ["hip", "thigh", "calf"].map(|part| format!("{leg}_{part}_joint")))
        .collect()
}
