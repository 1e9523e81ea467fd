//! Observation assembly and the frame-stacked history buffer.
//!
//! One observation tick is laid out as:
//!
//! ```text
//! [ cmd * command_scale (3) | omega * ang_vel_scale (3) | gravity (3)
//! | (q - default) * dof_pos_scale (N) | dq * dof_vel_scale (N) | previous action (A) ]
//! ```
//!
//! Each value is clipped to `±clip_observations`.  The history keeps the last
//! `frame_stack` observations flattened oldest-first and is zero-padded at
//! cold start.

use strider_types::{BasePose, BaseVelocity, CommandVector, JointState, StriderError};

use crate::profile::{OBS_PREFIX, RobotProfile};

/// Gravity direction expressed in the body frame, from a `[w, x, y, z]`
/// orientation quaternion.  An upright body yields exactly `(0, 0, -1)`.
pub fn gravity_projection(q: [f64; 4]) -> [f64; 3] {
    let [qw, qx, qy, qz] = q;
    [
        2.0 * (qw * qy - qz * qx),
        -2.0 * (qw * qx + qz * qy),
        1.0 - 2.0 * (qw * qw + qz * qz),
    ]
}

// ────────────────────────────────────────────────────────────────────────────
// ObservationHistory
// ────────────────────────────────────────────────────────────────────────────

/// Fixed-length rolling window of observations.
#[derive(Debug, Clone)]
pub struct ObservationHistory {
    single: usize,
    buf: Vec<f64>,
}

impl ObservationHistory {
    /// A zero-filled history of `frame_stack` frames of `num_single_obs`.
    pub fn new(frame_stack: usize, num_single_obs: usize) -> Self {
        Self {
            single: num_single_obs,
            buf: vec![0.0; frame_stack * num_single_obs],
        }
    }

    /// Drop the oldest frame and append `obs` as the newest.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::PolicyInvocation`] if `obs` is not exactly one
    /// frame wide; the buffer is left untouched.
    pub fn push(&mut self, obs: &[f64]) -> Result<(), StriderError> {
        if obs.len() != self.single {
            return Err(StriderError::PolicyInvocation(format!(
                "observation has {} values, expected {}",
                obs.len(),
                self.single
            )));
        }
        let len = self.buf.len();
        if len == 0 {
            return Ok(());
        }
        self.buf.copy_within(self.single.., 0);
        self.buf[len - self.single..].copy_from_slice(obs);
        Ok(())
    }

    /// The flattened history, oldest frame first.
    pub fn as_slice(&self) -> &[f64] {
        &self.buf
    }

    /// The most recent frame.
    pub fn latest(&self) -> &[f64] {
        &self.buf[self.buf.len() - self.single..]
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ObservationBuilder
// ────────────────────────────────────────────────────────────────────────────

/// Engine and operator readings sampled at one decimation boundary.
#[derive(Debug, Clone, Copy)]
pub struct ObservationInputs<'a> {
    pub command: &'a CommandVector,
    pub base_pose: &'a BasePose,
    pub base_velocity: &'a BaseVelocity,
    pub joints: &'a JointState,
    pub last_action: &'a [f64],
}

/// Assembles observations using one profile's scaling and pushes them onto
/// the history.
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    command_scale: [f64; 3],
    ang_vel_scale: f64,
    dof_pos_scale: f64,
    dof_vel_scale: f64,
    clip: f64,
    default_angles: Vec<f64>,
    num_actions: usize,
    scratch: Vec<f64>,
    history: ObservationHistory,
}

impl ObservationBuilder {
    pub fn new(profile: &RobotProfile) -> Self {
        Self {
            command_scale: profile.command_scale,
            ang_vel_scale: profile.ang_vel_scale,
            dof_pos_scale: profile.dof_pos_scale,
            dof_vel_scale: profile.dof_vel_scale,
            clip: profile.clip_observations,
            default_angles: profile.default_angles.clone(),
            num_actions: profile.num_actions,
            scratch: Vec::with_capacity(profile.num_single_obs),
            history: ObservationHistory::new(profile.frame_stack, profile.num_single_obs),
        }
    }

    /// Build one observation from `inputs` and push it onto the history.
    /// Returns the flattened history to hand to the policy.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::PolicyInvocation`] if the joint readings or
    /// last action do not match the profile's dimensions.
    pub fn observe(&mut self, inputs: ObservationInputs<'_>) -> Result<&[f64], StriderError> {
        let n = self.default_angles.len();
        if inputs.joints.position.len() != n || inputs.joints.velocity.len() != n {
            return Err(StriderError::PolicyInvocation(format!(
                "engine reported {} joints, profile expects {n}",
                inputs.joints.len()
            )));
        }
        if inputs.last_action.len() != self.num_actions {
            return Err(StriderError::PolicyInvocation(format!(
                "previous action has {} values, expected {}",
                inputs.last_action.len(),
                self.num_actions
            )));
        }

        let obs = &mut self.scratch;
        obs.clear();
        let cmd = inputs.command.velocities();
        obs.extend((0..3).map(|i| cmd[i] * self.command_scale[i]));
        obs.extend(inputs.base_velocity.angular.iter().map(|w| w * self.ang_vel_scale));
        obs.extend(gravity_projection(inputs.base_pose.orientation));
        obs.extend(
            inputs
                .joints
                .position
                .iter()
                .zip(&self.default_angles)
                .map(|(q, q0)| (q - q0) * self.dof_pos_scale),
        );
        obs.extend(inputs.joints.velocity.iter().map(|dq| dq * self.dof_vel_scale));
        obs.extend_from_slice(inputs.last_action);

        let clip = self.clip;
        for v in obs.iter_mut() {
            *v = v.clamp(-clip, clip);
        }
        debug_assert_eq!(obs.len(), OBS_PREFIX + 2 * n + self.num_actions);

        self.history.push(obs)?;
        Ok(self.history.as_slice())
    }

    pub fn history(&self) -> &ObservationHistory {
        &self.history
    }
}
