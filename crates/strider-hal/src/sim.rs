//! In-process stand-in engine for CI and headless runs.
//!
//! [`SimEngine`] models each joint as a unit-inertia body with viscous
//! damping driven directly by the commanded torque, on top of a floating base
//! whose pose is held at a configurable value.  It is not a physics
//! simulator; it exists so the full control stack can be exercised without a
//! simulator binding or hardware.
//!
//! # Example
//!
//! ```rust
//! use strider_hal::engine::Engine;
//! use strider_hal::sim::SimEngineBuilder;
//!
//! let mut engine = SimEngineBuilder::new(12)
//!     .with_initial_positions(vec![0.1; 12])
//!     .build()
//!     .expect("sim engine must load");
//!
//! engine.set_torques(&[0.0; 12]).unwrap();
//! engine.step(0.005).unwrap();
//! assert_eq!(engine.steps(), 1);
//! ```

use strider_types::{BasePose, BaseVelocity, JointState, StriderError};
use tracing::debug;

use crate::engine::Engine;

/// Default viscous damping coefficient applied to every joint.
pub const DEFAULT_DAMPING: f64 = 0.5;

/// Default physics timestep (200 Hz).
pub const DEFAULT_TIMESTEP: f64 = 0.005;

// ────────────────────────────────────────────────────────────────────────────
// SimEngine
// ────────────────────────────────────────────────────────────────────────────

/// Deterministic joint-space integrator that records every torque command.
#[derive(Debug, Clone)]
pub struct SimEngine {
    timestep: f64,
    joints: JointState,
    torques: Vec<f64>,
    damping: f64,
    base: BasePose,
    base_velocity: BaseVelocity,
    steps: u64,
    viewer_syncs: u64,
}

impl SimEngine {
    /// Total number of completed [`Engine::step`] calls.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Total number of [`Engine::sync_viewer`] calls.
    pub fn viewer_syncs(&self) -> u64 {
        self.viewer_syncs
    }

    /// The torques most recently written through [`Engine::set_torques`].
    pub fn last_torques(&self) -> &[f64] {
        &self.torques
    }

    /// Overwrite the joint state, e.g. to inject a disturbance in a test.
    pub fn set_joint_state(&mut self, joints: JointState) {
        self.joints = joints;
    }

    /// Overwrite the base orientation (`[w, x, y, z]`).
    pub fn set_base_orientation(&mut self, orientation: [f64; 4]) {
        self.base.orientation = orientation;
    }
}

impl Engine for SimEngine {
    fn num_joints(&self) -> usize {
        self.joints.len()
    }

    fn timestep(&self) -> f64 {
        self.timestep
    }

    fn step(&mut self, dt: f64) -> Result<(), StriderError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(StriderError::Engine(format!("invalid timestep {dt}")));
        }
        // Semi-implicit Euler: velocity first, then position.
        for i in 0..self.joints.len() {
            let accel = self.torques[i] - self.damping * self.joints.velocity[i];
            self.joints.velocity[i] += accel * dt;
            self.joints.position[i] += self.joints.velocity[i] * dt;
        }
        self.steps += 1;
        Ok(())
    }

    fn joint_state(&self) -> JointState {
        self.joints.clone()
    }

    fn base_pose(&self) -> BasePose {
        self.base
    }

    fn base_velocity(&self) -> BaseVelocity {
        self.base_velocity
    }

    fn set_torques(&mut self, torques: &[f64]) -> Result<(), StriderError> {
        if torques.len() != self.torques.len() {
            return Err(StriderError::Engine(format!(
                "expected {} torques, got {}",
                self.torques.len(),
                torques.len()
            )));
        }
        self.torques.copy_from_slice(torques);
        Ok(())
    }

    fn sync_viewer(&mut self) {
        self.viewer_syncs += 1;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimEngineBuilder
// ────────────────────────────────────────────────────────────────────────────

/// Builder that validates and constructs a [`SimEngine`].
///
/// Call the `with_*` methods to shape the initial state, then
/// [`build`][Self::build] to load the model.
#[derive(Debug, Clone)]
pub struct SimEngineBuilder {
    num_joints: usize,
    timestep: f64,
    initial_positions: Option<Vec<f64>>,
    damping: f64,
    base: BasePose,
    base_velocity: BaseVelocity,
}

impl SimEngineBuilder {
    /// Start building an engine with `num_joints` actuated joints.
    pub fn new(num_joints: usize) -> Self {
        Self {
            num_joints,
            timestep: DEFAULT_TIMESTEP,
            initial_positions: None,
            damping: DEFAULT_DAMPING,
            base: BasePose {
                position: [0.0, 0.0, 0.3],
                ..BasePose::default()
            },
            base_velocity: BaseVelocity::default(),
        }
    }

    /// Load the model with a `dt`-second physics timestep.
    pub fn with_timestep(mut self, dt: f64) -> Self {
        self.timestep = dt;
        self
    }

    /// Start every joint at `positions` instead of zero.
    pub fn with_initial_positions(mut self, positions: Vec<f64>) -> Self {
        self.initial_positions = Some(positions);
        self
    }

    /// Override the viscous damping coefficient.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Hold the base at `pose`.
    pub fn with_base_pose(mut self, pose: BasePose) -> Self {
        self.base = pose;
        self
    }

    /// Report `velocity` as the base velocity.
    pub fn with_base_velocity(mut self, velocity: BaseVelocity) -> Self {
        self.base_velocity = velocity;
        self
    }

    /// Validate the configuration and load the model.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::EngineLoad`] if the model has no joints, the
    /// timestep is not positive, the initial posture has the wrong length, or
    /// the damping is not a finite non-negative number.
    pub fn build(self) -> Result<SimEngine, StriderError> {
        if self.num_joints == 0 {
            return Err(StriderError::EngineLoad("model has no actuated joints".to_string()));
        }
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(StriderError::EngineLoad(format!("invalid timestep {}", self.timestep)));
        }
        if !(self.damping.is_finite() && self.damping >= 0.0) {
            return Err(StriderError::EngineLoad(format!("invalid damping {}", self.damping)));
        }
        let mut joints = JointState::zeros(self.num_joints);
        if let Some(positions) = self.initial_positions {
            if positions.len() != self.num_joints {
                return Err(StriderError::EngineLoad(format!(
                    "initial posture has {} entries, model has {} joints",
                    positions.len(),
                    self.num_joints
                )));
            }
            joints.position = positions;
        }
        debug!(joints = self.num_joints, damping = self.damping, "sim engine loaded");
        Ok(SimEngine {
            timestep: self.timestep,
            torques: vec![0.0; self.num_joints],
            joints,
            damping: self.damping,
            base: self.base,
            base_velocity: self.base_velocity,
            steps: 0,
            viewer_syncs: 0,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
