//! Generic `Engine` trait for anything that can be torque-driven one physics
//! step at a time: a simulator binding, a hardware SDK, or a test double.
//!
//! The control loop only ever talks to this trait, so an engine can be
//! swapped without touching observation assembly, policy invocation, or
//! pacing.

use strider_types::{BasePose, BaseVelocity, JointState, StriderError};

/// An actuated articulated body advanced in fixed physics steps.
pub trait Engine: Send {
    /// Number of actuated joints (length of every per-joint array).
    fn num_joints(&self) -> usize;

    /// The physics timestep the model was loaded with, in seconds.
    fn timestep(&self) -> f64;

    /// Advance the model by `dt` seconds using the most recently written
    /// torques.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Engine`] if the step cannot be completed
    /// (e.g. the solver diverged or the hardware link dropped).
    fn step(&mut self, dt: f64) -> Result<(), StriderError>;

    /// Current joint positions and velocities.
    fn joint_state(&self) -> JointState;

    /// Current free-body pose of the base.
    fn base_pose(&self) -> BasePose;

    /// Current free-body velocity of the base.
    fn base_velocity(&self) -> BaseVelocity;

    /// Write one torque per joint to the actuator interface.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Engine`] if `torques.len()` does not match
    /// [`num_joints`][Self::num_joints].
    fn set_torques(&mut self, torques: &[f64]) -> Result<(), StriderError>;

    /// Push the current state to an attached viewer, if any.
    fn sync_viewer(&mut self) {}
}
