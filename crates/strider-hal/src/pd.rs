//! Joint-space PD (Proportional–Derivative) torque law.
//!
//! The controller maps a [`TargetState`] and a measured [`JointState`] to one
//! torque per joint:
//!
//! ```text
//! tau_i = kp_i * (target_pos_i - pos_i) + kd_i * (target_vel_i - vel_i)
//! ```
//!
//! clamped element-wise to `[-torque_limit_i, +torque_limit_i]`.  It keeps no
//! state between calls, so it can be evaluated every physics tick regardless
//! of how often the target changes.
//!
//! # Example
//!
//! ```rust
//! use strider_hal::pd::PdController;
//! use strider_types::{JointState, TargetState};
//!
//! let pd = PdController::new(vec![20.0], vec![0.5], vec![5.0]).unwrap();
//! let target = TargetState::hold(&[1.0]);
//! let joints = JointState::zeros(1);
//!
//! let tau = pd.torques(&target, &joints);
//! assert_eq!(tau, vec![5.0]); // 20.0 * 1.0 saturates at the 5.0 limit
//! ```

use strider_types::{JointState, StriderError, TargetState};

/// Stateless per-joint PD controller with symmetric torque saturation.
#[derive(Debug, Clone)]
pub struct PdController {
    kps: Vec<f64>,
    kds: Vec<f64>,
    torque_limits: Vec<f64>,
}

impl PdController {
    /// Create a controller from per-joint gains and torque limits.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Config`] if the three arrays differ in length
    /// or any torque limit is negative or not finite.
    pub fn new(kps: Vec<f64>, kds: Vec<f64>, torque_limits: Vec<f64>) -> Result<Self, StriderError> {
        if kps.len() != kds.len() || kps.len() != torque_limits.len() {
            return Err(StriderError::Config(format!(
                "PD arrays differ in length: kp={}, kd={}, limit={}",
                kps.len(),
                kds.len(),
                torque_limits.len()
            )));
        }
        if let Some(bad) = torque_limits.iter().find(|l| !l.is_finite() || **l < 0.0) {
            return Err(StriderError::Config(format!("invalid torque limit {bad}")));
        }
        Ok(Self {
            kps,
            kds,
            torque_limits,
        })
    }

    /// Number of joints this controller drives.
    pub fn num_joints(&self) -> usize {
        self.kps.len()
    }

    pub fn torque_limits(&self) -> &[f64] {
        &self.torque_limits
    }

    /// Compute clamped torques into `out`.
    ///
    /// Only the first `num_joints()` entries of each slice are used; callers
    /// are expected to size every array from the same robot profile.
    pub fn compute_into(&self, target: &TargetState, joints: &JointState, out: &mut [f64]) {
        for (i, tau) in out.iter_mut().enumerate().take(self.kps.len()) {
            let raw = self.kps[i] * (target.position[i] - joints.position[i])
                + self.kds[i] * (target.velocity[i] - joints.velocity[i]);
            let limit = self.torque_limits[i];
            // NaN measurements must not reach the actuators.
            *tau = if raw.is_nan() { 0.0 } else { raw.clamp(-limit, limit) };
        }
    }

    /// Allocating variant of [`compute_into`][Self::compute_into].
    pub fn torques(&self, target: &TargetState, joints: &JointState) -> Vec<f64> {
        let mut out = vec![0.0; self.num_joints()];
        self.compute_into(target, joints, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joints(position: Vec<f64>, velocity: Vec<f64>) -> JointState {
        JointState { position, velocity }
    }

    #[test]
    fn proportional_term_drives_toward_target() {
        let pd = PdController::new(vec![2.0], vec![0.0], vec![100.0]).unwrap();
        let tau = pd.torques(&TargetState::hold(&[10.0]), &JointState::zeros(1));
        assert!((tau[0] - 20.0).abs() < 1e-12);
    }

    #[test]
    fn derivative_term_damps_velocity() {
        let pd = PdController::new(vec![0.0], vec![0.7], vec![100.0]).unwrap();
        let tau = pd.torques(&TargetState::hold(&[0.0]), &joints(vec![0.0], vec![2.0]));
        assert!((tau[0] - (-1.4)).abs() < 1e-12);
    }

    #[test]
    fn zero_error_yields_zero_torque() {
        let pd = PdController::new(vec![28.0; 3], vec![0.7; 3], vec![20.0; 3]).unwrap();
        let posture = [0.0, 0.8, -1.5];
        let tau = pd.torques(&TargetState::hold(&posture), &joints(posture.to_vec(), vec![0.0; 3]));
        assert!(tau.iter().all(|t| t.abs() < 1e-12));
    }

    #[test]
    fn output_never_exceeds_limits() {
        let limits = vec![5.0, 15.0, 0.0, 45.43];
        let pd = PdController::new(vec![500.0; 4], vec![30.0; 4], limits.clone()).unwrap();
        // Sweep a grid of large positive and negative errors.
        for &p in &[-50.0, -3.0, -0.01, 0.0, 0.01, 3.0, 50.0] {
            for &v in &[-100.0, -1.0, 0.0, 1.0, 100.0] {
                let tau = pd.torques(&TargetState::hold(&[0.3; 4]), &joints(vec![p; 4], vec![v; 4]));
                for (t, l) in tau.iter().zip(&limits) {
                    assert!(t.abs() <= *l, "torque {t} exceeds limit {l}");
                }
            }
        }
    }

    #[test]
    fn nan_measurement_produces_zero_torque() {
        let pd = PdController::new(vec![1.0], vec![1.0], vec![5.0]).unwrap();
        let tau = pd.torques(&TargetState::hold(&[0.0]), &joints(vec![f64::NAN], vec![0.0]));
        assert_eq!(tau, vec![0.0]);
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        assert!(PdController::new(vec![1.0; 3], vec![1.0; 2], vec![1.0; 3]).is_err());
        assert!(PdController::new(vec![1.0], vec![1.0], vec![-1.0]).is_err());
    }
}
