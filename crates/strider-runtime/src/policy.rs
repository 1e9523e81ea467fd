//! Policy collaborators and the contract gate around them.
//!
//! The control loop treats a policy as an opaque deterministic function from
//! the flattened observation history to one action per actuator.
//! [`PolicyGate`] enforces that contract on every call: input width, output
//! width, and finiteness.  Any violation is a
//! [`StriderError::PolicyInvocation`], which the loop treats as fatal.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strider_types::StriderError;
use tracing::{debug, info};

/// A deterministic `history -> action` map.
pub trait Policy: Send {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Evaluate the policy on a flattened observation history.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::PolicyInvocation`] if the policy cannot be
    /// evaluated on this input.
    fn infer(&mut self, history: &[f64]) -> Result<Vec<f64>, StriderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// ZeroPolicy
// ────────────────────────────────────────────────────────────────────────────

/// Always returns the zero action, so the robot holds its default posture.
#[derive(Debug, Clone)]
pub struct ZeroPolicy {
    num_actions: usize,
}

impl ZeroPolicy {
    pub fn new(num_actions: usize) -> Self {
        Self { num_actions }
    }
}

impl Policy for ZeroPolicy {
    fn name(&self) -> &str {
        "zero"
    }

    fn infer(&mut self, _history: &[f64]) -> Result<Vec<f64>, StriderError> {
        Ok(vec![0.0; self.num_actions])
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LinearPolicy
// ────────────────────────────────────────────────────────────────────────────

/// `action = W · history + b`, loaded from JSON:
///
/// ```json
/// { "weights": [[...], ...], "bias": [...] }
/// ```
///
/// `weights` has one row per action, each as wide as the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearPolicy {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

impl LinearPolicy {
    /// # Errors
    ///
    /// Returns [`StriderError::Config`] if the rows are ragged or the bias
    /// length differs from the row count.
    pub fn new(weights: Vec<Vec<f64>>, bias: Vec<f64>) -> Result<Self, StriderError> {
        let policy = Self { weights, bias };
        policy.check_shape()?;
        Ok(policy)
    }

    /// Parse a policy from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Config`] on malformed JSON or a bad shape.
    pub fn from_json(raw: &str) -> Result<Self, StriderError> {
        let policy: Self =
            serde_json::from_str(raw).map_err(|e| StriderError::Config(format!("invalid policy file: {e}")))?;
        policy.check_shape()?;
        Ok(policy)
    }

    /// Load a policy from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StriderError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| StriderError::Config(format!("cannot read policy {}: {e}", path.display())))?;
        let policy = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            actions = policy.num_actions(),
            input = policy.input_len(),
            "linear policy loaded"
        );
        Ok(policy)
    }

    pub fn num_actions(&self) -> usize {
        self.weights.len()
    }

    pub fn input_len(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn check_shape(&self) -> Result<(), StriderError> {
        let width = self.input_len();
        if let Some((row, r)) = self.weights.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(StriderError::Config(format!(
                "policy weight row {row} has {} columns, expected {width}",
                r.len()
            )));
        }
        if self.bias.len() != self.weights.len() {
            return Err(StriderError::Config(format!(
                "policy bias has {} entries for {} weight rows",
                self.bias.len(),
                self.weights.len()
            )));
        }
        Ok(())
    }
}

impl Policy for LinearPolicy {
    fn name(&self) -> &str {
        "linear"
    }

    fn infer(&mut self, history: &[f64]) -> Result<Vec<f64>, StriderError> {
        if history.len() != self.input_len() {
            return Err(StriderError::PolicyInvocation(format!(
                "linear policy expects {} inputs, got {}",
                self.input_len(),
                history.len()
            )));
        }
        Ok(self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(history).map(|(w, h)| w * h).sum::<f64>() + b)
            .collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PolicyGate
// ────────────────────────────────────────────────────────────────────────────

/// Checks every invocation against the profile's dimensions and clips the
/// resulting action to `±clip_actions`.
pub struct PolicyGate {
    policy: Box<dyn Policy>,
    input_len: usize,
    num_actions: usize,
    clip_actions: f64,
    invocations: u64,
}

impl PolicyGate {
    pub fn new(policy: Box<dyn Policy>, input_len: usize, num_actions: usize, clip_actions: f64) -> Self {
        Self {
            policy,
            input_len,
            num_actions,
            clip_actions,
            invocations: 0,
        }
    }

    /// Run the policy once.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::PolicyInvocation`] on a wrong-width input, a
    /// wrong-width output, or a non-finite action value.
    pub fn invoke(&mut self, history: &[f64]) -> Result<Vec<f64>, StriderError> {
        if history.len() != self.input_len {
            return Err(StriderError::PolicyInvocation(format!(
                "history has {} values, policy expects {}",
                history.len(),
                self.input_len
            )));
        }
        let mut action = self.policy.infer(history)?;
        self.invocations += 1;

        if action.len() != self.num_actions {
            return Err(StriderError::PolicyInvocation(format!(
                "policy '{}' returned {} actions, expected {}",
                self.policy.name(),
                action.len(),
                self.num_actions
            )));
        }
        if let Some(i) = action.iter().position(|a| !a.is_finite()) {
            return Err(StriderError::PolicyInvocation(format!(
                "policy '{}' returned non-finite action[{i}] = {}",
                self.policy.name(),
                action[i]
            )));
        }
        let clip = self.clip_actions;
        for a in &mut action {
            *a = a.clamp(-clip, clip);
        }
        debug!(policy = self.policy.name(), n = self.invocations, "policy invoked");
        Ok(action)
    }

    /// Number of calls that reached the wrapped policy.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }
}
