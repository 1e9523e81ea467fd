//! [`ControlLoop`] – fixed-rate policy/PD orchestrator.
//!
//! # Phases
//!
//! ```text
//! Warmup ──(warm-up duration elapsed)──▶ Running
//! ```
//!
//! * **Warmup** – the engine is stepped and the viewer synced every tick
//!   with zero torque, so the model settles before the policy takes over.
//!   Warm-up ticks are not counted.
//! * **Running** – every physics tick increments the tick counter.  When
//!   `counter % decimation == 0` an observation is built, the policy runs on
//!   the flattened history, and the joint target becomes
//!   `default_angles + action * action_scale`.  Between boundaries the target
//!   is held.  The clamped PD torque is written every tick.
//!
//! # Stopping
//!
//! | Cause | Result |
//! |---|---|
//! | stop signal (Ctrl-C) | `Ok` with [`StopReason::Stopped`] |
//! | operator scram | `Ok` with [`StopReason::Scram`] |
//! | `max_duration` reached | `Ok` with [`StopReason::Completed`] |
//! | policy or engine failure | `Err` (fatal) |
//!
//! Every exit path writes zero torque to the engine before returning.

use std::time::{Duration, Instant};

use strider_hal::{Engine, PdController};
use strider_input::{CommandSource, StopSignal};
use strider_types::{CommandVector, RobotState, StriderError, TargetState};
use tracing::{debug, error, info, warn};

use crate::observation::{ObservationBuilder, ObservationInputs, gravity_projection};
use crate::pacer::Pacer;
use crate::policy::{Policy, PolicyGate};
use crate::profile::RobotProfile;
use crate::recorder::{RunRecorder, RunSample};
use crate::state_feed::StatePublisher;

/// Default run length once the policy has taken over.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Warmup,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop signal was raised.
    Stopped,
    /// The operator command carried `scram = true`.
    Scram,
    /// `max_duration` elapsed.
    Completed,
}

/// What a single Running tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Scram,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub warmup_ticks: u64,
    pub ticks: u64,
    pub policy_invocations: u64,
    pub overruns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub stats: LoopStats,
    /// Wall-clock time spent in the Running phase.
    pub elapsed: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ────────────────────────────────────────────────────────────────────────────

pub struct ControlLoop<E: Engine> {
    profile: RobotProfile,
    engine: E,
    pd: PdController,
    gate: PolicyGate,
    observations: ObservationBuilder,
    commands: Box<dyn CommandSource>,
    state: Option<StatePublisher>,
    recorder: Option<RunRecorder>,
    stop: StopSignal,
    max_duration: Option<Duration>,

    phase: LoopPhase,
    target: TargetState,
    action: Vec<f64>,
    torques: Vec<f64>,
    counter: u64,
    stats: LoopStats,
}

impl<E: Engine> ControlLoop<E> {
    /// Wire a loop together.
    ///
    /// # Errors
    ///
    /// * [`StriderError::Config`] if the profile is inconsistent.
    /// * [`StriderError::EngineLoad`] if the engine's joint count differs
    ///   from the profile's.
    pub fn new(
        profile: RobotProfile,
        engine: E,
        policy: Box<dyn Policy>,
        commands: Box<dyn CommandSource>,
    ) -> Result<Self, StriderError> {
        profile.validate()?;
        let n = profile.num_joints();
        if engine.num_joints() != n {
            return Err(StriderError::EngineLoad(format!(
                "engine has {} actuated joints, profile '{}' expects {n}",
                engine.num_joints(),
                profile.name
            )));
        }
        if (engine.timestep() - profile.dt).abs() > 1e-9 {
            warn!(
                engine_dt = engine.timestep(),
                profile_dt = profile.dt,
                "engine timestep differs from profile; stepping at profile dt"
            );
        }

        let pd = PdController::new(profile.kps.clone(), profile.kds.clone(), profile.torque_limits.clone())?;
        let gate = PolicyGate::new(policy, profile.history_len(), profile.num_actions, profile.clip_actions);
        let observations = ObservationBuilder::new(&profile);

        Ok(Self {
            target: TargetState::hold(&profile.default_angles),
            action: vec![0.0; profile.num_actions],
            torques: vec![0.0; n],
            pd,
            gate,
            observations,
            commands,
            state: None,
            recorder: None,
            stop: StopSignal::new(),
            max_duration: Some(DEFAULT_MAX_DURATION),
            phase: LoopPhase::Warmup,
            counter: 0,
            stats: LoopStats::default(),
            engine,
            profile,
        })
    }

    /// Publish a [`RobotState`] after every physics step.
    pub fn with_state_publisher(mut self, publisher: StatePublisher) -> Self {
        self.state = Some(publisher);
        self
    }

    pub fn with_recorder(mut self, recorder: RunRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Share an external stop signal (e.g. one raised by a Ctrl-C handler).
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Limit the Running phase; `None` runs until stopped.
    pub fn with_max_duration(mut self, max: Option<Duration>) -> Self {
        self.max_duration = max;
        self
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            policy_invocations: self.gate.invocations(),
            ..self.stats
        }
    }

    pub fn target(&self) -> &TargetState {
        &self.target
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Start the command sources, run both phases, stop the sources.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that aborted the loop, after zeroing torques.
    pub fn run(&mut self) -> Result<RunSummary, StriderError> {
        if let Err(e) = self.commands.start() {
            self.zero_torques();
            return Err(e);
        }
        let result = self.run_phases();
        self.zero_torques();
        self.commands.stop();

        if let Some(recorder) = &mut self.recorder
            && let Err(e) = recorder.finish()
        {
            warn!(error = %e, "run recording not written");
        }

        match &result {
            Ok(summary) => info!(
                reason = ?summary.reason,
                ticks = summary.stats.ticks,
                policy_invocations = summary.stats.policy_invocations,
                overruns = summary.stats.overruns,
                elapsed_s = summary.elapsed.as_secs_f64(),
                "control loop finished"
            ),
            Err(e) => error!(error = %e, "control loop aborted; torques zeroed"),
        }
        result
    }

    fn run_phases(&mut self) -> Result<RunSummary, StriderError> {
        let mut pacer = Pacer::new(self.profile.dt);

        info!(profile = %self.profile.name, warmup_s = self.profile.warmup.as_secs_f64(), "warm-up started");
        if !self.warmup(&mut pacer)? {
            return Ok(self.summary(StopReason::Stopped, Duration::ZERO));
        }

        self.phase = LoopPhase::Running;
        info!(
            policy = self.gate.policy_name(),
            dt = self.profile.dt,
            decimation = self.profile.decimation,
            "policy control started"
        );

        let started = Instant::now();
        pacer.reset();
        let reason = loop {
            if self.stop.is_stopped() {
                break StopReason::Stopped;
            }
            if self.max_duration.is_some_and(|max| started.elapsed() >= max) {
                break StopReason::Completed;
            }
            match self.tick() {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Scram) => {
                    warn!(tick = self.counter, "scram requested; zeroing torques");
                    break StopReason::Scram;
                }
                Err(e) => {
                    self.zero_torques();
                    return Err(e);
                }
            }
            if pacer.wait() {
                self.stats.overruns += 1;
                debug!(tick = self.counter, "tick overran its budget");
            }
        };
        Ok(self.summary(reason, started.elapsed()))
    }

    /// Zero-torque settling.  Returns `false` if stopped early.
    fn warmup(&mut self, pacer: &mut Pacer) -> Result<bool, StriderError> {
        let started = Instant::now();
        let zeros = vec![0.0; self.torques.len()];
        while started.elapsed() < self.profile.warmup {
            if self.stop.is_stopped() {
                return Ok(false);
            }
            self.engine.set_torques(&zeros)?;
            self.engine.step(self.profile.dt)?;
            self.engine.sync_viewer();
            self.stats.warmup_ticks += 1;
            pacer.wait();
        }
        Ok(!self.stop.is_stopped())
    }

    /// Execute one Running tick without pacing.
    ///
    /// # Errors
    ///
    /// Propagates policy and engine failures; the caller must zero torques.
    pub fn tick(&mut self) -> Result<TickOutcome, StriderError> {
        self.phase = LoopPhase::Running;
        let command = self.commands.get_command();
        if command.scram {
            return Ok(TickOutcome::Scram);
        }

        self.counter += 1;
        self.stats.ticks += 1;
        let joints = self.engine.joint_state();

        if self.counter % u64::from(self.profile.decimation) == 0 {
            self.policy_step(&command, &joints)?;
        }

        self.pd.compute_into(&self.target, &joints, &mut self.torques);
        self.engine.set_torques(&self.torques)?;
        self.engine.step(self.profile.dt)?;
        self.engine.sync_viewer();

        if let Some(publisher) = &self.state {
            publisher.publish(RobotState::capture(self.engine.base_pose(), self.engine.joint_state()));
        }
        Ok(TickOutcome::Continue)
    }

    fn policy_step(&mut self, command: &CommandVector, joints: &strider_types::JointState) -> Result<(), StriderError> {
        let base_pose = self.engine.base_pose();
        let base_velocity = self.engine.base_velocity();

        let history = self.observations.observe(ObservationInputs {
            command,
            base_pose: &base_pose,
            base_velocity: &base_velocity,
            joints,
            last_action: &self.action,
        })?;
        let action = self.gate.invoke(history)?;

        let scale = self.profile.action_scale;
        for ((target, default), a) in self
            .target
            .position
            .iter_mut()
            .zip(&self.profile.default_angles)
            .zip(&action)
        {
            *target = default + a * scale;
        }
        self.target.velocity.fill(0.0);
        self.action = action;

        if let Some(recorder) = &mut self.recorder {
            let t = self.counter as f64 * self.profile.dt;
            if recorder.is_due(t) {
                recorder.record(RunSample {
                    t,
                    command: command.velocities(),
                    angular_velocity: base_velocity.angular,
                    gravity: gravity_projection(base_pose.orientation),
                    joint_pos: joints.position.clone(),
                    joint_vel: joints.velocity.clone(),
                    action: self.action.clone(),
                    target: self.target.position.clone(),
                });
            }
        }
        Ok(())
    }

    fn zero_torques(&mut self) {
        self.torques.fill(0.0);
        if let Err(e) = self.engine.set_torques(&self.torques) {
            error!(error = %e, "failed to zero torques");
        }
    }

    fn summary(&self, reason: StopReason, elapsed: Duration) -> RunSummary {
        RunSummary {
            reason,
            stats: self.stats(),
            elapsed,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ZeroPolicy;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strider_hal::{SimEngine, SimEngineBuilder};
    use strider_input::{NetworkCommandSource, SharedCommand};
    use strider_types::CommandRelay;

    /// Command source whose snapshot is set directly by the test.
    struct FixedSource(SharedCommand);

    impl CommandSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }
        fn start(&mut self) -> Result<(), StriderError> {
            Ok(())
        }
        fn get_command(&self) -> CommandVector {
            self.0.snapshot()
        }
        fn stop(&mut self) {}
    }

    /// Policy that counts calls and returns a constant action.
    struct CountingPolicy {
        calls: Arc<AtomicUsize>,
        value: f64,
        n: usize,
    }

    impl Policy for CountingPolicy {
        fn name(&self) -> &str {
            "counting"
        }
        fn infer(&mut self, _history: &[f64]) -> Result<Vec<f64>, StriderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![self.value; self.n])
        }
    }

    struct BrokenPolicy;

    impl Policy for BrokenPolicy {
        fn name(&self) -> &str {
            "broken"
        }
        fn infer(&mut self, _history: &[f64]) -> Result<Vec<f64>, StriderError> {
            Ok(vec![0.0; 3])
        }
    }

    fn fast_profile() -> RobotProfile {
        RobotProfile {
            warmup: Duration::from_millis(20),
            ..RobotProfile::go2()
        }
    }

    fn engine(profile: &RobotProfile) -> SimEngine {
        SimEngineBuilder::new(profile.num_joints())
            .with_timestep(profile.dt)
            .with_initial_positions(profile.init_angles.clone())
            .build()
            .unwrap()
    }

    fn zero_loop(shared: &SharedCommand) -> ControlLoop<SimEngine> {
        let profile = fast_profile();
        let engine = engine(&profile);
        ControlLoop::new(
            profile,
            engine,
            Box::new(ZeroPolicy::new(12)),
            Box::new(FixedSource(shared.clone())),
        )
        .unwrap()
    }

    #[test]
    fn policy_runs_floor_m_over_decimation_times() {
        for m in [0u64, 1, 3, 4, 5, 99, 100, 101] {
            let calls = Arc::new(AtomicUsize::new(0));
            let profile = fast_profile();
            let engine = engine(&profile);
            let mut ctl = ControlLoop::new(
                profile,
                engine,
                Box::new(CountingPolicy {
                    calls: Arc::clone(&calls),
                    value: 0.0,
                    n: 12,
                }),
                Box::new(FixedSource(SharedCommand::new())),
            )
            .unwrap();
            for _ in 0..m {
                ctl.tick().unwrap();
            }
            assert_eq!(calls.load(Ordering::SeqCst) as u64, m / 4, "m = {m}");
            assert_eq!(ctl.stats().policy_invocations, m / 4);
            assert_eq!(ctl.stats().ticks, m);
        }
    }

    #[test]
    fn zero_policy_holds_default_posture_with_pd_torque() {
        let shared = SharedCommand::new();
        let mut ctl = zero_loop(&shared);
        let profile = fast_profile();

        for _ in 0..100 {
            let before = ctl.engine().joint_state();
            ctl.tick().unwrap();
            assert_eq!(ctl.target().position, profile.default_angles);
            assert!(ctl.target().velocity.iter().all(|&v| v == 0.0));

            let tau = ctl.engine().last_torques();
            for i in 0..12 {
                let expected = (profile.kps[i] * (profile.default_angles[i] - before.position[i])
                    + profile.kds[i] * (0.0 - before.velocity[i]))
                    .clamp(-profile.torque_limits[i], profile.torque_limits[i]);
                assert!((tau[i] - expected).abs() < 1e-12, "joint {i}: {} vs {expected}", tau[i]);
            }
        }
        assert_eq!(ctl.engine().steps(), 100);
    }

    #[test]
    fn target_follows_action_and_is_held_between_boundaries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let profile = fast_profile();
        let engine = engine(&profile);
        let mut ctl = ControlLoop::new(
            profile.clone(),
            engine,
            Box::new(CountingPolicy {
                calls,
                value: 0.4,
                n: 12,
            }),
            Box::new(FixedSource(SharedCommand::new())),
        )
        .unwrap();

        for _ in 0..3 {
            ctl.tick().unwrap();
        }
        assert_eq!(ctl.target().position, profile.default_angles);
        ctl.tick().unwrap();
        let expected: Vec<f64> = profile.default_angles.iter().map(|d| d + 0.4 * 0.25).collect();
        assert_eq!(ctl.target().position, expected);
        ctl.tick().unwrap();
        assert_eq!(ctl.target().position, expected);
    }

    #[test]
    fn torques_never_exceed_limits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let profile = fast_profile();
        let engine = engine(&profile);
        let mut ctl = ControlLoop::new(
            profile.clone(),
            engine,
            Box::new(CountingPolicy {
                calls,
                value: 100.0,
                n: 12,
            }),
            Box::new(FixedSource(SharedCommand::new())),
        )
        .unwrap();
        for _ in 0..200 {
            ctl.tick().unwrap();
            for (tau, limit) in ctl.engine().last_torques().iter().zip(&profile.torque_limits) {
                assert!(tau.abs() <= *limit);
            }
        }
    }

    #[test]
    fn scram_stops_and_zeroes_torques() {
        let shared = SharedCommand::new();
        let mut ctl = zero_loop(&shared);
        shared.publish(CommandVector {
            scram: true,
            ..CommandVector::default()
        });
        let summary = ctl.run().unwrap();
        assert_eq!(summary.reason, StopReason::Scram);
        assert_eq!(summary.stats.ticks, 0);
        assert!(summary.stats.warmup_ticks > 0);
        assert!(ctl.engine().last_torques().iter().all(|&t| t == 0.0));
    }

    #[test]
    fn stop_signal_ends_run() {
        let shared = SharedCommand::new();
        let stop = StopSignal::new();
        let mut ctl = zero_loop(&shared).with_stop_signal(stop.clone()).with_max_duration(None);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(80));
            stop.stop();
        });
        let summary = ctl.run().unwrap();
        stopper.join().unwrap();
        assert_eq!(summary.reason, StopReason::Stopped);
        assert!(summary.stats.ticks > 0);
        assert_eq!(ctl.phase(), LoopPhase::Running);
        assert!(ctl.engine().last_torques().iter().all(|&t| t == 0.0));
    }

    #[test]
    fn max_duration_completes_run() {
        let shared = SharedCommand::new();
        let mut ctl = zero_loop(&shared).with_max_duration(Some(Duration::from_millis(50)));
        let summary = ctl.run().unwrap();
        assert_eq!(summary.reason, StopReason::Completed);
        assert!(summary.elapsed >= Duration::from_millis(50));
        assert!(summary.stats.policy_invocations >= 1);
    }

    #[test]
    fn warmup_steps_engine_and_syncs_viewer() {
        let shared = SharedCommand::new();
        let stop = StopSignal::new();
        let mut ctl = zero_loop(&shared).with_stop_signal(stop.clone());
        let mut pacer = Pacer::new(0.005);
        assert!(ctl.warmup(&mut pacer).unwrap());
        let warm = ctl.stats().warmup_ticks;
        assert!(warm > 0);
        assert_eq!(ctl.engine().steps(), warm);
        assert_eq!(ctl.engine().viewer_syncs(), warm);
        assert_eq!(ctl.stats().ticks, 0);
        assert_eq!(ctl.phase(), LoopPhase::Warmup);
    }

    #[test]
    fn policy_failure_is_fatal_and_zeroes_torques() {
        let profile = fast_profile();
        let mut engine = engine(&profile);
        // Displace a joint so the PD law would produce non-zero torque.
        let mut js = engine.joint_state();
        js.position[0] += 0.3;
        engine.set_joint_state(js);
        let mut ctl = ControlLoop::new(
            profile,
            engine,
            Box::new(BrokenPolicy),
            Box::new(FixedSource(SharedCommand::new())),
        )
        .unwrap()
        .with_max_duration(Some(Duration::from_secs(5)));

        let err = ctl.run().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, StriderError::PolicyInvocation(_)));
        assert!(ctl.engine().last_torques().iter().all(|&t| t == 0.0));
        assert!(ctl.stats().ticks <= 4);
    }

    #[test]
    fn mismatched_engine_is_a_load_failure() {
        let profile = fast_profile();
        let engine = SimEngineBuilder::new(13).build().unwrap();
        let err = ControlLoop::new(
            profile,
            engine,
            Box::new(ZeroPolicy::new(12)),
            Box::new(FixedSource(SharedCommand::new())),
        )
        .err()
        .unwrap();
        assert!(matches!(err, StriderError::EngineLoad(_)));
    }

    #[test]
    fn relayed_command_reaches_observation() {
        let shared = SharedCommand::new();
        let mut network = NetworkCommandSource::new(shared.clone());
        network.start().unwrap();
        let inbox = network.inbox();
        let profile = fast_profile();
        let engine = engine(&profile);
        let mut ctl = ControlLoop::new(profile, engine, Box::new(ZeroPolicy::new(12)), Box::new(network)).unwrap();

        inbox.deliver(CommandRelay {
            x_vel: 0.5,
            ..CommandRelay::default()
        });
        for _ in 0..4 {
            ctl.tick().unwrap();
        }
        let latest = ctl.observations.history().latest();
        assert_eq!(latest[0], 1.0);
    }

    #[test]
    fn state_is_published_every_tick() {
        let shared = SharedCommand::new();
        let (publisher, mut subscriber) = crate::state_feed::state_feed();
        let mut ctl = zero_loop(&shared).with_state_publisher(publisher);
        assert!(subscriber.take_fresh().is_none());
        ctl.tick().unwrap();
        let state = subscriber.take_fresh().unwrap();
        assert_eq!(state.joints.len(), 12);
        assert!(state.timestamp_ms > 0);
    }

    #[test]
    fn recorder_captures_policy_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let shared = SharedCommand::new();
        let mut ctl = zero_loop(&shared).with_recorder(RunRecorder::create(&path, "go2", 0.0).unwrap());
        for _ in 0..8 {
            ctl.tick().unwrap();
        }
        let recorder = ctl.recorder.as_mut().unwrap();
        assert_eq!(recorder.written(), 2);
        assert_eq!(recorder.finish().unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }
}
