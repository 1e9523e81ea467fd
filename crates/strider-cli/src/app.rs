//! Wires a control loop from a [`StriderConfig`] and runs it.

use std::time::Duration;

use strider_bridge::{BridgeConfig, BridgeHandle, TelemetryBridge};
use strider_hal::SimEngineBuilder;
use strider_input::joystick::JoystickConfig;
use strider_input::keyboard::{KeyDevice, StdinKeyDevice};
use strider_input::{
    JoystickSource, KeyboardSource, NetworkCommandSource, RelayInbox, SharedCommand, SourceSet, StopSignal,
};
use strider_runtime::{
    ControlLoop, LinearPolicy, Policy, RobotProfile, RunRecorder, RunSummary, ZeroPolicy, recorder, state_feed,
};
use strider_types::StriderError;
use tracing::{info, warn};

use crate::config::{InputKind, StriderConfig};

/// Bounded join for the telemetry thread at exit.
const BRIDGE_SHUTDOWN: Duration = Duration::from_secs(2);

/// Build every component named by `cfg` and run the loop until it stops.
///
/// # Errors
///
/// * [`StriderError::Config`] for an unknown profile, an unreadable policy
///   or a run log that cannot be created.
/// * [`StriderError::EngineLoad`] if the engine cannot be built.
/// * Any fatal error raised by the running loop.
pub fn run(cfg: &StriderConfig, stop: StopSignal) -> Result<RunSummary, StriderError> {
    let profile = RobotProfile::by_name(&cfg.profile)?;
    profile.validate()?;

    let engine = SimEngineBuilder::new(profile.num_joints())
        .with_timestep(profile.dt)
        .with_initial_positions(profile.init_angles.clone())
        .build()?;

    let policy = load_policy(cfg, &profile)?;
    let recorder = cfg
        .record_path
        .as_ref()
        .map(|path| RunRecorder::create(path, &profile.name, recorder::DEFAULT_INTERVAL))
        .transpose()?;

    let shared = SharedCommand::new();
    let (sources, inbox) = build_sources(cfg, &shared);

    let (publisher, subscriber) = state_feed();
    let mut bridge = if cfg.bridge_enabled {
        let config = BridgeConfig::new(cfg.bridge_url.clone(), profile.joint_names.clone());
        Some(TelemetryBridge::new(config, subscriber, inbox).spawn()?)
    } else {
        None
    };

    let mut control = ControlLoop::new(profile.clone(), engine, policy, Box::new(sources))?
        .with_state_publisher(publisher)
        .with_stop_signal(stop)
        .with_max_duration(cfg.max_duration());
    if let Some(recorder) = recorder {
        control = control.with_recorder(recorder);
    }

    info!(
        profile = %profile.name,
        policy = %cfg.policy_path.as_ref().map_or("zero".to_string(), |p| p.display().to_string()),
        bridge = cfg.bridge_enabled,
        "starting control loop"
    );
    let result = control.run();

    if let Some(handle) = bridge.as_mut() {
        shutdown_bridge(handle);
    }
    result
}

fn load_policy(cfg: &StriderConfig, profile: &RobotProfile) -> Result<Box<dyn Policy>, StriderError> {
    match &cfg.policy_path {
        Some(path) => {
            let policy = LinearPolicy::load(path)?;
            if policy.num_actions() != profile.num_actions || policy.input_len() != profile.history_len() {
                return Err(StriderError::Config(format!(
                    "policy {} maps {} inputs to {} actions; profile '{}' needs {} -> {}",
                    path.display(),
                    policy.input_len(),
                    policy.num_actions(),
                    profile.name,
                    profile.history_len(),
                    profile.num_actions
                )));
            }
            Ok(Box::new(policy))
        }
        None => {
            warn!("no policy configured; running the zero policy");
            Ok(Box::new(ZeroPolicy::new(profile.num_actions)))
        }
    }
}

/// One source per configured input, all writing `shared`.  The network
/// source's inbox is handed back for the bridge.
fn build_sources(cfg: &StriderConfig, shared: &SharedCommand) -> (SourceSet, Option<RelayInbox>) {
    let mut set = SourceSet::new(shared.clone());
    let mut inbox = None;
    for kind in &cfg.inputs {
        match kind {
            InputKind::Keyboard => {
                let device = match StdinKeyDevice::open() {
                    Ok(d) => Some(Box::new(d) as Box<dyn KeyDevice>),
                    Err(e) => {
                        warn!(error = %e, "stdin key reader unavailable");
                        None
                    }
                };
                set.push(Box::new(KeyboardSource::new(shared.clone(), cfg.keyboard_max_vel, device)));
            }
            InputKind::Joystick => {
                set.push(Box::new(JoystickSource::discover(shared.clone(), JoystickConfig::default())));
            }
            InputKind::Network => {
                let source = NetworkCommandSource::new(shared.clone());
                inbox = Some(source.inbox());
                set.push(Box::new(source));
            }
        }
    }
    (set, inbox)
}

fn shutdown_bridge(handle: &mut BridgeHandle) {
    let stats = handle.stats();
    info!(
        sessions = stats.sessions(),
        states_sent = stats.states_sent(),
        commands_received = stats.commands_received(),
        "stopping telemetry bridge"
    );
    handle.shutdown(BRIDGE_SHUTDOWN);
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_runtime::StopReason;

    fn quiet_config() -> StriderConfig {
        StriderConfig {
            bridge_enabled: false,
            inputs: vec![InputKind::Network],
            max_duration_s: 0.05,
            ..StriderConfig::default()
        }
    }

    #[test]
    fn runs_to_completion_with_zero_policy() {
        let summary = run(&quiet_config(), StopSignal::new()).unwrap();
        assert_eq!(summary.reason, StopReason::Completed);
        assert!(summary.stats.ticks > 0);
        assert!(summary.stats.warmup_ticks > 0);
    }

    #[test]
    fn stop_signal_ends_the_run() {
        let stop = StopSignal::new();
        stop.stop();
        let summary = run(&quiet_config(), stop).unwrap();
        assert_eq!(summary.reason, StopReason::Stopped);
    }

    #[test]
    fn unknown_profile_is_config_error() {
        let cfg = StriderConfig {
            profile: "hexapod".to_string(),
            ..quiet_config()
        };
        assert!(matches!(run(&cfg, StopSignal::new()), Err(StriderError::Config(_))));
    }

    #[test]
    fn missing_policy_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StriderConfig {
            policy_path: Some(dir.path().join("absent.json")),
            ..quiet_config()
        };
        assert!(matches!(run(&cfg, StopSignal::new()), Err(StriderError::Config(_))));
    }

    #[test]
    fn policy_shape_must_match_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.json");
        std::fs::write(&path, r#"{"weights":[[0.0,0.0]],"bias":[0.0]}"#).unwrap();
        let cfg = StriderConfig {
            policy_path: Some(path),
            ..quiet_config()
        };
        assert!(matches!(run(&cfg, StopSignal::new()), Err(StriderError::Config(_))));
    }

    #[test]
    fn record_path_writes_a_run_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("go2.jsonl");
        let cfg = StriderConfig {
            record_path: Some(path.clone()),
            max_duration_s: 0.25,
            ..quiet_config()
        };
        run(&cfg, StopSignal::new()).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.lines().count() >= 2, "header plus at least one sample");
    }

    #[test]
    fn unwritable_record_path_fails_before_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let cfg = StriderConfig {
            record_path: Some(blocker.join("go2.jsonl")),
            ..quiet_config()
        };
        assert!(matches!(run(&cfg, StopSignal::new()), Err(StriderError::Config(_))));
    }

    #[test]
    fn network_input_hands_out_an_inbox() {
        let shared = SharedCommand::new();
        let cfg = StriderConfig {
            inputs: vec![InputKind::Joystick, InputKind::Network],
            ..quiet_config()
        };
        let (set, inbox) = build_sources(&cfg, &shared);
        assert_eq!(set.names(), vec!["joystick", "network"]);
        assert!(inbox.is_some());

        let (_set, inbox) = build_sources(&quiet_config_without_inputs(), &shared);
        assert!(inbox.is_none());
    }

    fn quiet_config_without_inputs() -> StriderConfig {
        StriderConfig {
            inputs: Vec::new(),
            ..quiet_config()
        }
    }
}
