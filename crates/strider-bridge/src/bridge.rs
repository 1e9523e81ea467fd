//! [`TelemetryBridge`] – persistent outbound state stream and inbound command
//! relay.
//!
//! The bridge runs on its own [`Worker`] thread with a private
//! current-thread tokio runtime, so nothing it does can block or fail the
//! control loop.  Per connection it:
//!
//! 1. connects (bounded by `connect_timeout`) and sends the `sim_connect`
//!    handshake,
//! 2. streams the latest [`StateSubscriber`] snapshot every `send_interval`,
//! 3. writes every inbound `command` frame into the [`RelayInbox`], dropping
//!    undecodable frames without closing the connection.
//!
//! Any failure ends the session; the bridge waits `reconnect_delay` and tries
//! again, forever, until its stop signal is raised.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use strider_input::{JoinOutcome, RelayInbox, StopSignal, Worker};
use strider_runtime::StateSubscriber;
use strider_types::{StriderError, TelemetryMessage};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::codec;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:8000/ws";
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Granularity at which an idle bridge notices its stop signal.
const STOP_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub url: String,
    pub send_interval: Duration,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// Sent with every state frame.
    pub joint_names: Vec<String>,
}

impl BridgeConfig {
    pub fn new(url: impl Into<String>, joint_names: Vec<String>) -> Self {
        Self {
            url: url.into(),
            send_interval: DEFAULT_SEND_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            joint_names,
        }
    }
}

/// Counters shared between the bridge thread and its handle.
#[derive(Debug, Default)]
pub struct BridgeStats {
    connected: AtomicBool,
    sessions: AtomicU64,
    states_sent: AtomicU64,
    commands_received: AtomicU64,
    malformed: AtomicU64,
}

impl BridgeStats {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connections that completed the handshake.
    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn states_sent(&self) -> u64 {
        self.states_sent.load(Ordering::Relaxed)
    }

    pub fn commands_received(&self) -> u64 {
        self.commands_received.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TelemetryBridge
// ────────────────────────────────────────────────────────────────────────────

pub struct TelemetryBridge {
    config: BridgeConfig,
    states: StateSubscriber,
    inbox: Option<RelayInbox>,
}

impl TelemetryBridge {
    /// `inbox = None` runs an outbound-only bridge; inbound commands are
    /// then ignored.
    pub fn new(config: BridgeConfig, states: StateSubscriber, inbox: Option<RelayInbox>) -> Self {
        Self { config, states, inbox }
    }

    /// Start the bridge thread.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Channel`] if the thread cannot be spawned.
    pub fn spawn(self) -> Result<BridgeHandle, StriderError> {
        let stats = Arc::new(BridgeStats::default());
        let thread_stats = Arc::clone(&stats);
        let worker = Worker::spawn("telemetry", move |signal| {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "telemetry runtime failed to start; bridge disabled");
                    return;
                }
            };
            runtime.block_on(self.run(signal, thread_stats));
        })?;
        Ok(BridgeHandle { worker, stats })
    }

    async fn run(mut self, signal: StopSignal, stats: Arc<BridgeStats>) {
        info!(url = %self.config.url, "telemetry bridge started");
        while !signal.is_stopped() {
            match self.session(&signal, &stats).await {
                Ok(()) => debug!("telemetry session ended"),
                Err(e) => warn!(url = %self.config.url, error = %e, "telemetry connection lost"),
            }
            stats.connected.store(false, Ordering::Release);
            if sleep_or_stop(self.config.reconnect_delay, &signal).await {
                break;
            }
        }
        info!("telemetry bridge stopped");
    }

    /// One connection, from connect to disconnect.  `Ok` only when stopped.
    async fn session(&mut self, signal: &StopSignal, stats: &BridgeStats) -> Result<(), StriderError> {
        let connect = connect_async(self.config.url.as_str());
        let (ws, _) = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| StriderError::Connection(format!("connect to {} timed out", self.config.url)))?
            .map_err(|e| StriderError::Connection(format!("connect to {}: {e}", self.config.url)))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        ws_tx
            .send(Message::Text(codec::handshake().into()))
            .await
            .map_err(|e| StriderError::Connection(format!("handshake failed: {e}")))?;
        stats.connected.store(true, Ordering::Release);
        stats.sessions.fetch_add(1, Ordering::Relaxed);
        info!(url = %self.config.url, "telemetry connected");

        let mut ticker = tokio::time::interval(self.config.send_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if signal.is_stopped() {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(());
                    }
                    if let Some(state) = self.states.take_fresh() {
                        let text = codec::encode_state(&state, &self.config.joint_names)?;
                        ws_tx
                            .send(Message::Text(text.into()))
                            .await
                            .map_err(|e| StriderError::Connection(format!("send failed: {e}")))?;
                        stats.states_sent.fetch_add(1, Ordering::Relaxed);
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_inbound(text.as_str(), stats),
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(StriderError::Connection("closed by peer".to_string()));
                        }
                        Some(Err(e)) => return Err(StriderError::Connection(format!("receive failed: {e}"))),
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    fn handle_inbound(&self, text: &str, stats: &BridgeStats) {
        match codec::decode(text) {
            Ok(TelemetryMessage::CommandRelay(command)) => {
                stats.commands_received.fetch_add(1, Ordering::Relaxed);
                if let Some(inbox) = &self.inbox {
                    inbox.deliver(command);
                }
            }
            Ok(other) => debug!(message = ?other, "ignoring non-command frame"),
            Err(e) => {
                stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "dropping malformed frame");
            }
        }
    }
}

/// Sleep up to `duration`, returning `true` early if `signal` is raised.
async fn sleep_or_stop(duration: Duration, signal: &StopSignal) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if signal.is_stopped() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep((deadline - now).min(STOP_POLL)).await;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BridgeHandle
// ────────────────────────────────────────────────────────────────────────────

/// Owner's side of a running bridge.
pub struct BridgeHandle {
    worker: Worker,
    stats: Arc<BridgeStats>,
}

impl BridgeHandle {
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Raise the stop signal and wait up to `timeout` for the thread.
    pub fn shutdown(&mut self, timeout: Duration) -> JoinOutcome {
        let outcome = self.worker.shutdown(timeout);
        if outcome == JoinOutcome::Abandoned {
            warn!("telemetry bridge abandoned at shutdown");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;
    use strider_hal::SimEngineBuilder;
    use strider_input::{CommandSource, NetworkCommandSource, SharedCommand};
    use strider_runtime::pacer::Pacer;
    use strider_runtime::{ControlLoop, RobotProfile, ZeroPolicy, state_feed};
    use strider_types::{BasePose, JointState, RobotState};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn fast_config(url: String) -> BridgeConfig {
        BridgeConfig {
            send_interval: Duration::from_millis(5),
            reconnect_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
            ..BridgeConfig::new(url, vec!["j0".to_string()])
        }
    }

    fn sample_state() -> RobotState {
        RobotState {
            timestamp_ms: 42,
            base: BasePose::default(),
            joints: JointState {
                position: vec![0.5],
                velocity: vec![0.0],
            },
        }
    }

    async fn wait_until(mut pred: impl FnMut() -> bool) -> bool {
        let deadline = StdInstant::now() + Duration::from_secs(5);
        while StdInstant::now() < deadline {
            if pred() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pred()
    }

    #[tokio::test]
    async fn handshake_state_and_command_flow() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let shared = SharedCommand::new();
        let mut network = NetworkCommandSource::new(shared.clone());
        network.start().unwrap();
        let (publisher, subscriber) = state_feed();
        publisher.publish(sample_state());

        let mut handle = TelemetryBridge::new(fast_config(url), subscriber, Some(network.inbox()))
            .spawn()
            .unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        assert_eq!(codec::decode(first.to_text().unwrap()).unwrap(), TelemetryMessage::Handshake);

        let second = ws.next().await.unwrap().unwrap();
        let TelemetryMessage::StateUpdate(update) = codec::decode(second.to_text().unwrap()).unwrap() else {
            panic!("expected state frame");
        };
        assert_eq!(update.timestamp, 42);
        assert_eq!(update.joint_names, vec!["j0".to_string()]);

        // A malformed frame is dropped and the connection stays usable.
        ws.send(Message::Text("{garbage".to_string().into())).await.unwrap();
        ws.send(Message::Text(
            r#"{"type":"command","x_vel":0.8,"y_vel":0,"ang_vel":0.2}"#.to_string().into(),
        ))
            .await
            .unwrap();

        assert!(wait_until(|| shared.snapshot().x_vel == 0.8).await);
        assert_eq!(shared.snapshot().ang_vel, 0.2);
        assert_eq!(handle.stats().malformed(), 1);
        assert_eq!(handle.stats().commands_received(), 1);
        assert!(handle.stats().is_connected());

        assert_eq!(handle.shutdown(Duration::from_secs(2)), JoinOutcome::Joined);
    }

    #[tokio::test]
    async fn reconnects_after_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (_publisher, subscriber) = state_feed();
        let mut handle = TelemetryBridge::new(fast_config(url), subscriber, None).spawn().unwrap();

        for _ in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let hello = ws.next().await.unwrap().unwrap();
            assert_eq!(hello.to_text().unwrap(), codec::handshake());
            ws.close(None).await.unwrap();
        }
        assert!(wait_until(|| handle.stats().sessions() >= 2).await);
        assert_eq!(handle.shutdown(Duration::from_secs(2)), JoinOutcome::Joined);
    }

    #[test]
    fn shutdown_is_prompt_while_waiting_to_reconnect() {
        let (_publisher, subscriber) = state_feed();
        let config = BridgeConfig {
            reconnect_delay: Duration::from_secs(30),
            ..fast_config("ws://127.0.0.1:1".to_string())
        };
        let mut handle = TelemetryBridge::new(config, subscriber, None).spawn().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let started = StdInstant::now();
        assert_eq!(handle.shutdown(Duration::from_secs(2)), JoinOutcome::Joined);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!handle.stats().is_connected());
    }

    #[test]
    fn unreachable_endpoint_does_not_perturb_loop_timing() {
        const TICKS: u32 = 60;

        let profile = RobotProfile::go2();
        let engine = SimEngineBuilder::new(12)
            .with_initial_positions(profile.init_angles.clone())
            .build()
            .unwrap();
        let (publisher, subscriber) = state_feed();
        let mut ctl = ControlLoop::new(
            profile.clone(),
            engine,
            Box::new(ZeroPolicy::new(12)),
            Box::new(NetworkCommandSource::new(SharedCommand::new())),
        )
        .unwrap()
        .with_state_publisher(publisher);

        let config = BridgeConfig {
            reconnect_delay: Duration::from_millis(10),
            ..fast_config("ws://127.0.0.1:1".to_string())
        };
        let mut handle = TelemetryBridge::new(config, subscriber, None).spawn().unwrap();

        let mut pacer = Pacer::new(profile.dt);
        let started = StdInstant::now();
        for _ in 0..TICKS {
            ctl.tick().unwrap();
            pacer.wait();
        }
        let elapsed = started.elapsed();
        let nominal = Duration::from_secs_f64(profile.dt) * TICKS;

        assert!(elapsed >= nominal.mul_f64(0.9), "{elapsed:?}");
        assert!(elapsed < nominal * 2 + Duration::from_millis(100), "{elapsed:?}");
        assert_eq!(ctl.engine().steps(), u64::from(TICKS));
        assert!(!handle.stats().is_connected());
        assert_eq!(handle.shutdown(Duration::from_secs(2)), JoinOutcome::Joined);
    }
}
