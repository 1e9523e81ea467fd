//! `strider-runtime` – Closed-Loop Policy Controller
//!
//! The fixed-rate loop that turns engine state and operator commands into
//! policy actions and PD torques.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`]: warm-up, decimated policy
//!   invocation, per-tick PD torque, pacing, scram and stop handling.
//! - [`observation`] – [`ObservationBuilder`] and the frame-stacked
//!   [`ObservationHistory`][observation::ObservationHistory]; also the
//!   body-frame [`gravity_projection`][observation::gravity_projection].
//! - [`policy`] – the [`Policy`] trait, [`ZeroPolicy`], [`LinearPolicy`] and
//!   the contract-enforcing [`PolicyGate`].
//! - [`profile`] – [`RobotProfile`]: named parameter sets (`go2`, `tinydog`).
//! - [`pacer`] – soft real-time tick pacing with overrun counting.
//! - [`state_feed`] – one-writer / one-reader outbound state snapshot read by
//!   the telemetry bridge.
//! - [`recorder`] – [`RunRecorder`]: interval-gated JSON Lines run log.
//! - [`telemetry`] – [`init_tracing`]: `tracing` subscriber with optional
//!   OTLP export.

pub mod control_loop;
pub mod observation;
pub mod pacer;
pub mod policy;
pub mod profile;
pub mod recorder;
pub mod state_feed;
pub mod telemetry;

pub use control_loop::{ControlLoop, LoopPhase, LoopStats, RunSummary, StopReason, TickOutcome};
pub use observation::ObservationBuilder;
pub use policy::{LinearPolicy, Policy, PolicyGate, ZeroPolicy};
pub use profile::RobotProfile;
pub use recorder::RunRecorder;
pub use state_feed::{StatePublisher, StateSubscriber, state_feed};
pub use telemetry::{TracerProviderGuard, init_tracing};
