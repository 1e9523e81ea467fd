//! `strider-hal` – Actuation Boundary
//!
//! Everything that sits between the control loop and the thing that actually
//! moves.
//!
//! # Modules
//!
//! - [`engine`] – [`Engine`]: the trait every simulator binding or hardware
//!   driver implements (step, joint/base readback, torque write).
//! - [`pd`] – [`PdController`]: the stateless, clamped joint-space PD law
//!   that converts targets into torques every physics tick.
//! - [`sim`] – [`SimEngine`]: a deterministic in-process engine for CI and
//!   headless runs.

pub mod engine;
pub mod pd;
pub mod sim;

pub use engine::Engine;
pub use pd::PdController;
pub use sim::{SimEngine, SimEngineBuilder};
