//! # helmsman
//!
//! Live telemetry acquisition and closed-loop waypoint navigation for an
//! instrumented Windows process.
//!
//! The crate reads an entity's position and heading out of a running target
//! process through configured pointer chains, validates each observation, and
//! steers the entity along a waypoint path with face-then-go movement
//! commands, watched over by a liveness watchdog.
//!
//! ## Features
//!
//! - **Remote memory access**: read-only attachment by process name, cached
//!   module bases, exact-length reads
//! - **Pointer chain resolution**: module-relative chains re-resolved on
//!   every tick, so relocated intermediate structures are followed
//! - **Background polling**: bursty sampling on a plain OS thread with a
//!   coherence filter that drops non-finite and teleporting observations
//! - **Pose sources**: live memory, pure simulation, or any external
//!   [`SampleFeed`], all behind one [`PoseContext`]
//! - **Navigation**: proportional face-then-go controller with bounded
//!   actuation steps, plus a path runner for ordered waypoint lists
//! - **Liveness watchdog**: panic-signal and stale-telemetry monitors that
//!   fire a single stop callback
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use helmsman::{
//!     Navigator, PathRunner, PollerConfig, PoseContext, PoseSource, TelemetryPoller,
//!     actuator::NoopActuator,
//!     config::{NavTunables, load_waypoints},
//! };
//!
//! let config = PollerConfig::load("poller.yaml")?;
//! let poller = TelemetryPoller::spawn_live(config)?;
//!
//! let mut pose = PoseContext::simulation(0.0, 0.0, 0.0);
//! pose.attach(PoseSource::Memory(poller));
//! let mut navigator = Navigator::new(pose, NoopActuator::default(), NavTunables::default());
//!
//! let runner = PathRunner::new(load_waypoints("path.yaml")?)?;
//! runner.run(&mut navigator)?;
//! ```

pub mod actuator;
pub mod config;
mod error;
pub mod gate;
pub mod memory;
pub mod nav;
pub mod path;
pub mod poller;
pub mod pose;
pub mod resolver;
pub mod watchdog;

#[cfg(windows)]
pub mod windows;

#[cfg(test)]
mod test_utils;

pub use config::{NavTunables, PointerSpec, PollerConfig, WatchdogConfig, Waypoint};
pub use error::{Result, TelemetryError};
pub use gate::{StabilityGate, await_stable};
pub use nav::Navigator;
pub use path::PathRunner;
pub use poller::{PollerHandle, TelemetryPoller};
pub use pose::{PoseContext, PoseSource, Sample, SampleFeed};
pub use watchdog::{PanicSignal, Watchdog};
