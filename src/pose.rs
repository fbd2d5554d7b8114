//! Pose source abstraction.
//!
//! Exactly one source of truth for position and heading is active at a time:
//! a pure simulation, the live memory poller, or an external feed with the
//! same consumer contract (an OCR-based reader, say). The
//! one-active-source rule is enforced by construction with a tagged enum
//! rather than nullable slots, and the whole thing lives in an owned
//! [`PoseContext`] handed to the controller, not in process-wide globals.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::poller::PollerHandle;
use crate::{Result, TelemetryError};

/// A completed telemetry observation.
///
/// Position and heading are published atomically together; a reader never
/// observes one updated without the other.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sample {
    /// World position, absent until the source first publishes.
    pub position: Option<(f64, f64)>,
    /// Heading in degrees, normalized to `[0, 360)`.
    pub heading_deg: Option<f64>,
    /// When the observation was accepted.
    pub taken_at: Option<Instant>,
}

impl Sample {
    /// Whether both fields have ever been published.
    pub fn is_ready(&self) -> bool {
        self.position.is_some() && self.heading_deg.is_some()
    }

    /// Time since this sample was accepted.
    pub fn age(&self) -> Option<Duration> {
        self.taken_at.map(|at| at.elapsed())
    }
}

/// Anything that can serve the latest validated sample without blocking.
///
/// Implemented by the memory poller and by alternative sources (OCR) that
/// share its consumer contract.
pub trait SampleFeed: Send {
    fn sample(&self) -> Sample;
}

/// Timestamp of the last successful pose read, consumed by the watchdog.
#[derive(Debug, Default)]
pub struct Heartbeat {
    last: Mutex<Option<Instant>>,
}

impl Heartbeat {
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&self, at: Instant) {
        *self.last.lock().expect("heartbeat lock poisoned") = Some(at);
    }

    /// Time since the last touch, or `None` if never touched.
    pub fn elapsed(&self) -> Option<Duration> {
        self.last.lock().expect("heartbeat lock poisoned").map(|at| at.elapsed())
    }
}

/// Mutable pose state integrated from commanded motion.
///
/// Exists only when no live source is attached. Single-writer: the
/// navigation controller owns the context that owns this.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedPose {
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
}

impl SimulatedPose {
    pub fn new(x: f64, y: f64, heading_deg: f64) -> Self {
        Self { x, y, heading_deg: normalize_deg(heading_deg) }
    }

    /// Move forward along the current heading.
    pub fn advance(&mut self, distance: f64) {
        let radians = self.heading_deg.to_radians();
        self.x += radians.cos() * distance;
        self.y += radians.sin() * distance;
    }

    /// Turn by a signed delta, left positive.
    pub fn rotate(&mut self, delta_deg: f64) {
        self.heading_deg = normalize_deg(self.heading_deg + delta_deg);
    }
}

/// Normalize any heading into `[0, 360)`. Idempotent on already-normalized
/// values.
pub fn normalize_deg(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

/// The active pose source. Attaching one replaces the previous one.
pub enum PoseSource {
    /// Pure simulation; never fails once initialized.
    Simulation(SimulatedPose),
    /// Live samples from the memory poller.
    Memory(PollerHandle),
    /// An alternative live feed with the poller's consumer contract.
    External(Box<dyn SampleFeed>),
}

impl PoseSource {
    fn name(&self) -> &'static str {
        match self {
            PoseSource::Simulation(_) => "simulation",
            PoseSource::Memory(_) => "memory",
            PoseSource::External(_) => "external",
        }
    }
}

/// Owned pose state passed to the navigation controller and path runner.
///
/// Every successful live read updates the shared heartbeat the watchdog
/// monitors. Simulation reads do not touch the heartbeat; there is no
/// staleness to detect when the pose is integrated locally.
pub struct PoseContext {
    source: PoseSource,
    heartbeat: Arc<Heartbeat>,
}

impl PoseContext {
    pub fn new(source: PoseSource) -> Self {
        Self { source, heartbeat: Arc::new(Heartbeat::default()) }
    }

    /// Start in simulation mode at the given pose.
    pub fn simulation(x: f64, y: f64, heading_deg: f64) -> Self {
        Self::new(PoseSource::Simulation(SimulatedPose::new(x, y, heading_deg)))
    }

    /// Replace the active source. The previous source is dropped, which for
    /// a memory poller requests its shutdown.
    pub fn attach(&mut self, source: PoseSource) {
        debug!(from = self.source.name(), to = source.name(), "switching pose source");
        self.source = source;
    }

    /// Heartbeat handle for the watchdog.
    pub fn heartbeat(&self) -> Arc<Heartbeat> {
        Arc::clone(&self.heartbeat)
    }

    pub fn is_simulation(&self) -> bool {
        matches!(self.source, PoseSource::Simulation(_))
    }

    /// Current position.
    ///
    /// Fails with [`TelemetryError::SourceNotReady`] if the active live
    /// source has never published.
    pub fn position(&self) -> Result<(f64, f64)> {
        match &self.source {
            PoseSource::Simulation(sim) => Ok((sim.x, sim.y)),
            PoseSource::Memory(handle) => self.live_position(handle.sample()),
            PoseSource::External(feed) => self.live_position(feed.sample()),
        }
    }

    /// Current heading in degrees.
    pub fn heading(&self) -> Result<f64> {
        match &self.source {
            PoseSource::Simulation(sim) => Ok(sim.heading_deg),
            PoseSource::Memory(handle) => self.live_heading(handle.sample()),
            PoseSource::External(feed) => self.live_heading(feed.sample()),
        }
    }

    fn live_position(&self, sample: Sample) -> Result<(f64, f64)> {
        let position = sample
            .position
            .ok_or(TelemetryError::SourceNotReady { source_name: self.source.name() })?;
        self.touch(sample);
        Ok(position)
    }

    fn live_heading(&self, sample: Sample) -> Result<f64> {
        let heading = sample
            .heading_deg
            .ok_or(TelemetryError::SourceNotReady { source_name: self.source.name() })?;
        self.touch(sample);
        Ok(heading)
    }

    fn touch(&self, sample: Sample) {
        match sample.taken_at {
            Some(at) => self.heartbeat.touch_at(at),
            None => self.heartbeat.touch(),
        }
    }

    /// Integrate forward motion into the simulated pose. No-op for live
    /// sources, whose pose advances by re-sampling.
    pub fn advance_simulated(&mut self, distance: f64) {
        if let PoseSource::Simulation(sim) = &mut self.source {
            sim.advance(distance);
        }
    }

    /// Integrate a turn into the simulated pose. No-op for live sources.
    pub fn rotate_simulated(&mut self, delta_deg: f64) {
        if let PoseSource::Simulation(sim) = &mut self.source {
            sim.rotate(delta_deg);
        }
    }

    /// Re-seed the simulated pose. Must be called by the path runner before
    /// first use; querying an unseeded simulation is a caller error avoided
    /// by construction (a `Simulation` variant always holds a pose).
    pub fn reset_simulation(&mut self, x: f64, y: f64, heading_deg: f64) {
        self.source = PoseSource::Simulation(SimulatedPose::new(x, y, heading_deg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticFeed(Sample);

    impl SampleFeed for StaticFeed {
        fn sample(&self) -> Sample {
            self.0
        }
    }

    #[test]
    fn simulation_is_always_ready() {
        let ctx = PoseContext::simulation(1.0, 2.0, 90.0);
        assert_eq!(ctx.position().unwrap(), (1.0, 2.0));
        assert_eq!(ctx.heading().unwrap(), 90.0);
    }

    #[test]
    fn simulated_advance_follows_heading() {
        let mut sim = SimulatedPose::new(0.0, 0.0, 0.0);
        sim.advance(10.0);
        assert!((sim.x - 10.0).abs() < 1e-9);
        assert!(sim.y.abs() < 1e-9);

        let mut north = SimulatedPose::new(0.0, 0.0, 90.0);
        north.advance(5.0);
        assert!(north.x.abs() < 1e-9);
        assert!((north.y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn simulated_rotation_wraps() {
        let mut sim = SimulatedPose::new(0.0, 0.0, 350.0);
        sim.rotate(20.0);
        assert!((sim.heading_deg - 10.0).abs() < 1e-9);
        sim.rotate(-30.0);
        assert!((sim.heading_deg - 340.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_deg_is_idempotent_and_bounded() {
        for value in [-720.5, -360.0, -0.1, 0.0, 12.3, 359.9, 360.0, 1234.5] {
            let normalized = normalize_deg(value);
            assert!((0.0..360.0).contains(&normalized), "{value} -> {normalized}");
            assert_eq!(normalize_deg(normalized), normalized);
        }
    }

    #[test]
    fn unpublished_external_source_fails_not_ready() {
        let ctx = PoseContext::new(PoseSource::External(Box::new(StaticFeed(Sample::default()))));
        match ctx.position() {
            Err(TelemetryError::SourceNotReady { source_name }) => {
                assert_eq!(source_name, "external");
            }
            other => panic!("expected SourceNotReady, got {other:?}"),
        }
        assert!(ctx.heading().is_err());
        // Failed reads must not register as liveness.
        assert!(ctx.heartbeat().elapsed().is_none());
    }

    #[test]
    fn successful_live_read_touches_heartbeat() {
        let sample = Sample {
            position: Some((3.0, 4.0)),
            heading_deg: Some(180.0),
            taken_at: Some(Instant::now()),
        };
        let ctx = PoseContext::new(PoseSource::External(Box::new(StaticFeed(sample))));
        assert_eq!(ctx.position().unwrap(), (3.0, 4.0));
        let elapsed = ctx.heartbeat().elapsed().expect("heartbeat touched");
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn attach_replaces_the_previous_source() {
        let mut ctx = PoseContext::simulation(0.0, 0.0, 0.0);
        assert!(ctx.is_simulation());

        ctx.attach(PoseSource::External(Box::new(StaticFeed(Sample::default()))));
        assert!(!ctx.is_simulation());
        // Simulated integration is a no-op for live sources.
        ctx.advance_simulated(10.0);
        ctx.rotate_simulated(90.0);
        assert!(ctx.position().is_err());
    }
}
