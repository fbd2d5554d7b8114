//! Path runner: iterates an ordered waypoint list through the controller.
//!
//! Loading and parsing the list is the config layer's job
//! ([`crate::config::load_waypoints`]); this module owns only the iteration
//! contract. The first record is the starting pose in simulation mode, the
//! remaining records are targets.

use std::time::Duration;

use tracing::info;

use crate::actuator::Actuator;
use crate::config::Waypoint;
use crate::nav::Navigator;
use crate::{Result, TelemetryError};

/// Pause at each reached waypoint before heading to the next.
const WAYPOINT_PAUSE: Duration = Duration::from_millis(100);

/// Runs a waypoint path segment by segment.
pub struct PathRunner {
    waypoints: Vec<Waypoint>,
}

impl PathRunner {
    /// Accepts a path of at least two waypoints.
    pub fn new(waypoints: Vec<Waypoint>) -> Result<Self> {
        if waypoints.len() < 2 {
            return Err(TelemetryError::PathTooShort { count: waypoints.len() });
        }
        Ok(Self { waypoints })
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Walk the path to completion or until the navigator is stopped.
    ///
    /// In simulation mode the pose is re-seeded at the first waypoint facing
    /// east (0°). A `SourceNotReady` failure from a live source propagates to
    /// the caller; per-segment progress is logged either way.
    pub fn run<A: Actuator>(&self, navigator: &mut Navigator<A>) -> Result<()> {
        if navigator.pose().is_simulation() {
            let start = self.waypoints[0];
            navigator.pose_mut().reset_simulation(start.x, start.y, 0.0);
            info!(x = start.x, y = start.y, "simulated pose seeded at path start");
        }

        let segments = self.waypoints.len() - 1;
        for (index, target) in self.waypoints.iter().skip(1).enumerate() {
            if navigator.cancel_token().is_cancelled() {
                info!("path run stopped before segment {}", index + 1);
                return Ok(());
            }
            info!(segment = index + 1, segments, x = target.x, y = target.y, "next waypoint");
            navigator.move_to(*target)?;
            std::thread::sleep(WAYPOINT_PAUSE);
        }
        info!(segments, "path complete");
        Ok(())
    }
}
