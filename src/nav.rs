//! Waypoint navigation controller.
//!
//! Face-then-go policy: on every control tick the controller re-reads the
//! pose, turns in place until the heading error is inside the epsilon, then
//! walks a bounded step and re-evaluates. Turning and walking never happen
//! simultaneously.
//!
//! Every commanded maneuver is chunked into sub-steps no longer than
//! `max_step_secs`, so a stop request becomes visible within at most one
//! sub-step. In simulation mode each sub-step integrates the pose directly;
//! live, the pose advances through the target's own motion and re-sampling.
//!
//! Degrees throughout; headings wrap modulo 360 after every update.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actuator::{Actuator, MoveKey};
use crate::config::{NavTunables, Waypoint};
use crate::pose::{PoseContext, normalize_deg};
use crate::Result;

/// Compass bearing from `from` to `to`: 0° = east, 90° = north, in
/// `[0, 360)`. A zero-length vector has no bearing; the caller's current
/// heading is returned so the controller treats it as already facing.
pub fn bearing_deg(from: (f64, f64), to: (f64, f64), current_heading: f64) -> f64 {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    if dx.abs() < 1e-9 && dy.abs() < 1e-9 {
        return current_heading;
    }
    normalize_deg(dy.atan2(dx).to_degrees())
}

/// Shortest signed angle from `from_deg` to `to_deg`, left positive, in
/// `(-180, 180]`.
pub fn angle_to(from_deg: f64, to_deg: f64) -> f64 {
    let delta = (to_deg - from_deg + 180.0).rem_euclid(360.0) - 180.0;
    if delta == -180.0 { 180.0 } else { delta }
}

/// Drives the pose toward waypoints by issuing bounded directional commands.
pub struct Navigator<A: Actuator> {
    ctx: PoseContext,
    actuator: A,
    tunables: NavTunables,
    cancel: CancellationToken,
}

impl<A: Actuator> Navigator<A> {
    pub fn new(ctx: PoseContext, actuator: A, tunables: NavTunables) -> Self {
        Self::with_cancel(ctx, actuator, tunables, CancellationToken::new())
    }

    /// Build with an externally held stop token (the watchdog's, usually).
    pub fn with_cancel(
        ctx: PoseContext,
        actuator: A,
        tunables: NavTunables,
        cancel: CancellationToken,
    ) -> Self {
        Self { ctx, actuator, tunables, cancel }
    }

    /// Token that interrupts navigation within one sub-step when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn pose(&self) -> &PoseContext {
        &self.ctx
    }

    pub fn pose_mut(&mut self) -> &mut PoseContext {
        &mut self.ctx
    }

    /// Drive toward `target` until within the reach epsilon or stopped.
    ///
    /// The controller itself never invents errors: the only failure path is
    /// the pose source reporting it has never published, which the caller
    /// must surface.
    pub fn move_to(&mut self, target: Waypoint) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                info!("navigation interrupted by stop request");
                return Ok(());
            }

            let current = self.ctx.position()?;
            let heading = self.ctx.heading()?;

            let dx = target.x - current.0;
            let dy = target.y - current.1;
            let distance = dx.hypot(dy);

            if distance <= self.tunables.reach_epsilon {
                info!(x = target.x, y = target.y, "waypoint reached");
                return Ok(());
            }

            let bearing = bearing_deg(current, (target.x, target.y), heading);
            let delta = angle_to(heading, bearing);

            // Face the target before moving; re-evaluate after every turn.
            if delta.abs() > self.tunables.heading_epsilon_deg {
                self.turn(delta)?;
                continue;
            }

            let step = distance.min(self.tunables.step_distance());
            self.walk(step)?;
        }
    }

    /// Turn left (positive) or right (negative) by `delta_deg`, in chunks.
    fn turn(&mut self, delta_deg: f64) -> Result<()> {
        if delta_deg.abs() < 1e-3 {
            return Ok(());
        }
        let key = if delta_deg > 0.0 { MoveKey::TurnLeft } else { MoveKey::TurnRight };
        let total_secs = delta_deg.abs() / self.tunables.turn_rate_dps;

        let mut remaining = total_secs;
        while remaining > 1e-6 && !self.cancel.is_cancelled() {
            let step = remaining.min(self.tunables.max_step_secs);
            self.actuator.hold(key, Duration::from_secs_f64(step))?;
            self.ctx
                .rotate_simulated((step * self.tunables.turn_rate_dps).copysign(delta_deg));
            remaining -= step;
        }
        debug!(delta_deg, duration_s = total_secs, ?key, "turn issued");
        Ok(())
    }

    /// Walk forward `distance` units, in chunks.
    fn walk(&mut self, distance: f64) -> Result<()> {
        if distance <= 0.0 {
            return Ok(());
        }
        let total_secs = distance / self.tunables.move_speed;

        let mut remaining = total_secs;
        while remaining > 1e-6 && !self.cancel.is_cancelled() {
            let step = remaining.min(self.tunables.max_step_secs);
            self.actuator.hold(MoveKey::Forward, Duration::from_secs_f64(step))?;
            self.ctx.advance_simulated(self.tunables.move_speed * step);
            remaining -= step;
        }
        debug!(distance, duration_s = total_secs, "walk issued");
        Ok(())
    }
}
