//! Actuation contract consumed by the navigation controller.
//!
//! The controller issues logical directional commands only; delivering them
//! to the target (and the is-this-the-foreground-window gate in front of
//! that) belongs to an external input-injection collaborator behind the
//! [`Actuator`] trait.

use std::time::Duration;

use tracing::trace;

use crate::Result;

/// Logical movement inputs the controller can command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKey {
    Forward,
    TurnLeft,
    TurnRight,
}

impl MoveKey {
    /// All keys the panic path must release.
    pub const ALL: [MoveKey; 3] = [MoveKey::Forward, MoveKey::TurnLeft, MoveKey::TurnRight];
}

/// Issues and releases directional inputs over bounded durations.
pub trait Actuator: Send {
    /// Hold `key` for `duration`, then release it. Blocks for the duration.
    fn hold(&mut self, key: MoveKey, duration: Duration) -> Result<()>;

    /// Release `key` if currently held. Used by the panic path; must be safe
    /// to call redundantly.
    fn release(&mut self, key: MoveKey);
}

/// Actuator that sleeps without injecting anything. Used in simulation mode,
/// where motion comes from pose integration rather than the target process.
#[derive(Debug, Default)]
pub struct NoopActuator {
    /// Skip the sleep entirely; lets tests run simulated paths instantly.
    pub instant: bool,
}

impl NoopActuator {
    pub fn instant() -> Self {
        Self { instant: true }
    }
}

impl Actuator for NoopActuator {
    fn hold(&mut self, key: MoveKey, duration: Duration) -> Result<()> {
        trace!(?key, ?duration, "noop hold");
        if !self.instant {
            std::thread::sleep(duration);
        }
        Ok(())
    }

    fn release(&mut self, _key: MoveKey) {}
}
