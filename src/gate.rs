//! Pre-run telemetry stability gate.
//!
//! Before a path run starts, the target is often still loading: the pointer
//! chains resolve, but the values swing as structures are rebuilt. The gate
//! waits until a window of fresh samples shows the entity standing still,
//! firing a caller-supplied keepalive action periodically (typically an
//! input tap that advances menu or loading screens).

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::pose::SampleFeed;

/// Tunables for [`await_stable`].
#[derive(Debug, Clone, Copy)]
pub struct StabilityGate {
    /// Give up after this long.
    pub overall_timeout: Duration,
    /// Delay between sample polls.
    pub poll_interval: Duration,
    /// How often to fire the keepalive action.
    pub keepalive_interval: Duration,
    /// Samples older than this are ignored.
    pub max_sample_age: Duration,
    /// History window length.
    pub window: Duration,
    /// Fewest fresh samples a verdict needs.
    pub min_samples: usize,
    /// The window must span at least this long.
    pub min_span: Duration,
    /// Largest first-to-last displacement that still counts as standing still.
    pub max_drift: f64,
}

impl Default for StabilityGate {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_millis(200),
            keepalive_interval: Duration::from_secs(5),
            max_sample_age: Duration::from_secs(1),
            window: Duration::from_secs(4),
            min_samples: 8,
            min_span: Duration::from_millis(1800),
            max_drift: 3.0,
        }
    }
}

impl StabilityGate {
    fn window_is_stable(&self, window: &[(Instant, (f64, f64))]) -> bool {
        if window.len() < self.min_samples {
            return false;
        }
        let (first_at, first_pos) = window[0];
        let (last_at, last_pos) = window[window.len() - 1];
        if last_at.duration_since(first_at) < self.min_span {
            return false;
        }
        let drift = (last_pos.0 - first_pos.0).hypot(last_pos.1 - first_pos.1);
        drift <= self.max_drift
    }
}

/// Block until `feed` looks stable, the gate times out, or polling is no
/// longer worthwhile. Returns whether stability was observed.
///
/// Independent of the poller's own retry cadence: the feed may be attaching
/// and re-attaching underneath; unready or stale samples simply don't enter
/// the window.
pub fn await_stable<F>(feed: &F, gate: &StabilityGate, mut keepalive: impl FnMut()) -> bool
where
    F: SampleFeed + ?Sized,
{
    info!("waiting for stable telemetry");
    let deadline = Instant::now() + gate.overall_timeout;
    let mut last_keepalive: Option<Instant> = None;
    let mut window: Vec<(Instant, (f64, f64))> = Vec::new();

    while Instant::now() < deadline {
        let now = Instant::now();

        if last_keepalive.is_none_or(|at| now.duration_since(at) >= gate.keepalive_interval) {
            keepalive();
            last_keepalive = Some(now);
        }

        let sample = feed.sample();
        if let (Some(position), Some(taken_at)) = (sample.position, sample.taken_at) {
            if now.duration_since(taken_at) <= gate.max_sample_age {
                window.push((taken_at, position));
                window.retain(|(at, _)| now.duration_since(*at) <= gate.window);
                if gate.window_is_stable(&window) {
                    info!(samples = window.len(), "telemetry stable");
                    return true;
                }
            } else {
                debug!("discarding stale sample");
            }
        }

        std::thread::sleep(gate.poll_interval);
    }

    info!("timed out waiting for stable telemetry");
    false
}
