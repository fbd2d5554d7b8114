//! Background telemetry poller.
//!
//! Owns the attachment lifecycle for the target process and publishes the
//! latest validated [`Sample`] behind a mutex. The loop is a plain OS thread
//! with timed sleeps; state machine:
//!
//! ```text
//! Detached -> Attaching -> Sampling -> (any read failure) -> Detached
//! ```
//!
//! Sampling runs a bursty pattern: a short burst of ticks spaced at
//! `1/rate/burst` seconds, then an idle pause of `1.2 * (1/rate)`. The burst
//! amortizes fixed per-read overhead while the idle pause bounds worst-case
//! staleness.
//!
//! Failures never escape the loop. Attachment failures pause and retry;
//! read failures detach, clear the module table, and re-attach; samples the
//! coherence filter rejects are dropped with the previous publication left
//! authoritative.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{HeadingUnits, PointerSpec, PollerConfig};
use crate::memory::{MemoryBackend, ModuleTable, ProcessMemory};
use crate::pose::{Sample, SampleFeed, normalize_deg};
use crate::resolver::resolve_chain;
use crate::{Result, TelemetryError};

/// Pause after any attachment-level failure before retrying. Fixed, no
/// exponential backoff.
const RETRY_PAUSE: Duration = Duration::from_millis(200);

/// Upper bound on ticks per burst.
const MAX_BURST: u32 = 5;

/// Floor for the intra-burst tick sleep.
const MIN_TICK_SLEEP: Duration = Duration::from_millis(10);

/// Floor for the idle pause between bursts.
const MIN_IDLE_SLEEP: Duration = Duration::from_millis(30);

/// Rejects samples that are non-finite or imply an implausible instantaneous
/// displacement from the last accepted position.
///
/// Teleport rejection guards against reading a freshly reallocated or
/// type-punned structure mid-transition: a wild pointer usually lands on
/// bytes that decode to something far away.
#[derive(Debug)]
pub struct CoherenceFilter {
    teleport_threshold: f64,
    last_accepted: Option<(f64, f64)>,
}

impl CoherenceFilter {
    pub fn new(teleport_threshold: f64) -> Self {
        Self { teleport_threshold, last_accepted: None }
    }

    /// Validate a candidate observation, normalizing the heading on
    /// acceptance and updating the delta-check cache.
    pub fn accept(&mut self, x: f64, y: f64, heading_deg: f64) -> Result<(f64, f64, f64)> {
        if !x.is_finite() || !y.is_finite() || !heading_deg.is_finite() {
            return Err(TelemetryError::incoherent_sample(format!(
                "non-finite value (x={x}, y={y}, heading={heading_deg})"
            )));
        }
        if let Some((last_x, last_y)) = self.last_accepted {
            let dx = (x - last_x).abs();
            let dy = (y - last_y).abs();
            if dx > self.teleport_threshold || dy > self.teleport_threshold {
                return Err(TelemetryError::incoherent_sample(format!(
                    "teleport of ({dx:.1}, {dy:.1}) exceeds {} units",
                    self.teleport_threshold
                )));
            }
        }
        self.last_accepted = Some((x, y));
        Ok((x, y, normalize_deg(heading_deg)))
    }

    /// Forget the last accepted position, e.g. across re-attachment.
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

/// One successful attachment: an open process handle plus its cached module
/// table. Dropping it releases the handle; the table dies with it.
struct Attachment<P: ProcessMemory> {
    process: P,
    modules: ModuleTable,
}

impl<P: ProcessMemory> Attachment<P> {
    /// Find the process, open it, and cache module bases. An absent anchor
    /// module fails the attachment as a whole.
    fn establish<B: MemoryBackend<Process = P>>(
        backend: &mut B,
        config: &PollerConfig,
    ) -> Result<Self> {
        let process = backend.attach_by_name(&config.process_name)?;
        let modules = ModuleTable::from_modules(&process.modules()?);
        // Fail now rather than on the first tick.
        modules.base_of(&config.anchor_module)?;
        info!(
            pid = process.pid(),
            modules = modules.len(),
            process = %config.process_name,
            "attached to target process"
        );
        Ok(Self { process, modules })
    }

    /// Resolve one chain and read its scalar. Re-resolves fully on every
    /// call; intermediate pointers may have moved since the last tick.
    fn read_chain(&self, spec: &PointerSpec, config: &PollerConfig) -> Result<f64> {
        let base = self.modules.base_of(&spec.module)?;
        let address = resolve_chain(&self.process, base, &spec.offsets)?;
        self.process.read_scalar(address, config.scalar_width)
    }

    /// One sampling tick: read all three chains and run the coherence
    /// filter. `Ok(None)` means the filter rejected the tick; a read error
    /// means the attachment is gone.
    fn tick(&self, config: &PollerConfig, filter: &mut CoherenceFilter) -> Result<Option<Sample>> {
        let x = self.read_chain(&config.position_x_ptr, config)?;
        let y = self.read_chain(&config.position_y_ptr, config)?;
        let raw_heading = self.read_chain(&config.heading_ptr, config)?;

        let heading_deg = match config.heading_units {
            HeadingUnits::Degrees => raw_heading,
            HeadingUnits::Radians => raw_heading.to_degrees(),
        };

        match filter.accept(x, y, heading_deg) {
            Ok((x, y, heading_deg)) => Ok(Some(Sample {
                position: Some((x, y)),
                heading_deg: Some(heading_deg),
                taken_at: Some(Instant::now()),
            })),
            Err(reject) => {
                debug!(%reject, "tick rejected, previous sample stays authoritative");
                Ok(None)
            }
        }
    }
}

#[derive(Default)]
struct SharedSample {
    sample: Mutex<Sample>,
}

/// Handle to a running poller.
///
/// `sample()` returns the most recently published observation without ever
/// blocking the sampling thread beyond one assignment's critical section.
/// Dropping every handle requests shutdown; the loop notices within one
/// burst+idle cycle.
pub struct PollerHandle {
    shared: Arc<SharedSample>,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Latest published sample, stale or not. Never blocks on I/O.
    pub fn sample(&self) -> Sample {
        *self.shared.sample.lock().expect("sample lock poisoned")
    }

    /// Request cooperative shutdown. Takes effect within one burst+idle
    /// cycle; in-flight reads are never interrupted.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the sampling thread to exit.
    pub fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl SampleFeed for PollerHandle {
    fn sample(&self) -> Sample {
        PollerHandle::sample(self)
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawns the sampling thread.
pub struct TelemetryPoller;

impl TelemetryPoller {
    /// Start polling with the given backend. The configuration should have
    /// passed [`PollerConfig::validate`].
    pub fn spawn<B: MemoryBackend>(config: PollerConfig, backend: B) -> PollerHandle {
        let shared = Arc::new(SharedSample::default());
        let cancel = CancellationToken::new();

        let loop_shared = Arc::clone(&shared);
        let loop_cancel = cancel.clone();
        let thread = std::thread::Builder::new()
            .name("telemetry-poller".into())
            .spawn(move || sampling_loop(backend, config, loop_shared, loop_cancel))
            .expect("failed to spawn telemetry poller thread");

        PollerHandle { shared, cancel, thread: Some(thread) }
    }

    /// Start polling the live process named in the configuration.
    #[cfg(windows)]
    pub fn spawn_live(config: PollerConfig) -> Result<PollerHandle> {
        config.validate()?;
        Ok(Self::spawn(config, crate::windows::Win32Backend::new()))
    }

    /// Live polling reads another process's memory through Win32 APIs and is
    /// only available on Windows. Simulated and external sources work
    /// everywhere.
    #[cfg(not(windows))]
    pub fn spawn_live(_config: PollerConfig) -> Result<PollerHandle> {
        Err(TelemetryError::unsupported_platform("live process polling", "Windows"))
    }
}

fn sampling_loop<B: MemoryBackend>(
    mut backend: B,
    config: PollerConfig,
    shared: Arc<SharedSample>,
    cancel: CancellationToken,
) {
    let target_hz = config.poll_hz.max(2);
    let burst_len = target_hz.min(MAX_BURST);
    let period = Duration::from_secs_f64(1.0 / f64::from(target_hz));
    let tick_sleep = (period / burst_len).max(MIN_TICK_SLEEP);
    let idle_sleep = period.max(MIN_IDLE_SLEEP).mul_f64(1.2);

    let mut filter = CoherenceFilter::new(config.teleport_threshold);

    info!(
        target_hz,
        burst_len,
        tick_sleep_ms = tick_sleep.as_millis() as u64,
        idle_sleep_ms = idle_sleep.as_millis() as u64,
        "telemetry poller started"
    );

    while !cancel.is_cancelled() {
        let attachment = match Attachment::establish(&mut backend, &config) {
            Ok(attachment) => attachment,
            Err(error) => {
                warn!(%error, process = %config.process_name, "attachment failed, retrying");
                std::thread::sleep(RETRY_PAUSE);
                continue;
            }
        };
        filter.reset();

        'sampling: while !cancel.is_cancelled() {
            for _ in 0..burst_len {
                if cancel.is_cancelled() {
                    break 'sampling;
                }
                match attachment.tick(&config, &mut filter) {
                    Ok(Some(sample)) => {
                        // Position, heading, and timestamp move together
                        // under one lock; readers never see them split.
                        *shared.sample.lock().expect("sample lock poisoned") = sample;
                        trace!(?sample.position, ?sample.heading_deg, "sample published");
                    }
                    Ok(None) => {}
                    Err(error) => {
                        // The handle is suspect; drop it, forget the module
                        // table, and go back to Attaching.
                        warn!(%error, "read failure, detaching");
                        std::thread::sleep(RETRY_PAUSE);
                        break 'sampling;
                    }
                }
                std::thread::sleep(tick_sleep);
            }
            std::thread::sleep(idle_sleep);
        }
        // Attachment drops here, releasing the process handle exactly once.
    }

    info!("telemetry poller stopped");
}
