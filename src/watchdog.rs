//! Liveness watchdog.
//!
//! Two independent monitor threads share one stop callback:
//!
//! - the panic monitor polls an externally set panic signal every 0.1 s; on
//!   detection it releases all movement keys, then stops the system
//! - the staleness monitor polls the pose heartbeat every 0.5 s and stops
//!   the system when silence exceeds the timeout (default 3.0 s), bounding
//!   detection latency by `timeout + poll interval`
//!
//! The callback fires exactly once even if both monitors trigger
//! concurrently, and a watchdog-triggered stop is terminal: there is no
//! automatic restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::TelemetryError;
use crate::actuator::{Actuator, MoveKey};
use crate::config::WatchdogConfig;
use crate::pose::Heartbeat;

/// Shared panic signal. The key-press detection that sets it belongs to an
/// external collaborator; the watchdog only consumes the flag.
pub type PanicSignal = Arc<AtomicBool>;

/// Invokes the stop callback at most once, then cancels both monitors.
struct StopGuard {
    fired: AtomicBool,
    cause: Mutex<Option<String>>,
    cancel: CancellationToken,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl StopGuard {
    fn fire(&self, reason: String) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(%reason, "watchdog stop");
        *self.cause.lock().expect("cause lock poisoned") = Some(reason);
        (self.callback)();
        self.cancel.cancel();
    }
}

/// Handle to the two running monitor threads.
pub struct Watchdog {
    cancel: CancellationToken,
    guard: Arc<StopGuard>,
    threads: Vec<JoinHandle<()>>,
}

impl Watchdog {
    /// Start both monitors.
    ///
    /// `actuator` is used only to release held movement keys on panic;
    /// `stop` is the single system-wide stop callback.
    pub fn spawn<A, F>(
        config: WatchdogConfig,
        heartbeat: Arc<Heartbeat>,
        panic_signal: PanicSignal,
        mut actuator: A,
        stop: F,
    ) -> Self
    where
        A: Actuator + 'static,
        F: Fn() + Send + Sync + 'static,
    {
        let cancel = CancellationToken::new();
        let guard = Arc::new(StopGuard {
            fired: AtomicBool::new(false),
            cause: Mutex::new(None),
            cancel: cancel.clone(),
            callback: Box::new(stop),
        });

        let panic_guard = Arc::clone(&guard);
        let panic_cancel = cancel.clone();
        let panic_thread = std::thread::Builder::new()
            .name("watchdog-panic".into())
            .spawn(move || {
                while !panic_cancel.is_cancelled() {
                    if panic_signal.load(Ordering::SeqCst) {
                        for key in MoveKey::ALL {
                            actuator.release(key);
                        }
                        panic_guard.fire("panic signal".to_string());
                        break;
                    }
                    std::thread::sleep(config.panic_poll_interval);
                }
            })
            .expect("failed to spawn panic monitor thread");

        let stale_guard = Arc::clone(&guard);
        let stale_cancel = cancel.clone();
        let stale_thread = std::thread::Builder::new()
            .name("watchdog-staleness".into())
            .spawn(move || {
                // A heartbeat that has never been touched counts from spawn,
                // so a source that never publishes still trips the timeout.
                let spawned = Instant::now();
                while !stale_cancel.is_cancelled() {
                    let silence = heartbeat.elapsed().unwrap_or_else(|| spawned.elapsed());
                    if silence > config.stale_timeout {
                        let error = TelemetryError::StaleTelemetry { elapsed: silence };
                        stale_guard.fire(error.to_string());
                        break;
                    }
                    std::thread::sleep(config.stale_poll_interval);
                }
            })
            .expect("failed to spawn staleness monitor thread");

        info!(
            timeout_ms = config.stale_timeout.as_millis() as u64,
            "watchdog monitors started"
        );
        Self { cancel, guard, threads: vec![panic_thread, stale_thread] }
    }

    /// Whether either monitor has fired the stop callback.
    pub fn has_fired(&self) -> bool {
        self.guard.fired.load(Ordering::SeqCst)
    }

    /// Why the stop callback fired: the rendered [`TelemetryError::StaleTelemetry`]
    /// for the staleness monitor, or the panic signal description. `None`
    /// until a monitor fires.
    pub fn cause(&self) -> Option<String> {
        self.guard.cause.lock().expect("cause lock poisoned").clone()
    }

    /// Halt both monitors without firing the stop callback.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for both monitor threads to exit.
    pub fn shutdown(mut self) {
        self.cancel.cancel();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::NoopActuator;
    use crate::actuator::recording::RecordingActuator;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn fast_config() -> WatchdogConfig {
        WatchdogConfig {
            stale_timeout: Duration::from_millis(80),
            panic_poll_interval: Duration::from_millis(5),
            stale_poll_interval: Duration::from_millis(10),
        }
    }

    fn counting_stop() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        (count, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn staleness_fires_exactly_once() {
        let (count, stop) = counting_stop();
        let heartbeat = Arc::new(Heartbeat::default());
        let watchdog = Watchdog::spawn(
            fast_config(),
            heartbeat,
            PanicSignal::default(),
            NoopActuator::instant(),
            stop,
        );

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(watchdog.has_fired());
        // The cause carries the rendered staleness error with its duration.
        let cause = watchdog.cause().expect("cause recorded");
        assert!(cause.starts_with("telemetry stale for"), "cause was {cause:?}");
        watchdog.shutdown();
    }

    #[test]
    fn fresh_heartbeat_keeps_the_watchdog_quiet() {
        let (count, stop) = counting_stop();
        let heartbeat = Arc::new(Heartbeat::default());
        let watchdog = Watchdog::spawn(
            fast_config(),
            Arc::clone(&heartbeat),
            PanicSignal::default(),
            NoopActuator::instant(),
            stop,
        );

        for _ in 0..10 {
            heartbeat.touch();
            std::thread::sleep(Duration::from_millis(25));
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        watchdog.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panic_releases_movement_keys_then_stops() {
        let (count, stop) = counting_stop();
        let heartbeat = Arc::new(Heartbeat::default());
        heartbeat.touch();
        let panic_signal = PanicSignal::default();
        let actuator = RecordingActuator::default();

        let watchdog = Watchdog::spawn(
            fast_config(),
            heartbeat,
            Arc::clone(&panic_signal),
            actuator.clone(),
            stop,
        );

        panic_signal.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let releases = actuator.releases.lock().unwrap().clone();
        for key in MoveKey::ALL {
            assert!(releases.contains(&key), "{key:?} not released");
        }
        assert_eq!(watchdog.cause().as_deref(), Some("panic signal"));
        watchdog.shutdown();
    }

    #[test]
    fn concurrent_triggers_still_fire_once() {
        let (count, stop) = counting_stop();
        // Stale from the start and panicking from the start: both monitors
        // race to fire on their first poll.
        let panic_signal = PanicSignal::new(AtomicBool::new(true));
        let mut config = fast_config();
        config.stale_timeout = Duration::from_millis(1);
        config.stale_poll_interval = Duration::from_millis(2);
        config.panic_poll_interval = Duration::from_millis(2);

        let watchdog = Watchdog::spawn(
            config,
            Arc::new(Heartbeat::default()),
            panic_signal,
            NoopActuator::instant(),
            stop,
        );
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        watchdog.shutdown();
    }

    #[test]
    fn external_stop_never_invokes_the_callback() {
        let (count, stop) = counting_stop();
        let heartbeat = Arc::new(Heartbeat::default());
        heartbeat.touch();
        let watchdog = Watchdog::spawn(
            fast_config(),
            heartbeat,
            PanicSignal::default(),
            NoopActuator::instant(),
            stop,
        );
        watchdog.stop();
        assert!(!watchdog.has_fired());
        assert_eq!(watchdog.cause(), None);
        watchdog.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
