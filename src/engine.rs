//! # Shared Engine
//!
//! Glue that lets several producers drive one [`HikeEngine`]:
//! - [`SharedEngine`]: the engine behind a mutex, so sample ingestion, sensor
//!   feeds and the periodic tick never run concurrently
//! - [`Ticker`]: a background thread calling [`HikeEngine::tick`] about once
//!   per second, cancelled on [`Ticker::stop`] or drop
//! - [`ENGINE`]: process-wide instance used by the mobile bindings
//!
//! ## Late ticks
//!
//! A tick that races with `stop` either runs before it (normal refresh) or
//! after it, where the engine is idle and ignores it. The ticker also checks
//! its cancellation flag after every wake-up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use once_cell::sync::Lazy;

use crate::{HikeEngine, TrackerConfig};

/// Engine shared between the ingestion path and the ticker.
pub type SharedEngine = Arc<Mutex<HikeEngine>>;

/// Wrap an engine for sharing.
pub fn share(engine: HikeEngine) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}

/// Lock a shared engine, recovering it if a previous holder panicked.
pub fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, HikeEngine> {
    engine.lock().unwrap_or_else(|poisoned| {
        warn!("[HikeEngine] Lock poisoned, continuing with last state");
        poisoned.into_inner()
    })
}

/// Current wall-clock time in seconds since the Unix epoch.
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ============================================================================
// Ticker
// ============================================================================

/// Default period of [`Ticker`].
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic tick on a background thread.
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    /// Tick `engine` every `interval` using the wall clock.
    pub fn spawn(engine: SharedEngine, interval: Duration) -> Self {
        Self::spawn_with_clock(engine, interval, now_seconds)
    }

    /// Tick `engine` every `interval`, reading time from `clock`.
    pub fn spawn_with_clock<C>(engine: SharedEngine, interval: Duration, clock: C) -> Self
    where
        C: Fn() -> f64 + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("hike-ticker".to_string())
            .spawn(move || {
                debug!("[Ticker] Started ({:?})", interval);
                while !thread_stop.load(Ordering::SeqCst) {
                    thread::park_timeout(interval);
                    if thread_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    lock_engine(&engine).tick(clock());
                }
                debug!("[Ticker] Stopped");
            })
            .map_err(|e| warn!("[Ticker] Failed to spawn tick thread: {}", e))
            .ok();

        Self { stop, handle }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel and wait for the tick thread. No tick runs after this returns.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("[Ticker] Tick thread panicked");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Global Singleton
// ============================================================================

/// Global engine instance.
///
/// This singleton allows FFI calls to reach one engine without passing state
/// across the FFI boundary.
pub static ENGINE: Lazy<SharedEngine> = Lazy::new(|| {
    info!("[HikeEngine] Creating global engine");
    share(HikeEngine::new(TrackerConfig::default()))
});

/// Run `f` with the global engine locked.
pub fn with_engine<F, R>(f: F) -> R
where
    F: FnOnce(&mut HikeEngine) -> R,
{
    let mut engine = lock_engine(&ENGINE);
    f(&mut engine)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocationSample, SessionPhase};
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_now_seconds_is_current() {
        // 2024-01-01
        assert!(now_seconds() > 1_704_067_200.0);
    }

    #[test]
    fn test_ticker_refreshes_and_stops() {
        let engine = share(HikeEngine::new(TrackerConfig::default()));
        {
            let mut e = lock_engine(&engine);
            e.start(1000.0).unwrap();
            e.set_heart_rate(120.0, "Strap", 1000.0);
        }

        // Clock far past heart-rate staleness and the check-in interval
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&ticks);
        let mut ticker = Ticker::spawn_with_clock(
            Arc::clone(&engine),
            Duration::from_millis(5),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                3000.0
            },
        );
        while ticks.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(5));
        }
        ticker.stop();
        assert!(!ticker.is_running());

        let snapshot = lock_engine(&engine).snapshot(3000.0);
        assert_eq!(snapshot.heart_rate, None);
        assert!(snapshot.safety.check_in_due);

        // No further ticks after stop
        let after_stop = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_tick_after_stop_is_ignored() {
        let engine = share(HikeEngine::new(TrackerConfig::default()));
        lock_engine(&engine).start(0.0).unwrap();
        lock_engine(&engine).stop(10.0).unwrap();

        let ticker = Ticker::spawn_with_clock(Arc::clone(&engine), Duration::from_millis(1), || 20.0);
        thread::sleep(Duration::from_millis(20));
        drop(ticker);

        let e = lock_engine(&engine);
        assert_eq!(e.phase(), SessionPhase::Idle);
        assert!(e.route().is_empty());
    }

    #[test]
    fn test_global_engine() {
        let phase = with_engine(|e| {
            if e.phase() == SessionPhase::Idle {
                e.start(1_000.0).unwrap();
            }
            e.ingest(LocationSample::new(1_000.0, 46.5, 8.0, 900.0), 1_000.0);
            let phase = e.phase();
            e.stop(1_001.0).unwrap();
            phase
        });
        assert_eq!(phase, SessionPhase::Tracking);
        assert_eq!(with_engine(|e| e.phase()), SessionPhase::Idle);
    }
}
