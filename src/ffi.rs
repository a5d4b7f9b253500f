//! FFI bindings for mobile platforms (iOS/Android).
//!
//! Thin UniFFI wrappers over the global [`ENGINE`]. Every function takes the
//! current time from the wall clock. Lifecycle functions report success as a
//! `bool` and log the reason on failure; structured results cross the
//! boundary as JSON.

use std::sync::{Arc, Mutex};

use log::{info, warn};
use once_cell::sync::Lazy;

use crate::engine::{now_seconds, Ticker, ENGINE, TICK_INTERVAL};
use crate::error::Result;
use crate::{
    init_logging, with_engine, CompletedHike, FileCheckpointStore, HikeEngine, LocationSample,
    SessionSink, TrackerConfig, UserProfile,
};

static TICKER: Lazy<Mutex<Option<Ticker>>> = Lazy::new(|| Mutex::new(None));

// ============================================================================
// Completed Hike Callback
// ============================================================================

/// Receives each completed hike as JSON when a session stops.
/// Implement this in Kotlin/Swift to store finished hikes.
#[uniffi::export(callback_interface)]
pub trait CompletedHikeCallback: Send + Sync {
    fn on_hike_completed(&self, hike_json: String);
}

struct CallbackSink(Box<dyn CompletedHikeCallback>);

impl SessionSink for CallbackSink {
    fn persist(&self, hike: &CompletedHike) -> Result<()> {
        let json = serde_json::to_string(hike)?;
        self.0.on_hike_completed(json);
        Ok(())
    }
}

fn start_ticker() {
    let mut ticker = TICKER.lock().unwrap_or_else(|e| e.into_inner());
    if ticker.as_ref().is_some_and(Ticker::is_running) {
        return;
    }
    *ticker = Some(Ticker::spawn(Arc::clone(&ENGINE), TICK_INTERVAL));
}

fn stop_ticker() {
    let taken = TICKER.lock().unwrap_or_else(|e| e.into_inner()).take();
    // Dropping joins the tick thread, which needs the engine lock
    drop(taken);
}

fn report<T>(action: &str, result: Result<T>) -> Option<T> {
    result
        .map_err(|e| warn!("[HikeTrackerRust] {} failed: {}", action, e))
        .ok()
}

// ============================================================================
// Setup
// ============================================================================

/// Initialize the engine. Call once at app startup, before [`ffi_recover`].
///
/// `checkpoint_dir` is the per-installation directory for the checkpoint
/// file. `config_json` may be empty for defaults.
#[uniffi::export]
pub fn ffi_init(checkpoint_dir: String, config_json: String) -> bool {
    init_logging();

    let config = if config_json.trim().is_empty() {
        TrackerConfig::default()
    } else {
        match report("Parsing config", TrackerConfig::from_json(&config_json)) {
            Some(config) => config,
            None => return false,
        }
    };

    stop_ticker();
    let store = Arc::new(FileCheckpointStore::new(&checkpoint_dir));
    let engine = HikeEngine::new(config).with_store(store);
    with_engine(|e| *e = engine);

    info!("[HikeTrackerRust] Initialized, checkpoints in {}", checkpoint_dir);
    true
}

/// Register the receiver of completed hikes.
#[uniffi::export]
pub fn ffi_set_session_callback(callback: Box<dyn CompletedHikeCallback>) {
    with_engine(|e| e.set_session_sink(Some(Box::new(CallbackSink(callback)))));
}

/// Set or clear the user profile.
#[uniffi::export]
pub fn ffi_set_profile(profile: Option<UserProfile>) {
    with_engine(|e| e.set_profile(profile));
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Restore an interrupted session. Returns true when one was recovered.
#[uniffi::export]
pub fn ffi_recover() -> bool {
    let recovered = with_engine(|e| report("Recovery", e.recover(now_seconds()))).unwrap_or(false);
    if recovered {
        start_ticker();
    }
    recovered
}

#[uniffi::export]
pub fn ffi_start() -> bool {
    let started = with_engine(|e| report("Start", e.start(now_seconds()))).is_some();
    if started {
        start_ticker();
    }
    started
}

#[uniffi::export]
pub fn ffi_pause() -> bool {
    with_engine(|e| report("Pause", e.pause(now_seconds()))).is_some()
}

#[uniffi::export]
pub fn ffi_resume() -> bool {
    with_engine(|e| report("Resume", e.resume(now_seconds()))).is_some()
}

/// Stop the session. Returns the completed hike as JSON, or an empty string.
#[uniffi::export]
pub fn ffi_stop() -> String {
    stop_ticker();
    with_engine(|e| report("Stop", e.stop(now_seconds())))
        .and_then(|hike| report("Encoding hike", serde_json::to_string(&hike).map_err(Into::into)))
        .unwrap_or_default()
}

// ============================================================================
// Sensor Feeds and Events
// ============================================================================

#[uniffi::export]
pub fn ffi_ingest(sample: LocationSample) {
    with_engine(|e| e.ingest(sample, now_seconds()));
}

/// Ingest samples buffered while the app was suspended, in order.
#[uniffi::export]
pub fn ffi_ingest_batch(samples: Vec<LocationSample>) {
    with_engine(|e| {
        let now = now_seconds();
        for sample in samples {
            e.ingest(sample, now);
        }
    });
}

#[uniffi::export]
pub fn ffi_set_heart_rate(bpm: f64, source: String) {
    with_engine(|e| e.set_heart_rate(bpm, &source, now_seconds()));
}

#[uniffi::export]
pub fn ffi_set_cadence(steps_per_second: f64) {
    with_engine(|e| e.set_cadence(steps_per_second));
}

#[uniffi::export]
pub fn ffi_set_battery(level: f64) {
    with_engine(|e| e.set_battery(level, now_seconds()));
}

#[uniffi::export]
pub fn ffi_add_fuel(kcal: f64) {
    with_engine(|e| e.add_fuel(kcal, now_seconds()));
}

#[uniffi::export]
pub fn ffi_check_in() {
    with_engine(|e| e.check_in(now_seconds()));
}

#[uniffi::export]
pub fn ffi_memory_pressure() {
    with_engine(|e| e.handle_memory_pressure(now_seconds()));
}

/// Persist the session before the app is suspended or terminated.
#[uniffi::export]
pub fn ffi_enter_background() {
    with_engine(|e| e.flush(now_seconds()));
}

// ============================================================================
// Queries
// ============================================================================

/// Live snapshot as JSON.
#[uniffi::export]
pub fn ffi_snapshot_json() -> String {
    with_engine(|e| report("Snapshot", e.snapshot(now_seconds()).to_json())).unwrap_or_default()
}

/// Post-hike report for a completed hike against earlier hikes (JSON in, JSON out).
#[uniffi::export]
pub fn ffi_post_hike_report_json(hike_json: String, history_json: String) -> String {
    let parsed = serde_json::from_str::<CompletedHike>(&hike_json).and_then(|hike| {
        let history: Vec<CompletedHike> = if history_json.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&history_json)?
        };
        serde_json::to_string(&hike.report(&history))
    });
    report("Report", parsed.map_err(Into::into)).unwrap_or_default()
}
