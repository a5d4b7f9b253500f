//! # Hike Tracker
//!
//! Live hike tracking engine that turns a stream of location, heart-rate,
//! cadence and battery samples into trail segments, a physiological
//! fatigue/energy score and a safety status, and survives process
//! interruption through periodic checkpoints.
//!
//! This library provides:
//! - Altitude smoothing and slope-limited trail segment building
//! - TRIMP-style heart-rate load with a speed/slope/cadence fallback
//! - Caloric balance and energy-remaining estimation
//! - Rule-based safety evaluation
//! - Bounded route/segment memory (downsampling and bucket merging)
//! - Pause/resume time accounting and crash recovery
//!
//! ## Features
//!
//! - **`persistence`** - SQLite-backed checkpoint store
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use hike_tracker::{HikeEngine, LocationSample, TrackerConfig};
//!
//! let mut engine = HikeEngine::new(TrackerConfig::default());
//! engine.start(1_700_000_000.0).unwrap();
//!
//! engine.ingest(LocationSample::new(1_700_000_000.0, 46.5000, 8.0000, 1200.0), 1_700_000_000.0);
//! engine.ingest(LocationSample::new(1_700_000_010.0, 46.5001, 8.0000, 1201.0), 1_700_000_010.0);
//!
//! let snapshot = engine.snapshot(1_700_000_010.0);
//! assert!(snapshot.distance_meters > 10.0);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, TrackerError};

// Geographic utilities (great-circle distance)
pub mod geo_utils;

// Vertical smoothing of noisy altitude readings
pub mod altitude;
pub use altitude::{smooth_altitude, AltitudeFilter};

// Sample-to-segment construction and terrain classification
pub mod segments;
pub use segments::{classify_terrain, trail_difficulty_score, SegmentBuilder, TerrainInsight};

// Physiological load and caloric balance
pub mod fatigue;
pub use fatigue::{energy_outlook, FatigueInputs, FatigueModel};

// Safety rules
pub mod safety;
pub use safety::{evaluate_safety, SafetyThresholds};

// Bounded in-memory route/segment collections
pub mod collections;
pub use collections::{downsample_route, merge_segments, CollectionCaps};

// Checkpoint contract and stores
pub mod checkpoint;
pub use checkpoint::{
    CheckpointPolicy, CheckpointStore, CheckpointWriter, FileCheckpointStore, SessionCheckpoint,
};

// Completed sessions and post-hike analysis
pub mod report;
pub use report::{CompletedHike, PostHikeReport, RecoveryReport, SessionSink};

// Session state machine
pub mod session;
pub use session::{HikeEngine, LiveSnapshot, SessionPhase};

// Shared engine, periodic tick and global singleton
pub mod engine;
pub use engine::{lock_engine, now_seconds, share, with_engine, SharedEngine, Ticker, ENGINE};

// SQLite checkpoint storage
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteCheckpointStore;

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("HikeTrackerRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A single location fix from the location source.
///
/// Timestamps are seconds since the Unix epoch. A negative vertical accuracy
/// means the altitude accuracy is unknown.
///
/// # Example
/// ```
/// use hike_tracker::LocationSample;
/// let sample = LocationSample::new(1_700_000_000.0, 46.55, 7.98, 2061.0)
///     .with_accuracy(5.0, 3.0);
/// assert!(sample.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LocationSample {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
    /// Ground speed in m/s (never negative)
    pub speed: f64,
    /// Horizontal accuracy in meters
    pub horizontal_accuracy: f64,
    /// Vertical accuracy in meters (negative = unknown)
    pub vertical_accuracy: f64,
}

impl LocationSample {
    /// Create a sample with unknown speed and a nominal 5 m accuracy.
    pub fn new(timestamp: f64, latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            altitude,
            speed: 0.0,
            horizontal_accuracy: 5.0,
            vertical_accuracy: 5.0,
        }
    }

    /// Set horizontal and vertical accuracy.
    pub fn with_accuracy(mut self, horizontal: f64, vertical: f64) -> Self {
        self.horizontal_accuracy = horizontal;
        self.vertical_accuracy = vertical;
        self
    }

    /// Set the reported ground speed; negative values clamp to zero.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed.max(0.0);
        self
    }

    /// Check if the sample has usable coordinates and timestamp.
    pub fn is_valid(&self) -> bool {
        self.timestamp.is_finite()
            && self.altitude.is_finite()
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Replace unusable optional readings with their "unknown" values.
    ///
    /// Non-finite or negative accuracies become `-1.0` and a non-finite or
    /// negative speed becomes `0.0`, so every stored sample serializes to a
    /// checkpoint that can be read back.
    pub fn sanitized(mut self) -> Self {
        if !self.vertical_accuracy.is_finite() || self.vertical_accuracy < 0.0 {
            self.vertical_accuracy = -1.0;
        }
        if !self.horizontal_accuracy.is_finite() || self.horizontal_accuracy < 0.0 {
            self.horizontal_accuracy = -1.0;
        }
        if !self.speed.is_finite() || self.speed < 0.0 {
            self.speed = 0.0;
        }
        self
    }
}

/// Terrain class assigned to a segment when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerrainClass {
    #[default]
    Flat,
    Climb,
    Downhill,
    Technical,
}

impl TerrainClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerrainClass::Flat => "flat",
            TerrainClass::Climb => "climb",
            TerrainClass::Downhill => "downhill",
            TerrainClass::Technical => "technical",
        }
    }
}

/// Interval between two consecutive accepted samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailSegment {
    pub started_at: f64,
    pub ended_at: f64,
    /// Duration in seconds (never below 1)
    pub duration: f64,
    /// Great-circle distance in meters
    pub distance: f64,
    /// Filtered, signed elevation change in meters
    pub elevation_delta: f64,
    /// `elevation_delta / distance * 100`, 0 when distance is 0
    pub slope_percent: f64,
    /// Average speed in m/s
    pub average_speed: f64,
    /// Heart rate in bpm at segment creation, if a fresh reading existed
    pub heart_rate: Option<f64>,
    /// Cadence in steps/second
    pub cadence: f64,
    pub terrain: TerrainClass,
}

impl TrailSegment {
    /// Relative effort of this segment, used for trail difficulty.
    pub fn effort_index(&self) -> f64 {
        let slope_load = self.slope_percent.max(0.0) * 0.9;
        let heart_rate_load = self.heart_rate.unwrap_or(0.0) * 0.2;
        slope_load + heart_rate_load + self.cadence * 0.05
    }
}

/// Cumulative physiological load and energy state.
///
/// `score` stays in [0, 100] and `energy_remaining` in [0, 1];
/// `accumulated_load` and `calories_burned` never decrease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatigueState {
    pub score: f64,
    /// TRIMP-like cumulative training impulse
    #[serde(default)]
    pub accumulated_load: f64,
    pub energy_remaining: f64,
    pub needs_break: bool,
    pub reason: String,
    /// Elapsed seconds at the last evaluation
    #[serde(default)]
    pub last_elapsed_seconds: f64,
    #[serde(default)]
    pub calories_burned: f64,
    /// Only increased by explicit fuel-intake events
    #[serde(default)]
    pub calories_consumed: f64,
}

impl FatigueState {
    pub fn initial() -> Self {
        Self {
            score: 0.0,
            accumulated_load: 0.0,
            energy_remaining: 1.0,
            needs_break: false,
            reason: "Fresh start".to_string(),
            last_elapsed_seconds: 0.0,
            calories_burned: 0.0,
            calories_consumed: 0.0,
        }
    }
}

impl Default for FatigueState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Safety flags and the recommendation chosen by priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyState {
    pub check_in_due: bool,
    pub low_battery: bool,
    pub over_fatigued: bool,
    pub return_home_energy_risk: bool,
    pub recommendation: String,
}

impl SafetyState {
    pub fn calm() -> Self {
        Self {
            check_in_due: false,
            low_battery: false,
            over_fatigued: false,
            return_home_energy_risk: false,
            recommendation: "All good".to_string(),
        }
    }
}

impl Default for SafetyState {
    fn default() -> Self {
        Self::calm()
    }
}

/// Self-reported fitness tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[serde(rename_all = "lowercase")]
pub enum FitnessCondition {
    Beginner,
    #[default]
    Moderate,
    Advanced,
}

impl FitnessCondition {
    pub fn fatigue_multiplier(&self) -> f64 {
        match self {
            FitnessCondition::Beginner => 1.16,
            FitnessCondition::Moderate => 1.0,
            FitnessCondition::Advanced => 0.9,
        }
    }

    /// Scale applied to the body-weight energy reserve.
    pub fn reserve_factor(&self) -> f64 {
        match self {
            FitnessCondition::Beginner => 0.9,
            FitnessCondition::Moderate => 1.0,
            FitnessCondition::Advanced => 1.1,
        }
    }
}

/// Hiker profile used by the heart-rate load and caloric models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct UserProfile {
    pub age: u32,
    pub weight_kg: f64,
    pub height_cm: f64,
    pub condition: FitnessCondition,
    pub resting_heart_rate: f64,
    pub max_heart_rate: f64,
}

impl UserProfile {
    /// Create a profile with resting HR of 60 bpm and an age-predicted max HR.
    pub fn new(age: u32, weight_kg: f64, height_cm: f64, condition: FitnessCondition) -> Self {
        Self {
            age,
            weight_kg,
            height_cm,
            condition,
            resting_heart_rate: 60.0,
            // Tanaka: 208 - 0.7 * age
            max_heart_rate: 208.0 - 0.7 * age as f64,
        }
    }

    /// Override resting and maximum heart rate.
    pub fn with_heart_rates(mut self, resting: f64, max: f64) -> Self {
        self.resting_heart_rate = resting;
        self.max_heart_rate = max;
        self
    }

    /// Condition multiplier adjusted for age and weight, clamped to [0.75, 1.35].
    pub fn fatigue_multiplier(&self) -> f64 {
        let mut multiplier = self.condition.fatigue_multiplier();
        if self.age >= 55 {
            multiplier += 0.08;
        }
        if self.weight_kg >= 95.0 {
            multiplier += 0.05;
        }
        multiplier.clamp(0.75, 1.35)
    }
}

/// Top-level configuration for a tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Collection caps applied after every ingestion.
    /// Default: 4000 route points, 6000 segments
    pub caps: CollectionCaps,

    /// Collection caps applied on a memory-pressure signal.
    /// Default: 1500 route points, 2200 segments
    pub pressure_caps: CollectionCaps,

    /// Minimum seconds between two unforced checkpoint saves.
    /// Default: 4.0
    pub checkpoint_interval_secs: f64,

    /// Heart rate is considered absent after this many seconds without a reading.
    /// Default: 25.0
    pub heart_rate_stale_after_secs: f64,

    /// Battery fraction assumed until the battery source reports.
    /// Default: 1.0
    pub default_battery_level: f64,

    /// Fatigue/energy model constants.
    pub fatigue: FatigueModel,

    /// Safety rule thresholds.
    pub safety: SafetyThresholds,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            caps: CollectionCaps::normal(),
            pressure_caps: CollectionCaps::under_pressure(),
            checkpoint_interval_secs: 4.0,
            heart_rate_stale_after_secs: 25.0,
            default_battery_level: 1.0,
            fatigue: FatigueModel::default(),
            safety: SafetyThresholds::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse a configuration from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.bounded())
    }

    /// Raise caps that would disable bounding to their smallest working values.
    pub fn bounded(mut self) -> Self {
        self.caps = self.caps.bounded();
        self.pressure_caps = self.pressure_caps.bounded();
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
