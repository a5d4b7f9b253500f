//! # Hike Session
//!
//! [`HikeEngine`] owns one tracking session and is the single writer of all
//! session state. Every sample, sensor reading, tick and command goes through
//! `&mut self`, so route, segments, fatigue and safety are always updated in
//! one order.
//!
//! ## Phases
//!
//! ```text
//! Idle --start--> Tracking --pause--> Paused --resume--> Tracking
//!   ^                |                  |
//!   +------stop------+-------stop-------+
//! ```
//!
//! A checkpoint found at startup restores directly into `Tracking` or
//! `Paused`.
//!
//! ## Time
//!
//! All operations take `now` (seconds since the Unix epoch) from the caller.
//! Active time is always computed by [`HikeEngine::elapsed_at`], which
//! excludes every paused interval.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{
    load_or_none, CheckpointPolicy, CheckpointStore, CheckpointWriter, SessionCheckpoint,
    CHECKPOINT_VERSION,
};
use crate::collections::{downsample_route, merge_segments, CollectionCaps};
use crate::error::{Result, TrackerError};
use crate::fatigue::{energy_outlook, FatigueInputs};
use crate::report::{CompletedHike, SessionSink};
use crate::safety::evaluate_safety;
use crate::segments::{elevation_gain, total_distance, trail_difficulty_score};
use crate::{
    AltitudeFilter, FatigueState, LocationSample, SafetyState, SegmentBuilder, TerrainClass,
    TrackerConfig, TrailSegment, UserProfile,
};

const IDLE_PACING_ADVICE: &str = "Start moving to get pacing guidance.";
const NO_HEART_RATE_SOURCE: &str = "No heart-rate source";

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Tracking,
    Paused,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Tracking => "tracking",
            SessionPhase::Paused => "paused",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, SessionPhase::Idle)
    }
}

/// Read-only projection of the live session for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub phase: SessionPhase,
    pub elapsed_seconds: f64,
    pub distance_meters: f64,
    pub elevation_gain: f64,
    pub speed: f64,
    pub slope_percent: f64,
    pub heart_rate: Option<f64>,
    pub heart_rate_source: String,
    pub cadence: f64,
    pub battery_level: f64,
    pub current_altitude: f64,
    pub fatigue: FatigueState,
    pub safety: SafetyState,
    pub terrain: TerrainClass,
    pub pacing_advice: String,
    pub terrain_safety_hint: String,
    pub trail_difficulty_score: f64,
    pub energy_outlook: String,
    pub route_points: usize,
    pub segment_count: usize,
}

impl LiveSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct HeartRateReading {
    bpm: f64,
    source: String,
    received_at: f64,
}

/// Stateful engine for one hike at a time.
pub struct HikeEngine {
    config: TrackerConfig,
    profile: Option<UserProfile>,
    phase: SessionPhase,

    // Time accounting
    started_at: f64,
    last_check_in: f64,
    paused_accumulated_seconds: f64,
    paused_started_at: Option<f64>,

    // Collected data
    route: Vec<LocationSample>,
    segments: Vec<TrailSegment>,
    altitude: AltitudeFilter,
    builder: SegmentBuilder,

    // Latest readings
    current_altitude: f64,
    speed: f64,
    slope_percent: f64,
    cadence: f64,
    battery_level: f64,
    heart_rate: Option<HeartRateReading>,
    terrain: TerrainClass,
    pacing_advice: String,
    terrain_safety_hint: String,

    // Derived state
    fatigue: FatigueState,
    safety: SafetyState,

    // Collaborators
    policy: CheckpointPolicy,
    checkpoints: Option<CheckpointWriter>,
    sink: Option<Box<dyn SessionSink>>,
}

impl HikeEngine {
    /// Create an idle engine without checkpointing or a session sink.
    pub fn new(config: TrackerConfig) -> Self {
        let config = config.bounded();
        let policy = CheckpointPolicy::new(config.checkpoint_interval_secs);
        let battery_level = config.default_battery_level;
        Self {
            config,
            profile: None,
            phase: SessionPhase::Idle,
            started_at: 0.0,
            last_check_in: 0.0,
            paused_accumulated_seconds: 0.0,
            paused_started_at: None,
            route: Vec::new(),
            segments: Vec::new(),
            altitude: AltitudeFilter::new(),
            builder: SegmentBuilder::new(),
            current_altitude: 0.0,
            speed: 0.0,
            slope_percent: 0.0,
            cadence: 0.0,
            battery_level,
            heart_rate: None,
            terrain: TerrainClass::Flat,
            pacing_advice: IDLE_PACING_ADVICE.to_string(),
            terrain_safety_hint: String::new(),
            fatigue: FatigueState::initial(),
            safety: SafetyState::calm(),
            policy,
            checkpoints: None,
            sink: None,
        }
    }

    /// Persist checkpoints through `writer`.
    pub fn with_checkpoints(mut self, writer: CheckpointWriter) -> Self {
        self.checkpoints = Some(writer);
        self
    }

    /// Persist checkpoints to `store` on a background writer.
    pub fn with_store(self, store: Arc<dyn CheckpointStore>) -> Self {
        self.with_checkpoints(CheckpointWriter::spawn(store))
    }

    /// Hand completed hikes to `sink` on stop.
    pub fn with_session_sink(mut self, sink: Box<dyn SessionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_session_sink(&mut self, sink: Option<Box<dyn SessionSink>>) {
        self.sink = sink;
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn set_profile(&mut self, profile: Option<UserProfile>) {
        self.profile = profile;
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn route(&self) -> &[LocationSample] {
        &self.route
    }

    pub fn segments(&self) -> &[TrailSegment] {
        &self.segments
    }

    pub fn fatigue(&self) -> &FatigueState {
        &self.fatigue
    }

    pub fn safety(&self) -> &SafetyState {
        &self.safety
    }

    pub fn started_at(&self) -> Option<f64> {
        self.phase.is_active().then_some(self.started_at)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start a new session at `now`, discarding any stored checkpoint.
    pub fn start(&mut self, now: f64) -> Result<()> {
        self.require(&[SessionPhase::Idle], "start")?;

        if let Some(writer) = &self.checkpoints {
            writer.clear();
        }
        self.reset_session();
        self.started_at = now;
        self.last_check_in = now;
        self.phase = SessionPhase::Tracking;

        info!("[HikeEngine] Session started at {:.0}", now);
        self.save_checkpoint(now, true);
        Ok(())
    }

    /// Pause at `now`; active time stops advancing.
    pub fn pause(&mut self, now: f64) -> Result<()> {
        self.require(&[SessionPhase::Tracking], "pause")?;

        self.speed = 0.0;
        self.slope_percent = 0.0;
        self.paused_started_at = Some(now);
        self.phase = SessionPhase::Paused;

        info!(
            "[HikeEngine] Paused after {:.0}s active",
            self.elapsed_at(now)
        );
        self.save_checkpoint(now, true);
        Ok(())
    }

    /// Resume at `now`. The next sample starts a fresh segment.
    pub fn resume(&mut self, now: f64) -> Result<()> {
        self.require(&[SessionPhase::Paused], "resume")?;

        self.fold_pause(now);
        self.builder.reset();
        self.phase = SessionPhase::Tracking;

        info!(
            "[HikeEngine] Resumed, {:.0}s paused in total",
            self.paused_accumulated_seconds
        );
        self.save_checkpoint(now, true);
        Ok(())
    }

    /// Stop at `now`, emit the completed hike and clear the checkpoint.
    pub fn stop(&mut self, now: f64) -> Result<CompletedHike> {
        self.require(&[SessionPhase::Tracking, SessionPhase::Paused], "stop")?;

        if self.phase == SessionPhase::Paused {
            self.fold_pause(now);
        }
        let elapsed = self.elapsed_at(now);
        self.refresh_safety(now);

        let hike = CompletedHike {
            id: format!("hike-{}", (self.started_at * 1000.0).round() as i64),
            name: CompletedHike::default_name(self.started_at),
            started_at: self.started_at,
            ended_at: now,
            elapsed_seconds: elapsed,
            route: std::mem::take(&mut self.route),
            segments: std::mem::take(&mut self.segments),
            final_fatigue: self.fatigue.clone(),
            final_safety: self.safety.clone(),
        };

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.persist(&hike) {
                warn!("[HikeEngine] Session sink rejected hike {}: {}", hike.id, e);
            }
        }
        if let Some(writer) = &self.checkpoints {
            writer.clear();
        }

        self.reset_session();
        info!(
            "[HikeEngine] Session stopped: {:.0}s active, {:.0} m, {} segments",
            elapsed,
            hike.total_distance(),
            hike.segments.len()
        );
        Ok(hike)
    }

    /// Active seconds at `now`, excluding pauses. Never negative; 0 when idle.
    pub fn elapsed_at(&self, now: f64) -> f64 {
        if !self.phase.is_active() {
            return 0.0;
        }
        let current_pause = match (self.phase, self.paused_started_at) {
            (SessionPhase::Paused, Some(since)) => (now - since).max(0.0),
            _ => 0.0,
        };
        let elapsed = now - self.started_at - self.paused_accumulated_seconds - current_pause;
        if elapsed.is_finite() {
            elapsed.max(0.0)
        } else {
            0.0
        }
    }

    fn fold_pause(&mut self, now: f64) {
        if let Some(since) = self.paused_started_at.take() {
            self.paused_accumulated_seconds += (now - since).max(0.0);
        }
    }

    fn require(&self, allowed: &[SessionPhase], action: &'static str) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(TrackerError::InvalidTransition {
                from: self.phase.as_str(),
                action,
            })
        }
    }

    fn reset_session(&mut self) {
        self.phase = SessionPhase::Idle;
        self.started_at = 0.0;
        self.last_check_in = 0.0;
        self.paused_accumulated_seconds = 0.0;
        self.paused_started_at = None;
        self.route.clear();
        self.segments.clear();
        self.altitude.reset();
        self.builder.reset();
        self.current_altitude = 0.0;
        self.speed = 0.0;
        self.slope_percent = 0.0;
        self.terrain = TerrainClass::Flat;
        self.pacing_advice = IDLE_PACING_ADVICE.to_string();
        self.terrain_safety_hint.clear();
        self.fatigue = FatigueState::initial();
        self.safety = SafetyState::calm();
        self.policy.reset();
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Process one location sample.
    ///
    /// Ignored while idle. While paused only the altitude filter advances.
    pub fn ingest(&mut self, sample: LocationSample, now: f64) {
        if !sample.is_valid() {
            debug!("[HikeEngine] Dropping invalid sample at {}", sample.timestamp);
            return;
        }
        let sample = sample.sanitized();

        match self.phase {
            SessionPhase::Idle => return,
            SessionPhase::Paused => {
                self.current_altitude = self
                    .altitude
                    .update(sample.altitude, sample.vertical_accuracy);
                return;
            }
            SessionPhase::Tracking => {}
        }

        let filtered = self
            .altitude
            .update(sample.altitude, sample.vertical_accuracy);
        self.current_altitude = filtered;
        self.route.push(sample);

        let heart_rate = self.fresh_heart_rate(now);
        if let Some(built) = self
            .builder
            .push(sample, filtered, heart_rate, self.cadence)
        {
            let segment = built.segment;
            debug!(
                "[HikeEngine] Segment {:.1} m in {:.0}s, slope {:.1}% ({})",
                segment.distance,
                segment.duration,
                segment.slope_percent,
                segment.terrain.as_str()
            );

            self.speed = segment.average_speed;
            self.slope_percent = segment.slope_percent;
            self.terrain = built.insight.terrain;
            self.pacing_advice = built.insight.pacing_advice.to_string();
            self.terrain_safety_hint = built.insight.safety_hint.to_string();
            self.segments.push(segment);

            self.refresh_fatigue(now);
            self.refresh_safety(now);
        }

        self.enforce_caps(self.config.caps);
        self.save_checkpoint(now, false);
    }

    /// Periodic refresh (about once per second).
    ///
    /// Expires stale heart rate, re-evaluates safety against the current
    /// elapsed time and saves on the checkpoint cadence. Does nothing while
    /// idle, so a tick that arrives after stop is harmless.
    pub fn tick(&mut self, now: f64) {
        if !self.phase.is_active() {
            return;
        }

        if let Some(reading) = &self.heart_rate {
            if now - reading.received_at > self.config.heart_rate_stale_after_secs {
                debug!(
                    "[HikeEngine] Heart rate from {} is stale, dropping",
                    reading.source
                );
                self.heart_rate = None;
            }
        }

        self.refresh_safety(now);
        self.save_checkpoint(now, false);
    }

    // ========================================================================
    // Sensor Feeds and Events
    // ========================================================================

    /// Record a heart-rate reading from `source`.
    pub fn set_heart_rate(&mut self, bpm: f64, source: &str, now: f64) {
        if !bpm.is_finite() || bpm <= 0.0 {
            debug!("[HikeEngine] Ignoring heart rate {}", bpm);
            return;
        }
        self.heart_rate = Some(HeartRateReading {
            bpm,
            source: source.to_string(),
            received_at: now,
        });
    }

    /// Record cadence in steps/second.
    pub fn set_cadence(&mut self, cadence: f64) {
        self.cadence = if cadence.is_finite() {
            cadence.max(0.0)
        } else {
            0.0
        };
    }

    /// Record battery fraction and re-evaluate safety.
    pub fn set_battery(&mut self, level: f64, now: f64) {
        self.battery_level = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            self.config.default_battery_level
        };
        if self.phase.is_active() {
            self.refresh_safety(now);
        }
    }

    /// Log food intake in kcal. Non-positive amounts are ignored.
    pub fn add_fuel(&mut self, kcal: f64, now: f64) {
        if !self.phase.is_active() || !kcal.is_finite() || kcal <= 0.0 {
            debug!("[HikeEngine] Ignoring fuel intake of {} kcal", kcal);
            return;
        }

        self.fatigue.calories_consumed += kcal;
        self.refresh_fatigue(now);
        self.refresh_safety(now);

        info!(
            "[HikeEngine] Fuel +{:.0} kcal, energy {:.0}%",
            kcal,
            self.fatigue.energy_remaining * 100.0
        );
        self.save_checkpoint(now, true);
    }

    /// Record a safety check-in.
    pub fn check_in(&mut self, now: f64) {
        if !self.phase.is_active() {
            return;
        }
        self.last_check_in = now;
        self.refresh_safety(now);
        self.save_checkpoint(now, true);
    }

    /// Shrink collections to the pressure caps and save.
    pub fn handle_memory_pressure(&mut self, now: f64) {
        self.enforce_caps(self.config.pressure_caps);
        if self.phase.is_active() {
            self.save_checkpoint(now, true);
        }
    }

    /// Force a save and wait for it to reach storage.
    ///
    /// Call when the app is backgrounded or about to terminate.
    pub fn flush(&mut self, now: f64) {
        if self.phase.is_active() {
            self.save_checkpoint(now, true);
        }
        if let Some(writer) = &self.checkpoints {
            writer.flush();
        }
    }

    // ========================================================================
    // Derived State
    // ========================================================================

    fn fresh_heart_rate(&self, now: f64) -> Option<f64> {
        self.heart_rate
            .as_ref()
            .filter(|r| now - r.received_at <= self.config.heart_rate_stale_after_secs)
            .map(|r| r.bpm)
    }

    fn refresh_fatigue(&mut self, now: f64) {
        let inputs = FatigueInputs {
            elapsed_seconds: self.elapsed_at(now),
            speed: self.speed,
            slope_percent: self.slope_percent,
            heart_rate: self.fresh_heart_rate(now),
            cadence: self.cadence,
        };
        self.fatigue = self
            .config
            .fatigue
            .evaluate(&self.fatigue, &inputs, self.profile.as_ref());
    }

    fn refresh_safety(&mut self, now: f64) {
        self.safety = evaluate_safety(
            &self.fatigue,
            self.battery_level,
            (now - self.last_check_in).max(0.0),
            self.elapsed_at(now),
            &self.config.safety,
        );
    }

    fn enforce_caps(&mut self, caps: CollectionCaps) {
        if self.route.len() > caps.route {
            let before = self.route.len();
            self.route = downsample_route(&self.route, caps.route);
            debug!(
                "[Collections] Downsampled route {} -> {}",
                before,
                self.route.len()
            );
        }
        if self.segments.len() > caps.segments {
            let before = self.segments.len();
            self.segments = merge_segments(&self.segments, caps.segments);
            debug!(
                "[Collections] Merged segments {} -> {}",
                before,
                self.segments.len()
            );
        }
    }

    /// Live view of the session at `now`.
    pub fn snapshot(&self, now: f64) -> LiveSnapshot {
        let heart_rate = self.fresh_heart_rate(now);
        let heart_rate_source = match (&self.heart_rate, heart_rate) {
            (Some(reading), Some(_)) => reading.source.clone(),
            _ => NO_HEART_RATE_SOURCE.to_string(),
        };

        LiveSnapshot {
            phase: self.phase,
            elapsed_seconds: self.elapsed_at(now),
            distance_meters: total_distance(&self.segments),
            elevation_gain: elevation_gain(&self.segments),
            speed: self.speed,
            slope_percent: self.slope_percent,
            heart_rate,
            heart_rate_source,
            cadence: self.cadence,
            battery_level: self.battery_level,
            current_altitude: self.current_altitude,
            fatigue: self.fatigue.clone(),
            safety: self.safety.clone(),
            terrain: self.terrain,
            pacing_advice: self.pacing_advice.clone(),
            terrain_safety_hint: self.terrain_safety_hint.clone(),
            trail_difficulty_score: trail_difficulty_score(&self.segments),
            energy_outlook: energy_outlook(&self.fatigue, self.phase.is_active()).to_string(),
            route_points: self.route.len(),
            segment_count: self.segments.len(),
        }
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Capture the session, `None` while idle.
    pub fn to_checkpoint(&self) -> Option<SessionCheckpoint> {
        if !self.phase.is_active() {
            return None;
        }
        Some(SessionCheckpoint {
            version: CHECKPOINT_VERSION,
            started_at: self.started_at,
            last_check_in: self.last_check_in,
            route: self.route.clone(),
            segments: self.segments.clone(),
            fatigue: self.fatigue.clone(),
            safety: self.safety.clone(),
            cadence: self.cadence,
            speed: self.speed,
            slope_percent: self.slope_percent,
            battery_level: self.battery_level,
            terrain: self.terrain,
            pacing_advice: self.pacing_advice.clone(),
            terrain_safety_hint: self.terrain_safety_hint.clone(),
            current_altitude: self.current_altitude,
            is_paused: self.phase == SessionPhase::Paused,
            paused_accumulated_seconds: self.paused_accumulated_seconds,
            paused_started_at: self.paused_started_at,
            last_filtered_altitude: self.altitude.last(),
        })
    }

    fn save_checkpoint(&mut self, now: f64, force: bool) {
        if self.checkpoints.is_none() || !self.policy.try_begin(now, force) {
            return;
        }
        if let (Some(writer), Some(checkpoint)) = (&self.checkpoints, self.to_checkpoint()) {
            writer.submit(checkpoint);
        }
    }

    /// Resume a session from `checkpoint`. Only valid while idle.
    pub fn restore(&mut self, checkpoint: SessionCheckpoint, now: f64) -> Result<()> {
        self.require(&[SessionPhase::Idle], "restore")?;
        checkpoint.validate()?;

        self.reset_session();
        self.started_at = checkpoint.started_at;
        self.last_check_in = checkpoint.last_check_in;
        self.route = checkpoint.route;
        self.segments = checkpoint.segments;
        self.fatigue = checkpoint.fatigue;
        self.safety = checkpoint.safety;
        self.cadence = checkpoint.cadence;
        self.speed = checkpoint.speed;
        self.slope_percent = checkpoint.slope_percent;
        self.battery_level = checkpoint.battery_level;
        self.terrain = checkpoint.terrain;
        self.pacing_advice = checkpoint.pacing_advice;
        self.terrain_safety_hint = checkpoint.terrain_safety_hint;
        self.current_altitude = checkpoint.current_altitude;
        self.paused_accumulated_seconds = checkpoint.paused_accumulated_seconds;
        self.altitude = AltitudeFilter::seeded(checkpoint.last_filtered_altitude);
        self.heart_rate = None;

        if checkpoint.is_paused {
            self.paused_started_at = checkpoint.paused_started_at;
            self.phase = SessionPhase::Paused;
        } else {
            self.phase = SessionPhase::Tracking;
        }

        info!(
            "[HikeEngine] Restored {} session: {} points, {} segments, {:.0}s active",
            self.phase.as_str(),
            self.route.len(),
            self.segments.len(),
            self.elapsed_at(now)
        );
        Ok(())
    }

    /// Restore from the attached store if it holds a valid checkpoint.
    ///
    /// Returns whether a session was recovered. Unreadable or invalid
    /// checkpoints are discarded.
    pub fn recover(&mut self, now: f64) -> Result<bool> {
        self.require(&[SessionPhase::Idle], "recover")?;
        let Some(writer) = &self.checkpoints else {
            return Ok(false);
        };

        match load_or_none(writer.store().as_ref()) {
            Some(checkpoint) => {
                self.restore(checkpoint, now)?;
                Ok(true)
            }
            None => {
                debug!("[HikeEngine] No checkpoint to recover");
                Ok(false)
            }
        }
    }
}

impl std::fmt::Debug for HikeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HikeEngine")
            .field("phase", &self.phase)
            .field("started_at", &self.started_at)
            .field("route", &self.route.len())
            .field("segments", &self.segments.len())
            .field("fatigue", &self.fatigue.score)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
