//! Completed hikes and post-hike analysis.
//!
//! When a session stops, the engine packs its route, segments and final
//! fatigue/safety into a [`CompletedHike`] and hands it to a [`SessionSink`].
//! Durable storage of completed hikes lives outside this crate; the report
//! built here is a pure function of the hike and the hiker's history.

use std::sync::mpsc;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::segments::{elevation_gain, total_distance, trail_difficulty_score};
use crate::{FatigueState, LocationSample, SafetyState, TerrainClass, TrailSegment};

/// A finished tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedHike {
    pub id: String,
    pub name: String,
    pub started_at: f64,
    pub ended_at: f64,
    /// Active time, excluding pauses
    pub elapsed_seconds: f64,
    pub route: Vec<LocationSample>,
    pub segments: Vec<TrailSegment>,
    pub final_fatigue: FatigueState,
    pub final_safety: SafetyState,
}

impl CompletedHike {
    /// Default display name, e.g. "Hike Jun 14, 2026 08:30" (UTC).
    pub fn default_name(started_at: f64) -> String {
        match DateTime::from_timestamp(started_at.floor() as i64, 0) {
            Some(date) => format!("Hike {}", date.format("%b %-d, %Y %H:%M")),
            None => "Hike".to_string(),
        }
    }

    /// Replace the name; blank names keep the default.
    pub fn with_name(mut self, name: &str) -> Self {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            self.name = trimmed.to_string();
        }
        self
    }

    pub fn total_distance(&self) -> f64 {
        total_distance(&self.segments)
    }

    pub fn elevation_gain(&self) -> f64 {
        elevation_gain(&self.segments)
    }

    /// Wall-clock duration including pauses.
    pub fn wall_duration(&self) -> f64 {
        (self.ended_at - self.started_at).max(0.0)
    }

    pub fn trail_difficulty_score(&self) -> f64 {
        trail_difficulty_score(&self.segments)
    }

    /// Build the post-hike report against earlier hikes.
    pub fn report(&self, history: &[CompletedHike]) -> PostHikeReport {
        let climb_speeds: Vec<f64> = self
            .segments
            .iter()
            .filter(|s| s.terrain == TerrainClass::Climb)
            .map(|s| s.average_speed)
            .collect();
        let climb_efficiency = (mean(&climb_speeds) * 48.0).clamp(0.0, 100.0);

        let mut terrains: Vec<TerrainClass> = Vec::with_capacity(4);
        for segment in &self.segments {
            if !terrains.contains(&segment.terrain) {
                terrains.push(segment.terrain);
            }
        }
        let terrain_adaptation = (terrains.len() as f64 * 25.0).min(100.0);

        let mut insights = Vec::with_capacity(2);
        let peak = self
            .segments
            .iter()
            .max_by(|a, b| a.effort_index().total_cmp(&b.effort_index()));
        if let Some(peak) = peak {
            let offset_minutes = ((peak.started_at - self.started_at) / 60.0).max(0.0);
            insights.push(PerformanceInsight {
                title: "Peak Load Segment".to_string(),
                detail: format!(
                    "Highest effort was around {} min. Consider a short pause before similar climbs.",
                    offset_minutes.round() as i64
                ),
            });
        }

        let pacing = if self.final_fatigue.score > 70.0 {
            "You pushed hard relative to terrain. Slower first climb should reduce late fatigue drop."
        } else {
            "Your pacing matched terrain load well for most segments."
        };
        insights.push(PerformanceInsight {
            title: "Pacing".to_string(),
            detail: pacing.to_string(),
        });

        let muscle_load =
            (self.trail_difficulty_score() + self.final_fatigue.score * 0.4).min(100.0);

        PostHikeReport {
            insights,
            recovery: RecoveryReport::for_muscle_load(muscle_load),
            fatigue_tolerance_trend: fatigue_trend(self.final_fatigue.score, history).to_string(),
            climb_efficiency,
            terrain_adaptation,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn fatigue_trend(current: f64, history: &[CompletedHike]) -> &'static str {
    if history.is_empty() {
        return "Baseline established";
    }
    let scores: Vec<f64> = history.iter().map(|h| h.final_fatigue.score).collect();
    let average = mean(&scores);
    if current < average {
        "Improving fatigue tolerance"
    } else if current > average + 8.0 {
        "Higher fatigue than usual"
    } else {
        "Stable fatigue tolerance"
    }
}

/// One titled observation about the hike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceInsight {
    pub title: String,
    pub detail: String,
}

/// Recovery estimate derived from muscle load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// 0..=100
    pub muscle_load: f64,
    pub recovery_hours: f64,
    /// 0..=100
    pub readiness_score: f64,
    pub recommendations: Vec<String>,
}

impl RecoveryReport {
    pub fn for_muscle_load(muscle_load: f64) -> Self {
        let recommendations: &[&str] = if muscle_load > 70.0 {
            &["Light walk", "Hydration", "Longer sleep", "Gentle stretching"]
        } else if muscle_load > 45.0 {
            &["Mobility", "Easy walk", "Protein-rich meal"]
        } else {
            &["Optional easy walk", "Normal routine"]
        };

        Self {
            muscle_load,
            recovery_hours: (muscle_load * 0.45).max(8.0),
            readiness_score: (100.0 - muscle_load * 0.7).max(0.0),
            recommendations: recommendations.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Summary shown after a hike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostHikeReport {
    pub insights: Vec<PerformanceInsight>,
    pub recovery: RecoveryReport,
    pub fatigue_tolerance_trend: String,
    /// Mean climb speed scaled to 0..=100
    pub climb_efficiency: f64,
    /// 25 points per distinct terrain class
    pub terrain_adaptation: f64,
}

/// Receives completed hikes for durable storage.
///
/// Called on the engine's thread during `stop`; implementations should hand
/// the hike off rather than block on I/O.
pub trait SessionSink: Send {
    fn persist(&self, hike: &CompletedHike) -> Result<()>;
}

impl SessionSink for mpsc::Sender<CompletedHike> {
    fn persist(&self, hike: &CompletedHike) -> Result<()> {
        self.send(hike.clone()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "session receiver dropped").into()
        })
    }
}
