//! Trail segment construction.
//!
//! Each accepted sample closes a segment against the previous one (the
//! anchor). Vertical change comes from the filtered altitude, is capped to a
//! plausible climb rate to reject altimeter spikes, and is then gated to zero
//! below a noise floor. Terrain class and pacing advice are derived once, when
//! the segment is created.

use crate::geo_utils::sample_distance;
use crate::{LocationSample, TerrainClass, TrailSegment};

/// Fastest plausible vertical rate in m/s; larger deltas are capped.
pub const MAX_VERTICAL_RATE: f64 = 4.5;

/// Vertical deltas below this magnitude (meters) are treated as zero.
pub const VERTICAL_NOISE_GATE: f64 = 1.4;

/// Shortest segment duration in seconds.
pub const MIN_SEGMENT_DURATION: f64 = 1.0;

/// Terrain class plus the pacing advice and safety hint shown for it.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainInsight {
    pub terrain: TerrainClass,
    pub pacing_advice: &'static str,
    pub safety_hint: &'static str,
}

impl TerrainInsight {
    /// Classify terrain from speed (m/s), slope (%) and cadence (steps/s).
    ///
    /// Rules are checked in order and the first match wins:
    /// climb (slope > 10), downhill (slope < -6), technical (cadence < 1.25), flat.
    pub fn assess(speed: f64, slope_percent: f64, cadence: f64) -> Self {
        if slope_percent > 10.0 {
            return Self {
                terrain: TerrainClass::Climb,
                pacing_advice: if speed > 1.2 {
                    "Slow down slightly to protect energy."
                } else {
                    "Good uphill pacing."
                },
                safety_hint: "Keep short steps and stable rhythm on steep grade.",
            };
        }

        if slope_percent < -6.0 {
            return Self {
                terrain: TerrainClass::Downhill,
                pacing_advice: "Control stride and avoid sudden acceleration.",
                safety_hint: "Downhill load stresses knees. Keep cadence balanced.",
            };
        }

        if cadence < 1.25 {
            return Self {
                terrain: TerrainClass::Technical,
                pacing_advice: "Use shorter, frequent steps through technical patches.",
                safety_hint: "Watch footing and maintain center of gravity.",
            };
        }

        Self {
            terrain: TerrainClass::Flat,
            pacing_advice: "Maintain current rhythm.",
            safety_hint: "Hydrate early before next climb.",
        }
    }
}

/// Terrain class only (see [`TerrainInsight::assess`]).
pub fn classify_terrain(speed: f64, slope_percent: f64, cadence: f64) -> TerrainClass {
    TerrainInsight::assess(speed, slope_percent, cadence).terrain
}

/// Cap a vertical delta to what `duration` seconds allow, then gate noise.
///
/// The order matters: a spike is first reduced to the plausible maximum and
/// only the capped value is compared against the noise floor.
pub fn limit_vertical_delta(raw_delta: f64, duration: f64) -> f64 {
    if !raw_delta.is_finite() {
        return 0.0;
    }
    let cap = MAX_VERTICAL_RATE * duration.max(MIN_SEGMENT_DURATION);
    let capped = raw_delta.clamp(-cap, cap);
    if capped.abs() < VERTICAL_NOISE_GATE {
        0.0
    } else {
        capped
    }
}

/// Slope in percent; 0 when no horizontal distance was covered.
pub fn slope_percent(vertical_delta: f64, distance: f64) -> f64 {
    if distance > 0.0 {
        vertical_delta / distance * 100.0
    } else {
        0.0
    }
}

/// A newly closed segment together with its terrain insight.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltSegment {
    pub segment: TrailSegment,
    pub insight: TerrainInsight,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    sample: LocationSample,
    filtered_altitude: f64,
}

/// Streaming builder that turns consecutive samples into segments.
#[derive(Debug, Clone, Default)]
pub struct SegmentBuilder {
    anchor: Option<Anchor>,
}

impl SegmentBuilder {
    pub fn new() -> Self {
        Self { anchor: None }
    }

    /// Forget the anchor so the next sample starts a fresh segment.
    pub fn reset(&mut self) {
        self.anchor = None;
    }

    pub fn has_anchor(&self) -> bool {
        self.anchor.is_some()
    }

    /// Feed an accepted sample with its filtered altitude.
    ///
    /// The first sample after construction or [`reset`](Self::reset) only
    /// becomes the anchor. Every later sample closes a segment and becomes
    /// the new anchor.
    pub fn push(
        &mut self,
        sample: LocationSample,
        filtered_altitude: f64,
        heart_rate: Option<f64>,
        cadence: f64,
    ) -> Option<BuiltSegment> {
        let next = Anchor {
            sample,
            filtered_altitude,
        };
        let previous = self.anchor.replace(next)?;

        let distance = sample_distance(&previous.sample, &sample);
        let duration = (sample.timestamp - previous.sample.timestamp).max(MIN_SEGMENT_DURATION);
        let vertical_delta =
            limit_vertical_delta(filtered_altitude - previous.filtered_altitude, duration);
        let slope = slope_percent(vertical_delta, distance);
        let average_speed = distance / duration;
        let cadence = if cadence.is_finite() { cadence.max(0.0) } else { 0.0 };

        let insight = TerrainInsight::assess(average_speed, slope, cadence);

        Some(BuiltSegment {
            segment: TrailSegment {
                started_at: previous.sample.timestamp,
                ended_at: sample.timestamp,
                duration,
                distance,
                elevation_delta: vertical_delta,
                slope_percent: slope,
                average_speed,
                heart_rate,
                cadence,
                terrain: insight.terrain,
            },
            insight,
        })
    }
}

/// Sum of segment distances in meters.
pub fn total_distance(segments: &[TrailSegment]) -> f64 {
    segments.iter().map(|s| s.distance).sum()
}

/// Sum of positive elevation deltas in meters.
pub fn elevation_gain(segments: &[TrailSegment]) -> f64 {
    segments.iter().map(|s| s.elevation_delta.max(0.0)).sum()
}

/// Mean effort index halved and capped at 100; 0 without segments.
pub fn trail_difficulty_score(segments: &[TrailSegment]) -> f64 {
    if segments.is_empty() {
        return 0.0;
    }
    let avg = segments.iter().map(TrailSegment::effort_index).sum::<f64>() / segments.len() as f64;
    (avg / 2.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: f64, lat: f64, alt: f64) -> LocationSample {
        LocationSample::new(t, lat, 8.0, alt)
    }

    #[test]
    fn test_first_sample_is_anchor_only() {
        let mut builder = SegmentBuilder::new();
        assert!(builder.push(sample(0.0, 46.5, 1000.0), 1000.0, None, 1.6).is_none());
        assert!(builder.has_anchor());
    }

    #[test]
    fn test_climb_segment() {
        let mut builder = SegmentBuilder::new();
        builder.push(sample(0.0, 46.5, 1000.0), 1000.0, None, 1.6);
        // ~22 m north in 20 s, 4 m up
        let built = builder
            .push(sample(20.0, 46.5002, 1004.0), 1004.0, Some(130.0), 1.6)
            .unwrap();

        let seg = built.segment;
        assert_eq!(seg.duration, 20.0);
        assert!((seg.distance - 22.24).abs() < 0.2);
        assert_eq!(seg.elevation_delta, 4.0);
        assert!(seg.slope_percent > 10.0);
        assert_eq!(seg.terrain, TerrainClass::Climb);
        assert_eq!(built.insight.pacing_advice, "Good uphill pacing.");
        assert_eq!(seg.heart_rate, Some(130.0));
    }

    #[test]
    fn test_duration_clamped_to_one_second() {
        let mut builder = SegmentBuilder::new();
        builder.push(sample(10.0, 46.5, 1000.0), 1000.0, None, 1.6);
        let seg = builder
            .push(sample(10.0, 46.50001, 1000.0), 1000.0, None, 1.6)
            .unwrap()
            .segment;
        assert_eq!(seg.duration, 1.0);
    }

    #[test]
    fn test_spike_capped_then_gated() {
        // 50 m jump in 2 s is capped to 9 m
        assert_eq!(limit_vertical_delta(50.0, 2.0), 9.0);
        assert_eq!(limit_vertical_delta(-50.0, 2.0), -9.0);
        // Below the noise floor
        assert_eq!(limit_vertical_delta(1.2, 10.0), 0.0);
        assert_eq!(limit_vertical_delta(-1.39, 10.0), 0.0);
        assert_eq!(limit_vertical_delta(1.5, 10.0), 1.5);
    }

    #[test]
    fn test_zero_distance_slope() {
        assert_eq!(slope_percent(5.0, 0.0), 0.0);
        assert_eq!(slope_percent(5.0, 50.0), 10.0);
    }

    #[test]
    fn test_terrain_rule_order() {
        // Steep climb wins even with low cadence
        assert_eq!(classify_terrain(1.0, 12.0, 0.5), TerrainClass::Climb);
        assert_eq!(classify_terrain(1.0, -8.0, 0.5), TerrainClass::Downhill);
        assert_eq!(classify_terrain(1.0, 2.0, 1.0), TerrainClass::Technical);
        assert_eq!(classify_terrain(1.0, 2.0, 1.6), TerrainClass::Flat);
        assert_eq!(
            TerrainInsight::assess(1.5, 12.0, 1.6).pacing_advice,
            "Slow down slightly to protect energy."
        );
    }

    #[test]
    fn test_reset_starts_fresh_segment() {
        let mut builder = SegmentBuilder::new();
        builder.push(sample(0.0, 46.5, 1000.0), 1000.0, None, 1.6);
        builder.reset();
        assert!(builder.push(sample(600.0, 46.51, 1000.0), 1000.0, None, 1.6).is_none());
    }

    #[test]
    fn test_difficulty_score() {
        assert_eq!(trail_difficulty_score(&[]), 0.0);
        let mut builder = SegmentBuilder::new();
        builder.push(sample(0.0, 46.5, 1000.0), 1000.0, None, 2.0);
        let seg = builder
            .push(sample(10.0, 46.5001, 1000.0), 1000.0, Some(100.0), 2.0)
            .unwrap()
            .segment;
        // (0 + 20 + 0.1) / 2
        assert!((trail_difficulty_score(&[seg]) - 10.05).abs() < 1e-9);
    }
}
