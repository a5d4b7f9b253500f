//! Bounded route and segment collections.
//!
//! A long hike produces an unbounded stream of samples. Two degrade-under-growth
//! policies keep memory flat:
//! - the route is resampled with a uniform index stride, keeping both endpoints
//! - segments are merged in contiguous buckets with weighted aggregation
//!
//! Both are idempotent for a given cap.

use serde::{Deserialize, Serialize};

use crate::{LocationSample, TerrainClass, TrailSegment};

pub const MIN_ROUTE_CAP: usize = 2;
pub const MIN_SEGMENT_CAP: usize = 1;

/// Maximum route points and segments kept in memory.
///
/// Fields missing from a deserialized value take the normal caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionCaps {
    pub route: usize,
    pub segments: usize,
}

impl CollectionCaps {
    /// Caps under normal operation.
    pub fn normal() -> Self {
        Self {
            route: 4000,
            segments: 6000,
        }
    }

    /// Caps after a memory-pressure signal.
    pub fn under_pressure() -> Self {
        Self {
            route: 1500,
            segments: 2200,
        }
    }

    /// Smallest caps that still bound: 2 route points (both endpoints) and 1 segment.
    pub fn bounded(self) -> Self {
        Self {
            route: self.route.max(MIN_ROUTE_CAP),
            segments: self.segments.max(MIN_SEGMENT_CAP),
        }
    }
}

impl Default for CollectionCaps {
    fn default() -> Self {
        Self::normal()
    }
}

/// Resample a route to exactly `cap` points when it is longer than `cap`.
///
/// Point `i` is taken from index `round(i * (n - 1) / (cap - 1))`, so the first
/// and last points are always kept. Routes at or under the cap (or caps below 2)
/// are returned unchanged.
pub fn downsample_route(points: &[LocationSample], cap: usize) -> Vec<LocationSample> {
    if cap < 2 || points.len() <= cap {
        return points.to_vec();
    }

    let last = points.len() - 1;
    let stride = last as f64 / (cap - 1) as f64;
    (0..cap)
        .map(|i| {
            let index = (i as f64 * stride).round() as usize;
            points[index.min(last)]
        })
        .collect()
}

/// Merge segments into at most `cap` segments when there are more than `cap`.
///
/// Segments are grouped into contiguous buckets of `ceil(n / cap)`; each bucket
/// becomes one segment (see [`merge_bucket`]). Counts at or under the cap are
/// returned unchanged.
pub fn merge_segments(segments: &[TrailSegment], cap: usize) -> Vec<TrailSegment> {
    if cap == 0 || segments.len() <= cap {
        return segments.to_vec();
    }

    let bucket_size = segments.len().div_ceil(cap);
    segments
        .chunks(bucket_size)
        .filter_map(merge_bucket)
        .collect()
}

/// Merge a contiguous run of segments into one.
///
/// Duration, distance and elevation are summed; heart rate and cadence are
/// duration-weighted; slope is distance-weighted; terrain is the class with the
/// most cumulative duration, the earliest class winning ties.
pub fn merge_bucket(bucket: &[TrailSegment]) -> Option<TrailSegment> {
    let first = bucket.first()?;
    let last = bucket.last()?;

    let duration: f64 = bucket.iter().map(|s| s.duration).sum();
    let distance: f64 = bucket.iter().map(|s| s.distance).sum();
    let elevation_delta: f64 = bucket.iter().map(|s| s.elevation_delta).sum();

    let cadence = weighted_average(bucket.iter().map(|s| (s.cadence, s.duration))).unwrap_or(0.0);
    let heart_rate = weighted_average(
        bucket
            .iter()
            .filter_map(|s| s.heart_rate.map(|hr| (hr, s.duration))),
    );
    let slope_percent =
        weighted_average(bucket.iter().map(|s| (s.slope_percent, s.distance))).unwrap_or(0.0);

    Some(TrailSegment {
        started_at: first.started_at,
        ended_at: last.ended_at,
        duration,
        distance,
        elevation_delta,
        slope_percent,
        average_speed: if duration > 0.0 { distance / duration } else { 0.0 },
        heart_rate,
        cadence,
        terrain: dominant_terrain(bucket),
    })
}

/// Weighted mean of `(value, weight)` pairs; `None` when total weight is zero.
fn weighted_average(items: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let (sum, total) = items.fold((0.0, 0.0), |(sum, total), (value, weight)| {
        let weight = weight.max(0.0);
        (sum + value * weight, total + weight)
    });
    (total > 0.0).then(|| sum / total)
}

fn dominant_terrain(bucket: &[TrailSegment]) -> TerrainClass {
    // Insertion-ordered tally so ties go to the first class seen
    let mut tally: Vec<(TerrainClass, f64)> = Vec::with_capacity(4);
    for segment in bucket {
        match tally.iter_mut().find(|(terrain, _)| *terrain == segment.terrain) {
            Some((_, total)) => *total += segment.duration,
            None => tally.push((segment.terrain, segment.duration)),
        }
    }

    let mut best: Option<(TerrainClass, f64)> = None;
    for (terrain, total) in tally {
        if best.map_or(true, |(_, best_total)| total > best_total) {
            best = Some((terrain, total));
        }
    }
    best.map(|(terrain, _)| terrain).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_caps() {
        let raised = CollectionCaps {
            route: 1,
            segments: 0,
        }
        .bounded();
        assert_eq!(raised, CollectionCaps { route: 2, segments: 1 });
        assert_eq!(CollectionCaps::normal().bounded(), CollectionCaps::normal());

        let segments: Vec<TrailSegment> = (0..10)
            .map(|i| segment(i, TerrainClass::Flat, 5.0, 4.0))
            .collect();
        assert_eq!(merge_segments(&segments, raised.segments).len(), 1);
        assert_eq!(downsample_route(&route(50), raised.route).len(), 2);
    }

    fn route(n: usize) -> Vec<LocationSample> {
        (0..n)
            .map(|i| LocationSample::new(i as f64, 46.5 + i as f64 * 1e-5, 8.0, 1000.0))
            .collect()
    }

    fn segment(i: usize, terrain: TerrainClass, duration: f64, distance: f64) -> TrailSegment {
        TrailSegment {
            started_at: i as f64 * 10.0,
            ended_at: i as f64 * 10.0 + duration,
            duration,
            distance,
            elevation_delta: 1.5,
            slope_percent: if distance > 0.0 { 150.0 / distance } else { 0.0 },
            average_speed: distance / duration,
            heart_rate: Some(100.0 + i as f64),
            cadence: 1.5,
            terrain,
        }
    }

    #[test]
    fn test_downsample_exact_size_and_endpoints() {
        let points = route(10_001);
        let sampled = downsample_route(&points, 4000);
        assert_eq!(sampled.len(), 4000);
        assert_eq!(sampled[0], points[0]);
        assert_eq!(sampled[3999], points[10_000]);

        // Idempotent
        assert_eq!(downsample_route(&sampled, 4000), sampled);
    }

    #[test]
    fn test_downsample_under_cap_unchanged() {
        let points = route(10);
        assert_eq!(downsample_route(&points, 4000), points);
        assert_eq!(downsample_route(&points, 1), points);
    }

    #[test]
    fn test_downsample_index_selection() {
        let points = route(5);
        let sampled = downsample_route(&points, 3);
        // round(i * 4 / 2) -> 0, 2, 4
        let times: Vec<f64> = sampled.iter().map(|p| p.timestamp).collect();
        assert_eq!(times, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_merge_preserves_sums() {
        let segments: Vec<TrailSegment> = (0..7001)
            .map(|i| segment(i, TerrainClass::Flat, 5.0 + (i % 7) as f64, 10.0 + (i % 3) as f64))
            .collect();
        let merged = merge_segments(&segments, 6000);
        // ceil(7001 / 6000) = 2 per bucket
        assert_eq!(merged.len(), 3501);

        fn sum(v: &[TrailSegment], f: fn(&TrailSegment) -> f64) -> f64 {
            v.iter().map(f).sum()
        }
        assert!((sum(&segments, |s| s.distance) - sum(&merged, |s| s.distance)).abs() < 1e-6);
        assert!((sum(&segments, |s| s.duration) - sum(&merged, |s| s.duration)).abs() < 1e-6);
        assert!(
            (sum(&segments, |s| s.elevation_delta) - sum(&merged, |s| s.elevation_delta)).abs()
                < 1e-6
        );

        // Idempotent
        assert_eq!(merge_segments(&merged, 6000), merged);
    }

    #[test]
    fn test_merge_bucket_weights() {
        let mut a = segment(0, TerrainClass::Climb, 10.0, 30.0);
        a.slope_percent = 20.0;
        a.cadence = 1.0;
        a.heart_rate = Some(100.0);
        let mut b = segment(1, TerrainClass::Flat, 30.0, 10.0);
        b.slope_percent = 0.0;
        b.cadence = 2.0;
        b.heart_rate = None;

        let merged = merge_bucket(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(merged.started_at, a.started_at);
        assert_eq!(merged.ended_at, b.ended_at);
        assert_eq!(merged.duration, 40.0);
        assert_eq!(merged.distance, 40.0);
        assert!((merged.slope_percent - 15.0).abs() < 1e-9);
        assert!((merged.cadence - 1.75).abs() < 1e-9);
        // Only segments carrying a reading count toward heart rate
        assert_eq!(merged.heart_rate, Some(100.0));
        assert_eq!(merged.terrain, TerrainClass::Flat);
        assert!((merged.average_speed - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dominant_terrain_tie_goes_to_first() {
        let bucket = vec![
            segment(0, TerrainClass::Downhill, 10.0, 10.0),
            segment(1, TerrainClass::Technical, 10.0, 10.0),
        ];
        assert_eq!(merge_bucket(&bucket).unwrap().terrain, TerrainClass::Downhill);
    }

    #[test]
    fn test_merge_empty_bucket() {
        assert!(merge_bucket(&[]).is_none());
    }
}
