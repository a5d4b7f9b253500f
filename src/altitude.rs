//! Altitude smoothing.
//!
//! GPS and barometric altitude readings jitter by several meters between
//! fixes. Readings are smoothed with an exponential step whose weight shrinks
//! as the reported vertical accuracy worsens; readings with unknown or very
//! poor accuracy do not move the filtered value at all.

use serde::{Deserialize, Serialize};

/// Vertical accuracy (meters) above which a reading is not trusted.
pub const MAX_RELIABLE_VERTICAL_ACCURACY: f64 = 16.0;

/// Smoothing weight for a reading with the given vertical accuracy.
pub fn smoothing_alpha(vertical_accuracy: f64) -> f64 {
    if vertical_accuracy <= 4.0 {
        0.45
    } else if vertical_accuracy <= 8.0 {
        0.32
    } else {
        0.20
    }
}

/// One smoothing step.
///
/// Returns the raw value when there is no previous filtered value, carries the
/// previous value forward when the accuracy is unknown (negative) or above
/// [`MAX_RELIABLE_VERTICAL_ACCURACY`], and otherwise moves toward the raw
/// reading by `alpha`.
///
/// # Example
/// ```
/// use hike_tracker::smooth_altitude;
/// assert!((smooth_altitude(110.0, 3.0, Some(100.0)) - 104.5).abs() < 1e-9);
/// ```
pub fn smooth_altitude(raw: f64, vertical_accuracy: f64, previous: Option<f64>) -> f64 {
    let Some(previous) = previous.filter(|p| p.is_finite()) else {
        return raw;
    };
    let unreliable = !vertical_accuracy.is_finite()
        || vertical_accuracy < 0.0
        || vertical_accuracy > MAX_RELIABLE_VERTICAL_ACCURACY;
    if unreliable || !raw.is_finite() {
        return previous;
    }
    previous + (raw - previous) * smoothing_alpha(vertical_accuracy)
}

/// Stateful altitude filter carried across a session (and its checkpoints).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AltitudeFilter {
    last: Option<f64>,
}

impl AltitudeFilter {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Resume from a previously filtered value.
    pub fn seeded(last: Option<f64>) -> Self {
        Self { last }
    }

    /// Feed a reading and return the new filtered altitude.
    pub fn update(&mut self, raw: f64, vertical_accuracy: f64) -> f64 {
        let filtered = smooth_altitude(raw, vertical_accuracy, self.last);
        if filtered.is_finite() {
            self.last = Some(filtered);
        }
        filtered
    }

    /// Last filtered value, if any reading has been seen.
    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
