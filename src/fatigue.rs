//! Fatigue and energy scoring.
//!
//! Two load models feed one score:
//! - **Heart-rate path**: when a usable heart rate and a profile exist, load
//!   accumulates as a TRIMP-style impulse over the heart-rate reserve ratio.
//! - **Estimated path**: otherwise a pseudo-intensity is derived from speed,
//!   slope and cadence and run through the same impulse formula with a softer
//!   exponent.
//!
//! Independently of the path, a caloric balance (burned vs. consumed against a
//! body-weight reserve) yields the energy-remaining fraction. The final score
//! blends normalized load with energy depletion.
//!
//! All constants are empirically tuned and live on [`FatigueModel`] so they can
//! be adjusted without touching the formulas.

use serde::{Deserialize, Serialize};

use crate::{FatigueState, UserProfile};

/// Sensor-derived inputs for one evaluation step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FatigueInputs {
    /// Active elapsed session time in seconds
    pub elapsed_seconds: f64,
    /// Current speed in m/s
    pub speed: f64,
    /// Current slope in percent
    pub slope_percent: f64,
    /// Fresh heart-rate reading in bpm, if any
    pub heart_rate: Option<f64>,
    /// Cadence in steps/second
    pub cadence: f64,
}

/// Which load model produced a step.
#[derive(Debug, Clone, Copy, PartialEq)]
enum LoadPath {
    HeartRate {
        heart_rate: f64,
        max_heart_rate: f64,
        reserve_ratio: f64,
    },
    Estimated {
        intensity: f64,
    },
}

/// Tuned constants of the fatigue/energy model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FatigueModel {
    /// Longest step (seconds) credited by one evaluation. Default: 15.0
    pub max_step_seconds: f64,
    /// Heart rates at or below this are treated as sensor noise. Default: 30.0
    pub min_usable_heart_rate: f64,
    /// Upper clamp of the heart-rate reserve ratio. Default: 1.2
    pub max_reserve_ratio: f64,
    /// Impulse base multiplier. Default: 0.64
    pub impulse_multiplier: f64,
    /// Impulse exponent on the heart-rate path. Default: 1.92
    pub heart_rate_exponent: f64,
    /// Impulse exponent on the estimated path. Default: 1.7
    pub estimated_exponent: f64,
    /// Pseudo-intensity clamp on the estimated path. Default: [0.12, 1.1]
    pub min_intensity: f64,
    pub max_intensity: f64,
    /// Load capacity before profile adjustment. Default: 260.0
    pub base_load_capacity: f64,
    /// Capacity clamp. Default: [120, 420]
    pub min_load_capacity: f64,
    pub max_load_capacity: f64,
    /// Share of the load score in the final score (rest is energy depletion).
    /// Default: 0.75 (heart rate), 0.8 (estimated)
    pub heart_rate_load_weight: f64,
    pub estimated_load_weight: f64,
    /// Score above which a break is recommended. Default: 88 (heart rate), 82 (estimated)
    pub heart_rate_break_score: f64,
    pub estimated_break_score: f64,
    /// Fraction of max heart rate above which a break is recommended. Default: 0.9
    pub heart_rate_ceiling: f64,
    /// Energy-remaining floor below which a break is recommended.
    /// Default: 0.12 (heart rate), 0.15 (estimated)
    pub heart_rate_energy_floor: f64,
    pub estimated_energy_floor: f64,
    /// Body weight used without a profile. Default: 72.0 kg
    pub default_weight_kg: f64,
    /// Burn rate clamp in kcal/min. Default: [1, 18]
    pub min_burn_rate: f64,
    pub max_burn_rate: f64,
    /// Energy reserve per kg of body weight. Default: 22.0 kcal
    pub reserve_per_kg: f64,
    /// Reserve clamp. Default: [1100, 2600] kcal
    pub min_reserve: f64,
    pub max_reserve: f64,
    /// Fraction of consumed calories available to the reserve. Default: 0.92
    pub intake_efficiency: f64,
}

impl Default for FatigueModel {
    fn default() -> Self {
        Self {
            max_step_seconds: 15.0,
            min_usable_heart_rate: 30.0,
            max_reserve_ratio: 1.2,
            impulse_multiplier: 0.64,
            heart_rate_exponent: 1.92,
            estimated_exponent: 1.7,
            min_intensity: 0.12,
            max_intensity: 1.1,
            base_load_capacity: 260.0,
            min_load_capacity: 120.0,
            max_load_capacity: 420.0,
            heart_rate_load_weight: 0.75,
            estimated_load_weight: 0.8,
            heart_rate_break_score: 88.0,
            estimated_break_score: 82.0,
            heart_rate_ceiling: 0.9,
            heart_rate_energy_floor: 0.12,
            estimated_energy_floor: 0.15,
            default_weight_kg: 72.0,
            min_burn_rate: 1.0,
            max_burn_rate: 18.0,
            reserve_per_kg: 22.0,
            min_reserve: 1100.0,
            max_reserve: 2600.0,
            intake_efficiency: 0.92,
        }
    }
}

/// Training impulse for `step_minutes` at `intensity`.
///
/// `step_minutes * intensity * multiplier * e^(exponent * intensity)`
pub fn training_impulse(step_minutes: f64, intensity: f64, multiplier: f64, exponent: f64) -> f64 {
    step_minutes * intensity * multiplier * (exponent * intensity).exp()
}

/// Heart-rate reserve ratio, unclamped. `None` when max <= resting.
pub fn heart_rate_reserve_ratio(heart_rate: f64, resting: f64, max: f64) -> Option<f64> {
    let range = max - resting;
    (range > 0.0 && range.is_finite()).then(|| (heart_rate - resting) / range)
}

/// Walking energy expenditure in kcal/min (ACSM-style, unclamped).
///
/// Uphill grades add `1.8 * S * G` ml/kg/min, downhill grades a smaller
/// eccentric term `0.3 * S * |G|`, with S in m/min and G as a fraction.
pub fn walking_burn_rate(speed: f64, slope_percent: f64, weight_kg: f64) -> f64 {
    let s = speed.max(0.0) * 60.0;
    let grade = slope_percent / 100.0;
    let vertical = if grade >= 0.0 {
        1.8 * s * grade
    } else {
        0.3 * s * -grade
    };
    let vo2 = 3.5 + 0.1 * s + vertical;
    vo2 * weight_kg / 1000.0 * 5.0
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

impl FatigueModel {
    /// Load capacity for a profile (multiplier-adjusted and clamped).
    pub fn load_capacity(&self, profile: Option<&UserProfile>) -> f64 {
        let multiplier = profile.map(UserProfile::fatigue_multiplier).unwrap_or(1.0);
        (self.base_load_capacity / multiplier).clamp(self.min_load_capacity, self.max_load_capacity)
    }

    /// Baseline caloric reserve for a profile in kcal.
    pub fn energy_reserve(&self, profile: Option<&UserProfile>) -> f64 {
        let weight = self.weight_kg(profile);
        let (condition, age_factor) = match profile {
            Some(p) => (
                p.condition.reserve_factor(),
                if p.age >= 55 { 0.92 } else { 1.0 },
            ),
            None => (1.0, 1.0),
        };
        (weight * self.reserve_per_kg * condition * age_factor)
            .clamp(self.min_reserve, self.max_reserve)
    }

    fn weight_kg(&self, profile: Option<&UserProfile>) -> f64 {
        profile
            .map(|p| p.weight_kg)
            .filter(|w| w.is_finite() && *w > 0.0)
            .unwrap_or(self.default_weight_kg)
    }

    /// Seconds credited by this evaluation.
    fn step_seconds(&self, previous: &FatigueState, elapsed: f64) -> f64 {
        // Restored load without a recorded elapsed time: credit one second
        if previous.last_elapsed_seconds <= 0.0 && previous.accumulated_load > 0.0 {
            return 1.0;
        }
        finite_or(elapsed - previous.last_elapsed_seconds, 0.0).clamp(0.0, self.max_step_seconds)
    }

    fn select_path(&self, inputs: &FatigueInputs, profile: Option<&UserProfile>) -> LoadPath {
        let usable = inputs
            .heart_rate
            .filter(|hr| hr.is_finite() && *hr > self.min_usable_heart_rate);

        if let (Some(heart_rate), Some(profile)) = (usable, profile) {
            if let Some(ratio) = heart_rate_reserve_ratio(
                heart_rate,
                profile.resting_heart_rate,
                profile.max_heart_rate,
            ) {
                return LoadPath::HeartRate {
                    heart_rate,
                    max_heart_rate: profile.max_heart_rate,
                    reserve_ratio: ratio.clamp(0.0, self.max_reserve_ratio),
                };
            }
        }

        let speed = finite_or(inputs.speed, 0.0).max(0.0);
        let slope = finite_or(inputs.slope_percent, 0.0);
        let cadence = finite_or(inputs.cadence, 0.0);
        let intensity =
            0.2 + 0.22 * speed + 0.03 * slope.max(0.0) + 0.12 * (cadence - 1.0).max(0.0);
        LoadPath::Estimated {
            intensity: intensity.clamp(self.min_intensity, self.max_intensity),
        }
    }

    /// Advance the fatigue state by one evaluation.
    ///
    /// Never fails: a missing profile or heart rate selects the estimated
    /// path, and non-finite inputs are treated as zero.
    pub fn evaluate(
        &self,
        previous: &FatigueState,
        inputs: &FatigueInputs,
        profile: Option<&UserProfile>,
    ) -> FatigueState {
        let step_minutes = self.step_seconds(previous, inputs.elapsed_seconds) / 60.0;
        let path = self.select_path(inputs, profile);

        let (intensity, exponent, load_weight, break_score, energy_floor) = match path {
            LoadPath::HeartRate { reserve_ratio, .. } => (
                reserve_ratio,
                self.heart_rate_exponent,
                self.heart_rate_load_weight,
                self.heart_rate_break_score,
                self.heart_rate_energy_floor,
            ),
            LoadPath::Estimated { intensity } => (
                intensity,
                self.estimated_exponent,
                self.estimated_load_weight,
                self.estimated_break_score,
                self.estimated_energy_floor,
            ),
        };

        let step_load = finite_or(
            training_impulse(step_minutes, intensity, self.impulse_multiplier, exponent),
            0.0,
        )
        .max(0.0);
        let accumulated_load = previous.accumulated_load.max(0.0) + step_load;
        let load_score =
            (accumulated_load / self.load_capacity(profile) * 100.0).clamp(0.0, 100.0);

        // Caloric balance
        let weight = self.weight_kg(profile);
        let burn_rate = finite_or(
            walking_burn_rate(inputs.speed, finite_or(inputs.slope_percent, 0.0), weight),
            self.min_burn_rate,
        )
        .clamp(self.min_burn_rate, self.max_burn_rate);
        let calories_burned = previous.calories_burned.max(0.0) + burn_rate * step_minutes;
        let calories_consumed = previous.calories_consumed.max(0.0);
        let reserve = self.energy_reserve(profile);
        let energy_remaining = finite_or(
            (reserve + calories_consumed * self.intake_efficiency - calories_burned) / reserve,
            0.0,
        )
        .clamp(0.0, 1.0);

        let depletion = (1.0 - energy_remaining) * 100.0;
        let score = finite_or(
            load_score * load_weight + depletion * (1.0 - load_weight),
            previous.score,
        )
        .clamp(0.0, 100.0);

        let over_ceiling = match path {
            LoadPath::HeartRate {
                heart_rate,
                max_heart_rate,
                ..
            } => heart_rate > max_heart_rate * self.heart_rate_ceiling,
            LoadPath::Estimated { .. } => false,
        };
        let low_energy = energy_remaining < energy_floor;
        let near_exhaustion = score > break_score || over_ceiling;
        let needs_break = near_exhaustion || low_energy;

        let reason = if low_energy {
            "Energy reserves critically low. Eat something and rest before continuing."
        } else if near_exhaustion {
            "Near exhaustion. Stop and recover before pushing on."
        } else if score > 65.0 {
            "High load. Take a short break and ease the pace."
        } else if score > 40.0 {
            "Moderate load. Keep pace controlled on climbs."
        } else {
            "Load is controlled."
        };

        FatigueState {
            score,
            accumulated_load,
            energy_remaining,
            needs_break,
            reason: reason.to_string(),
            last_elapsed_seconds: finite_or(inputs.elapsed_seconds, 0.0)
                .max(previous.last_elapsed_seconds),
            calories_burned,
            calories_consumed,
        }
    }
}

/// Human-readable outlook on whether energy will last the route.
pub fn energy_outlook(fatigue: &FatigueState, tracking: bool) -> &'static str {
    if !tracking {
        return "Start tracking to estimate energy.";
    }
    if fatigue.energy_remaining > 0.55 {
        "Likely enough energy for the current route."
    } else if fatigue.energy_remaining > 0.3 {
        "Energy is moderate. Plan a short break soon."
    } else {
        "Energy is low. Consider turning back early."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FitnessCondition;

    fn profile() -> UserProfile {
        UserProfile::new(35, 70.0, 175.0, FitnessCondition::Moderate).with_heart_rates(60.0, 190.0)
    }

    fn inputs(elapsed: f64, heart_rate: Option<f64>) -> FatigueInputs {
        FatigueInputs {
            elapsed_seconds: elapsed,
            speed: 1.2,
            slope_percent: 5.0,
            heart_rate,
            cadence: 1.6,
        }
    }

    #[test]
    fn test_impulse_formula() {
        let ratio = heart_rate_reserve_ratio(150.0, 60.0, 190.0).unwrap();
        assert!((ratio - 0.6923).abs() < 1e-4);

        let load = training_impulse(1.0, ratio, 0.64, 1.92);
        let expected = ratio * 0.64 * (1.92 * ratio).exp();
        assert_eq!(load, expected);
        assert!((load - 1.674).abs() < 0.01, "got {}", load);
        // Deterministic for identical inputs
        assert_eq!(load, training_impulse(1.0, ratio, 0.64, 1.92));
    }

    #[test]
    fn test_heart_rate_step_load() {
        let model = FatigueModel::default();
        let state = model.evaluate(
            &FatigueState::initial(),
            &inputs(15.0, Some(150.0)),
            Some(&profile()),
        );
        let ratio = (150.0 - 60.0) / 130.0;
        let expected = training_impulse(0.25, ratio, 0.64, 1.92);
        assert!((state.accumulated_load - expected).abs() < 1e-12);
        assert_eq!(state.last_elapsed_seconds, 15.0);
    }

    #[test]
    fn test_step_clamped_to_fifteen_seconds() {
        let model = FatigueModel::default();
        let long_gap = model.evaluate(
            &FatigueState::initial(),
            &inputs(600.0, Some(150.0)),
            Some(&profile()),
        );
        let short = model.evaluate(
            &FatigueState::initial(),
            &inputs(15.0, Some(150.0)),
            Some(&profile()),
        );
        assert_eq!(long_gap.accumulated_load, short.accumulated_load);
    }

    #[test]
    fn test_fallback_without_profile_or_heart_rate() {
        let model = FatigueModel::default();
        let no_profile =
            model.evaluate(&FatigueState::initial(), &inputs(15.0, Some(150.0)), None);
        let no_hr = model.evaluate(
            &FatigueState::initial(),
            &inputs(15.0, Some(20.0)),
            Some(&profile()),
        );
        // Both take the estimated path with identical movement inputs
        let intensity: f64 = 0.2 + 0.22 * 1.2 + 0.03 * 5.0 + 0.12 * 0.6;
        let expected = training_impulse(0.25, intensity, 0.64, 1.7);
        assert!((no_profile.accumulated_load - expected).abs() < 1e-12);
        // The profile only changes capacity/reserve, not the estimated load
        assert!((no_hr.accumulated_load - expected).abs() < 1e-12);
    }

    #[test]
    fn test_heart_rate_ceiling_triggers_break() {
        let model = FatigueModel::default();
        let state = model.evaluate(
            &FatigueState::initial(),
            &inputs(10.0, Some(180.0)),
            Some(&profile()),
        );
        assert!(state.needs_break);
        assert!(state.score < 88.0);
        assert!(state.reason.starts_with("Near exhaustion"));
    }

    #[test]
    fn test_restored_load_credits_one_second() {
        let model = FatigueModel::default();
        let restored = FatigueState {
            accumulated_load: 40.0,
            last_elapsed_seconds: 0.0,
            ..FatigueState::initial()
        };
        let state = model.evaluate(&restored, &inputs(3600.0, Some(150.0)), Some(&profile()));
        let ratio = 90.0 / 130.0;
        let expected = 40.0 + training_impulse(1.0 / 60.0, ratio, 0.64, 1.92);
        assert!((state.accumulated_load - expected).abs() < 1e-12);
        assert_eq!(state.last_elapsed_seconds, 3600.0);
    }

    #[test]
    fn test_intake_restores_energy() {
        let model = FatigueModel::default();
        let depleted = FatigueState {
            calories_burned: 800.0,
            last_elapsed_seconds: 100.0,
            ..FatigueState::initial()
        };
        let before = model.evaluate(&depleted, &inputs(100.0, None), None);
        let fed = FatigueState {
            calories_consumed: 300.0,
            ..before.clone()
        };
        let after = model.evaluate(&fed, &inputs(100.0, None), None);
        assert!(after.energy_remaining > before.energy_remaining);
        assert_eq!(after.calories_burned, before.calories_burned);
        assert_eq!(after.accumulated_load, before.accumulated_load);
    }

    #[test]
    fn test_critically_low_energy_reason() {
        let model = FatigueModel::default();
        let exhausted = FatigueState {
            calories_burned: 5000.0,
            last_elapsed_seconds: 10.0,
            ..FatigueState::initial()
        };
        let state = model.evaluate(&exhausted, &inputs(20.0, None), None);
        assert_eq!(state.energy_remaining, 0.0);
        assert!(state.needs_break);
        assert!(state.reason.starts_with("Energy reserves critically low"));
    }

    #[test]
    fn test_bounds_and_monotonicity_over_long_sequence() {
        let model = FatigueModel::default();
        let profile = profile();
        let mut state = FatigueState::initial();
        let mut seed: u64 = 42;
        let mut elapsed = 0.0;

        for i in 0..5000 {
            // Small LCG for varied but reproducible inputs
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let r = (seed >> 33) as f64 / (1u64 << 31) as f64;
            elapsed += r * 20.0;
            let step = FatigueInputs {
                elapsed_seconds: elapsed,
                speed: r * 3.0,
                slope_percent: (r - 0.5) * 60.0,
                heart_rate: if i % 3 == 0 { None } else { Some(50.0 + r * 160.0) },
                cadence: r * 3.0,
            };
            let with_profile = i % 5 != 0;
            let next = model.evaluate(&state, &step, with_profile.then_some(&profile));

            assert!((0.0..=100.0).contains(&next.score));
            assert!((0.0..=1.0).contains(&next.energy_remaining));
            assert!(next.accumulated_load >= state.accumulated_load);
            assert!(next.calories_burned >= state.calories_burned);
            state = next;
        }
        assert!(state.needs_break);
    }

    #[test]
    fn test_energy_outlook() {
        let mut state = FatigueState::initial();
        assert_eq!(energy_outlook(&state, false), "Start tracking to estimate energy.");
        assert_eq!(
            energy_outlook(&state, true),
            "Likely enough energy for the current route."
        );
        state.energy_remaining = 0.2;
        assert_eq!(
            energy_outlook(&state, true),
            "Energy is low. Consider turning back early."
        );
    }
}
