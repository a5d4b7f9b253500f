//! Safety evaluation.
//!
//! Each rule is independent and reported as its own flag; the recommendation
//! text is picked by a fixed priority order. The state is always recomputed
//! from scratch.

use serde::{Deserialize, Serialize};

use crate::{FatigueState, SafetyState};

/// Thresholds for the safety rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyThresholds {
    /// Seconds since the last check-in before one is due. Default: 1200 (20 min)
    pub check_in_interval_secs: f64,
    /// Battery fraction below which the battery is low. Default: 0.2
    pub low_battery_level: f64,
    /// Fatigue score above which the hiker is over-fatigued. Default: 80
    pub over_fatigue_score: f64,
    /// Energy fraction below which returning home is at risk. Default: 0.25
    pub return_energy_floor: f64,
    /// Energy risk only applies after this much active time. Default: 2100 (35 min)
    pub return_risk_after_secs: f64,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            check_in_interval_secs: 20.0 * 60.0,
            low_battery_level: 0.2,
            over_fatigue_score: 80.0,
            return_energy_floor: 0.25,
            return_risk_after_secs: 35.0 * 60.0,
        }
    }
}

/// Evaluate the safety rules.
///
/// `since_check_in` and `elapsed` are in seconds.
pub fn evaluate_safety(
    fatigue: &FatigueState,
    battery_level: f64,
    since_check_in: f64,
    elapsed: f64,
    thresholds: &SafetyThresholds,
) -> SafetyState {
    let check_in_due = since_check_in > thresholds.check_in_interval_secs;
    let low_battery = battery_level < thresholds.low_battery_level;
    let over_fatigued = fatigue.score > thresholds.over_fatigue_score;
    let return_home_energy_risk = fatigue.energy_remaining < thresholds.return_energy_floor
        && elapsed > thresholds.return_risk_after_secs;

    let recommendation = if over_fatigued {
        "High fatigue detected. Pause now and reassess return plan."
    } else if low_battery {
        "Battery low. Enable power saving and plan turn-back point."
    } else if check_in_due {
        "Send check-in update to safety contact."
    } else if return_home_energy_risk {
        "Energy may be insufficient for return. Consider shortening route."
    } else {
        "Safety status stable."
    };

    SafetyState {
        check_in_due,
        low_battery,
        over_fatigued,
        return_home_energy_risk,
        recommendation: recommendation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fatigue(score: f64, energy: f64) -> FatigueState {
        FatigueState {
            score,
            energy_remaining: energy,
            ..FatigueState::initial()
        }
    }

    #[test]
    fn test_stable() {
        let state = evaluate_safety(&fatigue(20.0, 0.9), 0.8, 60.0, 600.0, &Default::default());
        assert!(!state.check_in_due && !state.low_battery);
        assert!(!state.over_fatigued && !state.return_home_energy_risk);
        assert_eq!(state.recommendation, "Safety status stable.");
    }

    #[test]
    fn test_priority_order() {
        let t = SafetyThresholds::default();

        let all = evaluate_safety(&fatigue(90.0, 0.1), 0.1, 1500.0, 3000.0, &t);
        assert!(all.over_fatigued && all.low_battery && all.check_in_due);
        assert!(all.return_home_energy_risk);
        assert!(all.recommendation.starts_with("High fatigue"));

        let battery = evaluate_safety(&fatigue(50.0, 0.1), 0.1, 1500.0, 3000.0, &t);
        assert!(battery.recommendation.starts_with("Battery low"));

        let check_in = evaluate_safety(&fatigue(50.0, 0.1), 0.5, 1500.0, 3000.0, &t);
        assert!(check_in.recommendation.starts_with("Send check-in"));

        let energy = evaluate_safety(&fatigue(50.0, 0.1), 0.5, 60.0, 3000.0, &t);
        assert!(energy.recommendation.starts_with("Energy may be insufficient"));
    }

    #[test]
    fn test_energy_risk_needs_elapsed_time() {
        let state = evaluate_safety(&fatigue(50.0, 0.1), 0.5, 60.0, 30.0 * 60.0, &Default::default());
        assert!(!state.return_home_energy_risk);
    }
}
