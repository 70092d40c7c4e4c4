// src/classification/classifier.rs
//
// Stateless per-frame scenario classification.
//
// The cascade is an ordered rule table evaluated top to bottom; the first rule
// that fires decides the label. Comparisons are strict, so a value equal to a
// threshold falls through. A rule whose input field is absent is skipped.

use crate::config::ThresholdSet;
use crate::types::{Gear, ScenarioLabel, VehicleState};

/// Longitudinal acceleration below which a frame counts as braking (m/s²).
pub const HARD_DECELERATION_MPS2: f64 = -1.0;

/// One cascade entry.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub eval: fn(&VehicleState, &ThresholdSet) -> Option<ScenarioLabel>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

pub const CASCADE: [Rule; 7] = [
    Rule {
        name: "stop",
        eval: stop,
    },
    Rule {
        name: "reverse",
        eval: reverse,
    },
    Rule {
        name: "u_turn",
        eval: u_turn,
    },
    Rule {
        name: "turn",
        eval: turn,
    },
    Rule {
        name: "pull_over",
        eval: pull_over,
    },
    Rule {
        name: "lane_change",
        eval: lane_change,
    },
    Rule {
        name: "deceleration",
        eval: deceleration,
    },
];

/// Label for one frame. Never fails: `Cruising` when no rule fires.
pub fn classify(state: &VehicleState, thresholds: &ThresholdSet) -> ScenarioLabel {
    classify_traced(state, thresholds).0
}

/// Same as `classify`, also naming the rule that fired (`"cruising"` for the
/// fallback).
pub fn classify_traced(state: &VehicleState, thresholds: &ThresholdSet) -> (ScenarioLabel, &'static str) {
    CASCADE
        .iter()
        .find_map(|rule| (rule.eval)(state, thresholds).map(|label| (label, rule.name)))
        .unwrap_or((ScenarioLabel::Cruising, "cruising"))
}

fn abs_steering(state: &VehicleState) -> Option<f64> {
    state.steering_angle.map(f64::abs)
}

fn stop(s: &VehicleState, t: &ThresholdSet) -> Option<ScenarioLabel> {
    s.speed
        .filter(|v| *v < t.stop_speed())
        .map(|_| ScenarioLabel::Stop)
}

fn reverse(s: &VehicleState, _: &ThresholdSet) -> Option<ScenarioLabel> {
    (s.gear == Some(Gear::Reverse)).then_some(ScenarioLabel::Reverse)
}

fn u_turn(s: &VehicleState, t: &ThresholdSet) -> Option<ScenarioLabel> {
    abs_steering(s)
        .filter(|a| *a > t.u_turn_steering())
        .map(|_| ScenarioLabel::UTurn)
}

fn turn(s: &VehicleState, t: &ThresholdSet) -> Option<ScenarioLabel> {
    let steering = s.steering_angle?;
    if steering.abs() <= t.turn_steering() {
        return None;
    }
    // Positive steering is left
    Some(if steering > 0.0 {
        ScenarioLabel::LeftTurn
    } else {
        ScenarioLabel::RightTurn
    })
}

/// Indicator on and steering past the lane-change cutoff.
fn signalled_steer(s: &VehicleState, t: &ThresholdSet) -> bool {
    s.effective_turn_signal().is_on()
        && abs_steering(s).map_or(false, |a| a > t.lane_change_steering())
}

fn pull_over(s: &VehicleState, t: &ThresholdSet) -> Option<ScenarioLabel> {
    let slow = s.speed.map_or(false, |v| v < t.pull_over_speed());
    (signalled_steer(s, t) && slow).then_some(ScenarioLabel::PullOver)
}

fn lane_change(s: &VehicleState, t: &ThresholdSet) -> Option<ScenarioLabel> {
    signalled_steer(s, t).then_some(ScenarioLabel::LaneChange)
}

fn deceleration(s: &VehicleState, _: &ThresholdSet) -> Option<ScenarioLabel> {
    s.acceleration
        .filter(|a| *a < HARD_DECELERATION_MPS2)
        .map(|_| ScenarioLabel::Deceleration)
}
