// src/types.rs

use serde::{Deserialize, Serialize};

/// One timestamped reading from a vehicle-bus channel. Timestamps are in
/// microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample<P> {
    pub timestamp: i64,
    pub payload: P,
}

impl<P> Sample<P> {
    pub fn new(timestamp: i64, payload: P) -> Self {
        Self { timestamp, payload }
    }
}

/// Decoded CAN message contents, tagged by message kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    /// Ego pose: velocity and angular rate in the vehicle frame.
    Pose {
        vel: [f64; 3],
        rotation_rate: [f64; 3],
        #[serde(default)]
        accel: Option<[f64; 3]>,
    },
    /// Steering wheel angle feedback (rad, positive = left).
    Steering { value: f64 },
    /// Discrete indicator state.
    TurnSignal { state: TurnSignal },
    /// Analog indicator lamp levels, decoded against `turn_signal_on`.
    TurnLamps { left: f64, right: f64 },
    Gear { position: Gear },
}

impl SignalPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pose { .. } => "pose",
            Self::Steering { .. } => "steering",
            Self::TurnSignal { .. } => "turn_signal",
            Self::TurnLamps { .. } => "turn_lamps",
            Self::Gear { .. } => "gear",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnSignal {
    #[default]
    None,
    Left,
    Right,
}

impl TurnSignal {
    pub fn is_on(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Decode lamp levels. Both lamps lit means hazards, which carry no direction.
    pub fn from_lamps(left: f64, right: f64, on_level: f64) -> Self {
        match (left > on_level, right > on_level) {
            (true, false) => Self::Left,
            (false, true) => Self::Right,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gear {
    Drive,
    Reverse,
    Park,
    Neutral,
    #[serde(other)]
    Unknown,
}

/// Ego state at one query timestamp.
///
/// `None` means no sample was found within the tolerance window. That is
/// different from a known zero: the classifier skips any rule whose input is
/// absent instead of reading it as 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleState {
    /// m/s, magnitude of planar velocity.
    pub speed: Option<f64>,
    /// rad/s, signed.
    pub yaw_rate: Option<f64>,
    /// rad, positive = left.
    pub steering_angle: Option<f64>,
    pub turn_signal: Option<TurnSignal>,
    /// m/s², longitudinal.
    pub acceleration: Option<f64>,
    pub gear: Option<Gear>,
}

impl VehicleState {
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_yaw_rate(mut self, yaw_rate: f64) -> Self {
        self.yaw_rate = Some(yaw_rate);
        self
    }

    pub fn with_steering(mut self, steering_angle: f64) -> Self {
        self.steering_angle = Some(steering_angle);
        self
    }

    pub fn with_turn_signal(mut self, turn_signal: TurnSignal) -> Self {
        self.turn_signal = Some(turn_signal);
        self
    }

    pub fn with_acceleration(mut self, acceleration: f64) -> Self {
        self.acceleration = Some(acceleration);
        self
    }

    pub fn with_gear(mut self, gear: Gear) -> Self {
        self.gear = Some(gear);
        self
    }

    /// Turn signal with the explicit `None` default applied when no
    /// indicator sample was found.
    pub fn effective_turn_signal(&self) -> TurnSignal {
        self.turn_signal.unwrap_or_default()
    }

    /// Names of the fields that were not found within tolerance.
    pub fn absent_fields(&self) -> Vec<&'static str> {
        let mut absent = Vec::new();
        if self.speed.is_none() {
            absent.push("speed");
        }
        if self.yaw_rate.is_none() {
            absent.push("yaw_rate");
        }
        if self.steering_angle.is_none() {
            absent.push("steering_angle");
        }
        if self.turn_signal.is_none() {
            absent.push("turn_signal");
        }
        if self.acceleration.is_none() {
            absent.push("acceleration");
        }
        if self.gear.is_none() {
            absent.push("gear");
        }
        absent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScenarioLabel {
    Stop,
    Reverse,
    #[serde(rename = "U-Turn")]
    UTurn,
    #[serde(rename = "Left Turn")]
    LeftTurn,
    #[serde(rename = "Right Turn")]
    RightTurn,
    #[serde(rename = "Pull Over")]
    PullOver,
    #[serde(rename = "Lane Change")]
    LaneChange,
    Deceleration,
    Cruising,
}

impl ScenarioLabel {
    pub const ALL: [ScenarioLabel; 9] = [
        Self::Stop,
        Self::Reverse,
        Self::UTurn,
        Self::LeftTurn,
        Self::RightTurn,
        Self::PullOver,
        Self::LaneChange,
        Self::Deceleration,
        Self::Cruising,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "Stop",
            Self::Reverse => "Reverse",
            Self::UTurn => "U-Turn",
            Self::LeftTurn => "Left Turn",
            Self::RightTurn => "Right Turn",
            Self::PullOver => "Pull Over",
            Self::LaneChange => "Lane Change",
            Self::Deceleration => "Deceleration",
            Self::Cruising => "Cruising",
        }
    }
}

impl std::fmt::Display for ScenarioLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output unit: one classified frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_token: Option<String>,
    pub timestamp: i64,
    pub vehicle_state: VehicleState,
    pub scenario: ScenarioLabel,
}
