// src/signals/synchronizer.rs
//
// Nearest-in-time alignment of every channel in a scene to a query timestamp,
// and assembly of the aligned samples into a VehicleState.
//
// A Synchronizer owns one forward-only cursor per channel. While queries
// arrive in non-decreasing order the cursors only walk forward (amortised
// O(1) per query over a whole scene). The first query, and any query earlier
// than the previous one, re-seeds the cursors with a binary search.
//
// Cursors are per-instance state: use one Synchronizer per scene and per
// thread. For shared read-only access use `synchronize_at`, which is stateless.

use super::channel_store::{Channel, ChannelMatch, ChannelStore};
use crate::types::{SignalPayload, TurnSignal, VehicleState};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_TOLERANCE_US: u64 = 50_000;
pub const DEFAULT_TURN_SIGNAL_ON: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Max |Δt| between query and sample, inclusive.
    pub tolerance_us: u64,
    /// Disable to force a binary search on every query.
    pub use_cursor: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance_us: DEFAULT_TOLERANCE_US,
            use_cursor: true,
        }
    }
}

/// Per-channel result of one synchronization.
#[derive(Debug, Clone)]
pub struct SyncFrame<'a> {
    pub timestamp: i64,
    pub matches: Vec<(&'a str, Option<ChannelMatch<'a>>)>,
}

impl<'a> SyncFrame<'a> {
    pub fn get(&self, channel: &str) -> Option<&ChannelMatch<'a>> {
        self.matches
            .iter()
            .find(|(name, _)| *name == channel)
            .and_then(|(_, m)| m.as_ref())
    }

    pub fn missing(&self) -> Vec<&'a str> {
        self.matches
            .iter()
            .filter(|(_, m)| m.is_none())
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.matches.iter().all(|(_, m)| m.is_some())
    }

    /// Fold the matched samples into a VehicleState. When two channels feed
    /// the same field, the one closer in time wins; on equal offsets the
    /// channel that sorts first by name keeps it.
    pub fn to_vehicle_state(&self, turn_signal_on: f64) -> VehicleState {
        let mut speed = Slot::default();
        let mut yaw_rate = Slot::default();
        let mut steering = Slot::default();
        let mut turn_signal = Slot::default();
        let mut acceleration = Slot::default();
        let mut gear = Slot::default();

        for m in self.matches.iter().filter_map(|(_, m)| m.as_ref()) {
            let offset = m.offset_us;
            match &m.sample.payload {
                SignalPayload::Pose {
                    vel,
                    rotation_rate,
                    accel,
                } => {
                    speed.offer(vel[0].hypot(vel[1]), offset);
                    yaw_rate.offer(rotation_rate[2], offset);
                    if let Some(a) = accel {
                        acceleration.offer(a[0], offset);
                    }
                }
                SignalPayload::Steering { value } => steering.offer(*value, offset),
                SignalPayload::TurnSignal { state } => turn_signal.offer(*state, offset),
                SignalPayload::TurnLamps { left, right } => {
                    turn_signal.offer(TurnSignal::from_lamps(*left, *right, turn_signal_on), offset)
                }
                SignalPayload::Gear { position } => gear.offer(*position, offset),
            }
        }

        VehicleState {
            speed: speed.value,
            yaw_rate: yaw_rate.value,
            steering_angle: steering.value,
            turn_signal: turn_signal.value,
            acceleration: acceleration.value,
            gear: gear.value,
        }
    }
}

struct Slot<T> {
    value: Option<T>,
    offset_us: u64,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: None,
            offset_us: u64::MAX,
        }
    }
}

impl<T> Slot<T> {
    fn offer(&mut self, value: T, offset_us: u64) {
        if self.value.is_none() || offset_us < self.offset_us {
            self.value = Some(value);
            self.offset_us = offset_us;
        }
    }
}

impl ChannelStore {
    /// Stateless synchronization: one binary search per channel.
    pub fn synchronize_at(&self, t: i64, tolerance_us: u64) -> SyncFrame<'_> {
        SyncFrame {
            timestamp: t,
            matches: self
                .channels()
                .map(|ch| (ch.name(), ch.nearest(t, tolerance_us)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub queries: u64,
    /// Queries answered by walking the cursors forward.
    pub cursor_queries: u64,
    /// Queries that re-seeded the cursors with a binary search.
    pub seeks: u64,
}

pub struct Synchronizer<'a> {
    store: &'a ChannelStore,
    config: SyncConfig,
    turn_signal_on: f64,
    /// Invariant: cursors[i] == lower_bound(last_query) for channel i.
    cursors: Vec<usize>,
    last_query: Option<i64>,
    stats: SyncStats,
}

impl<'a> Synchronizer<'a> {
    pub fn new(store: &'a ChannelStore, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            turn_signal_on: DEFAULT_TURN_SIGNAL_ON,
            cursors: vec![0; store.len()],
            last_query: None,
            stats: SyncStats::default(),
        }
    }

    /// Lamp level above which an analog indicator counts as on.
    pub fn with_turn_signal_on(mut self, level: f64) -> Self {
        self.turn_signal_on = level;
        self
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Forget the cursors; the next query binary-searches.
    pub fn reset(&mut self) {
        self.last_query = None;
        self.cursors.iter_mut().for_each(|c| *c = 0);
    }

    pub fn synchronize(&mut self, t: i64) -> SyncFrame<'a> {
        let sequential =
            self.config.use_cursor && self.last_query.map_or(false, |last| t >= last);
        let tolerance = self.config.tolerance_us;
        let store = self.store;

        let matches = store
            .channels()
            .zip(self.cursors.iter_mut())
            .map(|(channel, cursor)| {
                let idx = if sequential {
                    advance(channel, *cursor, t)
                } else {
                    channel.lower_bound(t)
                };
                *cursor = idx;
                let found = channel.pick(idx, t, tolerance);
                if found.is_none() {
                    debug!(
                        "No '{}' sample within {}µs of t={}",
                        channel.name(),
                        tolerance,
                        t
                    );
                }
                (channel.name(), found)
            })
            .collect();

        self.stats.queries += 1;
        if sequential {
            self.stats.cursor_queries += 1;
        } else {
            self.stats.seeks += 1;
        }
        self.last_query = Some(t);

        SyncFrame {
            timestamp: t,
            matches,
        }
    }

    pub fn vehicle_state_at(&mut self, t: i64) -> VehicleState {
        let turn_signal_on = self.turn_signal_on;
        self.synchronize(t).to_vehicle_state(turn_signal_on)
    }
}

/// Walk forward from a previous insertion point to the insertion point of
/// `t`. Requires `t` >= the query that produced `from`.
fn advance(channel: &Channel, from: usize, t: i64) -> usize {
    let samples = channel.samples();
    let mut idx = from;
    while idx < samples.len() && samples[idx].timestamp < t {
        idx += 1;
    }
    idx
}
