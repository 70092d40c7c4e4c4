// src/signals/channel_store.rs
//
// Per-scene signal storage. Channels are validated on insert and never
// mutated afterwards, so every lookup can rely on sorted timestamps.

use crate::error::{Result, ScenarioError};
use crate::types::{Sample, SignalPayload};
use std::collections::BTreeMap;

/// One named, time-sorted signal stream.
#[derive(Debug, Clone)]
pub struct Channel<P = SignalPayload> {
    name: String,
    samples: Vec<Sample<P>>,
}

/// Nearest sample found for a query.
#[derive(Debug, PartialEq)]
pub struct ChannelMatch<'a, P = SignalPayload> {
    pub index: usize,
    pub sample: &'a Sample<P>,
    /// |sample.timestamp − query|, µs.
    pub offset_us: u64,
}

impl<P> Clone for ChannelMatch<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for ChannelMatch<'_, P> {}

impl<P> Channel<P> {
    /// Fails with `DataIntegrity` if timestamps ever decrease. Equal
    /// timestamps are kept in their given order.
    pub fn new(name: impl Into<String>, samples: Vec<Sample<P>>) -> Result<Self> {
        let name = name.into();
        if let Some(i) = samples
            .windows(2)
            .position(|w| w[1].timestamp < w[0].timestamp)
        {
            return Err(ScenarioError::DataIntegrity {
                channel: name,
                index: i + 1,
                previous: samples[i].timestamp,
                timestamp: samples[i + 1].timestamp,
            });
        }
        Ok(Self { name, samples })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn samples(&self) -> &[Sample<P>] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn time_range(&self) -> Option<(i64, i64)> {
        Some((self.samples.first()?.timestamp, self.samples.last()?.timestamp))
    }

    /// Index of the first sample with `timestamp >= t` (insertion point).
    pub fn lower_bound(&self, t: i64) -> usize {
        self.samples.partition_point(|s| s.timestamp < t)
    }

    /// Stateless O(log n) nearest-in-time lookup.
    pub fn nearest(&self, t: i64, tolerance_us: u64) -> Option<ChannelMatch<'_, P>> {
        self.pick(self.lower_bound(t), t, tolerance_us)
    }

    /// Choose between the two neighbours of insertion point `idx`. The right
    /// neighbour is tried first and only displaced by a strictly closer left
    /// one, so equidistant candidates resolve to the later sample.
    pub(crate) fn pick(&self, idx: usize, t: i64, tolerance_us: u64) -> Option<ChannelMatch<'_, P>> {
        let right = (idx < self.samples.len()).then_some(idx);
        let left = idx.checked_sub(1);

        let mut best: Option<ChannelMatch<'_, P>> = None;
        for i in right.into_iter().chain(left) {
            let sample = &self.samples[i];
            let offset_us = sample.timestamp.abs_diff(t);
            if offset_us > tolerance_us {
                continue;
            }
            if best.as_ref().map_or(true, |b| offset_us < b.offset_us) {
                best = Some(ChannelMatch {
                    index: i,
                    sample,
                    offset_us,
                });
            }
        }
        best
    }
}

/// All channels of one scene, keyed by name. Iteration is in name order.
#[derive(Debug, Clone, Default)]
pub struct ChannelStore {
    channels: BTreeMap<String, Channel>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a channel. A channel with the same name is replaced.
    pub fn insert(&mut self, name: impl Into<String>, samples: Vec<Sample<SignalPayload>>) -> Result<()> {
        let channel = Channel::new(name, samples)?;
        tracing::debug!(
            "Channel '{}': {} {} sample(s)",
            channel.name,
            channel.len(),
            channel.samples.first().map_or("empty", |s| s.payload.kind())
        );
        if let Some(old) = self.channels.insert(channel.name.clone(), channel) {
            tracing::warn!("Channel '{}' loaded twice, keeping the later copy", old.name);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn total_samples(&self) -> usize {
        self.channels.values().map(Channel::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(timestamps: &[i64]) -> Channel<i64> {
        let samples = timestamps.iter().map(|&t| Sample::new(t, t)).collect();
        Channel::new("test", samples).unwrap()
    }

    /// Reference: scan every sample, keep the smallest offset within tolerance.
    fn brute_force(ch: &Channel<i64>, t: i64, tol: u64) -> Option<u64> {
        ch.samples()
            .iter()
            .map(|s| s.timestamp.abs_diff(t))
            .filter(|d| *d <= tol)
            .min()
    }

    #[test]
    fn test_non_monotonic_channel_rejected() {
        let samples = vec![Sample::new(0, ()), Sample::new(20, ()), Sample::new(10, ())];
        match Channel::new("steeranglefeedback", samples) {
            Err(ScenarioError::DataIntegrity {
                channel,
                index,
                previous,
                timestamp,
            }) => {
                assert_eq!(channel, "steeranglefeedback");
                assert_eq!(index, 2);
                assert_eq!(previous, 20);
                assert_eq!(timestamp, 10);
            }
            other => panic!("expected data integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_equal_timestamps_allowed() {
        let ch = channel(&[0, 10, 10, 20]);
        assert_eq!(ch.len(), 4);
        // Ties keep input order: the first of the equal pair is the insertion point
        assert_eq!(ch.nearest(10, 0).unwrap().index, 1);
    }

    #[test]
    fn test_empty_channel_always_absent() {
        let ch = channel(&[]);
        assert!(ch.nearest(0, u64::MAX).is_none());
        assert!(ch.time_range().is_none());
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        let ch = channel(&[0, 40_000, 95_000, 100_000, 180_000, 300_000]);
        let tol = 50_000;
        for t in (-120_000..=420_000).step_by(2_500) {
            let got = ch.nearest(t, tol).map(|m| m.offset_us);
            assert_eq!(got, brute_force(&ch, t, tol), "query {}", t);
            if let Some(m) = ch.nearest(t, tol) {
                assert!(m.offset_us <= tol);
                assert_eq!(m.sample.timestamp.abs_diff(t), m.offset_us);
            }
        }
    }

    #[test]
    fn test_outside_tolerance_window_absent() {
        let ch = channel(&[1_000_000, 2_000_000]);
        let tol = 50_000;
        assert!(ch.nearest(1_000_000 - 50_001, tol).is_none());
        assert!(ch.nearest(2_000_000 + 50_001, tol).is_none());
        // Tolerance is inclusive
        assert!(ch.nearest(1_000_000 - 50_000, tol).is_some());
        assert!(ch.nearest(2_000_000 + 50_000, tol).is_some());
        // Gap in the middle of the channel
        assert!(ch.nearest(1_500_000, tol).is_none());
    }

    #[test]
    fn test_boundary_neighbours() {
        let ch = channel(&[100, 200]);
        // Before first: only the right neighbour
        assert_eq!(ch.nearest(50, 1_000).unwrap().index, 0);
        // After last: only the left neighbour
        assert_eq!(ch.nearest(500, 1_000).unwrap().index, 1);
    }

    #[test]
    fn test_equidistant_prefers_later_sample() {
        let ch = channel(&[100, 200]);
        let m = ch.nearest(150, 1_000).unwrap();
        assert_eq!(m.index, 1);
        assert_eq!(m.offset_us, 50);
    }

    #[test]
    fn test_store_iterates_in_name_order() {
        let mut store = ChannelStore::new();
        store
            .insert("steering", vec![Sample::new(0, SignalPayload::Steering { value: 0.1 })])
            .unwrap();
        store.insert("pose", Vec::new()).unwrap();
        let names: Vec<&str> = store.names().collect();
        assert_eq!(names, vec!["pose", "steering"]);
        assert_eq!(store.total_samples(), 1);

        let bad = vec![
            Sample::new(5, SignalPayload::Steering { value: 0.0 }),
            Sample::new(1, SignalPayload::Steering { value: 0.0 }),
        ];
        assert!(store.insert("broken", bad).is_err());
        assert!(store.get("broken").is_none());
    }
}
