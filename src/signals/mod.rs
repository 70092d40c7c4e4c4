// src/signals/mod.rs
//
// Scene signal storage and time alignment.
//
//   ChannelStore (validated, sorted channels)
//       → Synchronizer (per-scene cursors) → SyncFrame → VehicleState

pub mod channel_store;
pub mod synchronizer;

pub use channel_store::{Channel, ChannelMatch, ChannelStore};
pub use synchronizer::{
    SyncConfig, SyncFrame, SyncStats, Synchronizer, DEFAULT_TOLERANCE_US, DEFAULT_TURN_SIGNAL_ON,
};
