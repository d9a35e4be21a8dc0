//! Sync engine for lockstep - master tempo and phase control
//!
//! This crate decides who the tempo/phase reference is and keeps every
//! deck converging to it:
//! - SyncSource: internal clock or a specific deck
//! - VirtualClock: beat clock that keeps running with no deck master
//! - SyncEngine: role cascade, fallback selection, tempo propagation
//! - SyncConfig: persisted defaults (initial tempo, last master)

mod clock;
mod config;
mod engine;
mod error;
mod source;

pub use clock::{samples_per_beat, VirtualClock, DEFAULT_BPM, DEFAULT_SAMPLE_RATE};
pub use config::{ConfigError, SyncConfig};
pub use engine::SyncEngine;
pub use error::SyncError;
pub use source::SyncSource;
