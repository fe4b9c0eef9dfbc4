//! Engine module housing the detector facade.
//!
//! `core` holds the `DetectorEngine` that arbitrates between the continuous
//! session, the batch controller, and demo mode; `channels` owns the
//! broadcast channels it publishes on.

pub mod channels;
pub mod core;

pub use channels::EngineChannels;
pub use core::{DetectorEngine, EngineMode, EngineReading, DEMO_EVENT_SECONDS};
