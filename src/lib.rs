pub mod capture;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod dump;
pub mod error;
pub mod experiment;
pub mod plot;
pub mod sequencer;
pub mod sigmf;
pub mod sim;
pub mod utils;
pub mod waveform;

pub use error::{LoopbackError, Result};

pub type Ftype = f32;
pub type Sample = num::Complex<Ftype>;

/// Samples kept after the lead-in to absorb pipeline flush slack.
pub const DEFAULT_POST_ROLL: usize = 42;
/// Zero samples transmitted and captured ahead of the payload.
pub const DEFAULT_LEAD_SIZE: usize = 1024 * 15;
/// Largest buffer, in samples, any sizing step will produce.
pub const MAX_BUFFER_SAMPLES: usize = isize::MAX as usize / std::mem::size_of::<Sample>();
/// Seconds between reading the device clock and the armed trigger.
pub const DEFAULT_ARM_DELAY: f64 = 0.1;
