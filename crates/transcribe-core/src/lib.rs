//! Core traits and types for chip-to-MIDI transcription
//!
//! This crate provides the fundamental abstractions shared by the chip
//! transcribers: the observer interface the emulator drives, the façade the
//! output driver consumes, and the cycle-to-tick time base.

pub mod error;
pub mod timebase;
pub mod traits;

pub use error::{Result, TranscribeError};
pub use timebase::{TimeBase, FRAMES_PER_SECOND, SPC_TICK_RATIO, TICKS_PER_FRAME};
pub use traits::{ChipObserver, Transcriber};
