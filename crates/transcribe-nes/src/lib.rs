//! NES APU to MIDI transcription
//!
//! This crate observes a cycle-accurate APU emulation through the
//! [`transcribe_core::ChipObserver`] interface and deduces, per voice, a
//! stream of MIDI events: the squares over eight duty channels, triangle,
//! noise-as-percussion, and DMC samples on a pooled channel range.

pub mod period;
pub mod remap;
pub mod sidecar;
pub mod transcriber;

pub use period::PeriodNoteTable;
pub use remap::{DmcChannels, DmcEntry, DmcRemap, NoiseRemap, NOISE_PERCUSSION};
pub use transcriber::{NesTranscriber, NTSC_CLOCK_HZ, VOICE_COUNT};
