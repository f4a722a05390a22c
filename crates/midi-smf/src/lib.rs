//! Standard MIDI File building blocks
//!
//! This crate implements the byte-level MIDI output of the transcription
//! pipeline: variable-length quantities, per-voice MTrk event buffers, and
//! the Type-1 SMF container.

pub mod smf;
pub mod track;
pub mod vlq;

pub use smf::{smpte_division, write_smf};
pub use track::MidiTrack;
