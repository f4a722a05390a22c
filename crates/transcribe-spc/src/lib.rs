//! SNES DSP to MIDI transcription
//!
//! This crate observes an emulated S-DSP through the
//! [`transcribe_core::ChipObserver`] interface and transcribes its eight
//! voices to MIDI, analyzing every BRR sample the first time it sounds to
//! find its fundamental pitch.

pub mod analysis;
pub mod brr;
pub mod sample;
pub mod sidecar;
pub mod transcriber;

pub use analysis::SampleAnalysis;
pub use brr::DecodedSample;
pub use sample::{SampleConfig, SampleTable};
pub use transcriber::{SpcTranscriber, VOICE_COUNT};
