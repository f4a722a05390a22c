//! Observer and façade traits
//!
//! The emulator owns the transcriber as a trait object and drives it
//! synchronously from its execution loop; the transcriber never calls back
//! into the emulator. Events must arrive in non-decreasing time order,
//! which is what lets the trackers produce monotonic MIDI delta times.

use std::path::Path;

use crate::error::Result;

/// Event sink the emulator drives while a track plays.
///
/// `time` arguments are in emulator-native units (CPU cycles for the NES
/// APU, DSP sample indices for the SNES DSP), relative to the most recent
/// `observe_time` advance.
pub trait ChipObserver {
    /// Chip clock rate changed; period tables are invalidated and rebuilt.
    fn observe_clock_rate(&mut self, hz: f64);

    /// Advance the cumulative time base by `units`, typically once per
    /// emulated frame. Subsequent event times are relative to this point.
    fn observe_time(&mut self, units: u64);

    /// A shadowed register changed. `reg` is the chip-local register index
    /// for `voice`.
    fn observe_register(&mut self, voice: u8, reg: u8, val: u8);

    /// The chip's length-counter or key-on logic triggered a new note.
    fn observe_note_start(&mut self, voice: u8, time: u64);

    /// The envelope reached release or the length counter expired.
    fn observe_note_end(&mut self, voice: u8, time: u64);

    /// The voice's pitch registers changed.
    fn observe_pitch(&mut self, voice: u8, time: u64);

    /// The voice's output level changed. `level` is the new envelope or
    /// volume output, since the transcriber does not emulate envelopes.
    fn observe_volume(&mut self, voice: u8, time: u64, level: u8);
}

/// Track lifecycle and output surface consumed by the driver.
pub trait Transcriber: ChipObserver {
    /// Reset all per-track state (voice states, track buffers, time base).
    /// Fails on configuration errors such as an invalid clock rate.
    fn start_track(&mut self) -> Result<()>;

    /// Load the remapping sidecar next to the music file. Returns `false`
    /// when the file does not exist, which is not an error.
    fn load_sidecar(&mut self, path: &Path) -> Result<bool>;

    /// Serialize the current remapping tables so a user can edit and
    /// re-run.
    fn write_sidecar(&self, path: &Path) -> Result<()>;

    /// Number of MIDI tracks (one per chip voice).
    fn midi_track_count(&self) -> u32;

    /// Raw MTrk event bytes for track `index`.
    fn midi_track_bytes(&self, index: u32) -> &[u8];

    /// Finalize every track and stream a Type-1 SMF to `path`.
    fn write_smf(&mut self, path: &Path) -> Result<()>;
}
