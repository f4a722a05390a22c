//! Conversion from emulator-native time to MIDI ticks
//!
//! The SMF output uses SMPTE-style time code: 30 frames per second with 80
//! ticks per frame. NES transcription converts CPU cycles through the chip
//! clock rate; SPC transcription converts DSP sample indices through a
//! fixed calibration ratio.

use crate::error::{Result, TranscribeError};

/// SMPTE frames per second used by every emitted SMF
pub const FRAMES_PER_SECOND: u8 = 30;

/// Ticks per SMPTE frame used by every emitted SMF
pub const TICKS_PER_FRAME: u8 = 80;

/// Maps a DSP sample index (32 kHz) to MIDI ticks at 30 fps / 80 tpf.
///
/// Part of the contract with downstream players: the SMF division header
/// is interpreted against this calibration.
pub const SPC_TICK_RATIO: f64 = 3.590664272890485;

/// Converts a monotonic emulator time value to absolute MIDI ticks.
///
/// Ticks are `floor(units * scale_num / scale_den)`; multiplying before
/// dividing keeps whole-second cycle counts on exact tick boundaries.
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    /// SMPTE frames per second (division high byte, negated)
    frames_per_second: u8,

    /// Ticks per SMPTE frame (division low byte)
    ticks_per_frame: u8,

    scale_num: f64,
    scale_den: f64,
}

impl TimeBase {
    /// Time base for a cycle-counted chip (NES APU).
    ///
    /// `clock_rate` is the chip clock in Hz; one emulator time unit is one
    /// CPU cycle.
    pub fn from_clock_rate(
        frames_per_second: u8,
        ticks_per_frame: u8,
        clock_rate: f64,
    ) -> Result<Self> {
        if !clock_rate.is_finite() || clock_rate <= 0.0 {
            return Err(TranscribeError::Config(format!(
                "invalid clock rate: {clock_rate}"
            )));
        }
        Ok(Self {
            frames_per_second,
            ticks_per_frame,
            scale_num: f64::from(frames_per_second) * f64::from(ticks_per_frame),
            scale_den: clock_rate,
        })
    }

    /// Time base for a sample-counted chip (SNES DSP).
    ///
    /// One emulator time unit is one DSP output sample; `ratio` maps a
    /// sample index directly to MIDI ticks.
    pub fn from_sample_ratio(frames_per_second: u8, ticks_per_frame: u8, ratio: f64) -> Self {
        Self {
            frames_per_second,
            ticks_per_frame,
            scale_num: ratio,
            scale_den: 1.0,
        }
    }

    /// Absolute MIDI tick for an absolute emulator time value.
    ///
    /// Monotonically non-decreasing for non-decreasing input.
    pub fn absolute_tick(&self, units: u64) -> u64 {
        (units as f64 * self.scale_num / self.scale_den) as u64
    }

    /// SMF division word: SMPTE time code with the high bit set.
    pub fn division(&self) -> u16 {
        0x8000
            | u16::from((0x80 - self.frames_per_second) & 0x7F) << 8
            | u16::from(self.ticks_per_frame)
    }
}
