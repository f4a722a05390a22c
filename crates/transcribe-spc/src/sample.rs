//! Per-sample MIDI configuration
//!
//! Every BRR sample id (0-255) carries how it should be rendered in MIDI:
//! either a melodic patch with a transpose correction, or a fixed
//! percussion note on channel 9. The pitch analysis fills in the base
//! frequency the first time a sample sounds.

/// Number of sample directory entries.
pub const SAMPLE_COUNT: usize = 256;

/// MIDI pitch register full-scale: 0x1000 plays the sample at its
/// recorded rate.
const PITCH_UNITY: f64 = 4096.0;

/// Offset aligning `log2(hz) * 12` with MIDI note numbers for 32 kHz
/// playback.
const NOTE_BIAS: f64 = 36.25;

/// How one sample id maps onto MIDI.
///
/// `percussion_note > 0` and the melodic fields are mutually exclusive;
/// percussion wins.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SampleConfig {
    /// Sample has sounded in the current track (analysis ran)
    pub used: bool,
    /// Sample has an explicit sidecar/user mapping
    pub configured: bool,
    /// General MIDI program for melodic rendering
    pub melodic_patch: u8,
    /// Note-number correction applied on top of the detected pitch
    pub melodic_transpose: i16,
    /// Percussion note on channel 9; 0 means melodic
    pub percussion_note: u8,
    /// Detected fundamental of the sample data in Hz
    pub base_pitch_hz: f64,
    /// Peak amplitude relative to full scale
    pub gain_norm: f64,
}

impl SampleConfig {
    /// MIDI channel a note for this sample lands on.
    pub fn midi_channel(&self, voice: u8) -> u8 {
        if self.percussion_note > 0 {
            9
        } else {
            voice
        }
    }

    /// Program emitted when the sample first appears on a channel.
    pub fn midi_patch(&self) -> u8 {
        if self.percussion_note > 0 {
            0
        } else {
            self.melodic_patch
        }
    }

    /// Fractional MIDI note for a 14-bit pitch register value.
    ///
    /// `None` for a zero pitch or an unanalyzed melodic sample; the
    /// caller suppresses the event.
    pub fn midi_note(&self, pitch: u16) -> Option<f64> {
        if pitch == 0 {
            return None;
        }
        if self.percussion_note > 0 {
            return Some(f64::from(self.percussion_note));
        }
        if self.base_pitch_hz <= 0.0 {
            return None;
        }
        let scale = f64::from(pitch) / PITCH_UNITY;
        Some(
            (self.base_pitch_hz * scale).log2() * 12.0 - NOTE_BIAS
                + f64::from(self.melodic_transpose),
        )
    }
}

/// The 256-entry sample configuration table.
#[derive(Debug, Clone)]
pub struct SampleTable {
    entries: Vec<SampleConfig>,
}

impl SampleTable {
    pub fn new() -> Self {
        Self {
            entries: vec![SampleConfig::default(); SAMPLE_COUNT],
        }
    }

    pub fn get(&self, id: u8) -> &SampleConfig {
        &self.entries[usize::from(id)]
    }

    pub fn get_mut(&mut self, id: u8) -> &mut SampleConfig {
        &mut self.entries[usize::from(id)]
    }

    pub fn set_melodic(&mut self, id: u8, patch: u8, transpose: i16) {
        let entry = self.get_mut(id);
        entry.configured = true;
        entry.melodic_patch = patch;
        entry.melodic_transpose = transpose;
        entry.percussion_note = 0;
    }

    pub fn set_percussion(&mut self, id: u8, note: u8) {
        let entry = self.get_mut(id);
        entry.configured = true;
        entry.percussion_note = note;
    }

    /// Entries worth persisting: configured by the user or sounded in
    /// this track.
    pub fn persistent(&self) -> impl Iterator<Item = (u8, &SampleConfig)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.configured || e.used)
            .map(|(i, e)| (i as u8, e))
    }

    /// Forget which samples have sounded; analysis reruns next track.
    pub fn reset_usage(&mut self) {
        for entry in &mut self.entries {
            entry.used = false;
        }
    }
}

impl Default for SampleTable {
    fn default() -> Self {
        Self::new()
    }
}
