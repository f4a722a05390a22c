//! NES APU voice-state tracking and MIDI event synthesis
//!
//! Five voices map onto MIDI as follows: the two squares spread over
//! channels 0-7 (four duty cycles each), triangle takes channel 8, noise
//! lands on the General MIDI drum channel 9, and DMC samples are assigned
//! channels 10-15 from a pool keyed by their sample-address register. Each
//! voice owns one MTrk buffer.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use midi_smf::MidiTrack;
use tracing::{debug, trace, warn};
use transcribe_core::{
    ChipObserver, Result, TimeBase, Transcriber, TranscribeError, FRAMES_PER_SECOND,
    TICKS_PER_FRAME,
};

use crate::period::{PeriodNoteTable, ANCHOR_SQUARE, ANCHOR_TRIANGLE};
use crate::remap::{DmcChannels, DmcEntry, DmcRemap, NoiseRemap};
use crate::sidecar;

/// NTSC 2A03 CPU clock rate in Hz.
pub const NTSC_CLOCK_HZ: f64 = 1_789_772.727_272_727;

/// APU voices: square 1, square 2, triangle, noise, DMC.
pub const VOICE_COUNT: usize = 5;

const CH_TRIANGLE: u8 = 8;
const CH_PERCUSSION: u8 = 9;

/// Fixed note-on velocity where loudness rides on CC 7 instead.
const VELOCITY_SQUARE: u8 = 112;
const VELOCITY_TRIANGLE: u8 = 64;
const VELOCITY_DMC: u8 = 112;

/// Destination note for DMC samples without a sidecar entry.
const DMC_DEFAULT_NOTE: u8 = 60;

/// APU oscillator kinds. Channel and velocity formulas dispatch on this
/// tag; the period tables supply the per-variant anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Oscillator {
    Square { index: u8 },
    Triangle,
    Noise,
    Dmc,
}

impl Oscillator {
    fn from_voice(voice: u8) -> Option<Self> {
        match voice {
            0 | 1 => Some(Self::Square { index: voice }),
            2 => Some(Self::Triangle),
            3 => Some(Self::Noise),
            4 => Some(Self::Dmc),
            _ => None,
        }
    }
}

/// Per-voice MIDI shadow state. `note == 0` means nothing is sounding.
#[derive(Debug, Clone, Copy, Default)]
struct VoiceState {
    /// MIDI channel of the sounding note
    channel: u8,
    /// Sounding MIDI note, 0 when silent
    note: u8,
    /// Period register value behind the sounding note
    period: u16,
    /// Last observed envelope/volume output (0-15)
    level: u8,
    /// Cumulative emulator cycles across track segments
    abs_time: u64,
}

/// Observes an emulated NES APU and transcribes its five voices to MIDI.
pub struct NesTranscriber {
    clock_rate: f64,
    timebase: TimeBase,
    square_table: PeriodNoteTable,
    triangle_table: PeriodNoteTable,
    noise: NoiseRemap,
    dmc: DmcRemap,
    dmc_channels: DmcChannels,
    /// Shadow of the four writable registers per voice
    regs: [[u8; 4]; VOICE_COUNT],
    voices: [VoiceState; VOICE_COUNT],
    /// Last CC 7 value emitted per MIDI channel
    cc_volume: [u8; 16],
    tracks: Vec<MidiTrack>,
}

impl NesTranscriber {
    pub fn new() -> Self {
        let timebase =
            TimeBase::from_clock_rate(FRAMES_PER_SECOND, TICKS_PER_FRAME, NTSC_CLOCK_HZ)
                .expect("NTSC clock rate is valid");
        let mut this = Self {
            clock_rate: NTSC_CLOCK_HZ,
            timebase,
            square_table: PeriodNoteTable::build(NTSC_CLOCK_HZ, ANCHOR_SQUARE),
            triangle_table: PeriodNoteTable::build(NTSC_CLOCK_HZ, ANCHOR_TRIANGLE),
            noise: NoiseRemap::new(),
            dmc: DmcRemap::new(),
            dmc_channels: DmcChannels::new(),
            regs: [[0; 4]; VOICE_COUNT],
            voices: [VoiceState::default(); VOICE_COUNT],
            cc_volume: [0; 16],
            tracks: (0..VOICE_COUNT).map(|_| MidiTrack::new()).collect(),
        };
        this.reset_voices();
        this
    }

    fn reset_voices(&mut self) {
        self.voices = [VoiceState::default(); VOICE_COUNT];
        for voice in &mut self.voices {
            // A restarted envelope begins at full level.
            voice.level = 15;
        }
    }

    fn abs_tick(&self, voice: usize, time: u64) -> u64 {
        self.timebase
            .absolute_tick(self.voices[voice].abs_time + time)
    }

    /// 11-bit timer period of a square or triangle voice.
    fn period(&self, voice: usize) -> u16 {
        u16::from(self.regs[voice][3] & 0x07) << 8 | u16::from(self.regs[voice][2])
    }

    fn duty(&self, voice: usize) -> u8 {
        self.regs[voice][0] >> 6
    }

    /// Noise period index: 4-bit period plus the mode bit.
    fn noise_index(&self, voice: usize) -> u8 {
        (self.regs[voice][2] & 0x0F) | ((self.regs[voice][2] >> 7) << 4)
    }

    /// Current output level: the constant-volume register nibble, or the
    /// last envelope level the emulator reported.
    fn current_level(&self, voice: usize) -> u8 {
        let reg0 = self.regs[voice][0];
        if reg0 & 0x10 != 0 {
            reg0 & 0x0F
        } else {
            self.voices[voice].level.min(15)
        }
    }

    /// Resolve the MIDI channel and note a note-start lands on, or `None`
    /// when the event must be suppressed (zero period, out-of-range note).
    fn resolve_target(&mut self, osc: Oscillator, voice: usize) -> Option<(u8, u8)> {
        let melodic = |table: &PeriodNoteTable, period: u16| {
            if period == 0 {
                warn!(voice, "zero period, note suppressed");
                return None;
            }
            let note = table.note(period);
            if note > 127 {
                warn!(voice, period, note, "note out of range, suppressed");
                return None;
            }
            Some(note)
        };

        match osc {
            Oscillator::Square { index } => {
                let note = melodic(&self.square_table, self.period(voice))?;
                Some((index * 4 + self.duty(voice), note))
            }
            Oscillator::Triangle => {
                let note = melodic(&self.triangle_table, self.period(voice))?;
                Some((CH_TRIANGLE, note))
            }
            Oscillator::Noise => {
                Some((CH_PERCUSSION, self.noise.note(self.noise_index(voice))))
            }
            Oscillator::Dmc => {
                let addr = self.regs[voice][2];
                if let Some(entry) = self.dmc.get(addr) {
                    return Some((entry.channel, entry.note));
                }
                // First sighting: allocate a channel and record the default
                // mapping so it lands in the written-back sidecar.
                let channel = self.dmc_channels.channel_for(addr);
                self.dmc.set(
                    addr,
                    DmcEntry {
                        src_note: DMC_DEFAULT_NOTE,
                        channel,
                        note: DMC_DEFAULT_NOTE,
                    },
                );
                Some((channel, DMC_DEFAULT_NOTE))
            }
        }
    }

    fn emit_cc_volume(&mut self, voice: usize, channel: u8, tick: u64) {
        let value = self.current_level(voice) * 8;
        if value != self.cc_volume[channel as usize] {
            self.tracks[voice].write_cc(tick, channel, 7, value);
            self.cc_volume[channel as usize] = value;
        }
    }
}

impl Default for NesTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipObserver for NesTranscriber {
    fn observe_clock_rate(&mut self, hz: f64) {
        self.clock_rate = hz;
        match TimeBase::from_clock_rate(FRAMES_PER_SECOND, TICKS_PER_FRAME, hz) {
            Ok(timebase) => {
                self.timebase = timebase;
                self.square_table = PeriodNoteTable::build(hz, ANCHOR_SQUARE);
                self.triangle_table = PeriodNoteTable::build(hz, ANCHOR_TRIANGLE);
            }
            Err(err) => warn!(%err, "clock rate not applied"),
        }
    }

    fn observe_time(&mut self, units: u64) {
        for voice in &mut self.voices {
            voice.abs_time += units;
        }
    }

    fn observe_register(&mut self, voice: u8, reg: u8, val: u8) {
        if (voice as usize) < VOICE_COUNT && reg < 4 {
            self.regs[voice as usize][reg as usize] = val;
        }
    }

    fn observe_note_start(&mut self, voice: u8, time: u64) {
        let Some(osc) = Oscillator::from_voice(voice) else {
            warn!(voice, "note start on unknown voice");
            return;
        };
        let v = voice as usize;
        let tick = self.abs_tick(v, time);
        let Some((channel, note)) = self.resolve_target(osc, v) else {
            return;
        };

        // Envelope loudness rides on channel volume, never on channel 9.
        if let Oscillator::Square { .. } = osc {
            self.emit_cc_volume(v, channel, tick);
        }

        // End the previous note before re-striking; it may live on another
        // channel after a duty switch.
        let previous = self.voices[v];
        if previous.note != 0 {
            self.tracks[v].write_note_off(tick, previous.channel, previous.note);
            self.voices[v].note = 0;
        }

        let velocity = match osc {
            Oscillator::Square { .. } => VELOCITY_SQUARE,
            Oscillator::Triangle => VELOCITY_TRIANGLE,
            Oscillator::Noise => self.current_level(v) * 8,
            Oscillator::Dmc => VELOCITY_DMC,
        };
        if velocity == 0 {
            // A zero-velocity note-on reads as a note-off downstream.
            debug!(voice, channel, note, "silent note suppressed");
            return;
        }
        self.tracks[v].write_note_on(tick, channel, note, velocity);

        self.voices[v].channel = channel;
        self.voices[v].note = note;
        self.voices[v].period = self.period(v);
        debug!(voice, channel, note, velocity, tick, "note on");
    }

    fn observe_note_end(&mut self, voice: u8, time: u64) {
        let v = voice as usize;
        if v >= VOICE_COUNT || self.voices[v].note == 0 {
            return;
        }
        let tick = self.abs_tick(v, time);
        let state = self.voices[v];
        self.tracks[v].write_note_off(tick, state.channel, state.note);
        self.voices[v].note = 0;
        self.voices[v].period = 0;
        debug!(voice, tick, "note off");
    }

    fn observe_pitch(&mut self, voice: u8, _time: u64) {
        // Mid-note period changes are picked up by the next note start;
        // the register shadow already holds the new period.
        trace!(voice, "pitch register write");
    }

    fn observe_volume(&mut self, voice: u8, time: u64, level: u8) {
        let Some(osc) = Oscillator::from_voice(voice) else {
            return;
        };
        let v = voice as usize;
        self.voices[v].level = level;
        if let Oscillator::Square { .. } = osc {
            if self.voices[v].note != 0 {
                let channel = self.voices[v].channel;
                let tick = self.abs_tick(v, time);
                self.emit_cc_volume(v, channel, tick);
            }
        }
    }
}

impl Transcriber for NesTranscriber {
    fn start_track(&mut self) -> Result<()> {
        self.timebase =
            TimeBase::from_clock_rate(FRAMES_PER_SECOND, TICKS_PER_FRAME, self.clock_rate)?;
        self.square_table = PeriodNoteTable::build(self.clock_rate, ANCHOR_SQUARE);
        self.triangle_table = PeriodNoteTable::build(self.clock_rate, ANCHOR_TRIANGLE);
        self.regs = [[0; 4]; VOICE_COUNT];
        self.reset_voices();
        self.cc_volume = [0; 16];
        self.dmc_channels.clear();
        // Channels already pinned by sidecar entries stay reserved.
        for (addr, entry) in self.dmc.iter() {
            self.dmc_channels.reserve(addr, entry.channel);
        }
        for track in &mut self.tracks {
            track.clear();
        }
        Ok(())
    }

    fn load_sidecar(&mut self, path: &Path) -> Result<bool> {
        sidecar::load(path, &mut self.noise, &mut self.dmc)
    }

    fn write_sidecar(&self, path: &Path) -> Result<()> {
        sidecar::write(path, &self.noise, &self.dmc)
    }

    fn midi_track_count(&self) -> u32 {
        VOICE_COUNT as u32
    }

    fn midi_track_bytes(&self, index: u32) -> &[u8] {
        self.tracks[index as usize].bytes()
    }

    fn write_smf(&mut self, path: &Path) -> Result<()> {
        for track in &mut self.tracks {
            if !track.has_end_of_track() {
                let tick = track.last_tick();
                track.write_end_of_track(tick);
            }
        }
        let io_err = |source| TranscribeError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let tracks: Vec<&[u8]> = self.tracks.iter().map(MidiTrack::bytes).collect();
        midi_smf::write_smf(BufWriter::new(file), self.timebase.division(), &tracks)
            .map_err(io_err)
    }
}
