//! SNES DSP voice-state tracking and MIDI event synthesis
//!
//! Eight voices map onto MIDI channels 0-7, except that samples marked as
//! percussion land on channel 9. The transcriber shadows the 128-byte DSP
//! register file, holds a RAM snapshot for BRR extraction, and analyzes
//! every sample the first time it sounds.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use midi_smf::MidiTrack;
use tracing::{debug, info, trace, warn};
use transcribe_core::{
    ChipObserver, Result, TimeBase, Transcriber, TranscribeError, FRAMES_PER_SECOND,
    SPC_TICK_RATIO, TICKS_PER_FRAME,
};

use crate::analysis;
use crate::brr::{self, RAM_LEN};
use crate::sample::SampleTable;
use crate::sidecar;

/// DSP voices.
pub const VOICE_COUNT: usize = 8;

/// Sample directory page register (global DSP address 0x5D).
const R_DIR: usize = 0x5D;

/// Voice register offsets within a 16-byte stride.
const V_VOLL: usize = 0x00;
const V_VOLR: usize = 0x01;
const V_PITCHL: usize = 0x02;
const V_SRCN: usize = 0x04;

const CH_PERCUSSION: u8 = 9;

/// Note-on velocity for melodic channels; loudness rides on CC 7.
const VELOCITY_MELODIC: u8 = 0x70;

/// Bends further than this many notes from the sounding note are
/// suppressed; the next note-on catches up.
const BEND_RANGE: f64 = 2.0;

/// Per-voice MIDI shadow state. `note == 0` means nothing is sounding.
#[derive(Debug, Clone, Copy, Default)]
struct VoiceState {
    /// Sample id behind the current channel/patch assignment
    sample: Option<u8>,
    /// Channel the voice currently emits on
    channel: u8,
    /// Sounding MIDI note, 0 when silent
    note: u8,
    /// Channel the sounding note was emitted on
    note_channel: u8,
    /// Pitch register value behind the sounding note
    pitch: u16,
    /// Cumulative DSP samples across track segments
    abs_time: u64,
}

/// Per-MIDI-channel dedup state, zero meaning "never emitted".
#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    patch: u8,
    volume: u8,
    pan: u8,
    wheel: u16,
}

/// Observes an emulated SNES DSP and transcribes its eight voices to MIDI.
pub struct SpcTranscriber {
    timebase: TimeBase,
    /// Shadow of the DSP register file
    regs: [u8; 128],
    /// RAM snapshot for BRR sample extraction
    ram: Box<[u8; RAM_LEN]>,
    samples: SampleTable,
    voices: [VoiceState; VOICE_COUNT],
    channels: [ChannelState; 16],
    tracks: Vec<MidiTrack>,
}

impl SpcTranscriber {
    pub fn new() -> Self {
        Self {
            timebase: TimeBase::from_sample_ratio(
                FRAMES_PER_SECOND,
                TICKS_PER_FRAME,
                SPC_TICK_RATIO,
            ),
            regs: [0; 128],
            ram: vec![0u8; RAM_LEN]
                .into_boxed_slice()
                .try_into()
                .expect("fixed RAM size"),
            samples: SampleTable::new(),
            voices: [VoiceState::default(); VOICE_COUNT],
            channels: [ChannelState::default(); 16],
            tracks: (0..VOICE_COUNT).map(|_| MidiTrack::new()).collect(),
        }
    }

    /// Install a 64 KiB audio-RAM snapshot for BRR sample extraction.
    /// Shorter snapshots leave the tail zeroed.
    pub fn load_ram(&mut self, ram: &[u8]) {
        let n = ram.len().min(RAM_LEN);
        self.ram[..n].copy_from_slice(&ram[..n]);
        self.ram[n..].fill(0);
    }

    /// The sample configuration table, including analysis results.
    pub fn samples(&self) -> &SampleTable {
        &self.samples
    }

    /// Access to the sample configuration table, e.g. to adjust mappings
    /// between tracks.
    pub fn samples_mut(&mut self) -> &mut SampleTable {
        &mut self.samples
    }

    fn abs_tick(&self, voice: usize, time: u64) -> u64 {
        self.timebase
            .absolute_tick(self.voices[voice].abs_time + time)
    }

    fn voice_reg(&self, voice: usize, offset: usize) -> u8 {
        self.regs[voice << 4 | offset]
    }

    /// 14-bit pitch register value.
    fn voice_pitch(&self, voice: usize) -> u16 {
        let base = voice << 4 | V_PITCHL;
        LittleEndian::read_u16(&self.regs[base..base + 2]) & 0x3FFF
    }

    fn voice_sample(&self, voice: usize) -> u8 {
        self.voice_reg(voice, V_SRCN)
    }

    /// Pan and velocity derived from the signed stereo volume pair. A
    /// zero volume sum yields velocity 0 so the note is effectively off.
    fn pan_velocity(&self, voice: usize) -> (u8, u8) {
        let l = i32::from(self.voice_reg(voice, V_VOLL) as i8).abs();
        let r = i32::from(self.voice_reg(voice, V_VOLR) as i8).abs();
        let pan = (64 - l + r).clamp(0, 127) as u8;
        let vel = if l + r == 0 {
            0
        } else {
            (f64::from(l + r).log2() * 17.0).round().clamp(0.0, 127.0) as u8
        };
        (pan, vel)
    }

    /// Decode and analyze a sample the first time it sounds in a track.
    fn ensure_analyzed(&mut self, sample: u8) {
        if self.samples.get(sample).used {
            return;
        }
        let decoded = brr::decode_sample(&self.ram, self.regs[R_DIR], sample);
        let result = analysis::analyze(&decoded.pcm, decoded.loop_start);
        let entry = self.samples.get_mut(sample);
        entry.used = true;
        entry.base_pitch_hz = result.base_pitch_hz;
        entry.gain_norm = result.gain_norm;
        info!(
            base_pitch_hz = result.base_pitch_hz,
            gain = result.gain_norm,
            loop_start = decoded.loop_start,
            "analyzed sample {sample:02X}"
        );
    }

    /// Emit CC 10/CC 7 for the voice's current stereo volumes when they
    /// differ from the channel's last values. Never on channel 9.
    fn emit_pan_volume(&mut self, voice: usize, channel: u8, tick: u64) {
        if channel == CH_PERCUSSION {
            return;
        }
        let (pan, vel) = self.pan_velocity(voice);
        let ch = channel as usize;
        if pan != self.channels[ch].pan {
            self.channels[ch].pan = pan;
            self.tracks[voice].write_cc(tick, channel, 10, pan);
        }
        if vel != self.channels[ch].volume {
            self.channels[ch].volume = vel;
            self.tracks[voice].write_cc(tick, channel, 7, vel);
        }
    }

    fn end_note(&mut self, voice: usize, tick: u64) {
        let state = self.voices[voice];
        if state.note == 0 {
            return;
        }
        self.tracks[voice].write_note_off(tick, state.note_channel, state.note);
        self.voices[voice].note = 0;
        self.voices[voice].pitch = 0;
    }
}

impl Default for SpcTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipObserver for SpcTranscriber {
    fn observe_clock_rate(&mut self, hz: f64) {
        // The DSP sample clock is fixed; the tick calibration does not
        // depend on the host rate.
        trace!(hz, "clock rate ignored for SPC");
    }

    fn observe_time(&mut self, units: u64) {
        for voice in &mut self.voices {
            voice.abs_time += units;
        }
    }

    /// `voice` carries the register page: voice writes use the voice
    /// index with `reg` 0x00-0x09, global writes use the high nibble of
    /// the DSP address (e.g. DIR at 0x5D arrives as voice 5, reg 0xD).
    fn observe_register(&mut self, voice: u8, reg: u8, val: u8) {
        let addr = (usize::from(voice) << 4) | (usize::from(reg) & 0x0F);
        if addr < self.regs.len() {
            self.regs[addr] = val;
        }
    }

    fn observe_note_start(&mut self, voice: u8, time: u64) {
        let v = voice as usize;
        if v >= VOICE_COUNT {
            warn!(voice, "note start on unknown voice");
            return;
        }
        let tick = self.abs_tick(v, time);
        let sample = self.voice_sample(v);
        self.ensure_analyzed(sample);

        // A sample switch moves the voice to its channel and patch.
        let channel = if self.voices[v].sample != Some(sample) {
            let channel = self.samples.get(sample).midi_channel(voice);
            self.tracks[v].write_meta_text(tick, 0x01, format!("sample {sample:02X}").as_bytes());
            self.voices[v].sample = Some(sample);
            self.voices[v].channel = channel;

            let patch = self.samples.get(sample).midi_patch();
            if patch != self.channels[channel as usize].patch {
                self.tracks[v].write_program(tick, channel, patch);
                self.channels[channel as usize].patch = patch;
            }
            channel
        } else {
            self.voices[v].channel
        };

        self.emit_pan_volume(v, channel, tick);

        let pitch = self.voice_pitch(v);
        let Some(n) = self.samples.get(sample).midi_note(pitch) else {
            warn!(voice, sample, pitch, "no usable pitch, note suppressed");
            self.end_note(v, tick);
            return;
        };
        let note = n.round();
        if !(0.0..=127.0).contains(&note) {
            warn!(voice, note = n, "note out of range, suppressed");
            self.end_note(v, tick);
            return;
        }
        let note = note as u8;

        let (_, vel) = self.pan_velocity(v);
        let velocity = if channel == CH_PERCUSSION {
            vel
        } else {
            VELOCITY_MELODIC
        };

        self.end_note(v, tick);
        if velocity == 0 {
            debug!(voice, channel, note, "silent note suppressed");
            return;
        }
        self.tracks[v].write_note_on(tick, channel, note, velocity);
        self.voices[v].note = note;
        self.voices[v].note_channel = channel;
        self.voices[v].pitch = pitch;
        debug!(voice, channel, note, velocity, tick, "note on");
    }

    fn observe_note_end(&mut self, voice: u8, time: u64) {
        let v = voice as usize;
        if v >= VOICE_COUNT {
            return;
        }
        let tick = self.abs_tick(v, time);
        self.end_note(v, tick);
    }

    fn observe_pitch(&mut self, voice: u8, time: u64) {
        let v = voice as usize;
        if v >= VOICE_COUNT {
            return;
        }
        let state = self.voices[v];
        if state.note == 0 || state.note_channel == CH_PERCUSSION {
            return;
        }
        let pitch = self.voice_pitch(v);
        if pitch == state.pitch {
            return;
        }
        self.voices[v].pitch = pitch;

        let Some(sample) = state.sample else {
            return;
        };
        let Some(n) = self.samples.get(sample).midi_note(pitch) else {
            return;
        };
        let delta = n - f64::from(state.note);
        if delta.abs() > BEND_RANGE {
            // Out of nominal bend range; the next note-on catches up.
            trace!(voice, delta, "bend out of range");
            return;
        }
        let wheel = (0x2000 + (delta * 4095.0).round() as i32).clamp(0, 0x3FFF) as u16;
        let channel = state.note_channel;
        if wheel != self.channels[channel as usize].wheel {
            let tick = self.abs_tick(v, time);
            self.tracks[v].write_pitch_bend(tick, channel, wheel);
            self.channels[channel as usize].wheel = wheel;
        }
    }

    fn observe_volume(&mut self, voice: u8, time: u64, _level: u8) {
        let v = voice as usize;
        if v >= VOICE_COUNT || self.voices[v].note == 0 {
            return;
        }
        let channel = self.voices[v].note_channel;
        let tick = self.abs_tick(v, time);
        self.emit_pan_volume(v, channel, tick);
    }
}

impl Transcriber for SpcTranscriber {
    fn start_track(&mut self) -> Result<()> {
        self.regs = [0; 128];
        self.voices = [VoiceState::default(); VOICE_COUNT];
        self.channels = [ChannelState::default(); 16];
        self.samples.reset_usage();
        for track in &mut self.tracks {
            track.clear();
        }
        Ok(())
    }

    fn load_sidecar(&mut self, path: &Path) -> Result<bool> {
        sidecar::load(path, &mut self.samples)
    }

    fn write_sidecar(&self, path: &Path) -> Result<()> {
        sidecar::write(path, &self.samples)
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
