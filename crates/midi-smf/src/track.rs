//! Per-voice MTrk event buffer
//!
//! Each chip voice owns one `MidiTrack`. Events are appended with absolute
//! tick positions; the track converts them to the delta times SMF requires
//! and keeps the running cursor.

use crate::vlq;

/// Initial buffer reserve, sized from measured typical track sizes.
const INITIAL_CAPACITY: usize = 30 * 1024;

/// End-of-track meta event, without the leading delta time.
const END_OF_TRACK: [u8; 3] = [0xFF, 0x2F, 0x00];

/// A growable MTrk event buffer with an absolute-tick cursor.
///
/// All writes must be monotonic in `abs_tick`; a write earlier than the
/// cursor is a caller bug and is clamped to a zero delta.
#[derive(Debug, Clone)]
pub struct MidiTrack {
    /// Encoded event bytes, strictly following SMF MTrk encoding
    buf: Vec<u8>,

    /// Absolute tick of the most recently written event
    last_tick: u64,
}

impl MidiTrack {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(INITIAL_CAPACITY),
            last_tick: 0,
        }
    }

    /// Encode `abs_tick - last_tick` as a VLQ delta and advance the cursor.
    fn write_delta(&mut self, abs_tick: u64) {
        debug_assert!(
            abs_tick >= self.last_tick,
            "non-monotonic write: {abs_tick} < {}",
            self.last_tick
        );
        let delta = abs_tick.saturating_sub(self.last_tick);
        vlq::encode_into(&mut self.buf, delta.min(u64::from(vlq::MAX)) as u32);
        self.last_tick = self.last_tick.max(abs_tick);
    }

    pub fn write_note_on(&mut self, abs_tick: u64, channel: u8, note: u8, velocity: u8) {
        self.write_delta(abs_tick);
        self.buf
            .extend_from_slice(&[0x90 | channel & 0x0F, note & 0x7F, velocity & 0x7F]);
    }

    pub fn write_note_off(&mut self, abs_tick: u64, channel: u8, note: u8) {
        self.write_delta(abs_tick);
        self.buf
            .extend_from_slice(&[0x80 | channel & 0x0F, note & 0x7F, 0x00]);
    }

    pub fn write_cc(&mut self, abs_tick: u64, channel: u8, controller: u8, value: u8) {
        self.write_delta(abs_tick);
        self.buf
            .extend_from_slice(&[0xB0 | channel & 0x0F, controller & 0x7F, value & 0x7F]);
    }

    pub fn write_program(&mut self, abs_tick: u64, channel: u8, program: u8) {
        self.write_delta(abs_tick);
        self.buf
            .extend_from_slice(&[0xC0 | channel & 0x0F, program & 0x7F]);
    }

    /// `wheel` is the 14-bit pitch wheel position, 0x2000 = centered.
    pub fn write_pitch_bend(&mut self, abs_tick: u64, channel: u8, wheel: u16) {
        let wheel = wheel.min(0x3FFF);
        self.write_delta(abs_tick);
        self.buf.extend_from_slice(&[
            0xE0 | channel & 0x0F,
            (wheel & 0x7F) as u8,
            (wheel >> 7) as u8,
        ]);
    }

    /// Meta event of the given kind (0x01 = text) with raw payload bytes.
    pub fn write_meta_text(&mut self, abs_tick: u64, kind: u8, text: &[u8]) {
        self.write_delta(abs_tick);
        self.buf.extend_from_slice(&[0xFF, kind & 0x7F]);
        vlq::encode_into(&mut self.buf, text.len().min(vlq::MAX as usize) as u32);
        self.buf.extend_from_slice(text);
    }

    pub fn write_end_of_track(&mut self, abs_tick: u64) {
        self.write_delta(abs_tick);
        self.buf.extend_from_slice(&END_OF_TRACK);
    }

    /// True when the buffer already terminates with the end-of-track meta.
    pub fn has_end_of_track(&self) -> bool {
        self.buf.ends_with(&END_OF_TRACK)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    /// Discard all events and reset the cursor for a new track segment.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.last_tick = 0;
    }
}

impl Default for MidiTrack {
    fn default() -> Self {
        Self::new()
    }
}
