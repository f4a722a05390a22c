//! Noise-period and DMC-sample remapping tables
//!
//! The noise voice lands on MIDI channel 9 (General MIDI drums) with a
//! period-indexed percussion note; the DMC voice gets a MIDI channel from a
//! small pool keyed by its sample-address register. Both tables can be
//! overridden from the sidecar file and are written back at finalize.

use std::collections::BTreeMap;

use tracing::warn;

/// Number of noise period indices: 4-bit period plus the mode bit.
pub const NOISE_PERIOD_COUNT: usize = 32;

/// Default General MIDI percussion note per noise period index.
///
/// Index = period nibble | mode bit << 4. Short white-noise periods sound
/// like hats and shakers, long ones like toms and kicks; the looped-noise
/// (mode 1) half leans metallic.
pub const NOISE_PERCUSSION: [u8; NOISE_PERIOD_COUNT] = [
    // mode 0: white noise
    51, 42, 42, 44, 46, 46, 38, 38, 40, 40, 41, 45, 47, 43, 36, 35,
    // mode 1: looped noise
    37, 39, 54, 56, 69, 70, 75, 76, 77, 60, 61, 63, 64, 65, 66, 62,
];

/// Noise period index → percussion note, defaults plus sidecar overrides.
#[derive(Debug, Clone)]
pub struct NoiseRemap {
    notes: [u8; NOISE_PERIOD_COUNT],
}

impl NoiseRemap {
    pub fn new() -> Self {
        Self {
            notes: NOISE_PERCUSSION,
        }
    }

    pub fn note(&self, period_index: u8) -> u8 {
        self.notes[period_index as usize & (NOISE_PERIOD_COUNT - 1)]
    }

    /// Override one period's percussion note. Out-of-range entries are
    /// dropped with a warning.
    pub fn set(&mut self, period_index: u8, note: u8) {
        if period_index as usize >= NOISE_PERIOD_COUNT || note > 127 {
            warn!(period_index, note, "noise remap entry out of range, skipped");
            return;
        }
        self.notes[period_index as usize] = note;
    }

    /// Entries that differ from the built-in defaults, in index order.
    pub fn overrides(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.notes
            .iter()
            .enumerate()
            .filter(|&(i, &n)| n != NOISE_PERCUSSION[i])
            .map(|(i, &n)| (i as u8, n))
    }
}

impl Default for NoiseRemap {
    fn default() -> Self {
        Self::new()
    }
}

/// One DMC remapping: the note the sample was judged to play, and the
/// channel/note it should land on in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmcEntry {
    /// Implicit source note recorded for the user's reference
    pub src_note: u8,
    /// Destination MIDI channel, 0-based
    pub channel: u8,
    /// Destination MIDI note
    pub note: u8,
}

/// DMC sample-address register value → destination mapping.
#[derive(Debug, Clone, Default)]
pub struct DmcRemap {
    entries: BTreeMap<u8, DmcEntry>,
}

impl DmcRemap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr_reg: u8) -> Option<&DmcEntry> {
        self.entries.get(&addr_reg)
    }

    pub fn set(&mut self, addr_reg: u8, entry: DmcEntry) {
        if entry.channel > 15 || entry.note > 127 || entry.src_note > 127 {
            warn!(addr_reg, ?entry, "dmc remap entry out of range, skipped");
            return;
        }
        self.entries.insert(addr_reg, entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &DmcEntry)> {
        self.entries.iter().map(|(&addr, entry)| (addr, entry))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Number of MIDI channels reserved for DMC samples (10 through 15).
const DMC_SLOT_COUNT: usize = 6;

/// First MIDI channel of the DMC pool.
const DMC_FIRST_CHANNEL: u8 = 10;

/// Free-slot allocation of MIDI channels 10-15, keyed by the DMC
/// sample-address register. First sighting of an address takes a free
/// slot; once the pool is exhausted further samples share channel 15.
#[derive(Debug, Clone, Default)]
pub struct DmcChannels {
    slots: [Option<u8>; DMC_SLOT_COUNT],
}

impl DmcChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_for(&mut self, addr_reg: u8) -> u8 {
        if let Some(i) = self.slots.iter().position(|&s| s == Some(addr_reg)) {
            return DMC_FIRST_CHANNEL + i as u8;
        }
        if let Some(i) = self.slots.iter().position(Option::is_none) {
            self.slots[i] = Some(addr_reg);
            return DMC_FIRST_CHANNEL + i as u8;
        }
        warn!(
            addr_reg,
            "dmc channel pool exhausted, falling back to channel 15"
        );
        15
    }

    /// Pin an address to a channel already fixed by a remap entry, so
    /// later allocations skip that slot. Channels outside the pool are
    /// ignored.
    pub fn reserve(&mut self, addr_reg: u8, channel: u8) {
        if let Some(slot) = channel
            .checked_sub(DMC_FIRST_CHANNEL)
            .and_then(|i| self.slots.get_mut(i as usize))
        {
            *slot = Some(addr_reg);
        }
    }

    pub fn clear(&mut self) {
        self.slots = [None; DMC_SLOT_COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_defaults_and_overrides() {
        let mut remap = NoiseRemap::new();
        assert_eq!(remap.note(0x04), NOISE_PERCUSSION[4]);
        remap.set(0x04, 38);
        assert_eq!(remap.note(0x04), 38);
        assert_eq!(remap.overrides().collect::<Vec<_>>(), vec![(4, 38)]);
    }

    #[test]
    fn noise_rejects_out_of_range() {
        let mut remap = NoiseRemap::new();
        remap.set(0x04, 200);
        remap.set(40, 38);
        assert_eq!(remap.note(0x04), NOISE_PERCUSSION[4]);
        assert_eq!(remap.overrides().count(), 0);
    }

    #[test]
    fn dmc_channels_allocate_in_order_and_reuse() {
        let mut pool = DmcChannels::new();
        assert_eq!(pool.channel_for(0x10), 10);
        assert_eq!(pool.channel_for(0x20), 11);
        assert_eq!(pool.channel_for(0x10), 10);
        assert_eq!(pool.channel_for(0x30), 12);
    }

    #[test]
    fn dmc_channels_respect_reservations() {
        let mut pool = DmcChannels::new();
        pool.reserve(0x40, 10);
        pool.reserve(0x50, 3); // outside the pool, ignored
        assert_eq!(pool.channel_for(0x10), 11);
        assert_eq!(pool.channel_for(0x40), 10);
    }

    #[test]
    fn dmc_channels_overflow_to_15() {
        let mut pool = DmcChannels::new();
        for (i, addr) in (0..6u8).enumerate() {
            assert_eq!(pool.channel_for(addr), 10 + i as u8);
        }
        assert_eq!(pool.channel_for(0x77), 15);
        // Known addresses keep their slots.
        assert_eq!(pool.channel_for(2), 12);
    }
}
