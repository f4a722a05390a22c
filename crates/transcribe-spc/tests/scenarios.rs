//! End-to-end SPC transcription scenarios driven through the public
//! observer and façade traits, with BRR sample data planted in a RAM
//! snapshot.

use std::collections::HashMap;
use std::f64::consts::TAU;

use midi_smf::vlq;
use transcribe_core::{ChipObserver, Transcriber};
use transcribe_spc::SpcTranscriber;

const DIR_PAGE: u8 = 0x02;
const SAMPLE_ID: u8 = 0x03;
const SAMPLE_START: u16 = 0x0300;

/// Frequency that sounds exactly MIDI note 69 at unity pitch (0x1000):
/// `2^(105.25 / 12)`, about 437.06 Hz.
fn note69_hz() -> f64 {
    (105.25f64 / 12.0).exp2()
}

/// BRR-encode a sine wave as 1024 filter-0 blocks looping to the start.
fn sine_ram(freq: f64) -> Vec<u8> {
    let mut ram = vec![0u8; 0x10000];
    let dir = (usize::from(DIR_PAGE) << 8) + usize::from(SAMPLE_ID) * 4;
    ram[dir..dir + 2].copy_from_slice(&SAMPLE_START.to_le_bytes());
    ram[dir + 2..dir + 4].copy_from_slice(&SAMPLE_START.to_le_bytes());

    let blocks = 1024;
    for b in 0..blocks {
        let addr = usize::from(SAMPLE_START) + b * 9;
        // shift 12, filter 0; end + loop flags on the final block
        ram[addr] = if b == blocks - 1 { 0xC3 } else { 0xC0 };
        for i in 0..16 {
            let n = (b * 16 + i) as f64;
            let s = (TAU * freq * n / 32_000.0).sin();
            let nibble = ((s * 7.0).round() as i8).clamp(-8, 7) as u8 & 0x0F;
            let byte = addr + 1 + i / 2;
            if i % 2 == 0 {
                ram[byte] |= nibble << 4;
            } else {
                ram[byte] |= nibble;
            }
        }
    }
    ram
}

/// Decode a raw MTrk event stream into (absolute tick, event bytes).
fn decode_events(mut bytes: &[u8]) -> Vec<(u64, Vec<u8>)> {
    let mut events = Vec::new();
    let mut tick = 0u64;
    while !bytes.is_empty() {
        let (delta, used) = vlq::decode(bytes).expect("valid delta");
        bytes = &bytes[used..];
        tick += u64::from(delta);
        let len = match bytes[0] & 0xF0 {
            0xC0 => 2,
            0xF0 => {
                let (n, used) = vlq::decode(&bytes[2..]).expect("meta length");
                2 + used + n as usize
            }
            _ => 3,
        };
        events.push((tick, bytes[..len].to_vec()));
        bytes = &bytes[len..];
    }
    events
}

/// Transcriber with the sine sample installed and voice 0 set up at the
/// given pitch register value.
fn with_sine_note(pitch: u16) -> SpcTranscriber {
    let mut t = SpcTranscriber::new();
    t.load_ram(&sine_ram(note69_hz()));
    t.start_track().unwrap();
    t.observe_register(5, 0x0D, DIR_PAGE);
    t.observe_register(0, 0x00, 0x40); // volL
    t.observe_register(0, 0x01, 0x40); // volR
    t.observe_register(0, 0x04, SAMPLE_ID);
    t.observe_register(0, 0x02, (pitch & 0xFF) as u8);
    t.observe_register(0, 0x03, (pitch >> 8) as u8);
    t
}

#[test]
fn s4_first_use_analyzes_sample_and_emits_meta_text() {
    let mut t = with_sine_note(0x1000);
    t.observe_note_start(0, 0);

    let base = t.samples().get(SAMPLE_ID).base_pitch_hz;
    assert!(
        (base - note69_hz()).abs() < 2.0,
        "detected {base}, expected ~{}",
        note69_hz()
    );

    let events = decode_events(t.midi_track_bytes(0));
    let meta = events
        .iter()
        .find(|(_, e)| e[0] == 0xFF && e[1] == 0x01)
        .expect("meta text at first use");
    assert_eq!(&meta.1[3..], b"sample 03");

    // Pan and channel volume precede the note, which sounds note 69.
    assert!(events.iter().any(|(_, e)| e[0] == 0xB0 && e[1] == 10));
    assert!(events.iter().any(|(_, e)| e[0] == 0xB0 && e[1] == 7));
    let note_on = events.iter().find(|(_, e)| e[0] == 0x90).unwrap();
    assert_eq!(note_on.1[1], 69);
    assert_eq!(note_on.1[2], 0x70);
}

#[test]
fn analysis_runs_once_per_sample() {
    let mut t = with_sine_note(0x1000);
    t.observe_note_start(0, 0);
    t.observe_note_end(0, 1000);
    t.observe_note_start(0, 2000);

    let events = decode_events(t.midi_track_bytes(0));
    let metas = events.iter().filter(|(_, e)| e[0] == 0xFF).count();
    assert_eq!(metas, 1, "meta text only on the first sample sighting");
}

#[test]
fn s5_pitch_bend_within_range() {
    let mut t = with_sine_note(0x1000);
    t.observe_note_start(0, 0);

    t.observe_register(0, 0x02, 0xF0);
    t.observe_register(0, 0x03, 0x10);
    t.observe_pitch(0, 100);

    let events = decode_events(t.midi_track_bytes(0));
    let bends: Vec<u16> = events
        .iter()
        .filter(|(_, e)| e[0] & 0xF0 == 0xE0)
        .map(|(_, e)| u16::from(e[1]) | u16::from(e[2]) << 7)
        .collect();
    assert_eq!(bends.len(), 1);
    // +0.986 notes above the sounding note 69
    assert!(
        (0x2F00..=0x3000).contains(&bends[0]),
        "wheel was {:#06X}",
        bends[0]
    );
}

#[test]
fn repeated_pitch_writes_do_not_repeat_bends() {
    let mut t = with_sine_note(0x1000);
    t.observe_note_start(0, 0);
    t.observe_register(0, 0x02, 0xF0);
    t.observe_register(0, 0x03, 0x10);
    t.observe_pitch(0, 100);
    t.observe_pitch(0, 200); // register unchanged

    let events = decode_events(t.midi_track_bytes(0));
    assert_eq!(events.iter().filter(|(_, e)| e[0] & 0xF0 == 0xE0).count(), 1);
}

#[test]
fn s6_pitch_bend_out_of_range_suppressed() {
    let mut t = with_sine_note(0x1000);
    t.observe_note_start(0, 0);

    // An octave up: far outside the +/-2 note wheel range.
    t.observe_register(0, 0x02, 0x00);
    t.observe_register(0, 0x03, 0x20);
    t.observe_pitch(0, 100);

    let events = decode_events(t.midi_track_bytes(0));
    assert!(events.iter().all(|(_, e)| e[0] & 0xF0 != 0xE0));

    // The next note-on catches up at the new pitch.
    t.observe_note_start(0, 200);
    let events = decode_events(t.midi_track_bytes(0));
    let last_on = events.iter().filter(|(_, e)| e[0] == 0x90).last().unwrap();
    assert_eq!(last_on.1[1], 81);
}

#[test]
fn percussion_sample_lands_on_drum_channel() {
    let dir = tempfile::tempdir().unwrap();
    let sidecar = dir.path().join("song.spm");
    std::fs::write(&sidecar, "sample 03 percussion 38\n").unwrap();

    let mut t = with_sine_note(0x1000);
    assert!(t.load_sidecar(&sidecar).unwrap());
    t.observe_note_start(0, 0);

    let events = decode_events(t.midi_track_bytes(0));
    let note_on = events.iter().find(|(_, e)| e[0] & 0xF0 == 0x90).unwrap();
    assert_eq!(note_on.1[0], 0x99);
    assert_eq!(note_on.1[1], 38);
    assert_eq!(note_on.1[2], 119); // round(log2(128) * 17)

    // No pan or channel-volume controllers on the drum channel.
    assert!(events.iter().all(|(_, e)| e[0] & 0xF0 != 0xB0));
}

#[test]
fn melodic_transpose_shifts_output_notes() {
    let dir = tempfile::tempdir().unwrap();
    let sidecar = dir.path().join("song.spm");
    std::fs::write(&sidecar, "sample 03 melodic 80 -12\n").unwrap();

    let mut t = with_sine_note(0x1000);
    t.load_sidecar(&sidecar).unwrap();
    t.observe_note_start(0, 0);

    let events = decode_events(t.midi_track_bytes(0));
    let program = events.iter().find(|(_, e)| e[0] & 0xF0 == 0xC0).unwrap();
    assert_eq!(program.1, vec![0xC0, 80]);
    let note_on = events.iter().find(|(_, e)| e[0] & 0xF0 == 0x90).unwrap();
    assert_eq!(note_on.1[1], 57);
}

#[test]
fn silent_voice_suppresses_notes() {
    let mut t = with_sine_note(0x1000);
    let dir = tempfile::tempdir().unwrap();
    let sidecar = dir.path().join("song.spm");
    std::fs::write(&sidecar, "sample 03 percussion 38\n").unwrap();
    t.load_sidecar(&sidecar).unwrap();

    t.observe_register(0, 0x00, 0x00);
    t.observe_register(0, 0x01, 0x00);
    t.observe_note_start(0, 0);

    let events = decode_events(t.midi_track_bytes(0));
    assert!(events.iter().all(|(_, e)| e[0] & 0xF0 != 0x90));
}

#[test]
fn note_balance_holds_across_sample_switches() {
    let mut t = with_sine_note(0x1000);
    // A second sample sharing the same BRR data.
    let dir = (usize::from(DIR_PAGE) << 8) + 0x07 * 4;
    let mut ram = sine_ram(note69_hz());
    ram[dir..dir + 2].copy_from_slice(&SAMPLE_START.to_le_bytes());
    ram[dir + 2..dir + 4].copy_from_slice(&SAMPLE_START.to_le_bytes());
    t.load_ram(&ram);

    let mut time = 0u64;
    for step in 0u64..120 {
        time += 2_000;
        let voice = (step % 4) as u8;
        t.observe_register(voice, 0x00, 0x30 + (step % 3) as u8 * 8);
        t.observe_register(voice, 0x01, 0x40);
        t.observe_register(voice, 0x04, if step % 5 == 0 { 0x07 } else { SAMPLE_ID });
        t.observe_register(voice, 0x02, (step % 7) as u8 * 0x20);
        t.observe_register(voice, 0x03, 0x08 + (step % 8) as u8);
        t.observe_note_start(voice, time);
        if step % 3 == 0 {
            t.observe_note_end(voice, time + 1_000);
        }
    }
    for voice in 0..8 {
        t.observe_note_end(voice, time + 2_000);
    }

    let mut balance: HashMap<(u8, u8), i64> = HashMap::new();
    for track in 0..t.midi_track_count() {
        let mut last_tick = 0;
        for (tick, event) in decode_events(t.midi_track_bytes(track)) {
            assert!(tick >= last_tick, "delta times must be non-negative");
            last_tick = tick;
            let key = (event[0] & 0x0F, event[1]);
            match event[0] & 0xF0 {
                0x90 if event[2] > 0 => *balance.entry(key).or_default() += 1,
                0x90 | 0x80 => *balance.entry(key).or_default() -= 1,
                _ => {}
            }
        }
    }
    for (key, count) in balance {
        assert_eq!(count, 0, "unbalanced notes on channel/note {key:?}");
    }
}

#[test]
fn write_smf_produces_structurally_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song 0.mid");

    let mut t = with_sine_note(0x1000);
    t.observe_note_start(0, 0);
    t.observe_note_end(0, 32_000);
    t.write_smf(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], b"MThd");
    let ntracks = u16::from_be_bytes(bytes[10..12].try_into().unwrap());
    assert_eq!(ntracks, 8);
    assert_eq!(u16::from_be_bytes(bytes[12..14].try_into().unwrap()), 0xE250);

    let mut pos = 14;
    let mut chunks = 0;
    while pos < bytes.len() {
        assert_eq!(&bytes[pos..pos + 4], b"MTrk");
        let len = u32::from_be_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        pos += 8 + len;
        chunks += 1;
    }
    assert_eq!(pos, bytes.len());
    assert_eq!(chunks, ntracks);
}

#[test]
fn sidecar_written_at_finalize_records_used_samples() {
    let dir = tempfile::tempdir().unwrap();
    let sidecar = dir.path().join("song.spm");

    let mut t = with_sine_note(0x1000);
    t.observe_note_start(0, 0);
    t.observe_note_end(0, 1000);
    t.write_sidecar(&sidecar).unwrap();

    let text = std::fs::read_to_string(&sidecar).unwrap();
    assert_eq!(text, "sample 03 melodic 0 0\n");
}
