//! `.n2m` sidecar file support
//!
//! A plain ASCII, line-oriented file next to the NSF describing how noise
//! periods and DMC samples map onto MIDI. Channels are 1-based in the file
//! and 0-based in memory. Unparseable lines are logged and skipped so a
//! hand-edited file can never fail the pipeline.
//!
//! ```text
//! dmc <hex_src_addr> <src_midi_note> <dest_channel_1based> <dest_note>
//! noise <hex_period> <dest_midi_note>
//! ```

use std::fs;
use std::io::Write as _;
use std::path::Path;

use tracing::warn;
use transcribe_core::{Result, TranscribeError};

use crate::remap::{DmcEntry, DmcRemap, NoiseRemap};

/// Load sidecar entries into the remap tables.
///
/// Returns `false` when the file does not exist; that is not an error and a
/// default sidecar will be generated at finalize.
pub fn load(path: &Path, noise: &mut NoiseRemap, dmc: &mut DmcRemap) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let text = fs::read_to_string(path).map_err(|source| TranscribeError::Sidecar {
        path: path.to_path_buf(),
        source,
    })?;

    for (lineno, line) in text.lines().enumerate() {
        if let Err(msg) = parse_line(line, noise, dmc) {
            warn!(
                path = %path.display(),
                line = lineno + 1,
                msg,
                "skipping sidecar line"
            );
        }
    }
    Ok(true)
}

/// Serialize the current tables so a user can edit and re-run.
pub fn write(path: &Path, noise: &NoiseRemap, dmc: &DmcRemap) -> Result<()> {
    let mut out = Vec::new();
    for (addr, entry) in dmc.iter() {
        writeln!(
            out,
            "dmc {:02X} {} {} {}",
            addr,
            entry.src_note,
            entry.channel + 1,
            entry.note
        )
        .expect("write to Vec");
    }
    for (period, note) in noise.overrides() {
        writeln!(out, "noise {period:02X} {note}").expect("write to Vec");
    }
    fs::write(path, out).map_err(|source| TranscribeError::Sidecar {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_line(line: &str, noise: &mut NoiseRemap, dmc: &mut DmcRemap) -> std::result::Result<(), String> {
    let mut fields = line.split_whitespace();
    let Some(kind) = fields.next() else {
        return Ok(()); // blank line
    };
    match kind {
        "dmc" => {
            let addr = hex_field(fields.next(), "src address")?;
            let src_note = dec_field(fields.next(), "source note")?;
            let channel = dec_field(fields.next(), "channel")?;
            let note = dec_field(fields.next(), "note")?;
            if !(1..=16).contains(&channel) {
                return Err(format!("channel {channel} outside 1-16"));
            }
            dmc.set(
                addr,
                DmcEntry {
                    src_note,
                    channel: channel - 1,
                    note,
                },
            );
            Ok(())
        }
        "noise" => {
            let period = hex_field(fields.next(), "period")?;
            let note = dec_field(fields.next(), "note")?;
            noise.set(period, note);
            Ok(())
        }
        other => Err(format!("unknown entry kind {other:?}")),
    }
}

fn hex_field(field: Option<&str>, what: &str) -> std::result::Result<u8, String> {
    let field = field.ok_or_else(|| format!("missing {what}"))?;
    u8::from_str_radix(field, 16).map_err(|_| format!("bad hex {what} {field:?}"))
}

fn dec_field(field: Option<&str>, what: &str) -> std::result::Result<u8, String> {
    let field = field.ok_or_else(|| format!("missing {what}"))?;
    field.parse().map_err(|_| format!("bad {what} {field:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_text(text: &str) -> (NoiseRemap, DmcRemap) {
        let mut noise = NoiseRemap::new();
        let mut dmc = DmcRemap::new();
        for line in text.lines() {
            let _ = parse_line(line, &mut noise, &mut dmc);
        }
        (noise, dmc)
    }

    #[test]
    fn parses_noise_and_dmc_entries() {
        let (noise, dmc) = parse_text("noise 04 38\ndmc 10 60 11 36\n");
        assert_eq!(noise.note(0x04), 38);
        assert_eq!(
            dmc.get(0x10),
            Some(&DmcEntry {
                src_note: 60,
                channel: 10,
                note: 36
            })
        );
    }

    #[test]
    fn unknown_and_malformed_lines_are_skipped() {
        let (noise, dmc) = parse_text("bogus 1 2 3\nnoise zz 38\ndmc 10 60 0 36\n\n");
        assert_eq!(noise.note(0x04), crate::remap::NOISE_PERCUSSION[4]);
        assert!(dmc.is_empty());
    }

    #[test]
    fn round_trip_preserves_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.n2m");

        let (mut noise, mut dmc) = parse_text("noise 04 38\nnoise 1F 35\ndmc 20 60 12 41\n");
        dmc.set(
            0x10,
            DmcEntry {
                src_note: 60,
                channel: 10,
                note: 36,
            },
        );
        write(&path, &noise, &dmc).unwrap();

        let mut noise2 = NoiseRemap::new();
        let mut dmc2 = DmcRemap::new();
        assert!(load(&path, &mut noise2, &mut dmc2).unwrap());

        assert_eq!(
            noise.overrides().collect::<Vec<_>>(),
            noise2.overrides().collect::<Vec<_>>()
        );
        assert_eq!(
            dmc.iter().map(|(a, e)| (a, *e)).collect::<Vec<_>>(),
            dmc2.iter().map(|(a, e)| (a, *e)).collect::<Vec<_>>()
        );

        // Second generation is byte-identical.
        let first = fs::read(&path).unwrap();
        write(&path, &noise2, &dmc2).unwrap();
        assert_eq!(first, fs::read(&path).unwrap());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut noise = NoiseRemap::new();
        let mut dmc = DmcRemap::new();
        assert!(!load(&dir.path().join("absent.n2m"), &mut noise, &mut dmc).unwrap());
    }
}
