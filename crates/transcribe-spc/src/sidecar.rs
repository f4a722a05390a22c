//! `.spm` sidecar file support
//!
//! Line-oriented sample metadata next to the SPC dump. Channels and notes
//! are decimal, sample ids hexadecimal. Unparseable lines are logged and
//! skipped.
//!
//! ```text
//! sample <hex_sample_id> melodic <patch> <transpose>
//! sample <hex_sample_id> percussion <note>
//! ```

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::str::FromStr;

use tracing::warn;
use transcribe_core::{Result, TranscribeError};

use crate::sample::SampleTable;

/// Load sample mappings into the table. Returns `false` when the file
/// does not exist.
pub fn load(path: &Path, samples: &mut SampleTable) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let text = fs::read_to_string(path).map_err(|source| TranscribeError::Sidecar {
        path: path.to_path_buf(),
        source,
    })?;

    for (lineno, line) in text.lines().enumerate() {
        if let Err(msg) = parse_line(line, samples) {
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

/// Serialize every configured or used sample.
pub fn write(path: &Path, samples: &SampleTable) -> Result<()> {
    let mut out = Vec::new();
    for (id, entry) in samples.persistent() {
        if entry.percussion_note > 0 {
            writeln!(out, "sample {id:02X} percussion {}", entry.percussion_note)
                .expect("write to Vec");
        } else {
            writeln!(
                out,
                "sample {id:02X} melodic {} {}",
                entry.melodic_patch, entry.melodic_transpose
            )
            .expect("write to Vec");
        }
    }
    fs::write(path, out).map_err(|source| TranscribeError::Sidecar {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_line(line: &str, samples: &mut SampleTable) -> std::result::Result<(), String> {
    let mut fields = line.split_whitespace();
    let Some(kind) = fields.next() else {
        return Ok(()); // blank line
    };
    if kind != "sample" {
        return Err(format!("unknown entry kind {kind:?}"));
    }

    let id = fields.next().ok_or_else(|| "missing sample id".to_string())?;
    let id = u8::from_str_radix(id, 16).map_err(|_| format!("bad hex sample id {id:?}"))?;

    match fields.next() {
        Some("melodic") => {
            let patch: u8 = parse_field(fields.next(), "patch")?;
            let transpose: i16 = parse_field(fields.next(), "transpose")?;
            if patch > 127 {
                return Err(format!("patch {patch} outside 0-127"));
            }
            samples.set_melodic(id, patch, transpose);
            Ok(())
        }
        Some("percussion") => {
            let note: u8 = parse_field(fields.next(), "note")?;
            if note == 0 || note > 127 {
                return Err(format!("percussion note {note} outside 1-127"));
            }
            samples.set_percussion(id, note);
            Ok(())
        }
        other => Err(format!("unknown sample mode {other:?}")),
    }
}

fn parse_field<T: FromStr>(field: Option<&str>, what: &str) -> std::result::Result<T, String> {
    let field = field.ok_or_else(|| format!("missing {what}"))?;
    field.parse().map_err(|_| format!("bad {what} {field:?}"))
}
