use std::io::{Cursor, Write};

use zip::write::FileOptions;
use zip::ZipWriter;

// ── Constants ────────────────────────────────────────────────────────────────

const ILLEGAL_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
const DEFAULT_ENTRY_NAME: &str = "image";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("no files to bundle")]
    EmptyInput,
    #[error("failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to write archive: {0}")]
    Io(#[from] std::io::Error),
}

// ── Bundling ─────────────────────────────────────────────────────────────────

/// Bundle `entries` into a single in-memory ZIP archive. Entries are written
/// in slice order, so callers get deterministic archives for a given input
/// sequence. Any entry failure aborts the whole bundle.
pub fn bundle(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, ArchiveError> {
    if entries.is_empty() {
        return Err(ArchiveError::EmptyInput);
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();

    for (name, data) in entries {
        writer.start_file(sanitize_entry_name(name), options)?;
        writer.write_all(data)?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

/// Reduce an arbitrary client-supplied filename to a safe archive entry name:
/// keep only the final path component, drop `..` sequences, and replace
/// characters that are illegal in filesystem entry names. A name that
/// sanitizes away entirely becomes `image`. This is the zip-slip guard for
/// whatever later extracts the archive.
pub fn sanitize_entry_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .replace("..", "")
        .chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) { '_' } else { c })
        .collect();

    if cleaned.is_empty() || cleaned == "." {
        DEFAULT_ENTRY_NAME.to_string()
    } else {
        cleaned
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
