//! Append-only JSON-lines files.
//!
//! A line counts as written once its terminating newline is on disk. A crash
//! in the middle of an append can leave an unterminated last line: readers
//! skip it, and [`truncate_torn_tail`] drops it before anything new is
//! appended behind it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Complete, non-blank lines of a JSON-lines file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Lines {
    pub lines: Vec<String>,
    /// Length in bytes of an unterminated last line, 0 if the file ends cleanly.
    pub torn_tail: usize,
}

/// Append one line with a single write, then flush and fsync.
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&buf)?;
    file.flush()?;
    file.sync_data()
}

/// Read the complete lines of `path`. A missing file has no lines.
pub fn read_lines(path: &Path) -> io::Result<Lines> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Lines::default()),
        Err(e) => return Err(e),
    };

    let complete = complete_len(&bytes);
    let text = std::str::from_utf8(&bytes[..complete])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Lines {
        lines: text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect(),
        torn_tail: bytes.len() - complete,
    })
}

/// Cut an unterminated last line off `path`. Returns the number of bytes
/// removed; a missing file is left alone.
pub fn truncate_torn_tail(path: &Path) -> io::Result<u64> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let complete = complete_len(&bytes);
    if complete == bytes.len() {
        return Ok(0);
    }

    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(complete as u64)?;
    file.sync_data()?;
    Ok((bytes.len() - complete) as u64)
}

fn complete_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0)
}
