//! The text file of records an index points into.
//!
//! Records are newline-terminated lines. A record is addressed by the byte
//! offset of its first character; that offset is the value stored in the
//! tree.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::btree::Key;

/// Default number of leading characters of a record that form its key.
pub const DEFAULT_KEY_WIDTH: usize = 15;

/// Read every record of `path` and map its key to its offset.
///
/// The key is the first `key_width` characters of the line, normalized to
/// `key_size` bytes. Blank lines are skipped. When two records share a key
/// the later one wins.
pub fn load_source(
    path: &Path,
    key_width: usize,
    key_size: usize,
) -> Result<BTreeMap<Key, u64>, RecordError> {
    let file = File::open(path).map_err(|e| RecordError::io(path, e))?;
    let mut reader = BufReader::new(file);

    let mut records = BTreeMap::new();
    let mut offset = 0u64;
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| RecordError::io(path, e))?;
        if read == 0 {
            break;
        }

        let text = String::from_utf8_lossy(trim_line_ending(&line));
        if !text.trim().is_empty() {
            let raw_key: String = text.chars().take(key_width).collect();
            if records.insert(Key::normalize(&raw_key, key_size), offset).is_some() {
                tracing::warn!("duplicate key {raw_key:?} at offset {offset} replaces earlier record");
            }
        }

        offset += read as u64;
    }

    tracing::debug!("loaded {} keys from {}", records.len(), path.display());
    Ok(records)
}

/// Read the record that starts at `offset`, without its line ending.
///
/// Returns `None` if `offset` is at or past the end of the file.
pub fn read_record_at(path: &Path, offset: u64) -> Result<Option<String>, RecordError> {
    let mut file = File::open(path).map_err(|e| RecordError::io(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| RecordError::io(path, e))?;

    let mut line = Vec::new();
    let read = BufReader::new(file)
        .read_until(b'\n', &mut line)
        .map_err(|e| RecordError::io(path, e))?;
    if read == 0 {
        return Ok(None);
    }

    Ok(Some(
        String::from_utf8_lossy(trim_line_ending(&line)).into_owned(),
    ))
}

/// Append the record `"<key> <value>"` and return its offset.
///
/// The record goes on a new line unless the file is empty. The file is
/// created if it does not exist.
pub fn append_record(path: &Path, key: &str, value: &str) -> Result<u64, RecordError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RecordError::io(path, e))?;
    let size = file.metadata().map_err(|e| RecordError::io(path, e))?.len();

    let (record, offset) = if size == 0 {
        (format!("{key} {value}"), 0)
    } else {
        (format!("\n{key} {value}"), size + 1)
    };
    file.write_all(record.as_bytes())
        .map_err(|e| RecordError::io(path, e))?;
    file.sync_data().map_err(|e| RecordError::io(path, e))?;

    Ok(offset)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Errors that can occur when accessing the record file.
#[derive(Debug)]
pub enum RecordError {
    /// I/O error on the given file.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl RecordError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_source_offsets() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("records.txt");
        std::fs::write(&path, "apple one\ngrape two\nkiwi three\n").expect("write");

        let records = load_source(&path, 5, 5).expect("load");
        let entries: Vec<(String, u64)> = records
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("apple".to_string(), 0),
                ("grape".to_string(), 10),
                ("kiwi".to_string(), 20),
            ]
        );
    }

    #[test]
    fn test_load_source_key_width_and_size() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("records.txt");
        std::fs::write(&path, "ABCDEFGHIJKLMNOP rest of record\n").expect("write");

        // First 15 characters, then truncated to an 8-byte key.
        let records = load_source(&path, DEFAULT_KEY_WIDTH, 8).expect("load");
        assert_eq!(records.get(&Key::normalize("ABCDEFGH", 8)), Some(&0));

        // Padded when the key is wider than the record key.
        let records = load_source(&path, 4, 6).expect("load");
        assert_eq!(records.get(&Key::normalize("ABCD", 6)), Some(&0));
    }

    #[test]
    fn test_load_source_later_duplicate_wins() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("records.txt");
        std::fs::write(&path, "aaaa first\nbbbb second\naaaa third").expect("write");

        let records = load_source(&path, 4, 4).expect("load");
        assert_eq!(records.len(), 2);
        assert_eq!(records.get(&Key::normalize("aaaa", 4)), Some(&23));
    }

    #[test]
    fn test_load_source_skips_blank_lines_and_crlf() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("records.txt");
        std::fs::write(&path, "aaaa 1\r\n\r\nbbbb 2\r\n").expect("write");

        let records = load_source(&path, 4, 4).expect("load");
        assert_eq!(records.len(), 2);
        assert_eq!(records.get(&Key::normalize("bbbb", 4)), Some(&10));
        assert_eq!(
            read_record_at(&path, 10).expect("read"),
            Some("bbbb 2".to_string())
        );
    }

    #[test]
    fn test_load_missing_source() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("missing.txt");

        assert!(matches!(
            load_source(&path, 15, 15),
            Err(RecordError::Io { .. })
        ));
    }

    #[test]
    fn test_read_record_at() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("records.txt");
        std::fs::write(&path, "apple one\ngrape two").expect("write");

        assert_eq!(
            read_record_at(&path, 0).expect("read"),
            Some("apple one".to_string())
        );
        assert_eq!(
            read_record_at(&path, 10).expect("read"),
            Some("grape two".to_string())
        );
        assert_eq!(read_record_at(&path, 19).expect("read"), None);
        assert_eq!(read_record_at(&path, 500).expect("read"), None);
    }

    #[test]
    fn test_append_record() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("records.txt");
        std::fs::write(&path, "apple one").expect("write");

        let offset = append_record(&path, "mango", "four").expect("append");
        assert_eq!(offset, 10);
        assert_eq!(
            read_record_at(&path, offset).expect("read"),
            Some("mango four".to_string())
        );
        assert_eq!(
            std::fs::read_to_string(&path).expect("read file"),
            "apple one\nmango four"
        );
    }

    #[test]
    fn test_append_to_empty_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("new.txt");

        assert_eq!(append_record(&path, "k", "v").expect("append"), 0);
        assert_eq!(append_record(&path, "k2", "v2").expect("append"), 4);
        assert_eq!(
            std::fs::read_to_string(&path).expect("read file"),
            "k v\nk2 v2"
        );
    }
}
