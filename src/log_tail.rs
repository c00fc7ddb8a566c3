//! Incremental reader over an append-only log file.
//!
//! The simulator writes its log concurrently; each `read_new_lines` call picks
//! up whatever was appended since the previous call. A trailing fragment with
//! no newline yet is held back until the rest of the line arrives.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Errors from reading the tailed file.
#[derive(Debug)]
pub enum TailError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for TailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TailError::Open { path, source } => {
                write!(f, "failed to open log {}: {}", path.display(), source)
            }
            TailError::Read { path, source } => {
                write!(f, "failed to read log {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for TailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TailError::Open { source, .. } => Some(source),
            TailError::Read { source, .. } => Some(source),
        }
    }
}

/// Cursor state over one log file.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    /// Bytes after the last newline, kept undecoded so a character split
    /// across two reads survives intact.
    partial: Vec<u8>,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the complete lines appended since the last call.
    ///
    /// Returns `Ok(None)` while the file does not exist yet. Line terminators
    /// (`\n` or `\r\n`) are stripped; the final fragment without a newline is
    /// buffered for the next call.
    pub fn read_new_lines(&mut self) -> Result<Option<Vec<String>>, TailError> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TailError::Open {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let file_len = file
            .metadata()
            .map_err(|e| self.read_error(e))?
            .len();
        if file_len < self.offset {
            tracing::warn!(
                path = %self.path.display(),
                offset = self.offset,
                file_len,
                "log file shrank, restarting from the beginning"
            );
            self.offset = 0;
            self.partial.clear();
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| self.read_error(e))?;
        let mut new_bytes = Vec::new();
        let n = file
            .read_to_end(&mut new_bytes)
            .map_err(|e| self.read_error(e))?;
        self.offset += n as u64;

        if n == 0 {
            return Ok(Some(Vec::new()));
        }

        self.partial.extend_from_slice(&new_bytes);
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Ok(Some(Vec::new()));
        };
        let mut complete: Vec<u8> = self.partial.drain(..=last_newline).collect();
        complete.pop();

        // Serial dumps are not guaranteed to be valid UTF-8.
        let lines = complete
            .split(|&b| b == b'\n')
            .map(|line| {
                String::from_utf8_lossy(line)
                    .trim_end_matches('\r')
                    .to_string()
            })
            .collect();
        Ok(Some(lines))
    }

    /// Take the buffered fragment that never received a newline.
    ///
    /// Called once when the observation window closes so a log whose last
    /// line is unterminated still gets that line matched.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            let rest = std::mem::take(&mut self.partial);
            Some(String::from_utf8_lossy(&rest).into_owned())
        }
    }

    fn read_error(&self, source: std::io::Error) -> TailError {
        TailError::Read {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_missing_file_returns_none() {
        let dir = tempdir().unwrap();
        let mut tail = LogTail::new(dir.path().join("log.txt"));
        assert!(tail.read_new_lines().unwrap().is_none());
        assert_eq!(tail.offset(), 0);
    }

    #[test]
    fn test_reads_only_appended_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        append(&path, "first\nsecond\n");

        let mut tail = LogTail::new(&path);
        assert_eq!(tail.read_new_lines().unwrap().unwrap(), vec!["first", "second"]);
        assert_eq!(tail.offset(), 13);

        assert!(tail.read_new_lines().unwrap().unwrap().is_empty());

        append(&path, "third\n");
        assert_eq!(tail.read_new_lines().unwrap().unwrap(), vec!["third"]);
        assert_eq!(tail.offset(), 19);
    }

    #[test]
    fn test_partial_line_is_held_until_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        append(&path, "08 02 ");

        let mut tail = LogTail::new(&path);
        assert!(tail.read_new_lines().unwrap().unwrap().is_empty());
        assert_eq!(tail.offset(), 6);

        append(&path, "01 0C\nnext");
        assert_eq!(tail.read_new_lines().unwrap().unwrap(), vec!["08 02 01 0C"]);
        assert_eq!(tail.take_partial().as_deref(), Some("next"));
        assert!(tail.take_partial().is_none());
    }

    #[test]
    fn test_crlf_terminators_are_stripped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        append(&path, "a\r\nb\r\n");

        let mut tail = LogTail::new(&path);
        assert_eq!(tail.read_new_lines().unwrap().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_truncated_file_restarts_from_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        append(&path, "old line one\nold line two\n");

        let mut tail = LogTail::new(&path);
        assert_eq!(tail.read_new_lines().unwrap().unwrap().len(), 2);

        std::fs::write(&path, "new\n").unwrap();
        assert_eq!(tail.read_new_lines().unwrap().unwrap(), vec!["new"]);
        assert_eq!(tail.offset(), 4);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, b"08 02 01 0C \xff\n").unwrap();

        let mut tail = LogTail::new(&path);
        let lines = tail.read_new_lines().unwrap().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("08 02 01 0C"));
    }

    #[test]
    fn test_multibyte_char_split_across_reads_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let text = "temp 25°C\n".as_bytes();
        // Split inside the two-byte "°".
        let split = text.iter().position(|&b| b == 0xC2).unwrap() + 1;
        std::fs::write(&path, &text[..split]).unwrap();

        let mut tail = LogTail::new(&path);
        assert!(tail.read_new_lines().unwrap().unwrap().is_empty());

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&text[split..]).unwrap();
        assert_eq!(tail.read_new_lines().unwrap().unwrap(), vec!["temp 25°C"]);
    }

    #[test]
    fn test_directory_path_is_a_read_error() {
        let dir = tempdir().unwrap();
        let mut tail = LogTail::new(dir.path());
        // Opening a directory succeeds on Unix but reading it fails.
        let err = tail.read_new_lines().unwrap_err();
        assert!(err.to_string().contains("log"));
    }
}
