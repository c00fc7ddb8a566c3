/// Atomic JSON file helpers shared by the results table, the case settings
/// document and the status file.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so readers never see a partial document.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Errors from reading or writing a JSON document.
#[derive(Debug)]
pub enum JsonFileError {
    Serialize {
        source: serde_json::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for JsonFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonFileError::Serialize { source } => write!(f, "failed to serialize: {source}"),
            JsonFileError::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
            JsonFileError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            JsonFileError::Write { path, source } => {
                write!(f, "failed to write temp file {}: {source}", path.display())
            }
            JsonFileError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for JsonFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JsonFileError::Serialize { source } => Some(source),
            JsonFileError::Parse { source, .. } => Some(source),
            JsonFileError::Read { source, .. } => Some(source),
            JsonFileError::Write { source, .. } => Some(source),
            JsonFileError::Rename { source, .. } => Some(source),
        }
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), JsonFileError> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| JsonFileError::Serialize { source: e })?;

    let dir = path.parent().unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| JsonFileError::Write {
        path: tmp_path.clone(),
        source: e,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| JsonFileError::Rename {
        from: tmp_path,
        to: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

/// Read and deserialize a JSON document.
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<T, JsonFileError> {
    let text = std::fs::read_to_string(path).map_err(|e| JsonFileError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| JsonFileError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
