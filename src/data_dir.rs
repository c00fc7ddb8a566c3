use crate::monitor::LogLocator;
use fs2::FileExt;
use regex::Regex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Characters that cannot appear in a log file name.
static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?:"<>| ]"#).unwrap());

/// Replace every character that is unsafe in a file name with `_`.
pub fn sanitize_case_name(case: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(case, "_").into_owned()
}

/// Manages the `.scanbench/` directory layout.
///
/// Every artifact of a run lives under a single data directory: simulator
/// logs, the results table, the case settings document, the status file and
/// the singleton lock.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Create a new DataDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one simulator log per case.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Path to the persisted results table.
    pub fn results(&self) -> PathBuf {
        self.root.join("results.json")
    }

    /// Path to the case settings document shared with the automation step.
    pub fn settings(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    /// Path to the harness status file.
    pub fn status(&self) -> PathBuf {
        self.root.join("status")
    }

    /// Path to the singleton lock file.
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Simulator log for a case, e.g. `logs/log_Case_01.sim.txt`.
    pub fn case_log(&self, case: &str) -> PathBuf {
        self.logs_dir()
            .join(format!("log_{}.txt", sanitize_case_name(case)))
    }

    /// Create root and logs/. Returns Ok(true) if the root was newly created.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(created)
    }

    /// Ensure the data directory is initialized, creating it if missing.
    /// Also appends the data_dir to .gitignore if a .gitignore exists
    /// and doesn't already contain the entry.
    pub fn ensure_initialized(&self) -> std::io::Result<()> {
        self.init()?;
        self.update_gitignore()?;
        Ok(())
    }

    /// Append the data directory to the neighbouring .gitignore, if there is one.
    pub fn update_gitignore(&self) -> std::io::Result<()> {
        let gitignore_dir = match self.root.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let gitignore_path = gitignore_dir.join(".gitignore");
        if !gitignore_path.exists() {
            return Ok(());
        }

        let dir_name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.root.to_string_lossy().to_string());
        let entry = format!("{dir_name}/");

        let contents = std::fs::read_to_string(&gitignore_path)?;
        let already_present = contents.lines().any(|line| {
            let trimmed = line.trim();
            trimmed == entry || trimmed == dir_name
        });
        if !already_present {
            let prefix = if contents.ends_with('\n') || contents.is_empty() {
                ""
            } else {
                "\n"
            };
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            use std::io::Write;
            writeln!(file, "{prefix}{entry}")?;
        }
        Ok(())
    }

    /// Take the exclusive run lock. Only one harness may drive the simulator
    /// at a time; the lock is released when the returned guard is dropped.
    pub fn acquire_lock(&self) -> Result<RunLock, LockError> {
        let path = self.lock();
        let file = File::create(&path).map_err(|e| LockError::Io {
            path: path.clone(),
            source: e,
        })?;
        file.try_lock_exclusive()
            .map_err(|_| LockError::Held { path: path.clone() })?;
        Ok(RunLock { file, path })
    }
}

impl LogLocator for DataDir {
    fn log_path(&self, case: &str) -> PathBuf {
        self.case_log(case)
    }
}

/// Held run lock.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug)]
pub enum LockError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Held {
        path: PathBuf,
    },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Io { path, source } => {
                write!(f, "failed to open lock file {}: {source}", path.display())
            }
            LockError::Held { path } => write!(
                f,
                "another scanbench run holds the lock at {}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Io { source, .. } => Some(source),
            LockError::Held { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_paths() {
        let dd = DataDir::new(".scanbench");
        assert_eq!(dd.root(), Path::new(".scanbench"));
        assert_eq!(dd.logs_dir(), PathBuf::from(".scanbench/logs"));
        assert_eq!(dd.results(), PathBuf::from(".scanbench/results.json"));
        assert_eq!(dd.settings(), PathBuf::from(".scanbench/settings.json"));
        assert_eq!(dd.status(), PathBuf::from(".scanbench/status"));
        assert_eq!(dd.lock(), PathBuf::from(".scanbench/lock"));
    }

    #[test]
    fn test_sanitize_case_name() {
        assert_eq!(sanitize_case_name("Case 01.sim"), "Case_01.sim");
        assert_eq!(
            sanitize_case_name(r#"a\b/c*d?e:f"g<h>i|j k"#),
            "a_b_c_d_e_f_g_h_i_j_k"
        );
        assert_eq!(sanitize_case_name("plain-name_1"), "plain-name_1");
    }

    #[test]
    fn test_case_log_path() {
        let dd = DataDir::new("/data");
        assert_eq!(
            dd.case_log("Case 12 - Toyota.sim"),
            PathBuf::from("/data/logs/log_Case_12_-_Toyota.sim.txt")
        );
        assert_eq!(dd.log_path("Case 12 - Toyota.sim"), dd.case_log("Case 12 - Toyota.sim"));
    }

    #[test]
    fn test_init_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join(".scanbench");
        let dd = DataDir::new(&root);

        assert!(dd.init().unwrap());
        assert!(dd.logs_dir().is_dir());
        assert!(!dd.init().unwrap());
    }

    #[test]
    fn test_ensure_initialized_updates_gitignore_once() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join(".scanbench");
        let gitignore = tmp.path().join(".gitignore");
        std::fs::write(&gitignore, "target/").unwrap();

        let dd = DataDir::new(&root);
        dd.ensure_initialized().unwrap();
        dd.ensure_initialized().unwrap();

        let contents = std::fs::read_to_string(&gitignore).unwrap();
        assert_eq!(contents, "target/\n.scanbench/\n");
    }

    #[test]
    fn test_gitignore_not_created_if_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let dd = DataDir::new(tmp.path().join(".scanbench"));
        dd.ensure_initialized().unwrap();
        assert!(!tmp.path().join(".gitignore").exists());
    }

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let dd = DataDir::new(tmp.path());

        let first = dd.acquire_lock().unwrap();
        assert_eq!(first.path(), dd.lock());
        let err = dd.acquire_lock().unwrap_err();
        assert!(matches!(err, LockError::Held { .. }));

        drop(first);
        assert!(dd.acquire_lock().is_ok());
    }

    #[test]
    fn test_lock_in_missing_dir_fails() {
        let dd = DataDir::new("/nonexistent/scanbench");
        assert!(matches!(dd.acquire_lock(), Err(LockError::Io { .. })));
    }
}
