/// Status file: writes `.scanbench/status` as JSON on every runner state
/// transition, so another terminal can see what the harness is doing.
use crate::jsonfile::{self, JsonFileError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Runner states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessState {
    Starting,
    PreparingCase,
    Monitoring,
    RunningAutomation,
    Retrying,
    BetweenCases,
    Idle,
    ShuttingDown,
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: HarnessState,
    pub case: Option<String>,
    pub case_index: usize,
    pub total_cases: usize,
    pub attempt: u32,
    pub case_start: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
    pub passed: usize,
    pub failed: usize,
}

/// Mutable state tracker that builds StatusData for each update.
pub struct StatusTracker {
    path: PathBuf,
    pid: u32,
    total_cases: usize,
    case: Option<String>,
    case_index: usize,
    attempt: u32,
    case_start: Option<DateTime<Utc>>,
    passed: usize,
    failed: usize,
}

impl StatusTracker {
    pub fn new(path: PathBuf, total_cases: usize) -> Self {
        Self {
            path,
            pid: std::process::id(),
            total_cases,
            case: None,
            case_index: 0,
            attempt: 0,
            case_start: None,
            passed: 0,
            failed: 0,
        }
    }

    fn snapshot(&self, state: HarnessState) -> StatusData {
        StatusData {
            pid: self.pid,
            state,
            case: self.case.clone(),
            case_index: self.case_index,
            total_cases: self.total_cases,
            attempt: self.attempt,
            case_start: self.case_start,
            last_update: Utc::now(),
            passed: self.passed,
            failed: self.failed,
        }
    }

    pub fn write(&self, state: HarnessState) -> Result<(), JsonFileError> {
        jsonfile::write_atomic(&self.path, &self.snapshot(state))
    }

    /// Write the status file; failures are logged, never fatal.
    pub fn update(&self, state: HarnessState) {
        if let Err(e) = self.write(state) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    /// Start tracking a new case (1-based index).
    pub fn begin_case(&mut self, case: &str, index: usize) {
        self.case = Some(case.to_string());
        self.case_index = index;
        self.attempt = 1;
        self.case_start = Some(Utc::now());
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    pub fn set_counts(&mut self, passed: usize, failed: usize) {
        self.passed = passed;
        self.failed = failed;
    }
}
