//! Relink monitor: tails a simulator log for a fixed window and decides
//! whether the scan tool re-established communication often enough.
//!
//! Two token cycles watch the same line stream. The fast cycle tracks the
//! 4.2s relink exchange, the slow cycle the 60s one. When the window closes
//! each cycle's match count is compared against its threshold and the
//! verdicts are posted once to the runner as a `ResultMessage`.
//!
//! States: `WaitingForFile -> Polling -> (TimedOut | Cancelled | Error) -> Reported`.

use crate::config::{CycleConfig, MonitorConfig};
use crate::cycle::{CycleError, TokenCycle};
use crate::log_tail::{LogTail, TailError};
use crate::signals::StopFlag;
use crate::verdict::{CaseStatus, Verdict};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Resolves the simulator log path for a case.
pub trait LogLocator: Send + Sync {
    fn log_path(&self, case: &str) -> PathBuf;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    WaitingForFile,
    Polling,
    TimedOut,
    Cancelled,
    Error,
    Reported,
}

/// Window and cycle parameters for one run.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub duration: Duration,
    pub poll_interval: Duration,
    pub fast: CycleConfig,
    pub slow: CycleConfig,
}

impl MonitorSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            duration: Duration::from_secs(config.duration_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            fast: config.fast.clone(),
            slow: config.slow.clone(),
        }
    }
}

/// Errors that end a monitor run early.
#[derive(Debug)]
pub enum MonitorError {
    Tail(TailError),
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Tail(e) => write!(f, "log tail failed: {e}"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Tail(e) => Some(e),
        }
    }
}

impl From<TailError> for MonitorError {
    fn from(e: TailError) -> Self {
        MonitorError::Tail(e)
    }
}

/// The single message a monitor run posts back to the runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMessage {
    pub case: String,
    pub status: CaseStatus,
    pub fast: Verdict,
    pub slow: Verdict,
    pub fast_matches: usize,
    pub slow_matches: usize,
    /// When each fast-cycle match was seen, oldest first.
    pub fast_match_times: Vec<DateTime<Utc>>,
    pub slow_match_times: Vec<DateTime<Utc>>,
    /// Outcome of comparing the automation findings with the expected
    /// values. `NotApplicable` for relink cases.
    pub findings: Verdict,
    /// One entry per finding that differed from its expected value.
    pub mismatches: Vec<String>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl ResultMessage {
    /// A report for a case that could not be run to completion.
    pub fn error(case: &str, error: String) -> Self {
        Self {
            case: case.to_string(),
            status: CaseStatus::Error,
            fast: Verdict::NotApplicable,
            slow: Verdict::NotApplicable,
            fast_matches: 0,
            slow_matches: 0,
            fast_match_times: Vec::new(),
            slow_match_times: Vec::new(),
            findings: Verdict::NotApplicable,
            mismatches: Vec::new(),
            error: Some(error),
            finished_at: Utc::now(),
        }
    }
}

pub struct RelinkMonitor {
    case: String,
    tail: LogTail,
    fast: TokenCycle,
    slow: TokenCycle,
    duration: Duration,
    poll_interval: Duration,
    state: MonitorState,
}

impl RelinkMonitor {
    pub fn new(
        case: impl Into<String>,
        log_path: impl Into<PathBuf>,
        settings: &MonitorSettings,
    ) -> Result<Self, CycleError> {
        Ok(Self {
            case: case.into(),
            tail: LogTail::new(log_path),
            fast: TokenCycle::from_config("fast", &settings.fast)?,
            slow: TokenCycle::from_config("slow", &settings.slow)?,
            duration: settings.duration,
            poll_interval: settings.poll_interval,
            state: MonitorState::WaitingForFile,
        })
    }

    /// Build a monitor for `case` with its log path taken from `locator`.
    pub fn for_case(
        case: &str,
        locator: &dyn LogLocator,
        settings: &MonitorSettings,
    ) -> Result<Self, CycleError> {
        Self::new(case, locator.log_path(case), settings)
    }

    #[allow(dead_code)]
    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn fast(&self) -> &TokenCycle {
        &self.fast
    }

    pub fn slow(&self) -> &TokenCycle {
        &self.slow
    }

    /// Offer one log line to both cycles. Blank lines are ignored.
    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        tracing::trace!(case = %self.case, line, "read line");
        let now = Utc::now();
        self.fast.observe(line, now);
        self.slow.observe(line, now);
    }

    /// One poll iteration: read whatever was appended and match it.
    ///
    /// Returns the number of lines read. A missing file keeps the monitor in
    /// `WaitingForFile` and is not an error.
    pub fn poll_once(&mut self) -> Result<usize, MonitorError> {
        match self.tail.read_new_lines()? {
            None => {
                if self.state != MonitorState::WaitingForFile {
                    tracing::warn!(
                        case = %self.case,
                        path = %self.tail.path().display(),
                        "log file disappeared"
                    );
                }
                self.state = MonitorState::WaitingForFile;
                tracing::debug!(
                    case = %self.case,
                    path = %self.tail.path().display(),
                    "log file does not exist yet"
                );
                Ok(0)
            }
            Some(lines) => {
                if self.state == MonitorState::WaitingForFile {
                    tracing::info!(
                        case = %self.case,
                        path = %self.tail.path().display(),
                        "log file found, polling"
                    );
                }
                self.state = MonitorState::Polling;
                for line in &lines {
                    self.feed_line(line);
                }
                Ok(lines.len())
            }
        }
    }

    /// Run the observation window to completion and return the verdicts.
    ///
    /// The stop flag is checked once per iteration, so cancellation takes
    /// effect within one poll interval.
    pub async fn run(mut self, stop: &StopFlag) -> ResultMessage {
        tracing::info!(
            case = %self.case,
            log = %self.tail.path().display(),
            duration_secs = self.duration.as_secs(),
            "starting relink monitor"
        );

        let deadline = Instant::now() + self.duration;
        let outcome = loop {
            if stop.is_stop_requested() {
                break Ok(MonitorState::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                // Pick up anything written during the last sleep.
                break self.poll_once().map(|_| MonitorState::TimedOut);
            }
            if let Err(e) = self.poll_once() {
                break Err(e);
            }
            tracing::debug!(
                case = %self.case,
                offset = self.tail.offset(),
                fast_matches = self.fast.match_count(),
                fast_waiting_for = self.fast.expected(),
                slow_matches = self.slow.match_count(),
                slow_waiting_for = self.slow.expected(),
                "monitor progress"
            );
            tokio::time::sleep((deadline - now).min(self.poll_interval)).await;
        };

        self.finish(outcome)
    }

    /// Close the window and derive the report.
    fn finish(&mut self, outcome: Result<MonitorState, MonitorError>) -> ResultMessage {
        let (status, error) = match outcome {
            Ok(state) => {
                if let Some(rest) = self.tail.take_partial() {
                    self.feed_line(&rest);
                }
                self.state = state;
                let status = if state == MonitorState::Cancelled {
                    CaseStatus::Cancelled
                } else {
                    CaseStatus::Completed
                };
                (status, None)
            }
            Err(e) => {
                tracing::error!(case = %self.case, error = %e, "relink monitor failed");
                self.state = MonitorState::Error;
                (CaseStatus::Error, Some(e.to_string()))
            }
        };

        let (fast, slow) = if status == CaseStatus::Error {
            (Verdict::NotApplicable, Verdict::NotApplicable)
        } else {
            (self.fast.verdict(), self.slow.verdict())
        };

        for (cycle, verdict) in [(&self.fast, fast), (&self.slow, slow)] {
            tracing::info!(
                case = %self.case,
                state = ?self.state,
                cycle = cycle.name(),
                matches = cycle.match_count(),
                threshold = cycle.threshold(),
                stopped_at_token = cycle.cursor(),
                %verdict,
                "relink monitor finished"
            );
        }

        self.state = MonitorState::Reported;
        ResultMessage {
            case: self.case.clone(),
            status,
            fast,
            slow,
            fast_matches: self.fast.match_count(),
            slow_matches: self.slow.match_count(),
            fast_match_times: self.fast.matches().to_vec(),
            slow_match_times: self.slow.matches().to_vec(),
            findings: Verdict::NotApplicable,
            mismatches: Vec::new(),
            error,
            finished_at: Utc::now(),
        }
    }
}

/// Run a monitor and post its result on `tx`. The send happens exactly once;
/// a closed channel only means nobody is waiting for the result anymore.
pub async fn run_and_report(
    monitor: RelinkMonitor,
    stop: StopFlag,
    tx: mpsc::UnboundedSender<ResultMessage>,
) {
    let message = monitor.run(&stop).await;
    if tx.send(message).is_err() {
        tracing::warn!("result channel closed before the monitor reported");
    }
}
