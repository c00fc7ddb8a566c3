/// Results table: one row per case, owned by the runner.
///
/// Monitor tasks never touch the table; they post a `ResultMessage` and the
/// runner applies it here. The table is persisted as JSON after every change
/// and rendered as a fixed-width text table for the terminal.
use crate::jsonfile::{self, JsonFileError};
use crate::monitor::ResultMessage;
use crate::verdict::{overall, CaseStatus, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRow {
    pub case: String,
    pub status: CaseStatus,
    pub relink_fast: Verdict,
    pub relink_slow: Verdict,
    #[serde(default)]
    pub fast_matches: usize,
    #[serde(default)]
    pub slow_matches: usize,
    #[serde(default)]
    pub fast_match_times: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub slow_match_times: Vec<DateTime<Utc>>,
    #[serde(default = "not_applicable")]
    pub findings: Verdict,
    #[serde(default)]
    pub mismatches: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

fn not_applicable() -> Verdict {
    Verdict::NotApplicable
}

impl CaseRow {
    fn pending(case: &str) -> Self {
        Self {
            case: case.to_string(),
            status: CaseStatus::Pending,
            relink_fast: Verdict::Pending,
            relink_slow: Verdict::Pending,
            fast_matches: 0,
            slow_matches: 0,
            fast_match_times: Vec::new(),
            slow_match_times: Vec::new(),
            findings: Verdict::NotApplicable,
            mismatches: Vec::new(),
            attempts: 0,
            error: None,
            finished_at: None,
        }
    }

    pub fn result(&self) -> Verdict {
        overall(self.status, self.relink_fast, self.relink_slow, self.findings)
    }
}

/// Rows in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsTable {
    rows: Vec<CaseRow>,
}

impl ResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted table. A missing file is an empty table.
    pub fn load(path: &Path) -> Result<Self, JsonFileError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        jsonfile::read(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), JsonFileError> {
        jsonfile::write_atomic(path, self)
    }

    pub fn rows(&self) -> &[CaseRow] {
        &self.rows
    }

    pub fn get(&self, case: &str) -> Option<&CaseRow> {
        self.rows.iter().find(|r| r.case == case)
    }

    fn row_mut(&mut self, case: &str) -> &mut CaseRow {
        match self.rows.iter().position(|r| r.case == case) {
            Some(i) => &mut self.rows[i],
            None => {
                self.rows.push(CaseRow::pending(case));
                let last = self.rows.len() - 1;
                &mut self.rows[last]
            }
        }
    }

    /// Add a case as pending, or reset an existing row back to pending.
    pub fn insert_pending(&mut self, case: &str) {
        let row = self.row_mut(case);
        *row = CaseRow::pending(case);
    }

    /// Count one more attempt for a case.
    pub fn record_attempt(&mut self, case: &str) -> u32 {
        let row = self.row_mut(case);
        row.attempts += 1;
        row.attempts
    }

    /// Set a terminal status without relink verdicts.
    pub fn set_status(&mut self, case: &str, status: CaseStatus) {
        let row = self.row_mut(case);
        row.status = status;
        row.relink_fast = Verdict::NotApplicable;
        row.relink_slow = Verdict::NotApplicable;
        row.findings = Verdict::NotApplicable;
        row.finished_at = Some(Utc::now());
    }

    /// Apply a monitor report to its row.
    pub fn apply(&mut self, message: &ResultMessage) {
        let row = self.row_mut(&message.case);
        row.status = message.status;
        row.relink_fast = message.fast;
        row.relink_slow = message.slow;
        row.fast_matches = message.fast_matches;
        row.slow_matches = message.slow_matches;
        row.fast_match_times = message.fast_match_times.clone();
        row.slow_match_times = message.slow_match_times.clone();
        row.findings = message.findings;
        row.mismatches = message.mismatches.clone();
        row.error = message.error.clone();
        row.finished_at = Some(message.finished_at);
    }

    /// Counts of (passed, failed, pending) by overall result.
    pub fn summary(&self) -> (usize, usize, usize) {
        self.rows
            .iter()
            .fold((0, 0, 0), |(p, f, w), row| match row.result() {
                Verdict::Passed => (p + 1, f, w),
                Verdict::Pending => (p, f, w + 1),
                _ => (p, f + 1, w),
            })
    }

    /// Fixed-width text rendering: Case | Status | Relink 4.2s | Relink 60s | Result.
    pub fn render(&self) -> String {
        const HEADERS: [&str; 5] = ["Case", "Status", "Relink 4.2s", "Relink 60s", "Result"];

        let cells: Vec<[String; 5]> = self
            .rows
            .iter()
            .map(|r| {
                [
                    r.case.replace('\n', " "),
                    r.status.to_string(),
                    r.relink_fast.to_string(),
                    r.relink_slow.to_string(),
                    r.result().to_string(),
                ]
            })
            .collect();

        let mut widths = HEADERS.map(str::len);
        for row in &cells {
            for (w, cell) in widths.iter_mut().zip(row.iter()) {
                *w = (*w).max(cell.chars().count());
            }
        }

        let format_row = |row: &[&str]| -> String {
            row.iter()
                .zip(widths.iter())
                .map(|(cell, &w)| format!("{cell:<w$}"))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut out = String::new();
        out.push_str(&format_row(&HEADERS));
        out.push('\n');
        out.push_str(
            &widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        out.push('\n');
        for row in &cells {
            let refs: Vec<&str> = row.iter().map(String::as_str).collect();
            out.push_str(&format_row(&refs));
            out.push('\n');
        }
        out
    }
}
