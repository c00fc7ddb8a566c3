/// Pass/fail vocabulary shared by the monitor, the results table and the CLI.
use serde::{Deserialize, Serialize};

/// Per-cycle outcome of one monitor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Run not finished yet.
    Pending,
    Passed,
    Failed,
    /// No meaningful verdict (I/O error, or a case without a relink check).
    NotApplicable,
}

impl Verdict {
    /// `count >= threshold` passes, anything less fails.
    pub fn from_count(count: usize, threshold: usize) -> Self {
        if count >= threshold {
            Verdict::Passed
        } else {
            Verdict::Failed
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pending => "Pending",
            Verdict::Passed => "Passed",
            Verdict::Failed => "Failed",
            Verdict::NotApplicable => "N/A",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Row status of a case in the results table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pending,
    /// Observation window ran to the end.
    Completed,
    /// Stop was requested before the window closed.
    Cancelled,
    Error,
    SimNotFound,
}

impl CaseStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CaseStatus::Pending => "Pending",
            CaseStatus::Completed => "Completed",
            CaseStatus::Cancelled => "Cancelled",
            CaseStatus::Error => "Error",
            CaseStatus::SimNotFound => "Sim Not Found",
        }
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Overall result column: both relink checks must pass. A completed case
/// with no relink checks is decided by its findings check; failed findings
/// also fail a relink case.
pub fn overall(status: CaseStatus, fast: Verdict, slow: Verdict, findings: Verdict) -> Verdict {
    match status {
        CaseStatus::Pending => Verdict::Pending,
        CaseStatus::Error | CaseStatus::SimNotFound => Verdict::Failed,
        CaseStatus::Completed | CaseStatus::Cancelled => {
            if findings == Verdict::Failed {
                return Verdict::Failed;
            }
            match (fast, slow) {
                (Verdict::Passed, Verdict::Passed) => Verdict::Passed,
                (Verdict::NotApplicable, Verdict::NotApplicable)
                    if status == CaseStatus::Completed =>
                {
                    Verdict::Passed
                }
                _ => Verdict::Failed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_count_boundary() {
        assert_eq!(Verdict::from_count(20, 20), Verdict::Passed);
        assert_eq!(Verdict::from_count(19, 20), Verdict::Failed);
        assert_eq!(Verdict::from_count(25, 20), Verdict::Passed);
        assert_eq!(Verdict::from_count(0, 0), Verdict::Passed);
    }

    #[test]
    fn test_labels() {
        assert_eq!(Verdict::NotApplicable.to_string(), "N/A");
        assert_eq!(CaseStatus::SimNotFound.to_string(), "Sim Not Found");
        assert_eq!(CaseStatus::Completed.to_string(), "Completed");
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Verdict::NotApplicable).unwrap();
        assert_eq!(json, "\"not_applicable\"");
        let status: CaseStatus = serde_json::from_str("\"sim_not_found\"").unwrap();
        assert_eq!(status, CaseStatus::SimNotFound);
    }

    #[test]
    fn test_overall() {
        use Verdict::{Failed, NotApplicable as Na, Passed};
        assert_eq!(
            overall(CaseStatus::Pending, Verdict::Pending, Verdict::Pending, Na),
            Verdict::Pending
        );
        assert_eq!(overall(CaseStatus::Completed, Passed, Passed, Na), Passed);
        assert_eq!(overall(CaseStatus::Completed, Passed, Failed, Na), Failed);
        assert_eq!(overall(CaseStatus::Completed, Na, Na, Na), Passed);
        assert_eq!(overall(CaseStatus::Cancelled, Na, Na, Na), Failed);
        assert_eq!(overall(CaseStatus::Cancelled, Passed, Passed, Na), Passed);
        assert_eq!(overall(CaseStatus::Error, Na, Na, Na), Failed);
        assert_eq!(overall(CaseStatus::SimNotFound, Na, Na, Na), Failed);
    }

    #[test]
    fn test_overall_indicator_case_follows_findings() {
        use Verdict::{Failed, NotApplicable as Na, Passed};
        assert_eq!(overall(CaseStatus::Completed, Na, Na, Passed), Passed);
        assert_eq!(overall(CaseStatus::Completed, Na, Na, Failed), Failed);
        assert_eq!(overall(CaseStatus::Completed, Passed, Passed, Failed), Failed);
    }
}
