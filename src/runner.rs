//! Case runner: drives the selected cases one after another.
//!
//! For every case the runner seeds the settings document, starts the
//! simulator, runs the automation step and (for relink cases) a monitor task
//! side by side, then collects the monitor's single result message and
//! records it. The results table is only ever touched from here.

use crate::catalog::{Catalog, CaseKind};
use crate::config::{CaseEntry, CommandConfig, HarnessConfig};
use crate::data_dir::{DataDir, LockError};
use crate::monitor::{run_and_report, MonitorSettings, RelinkMonitor, ResultMessage};
use crate::results::ResultsTable;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::settings::{self, CaseSettings, SettingsFile};
use crate::signals::StopFlag;
use crate::simulator::{self, Simulator};
use crate::status::{HarnessState, StatusTracker};
use crate::verdict::{CaseStatus, Verdict};
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long the simulator gets to exit after SIGTERM.
const SIMULATOR_STOP_GRACE: Duration = Duration::from_secs(5);

/// Granularity of interruptible waits between steps.
const WAIT_TICK: Duration = Duration::from_millis(200);

/// Errors that prevent a run from starting.
#[derive(Debug)]
pub enum RunnerError {
    Init {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    Lock(LockError),
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::Init { path, source } => write!(
                f,
                "failed to initialize data directory {}: {source}",
                path.display()
            ),
            RunnerError::Lock(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunnerError::Init { source, .. } => Some(source),
            RunnerError::Lock(e) => Some(e),
        }
    }
}

impl From<LockError> for RunnerError {
    fn from(e: LockError) -> Self {
        RunnerError::Lock(e)
    }
}

pub struct Runner<'a> {
    config: &'a HarnessConfig,
    data_dir: DataDir,
    catalog: Catalog,
    stop: StopFlag,
    results: ResultsTable,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a HarnessConfig, catalog: Catalog, stop: StopFlag) -> Self {
        Self {
            config,
            data_dir: DataDir::new(&config.storage.data_dir),
            catalog,
            stop,
            results: ResultsTable::new(),
        }
    }

    /// Run `cases` in order and return the final results table.
    pub async fn run(mut self, cases: &[CaseEntry]) -> Result<ResultsTable, RunnerError> {
        self.data_dir
            .ensure_initialized()
            .map_err(|e| RunnerError::Init {
                path: self.data_dir.root().to_path_buf(),
                source: e,
            })?;
        let _lock = self.data_dir.acquire_lock()?;

        let mut status = StatusTracker::new(self.data_dir.status(), cases.len());
        status.update(HarnessState::Starting);
        tracing::info!(cases = cases.len(), "starting run");

        let mut retry = RetryPolicy::new(self.config.runner.max_attempts);

        for (i, entry) in cases.iter().enumerate() {
            if self.stop.is_stop_requested() {
                tracing::warn!(
                    remaining = cases.len() - i,
                    "stop requested, skipping remaining cases"
                );
                break;
            }

            status.begin_case(&entry.name, i + 1);
            self.results.insert_pending(&entry.name);
            self.persist();

            retry.reset();
            loop {
                let attempt = self.results.record_attempt(&entry.name);
                status.set_attempt(attempt);
                status.update(HarnessState::PreparingCase);

                let case_status = self.run_attempt(entry, &status).await;
                self.persist();

                match retry.evaluate(&entry.name, case_status) {
                    RetryDecision::Proceed | RetryDecision::GiveUp => break,
                    RetryDecision::Retry { .. } => {
                        status.update(HarnessState::Retrying);
                        let delay = Duration::from_secs(self.config.runner.retry_delay_secs);
                        if !self.stop.sleep(delay, WAIT_TICK).await {
                            break;
                        }
                    }
                }
            }

            let (passed, failed, _) = self.results.summary();
            status.set_counts(passed, failed);

            if i + 1 < cases.len() {
                status.update(HarnessState::BetweenCases);
                let wait = Duration::from_secs(self.config.runner.wait_between_cases_secs);
                self.stop.sleep(wait, WAIT_TICK).await;
            }
        }

        if self.stop.is_stop_requested() {
            status.update(HarnessState::ShuttingDown);
        } else {
            status.update(HarnessState::Idle);
        }
        let (passed, failed, pending) = self.results.summary();
        tracing::info!(passed, failed, pending, "run finished");
        Ok(self.results)
    }

    /// One attempt at a case, from a clean slate. Records the outcome in the
    /// results table and returns its status.
    async fn run_attempt(&mut self, entry: &CaseEntry, status: &StatusTracker) -> CaseStatus {
        let case = entry.name.as_str();
        let kind = CaseKind::of(entry);
        tracing::info!(case, kind = kind.label(), "running case");

        let Some(sim_file) = self.catalog.sim_file(entry) else {
            self.results.set_status(case, CaseStatus::SimNotFound);
            return CaseStatus::SimNotFound;
        };

        let settings_file = SettingsFile::new(self.data_dir.settings());
        if let Err(e) = settings_file.write(&CaseSettings::seed(entry)) {
            return self.fail(case, format!("failed to seed settings document: {e}"));
        }

        let log_path = self.data_dir.case_log(case);
        let sim = match Simulator::start(&self.config.simulator, &sim_file, &log_path) {
            Ok(sim) => sim,
            Err(e) => return self.fail(case, e.to_string()),
        };
        let pid = sim.pid();

        let message = match kind {
            CaseKind::Relink => self.run_relink(entry, settings_file.path(), status).await,
            CaseKind::LedMil | CaseKind::MonitorIcon | CaseKind::Other => {
                status.update(HarnessState::RunningAutomation);
                let step = self.automation_for(kind);
                run_indicator_case(entry, step, settings_file.path()).await
            }
        };

        tracing::debug!(case, pid, "stopping simulator");
        sim.stop(SIMULATOR_STOP_GRACE).await;
        let settle = Duration::from_secs(self.config.simulator.settle_secs);
        self.stop.sleep(settle, WAIT_TICK).await;

        let case_status = message.status;
        self.results.apply(&message);
        if let Some(row) = self.results.get(case) {
            tracing::info!(
                case,
                status = %row.status,
                result = %row.result(),
                mismatches = row.mismatches.len(),
                "case finished"
            );
        }
        case_status
    }

    /// Relink case: monitor task and automation step run concurrently; the
    /// monitor reports back over a channel.
    async fn run_relink(
        &self,
        entry: &CaseEntry,
        settings_path: &Path,
        status: &StatusTracker,
    ) -> ResultMessage {
        let case = entry.name.as_str();
        let monitor_config = &self.config.monitor;
        let monitor_settings = MonitorSettings::from_config(monitor_config);
        let monitor = match RelinkMonitor::for_case(case, &self.data_dir, &monitor_settings) {
            Ok(m) => m,
            Err(e) => return ResultMessage::error(case, e.to_string()),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stop = self.stop.clone();
        let start_delay = Duration::from_secs(monitor_config.start_delay_secs);
        let poll = monitor_settings.poll_interval;
        let handle = tokio::spawn(async move {
            if !start_delay.is_zero() {
                tracing::debug!(
                    delay_secs = start_delay.as_secs(),
                    "waiting before monitor start"
                );
                stop.sleep(start_delay, poll).await;
            }
            run_and_report(monitor, stop, tx).await;
        });

        status.update(HarnessState::RunningAutomation);
        let automation_error =
            match simulator::run_step(&self.config.automation.relink, case, settings_path).await {
                Ok(Some(step)) => {
                    tracing::debug!(
                        case,
                        exit_code = ?step.exit_code,
                        duration_secs = step.duration.as_secs(),
                        "relink automation finished"
                    );
                    None
                }
                Ok(None) => None,
                Err(e) => {
                    tracing::error!(case, error = %e, "relink automation failed to start");
                    Some(e.to_string())
                }
            };

        status.update(HarnessState::Monitoring);
        let message = rx.recv().await;
        if let Err(e) = handle.await {
            tracing::error!(case, error = %e, "monitor task failed");
        }
        let mut message = message.unwrap_or_else(|| {
            ResultMessage::error(case, "monitor task ended without reporting".to_string())
        });

        // Traffic the automation never drove proves nothing about the tool.
        if let Some(error) = automation_error {
            message.status = CaseStatus::Error;
            message.error = Some(error);
            return message;
        }
        if message.status != CaseStatus::Error && settings::has_expectations(entry) {
            check_findings(entry, settings_path, &mut message);
        }
        message
    }

    fn automation_for(&self, kind: CaseKind) -> &CommandConfig {
        match kind {
            CaseKind::Relink => &self.config.automation.relink,
            CaseKind::MonitorIcon => &self.config.automation.monitor_icon,
            CaseKind::LedMil | CaseKind::Other => &self.config.automation.led_mil,
        }
    }

    fn fail(&mut self, case: &str, error: String) -> CaseStatus {
        tracing::error!(case, %error, "case failed");
        self.results.apply(&ResultMessage::error(case, error));
        CaseStatus::Error
    }

    fn persist(&self) {
        if let Err(e) = self.results.save(&self.data_dir.results()) {
            tracing::warn!(error = %e, "failed to save results table");
        }
    }
}

/// Non-relink case: run the automation step, then judge it by its exit code
/// and by the findings it wrote back.
async fn run_indicator_case(
    entry: &CaseEntry,
    step: &CommandConfig,
    settings_path: &Path,
) -> ResultMessage {
    let case = entry.name.as_str();
    let outcome = match simulator::run_step(step, case, settings_path).await {
        Ok(outcome) => outcome,
        Err(e) => return ResultMessage::error(case, e.to_string()),
    };

    let mut message = ResultMessage {
        case: case.to_string(),
        status: CaseStatus::Completed,
        fast: Verdict::NotApplicable,
        slow: Verdict::NotApplicable,
        fast_matches: 0,
        slow_matches: 0,
        fast_match_times: Vec::new(),
        slow_match_times: Vec::new(),
        findings: Verdict::Passed,
        mismatches: Vec::new(),
        error: None,
        finished_at: Utc::now(),
    };

    if let Some(outcome) = outcome.filter(|o| !o.success()) {
        message.findings = Verdict::Failed;
        message.error = Some(match outcome.exit_code {
            Some(code) => format!("automation step exited with code {code}"),
            None => "automation step was killed by a signal".to_string(),
        });
    }
    check_findings(entry, settings_path, &mut message);
    message
}

/// Read the settings document back and compare its findings with what the
/// case expects. Only ever lowers `message.findings` to `Failed`.
fn check_findings(entry: &CaseEntry, settings_path: &Path, message: &mut ResultMessage) {
    let case = entry.name.as_str();
    let expects = settings::has_expectations(entry);

    let found = match SettingsFile::new(settings_path).read() {
        Ok(found) => found,
        Err(e) => {
            if expects {
                tracing::error!(case, error = %e, "could not read back case settings");
                message.findings = Verdict::Failed;
                message.error.get_or_insert_with(|| e.to_string());
            } else {
                tracing::warn!(case, error = %e, "could not read back case settings");
            }
            return;
        }
    };

    for (field, value) in found.findings() {
        tracing::info!(case, field, value, "automation finding");
    }
    if !expects {
        return;
    }

    let mismatches = found.mismatches(entry);
    if mismatches.is_empty() {
        if message.findings == Verdict::NotApplicable {
            message.findings = Verdict::Passed;
        }
    } else {
        for mismatch in &mismatches {
            tracing::warn!(case, %mismatch, "finding differs from expected value");
        }
        message.findings = Verdict::Failed;
        message.mismatches = mismatches;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CycleConfig;
    use tempfile::tempdir;

    /// Config whose "simulator" dumps the sim file into the log and idles.
    fn test_config(root: &Path) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.storage.data_dir = root.join(".scanbench");
        config.storage.sim_dir = root.join("sims");
        config.monitor.duration_secs = 1;
        config.monitor.poll_interval_ms = 50;
        config.monitor.start_delay_secs = 0;
        config.monitor.fast = CycleConfig {
            tokens: vec!["08 02 01 0C".to_string(), "08 02 01 41".to_string()],
            repetitions: 2,
        };
        config.monitor.slow = CycleConfig {
            tokens: vec!["08 03 02".to_string()],
            repetitions: 1,
        };
        config.simulator.command = "sh".to_string();
        config.simulator.args = vec![
            "-c".to_string(),
            "cat \"$0\"; sleep 30".to_string(),
            "{sim_file}".to_string(),
        ];
        config.simulator.settle_secs = 0;
        config.runner.wait_between_cases_secs = 0;
        config.runner.retry_delay_secs = 0;
        config
    }

    fn write_sim(root: &Path, make: &str, name: &str, contents: &str) {
        let dir = root.join("sims").join(make);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), contents).unwrap();
    }

    fn entry(name: &str, make: &str) -> CaseEntry {
        CaseEntry {
            name: name.to_string(),
            make: make.to_string(),
            years: "2010".to_string(),
            location: "US".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_relink_case_passes_from_simulator_log() {
        let tmp = tempdir().unwrap();
        let config = test_config(tmp.path());
        write_sim(
            tmp.path(),
            "Toyota",
            "Case 01.sim",
            "RX 08 02 01 0C\nRX 08 02 01 41\nRX 08 03 02\nRX 08 02 01 0C\nRX 08 02 01 41\n",
        );

        let cases = vec![entry("Case 01.sim", "Toyota")];
        let catalog = Catalog::new(&config.storage.sim_dir, cases.clone());
        let results = Runner::new(&config, catalog, StopFlag::new())
            .run(&cases)
            .await
            .unwrap();

        let row = results.get("Case 01.sim").unwrap();
        assert_eq!(row.status, CaseStatus::Completed);
        assert_eq!(row.relink_fast, Verdict::Passed);
        assert_eq!(row.relink_slow, Verdict::Passed);
        assert_eq!(row.fast_matches, 4);
        assert_eq!(row.attempts, 1);

        // Results, settings and the case log are on disk.
        let dd = DataDir::new(&config.storage.data_dir);
        assert_eq!(ResultsTable::load(&dd.results()).unwrap(), results);
        let settings = SettingsFile::new(dd.settings()).read().unwrap();
        assert_eq!(settings.case, "Case 01.sim");
        assert_eq!(settings.make, "Toyota");
        assert!(std::fs::read_to_string(dd.case_log("Case 01.sim"))
            .unwrap()
            .contains("08 03 02"));
    }

    #[tokio::test]
    async fn test_missing_sim_file_and_indicator_case() {
        let tmp = tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.automation.led_mil = CommandConfig {
            command: "true".to_string(),
            args: vec![],
        };
        write_sim(tmp.path(), "CARB", "Led 1.sim", "");

        let cases = vec![entry("Case 99.sim", "Toyota"), entry("Led 1.sim", "CARB")];
        let catalog = Catalog::new(&config.storage.sim_dir, cases.clone());
        let results = Runner::new(&config, catalog, StopFlag::new())
            .run(&cases)
            .await
            .unwrap();

        let missing = results.get("Case 99.sim").unwrap();
        assert_eq!(missing.status, CaseStatus::SimNotFound);
        assert_eq!(missing.relink_fast, Verdict::NotApplicable);

        let led = results.get("Led 1.sim").unwrap();
        assert_eq!(led.status, CaseStatus::Completed);
        assert_eq!(led.relink_fast, Verdict::NotApplicable);
        assert_eq!(led.result(), Verdict::Passed);
        assert_eq!(results.rows().len(), 2);
    }

    #[tokio::test]
    async fn test_indicator_cases_judged_by_findings_and_exit_code() {
        let tmp = tempdir().unwrap();
        let mut config = test_config(tmp.path());
        // Writes the document back; "Led 1" sees the wrong MIL, "Led 2" exits 1.
        let script = r#"case "$1" in "Led 1.sim") mil=Red;; *) mil=Green;; esac
printf '{"Make":"CARB","Case":"%s","Years":"","Location":"","MIL":"%s"}' "$1" "$mil" > "$0"
[ "$1" != "Led 2.sim" ]"#;
        config.automation.led_mil = CommandConfig {
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                script.to_string(),
                "{settings}".to_string(),
                "{case}".to_string(),
            ],
        };

        let mut cases = Vec::new();
        for name in ["Led 1.sim", "Led 2.sim", "Led 3.sim"] {
            write_sim(tmp.path(), "CARB", name, "");
            let mut case = entry(name, "CARB");
            case.mil = Some("Green".to_string());
            cases.push(case);
        }
        let catalog = Catalog::new(&config.storage.sim_dir, cases.clone());
        let results = Runner::new(&config, catalog, StopFlag::new())
            .run(&cases)
            .await
            .unwrap();

        let mismatch = results.get("Led 1.sim").unwrap();
        assert_eq!(mismatch.status, CaseStatus::Completed);
        assert_eq!(mismatch.findings, Verdict::Failed);
        assert_eq!(mismatch.mismatches, vec!["MIL: expected Green, got Red"]);
        assert_eq!(mismatch.result(), Verdict::Failed);

        let nonzero = results.get("Led 2.sim").unwrap();
        assert_eq!(nonzero.status, CaseStatus::Completed);
        assert!(nonzero.mismatches.is_empty());
        assert!(nonzero.error.as_deref().unwrap().contains("code 1"));
        assert_eq!(nonzero.result(), Verdict::Failed);

        let good = results.get("Led 3.sim").unwrap();
        assert_eq!(good.findings, Verdict::Passed);
        assert_eq!(good.result(), Verdict::Passed);

        assert_eq!(results.summary(), (1, 2, 0));
    }

    #[tokio::test]
    async fn test_relink_automation_spawn_failure_is_an_error() {
        let tmp = tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.automation.relink = CommandConfig {
            command: "nonexistent-automation-xyz".to_string(),
            args: vec![],
        };
        write_sim(
            tmp.path(),
            "Toyota",
            "Case 01.sim",
            "RX 08 02 01 0C\nRX 08 02 01 41\nRX 08 03 02\nRX 08 02 01 0C\nRX 08 02 01 41\n",
        );

        let cases = vec![entry("Case 01.sim", "Toyota")];
        let catalog = Catalog::new(&config.storage.sim_dir, cases.clone());
        let results = Runner::new(&config, catalog, StopFlag::new())
            .run(&cases)
            .await
            .unwrap();

        let row = results.get("Case 01.sim").unwrap();
        assert_eq!(row.status, CaseStatus::Error);
        assert!(row.error.as_deref().unwrap().contains("failed to spawn"));
        assert_eq!(row.result(), Verdict::Failed);
    }

    #[tokio::test]
    async fn test_simulator_spawn_failure_is_retried_then_kept() {
        let tmp = tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.simulator.command = "nonexistent-simulator-xyz".to_string();
        config.runner.max_attempts = 3;
        write_sim(tmp.path(), "Toyota", "Case 01.sim", "");

        let cases = vec![entry("Case 01.sim", "Toyota")];
        let catalog = Catalog::new(&config.storage.sim_dir, cases.clone());
        let results = Runner::new(&config, catalog, StopFlag::new())
            .run(&cases)
            .await
            .unwrap();

        let row = results.get("Case 01.sim").unwrap();
        assert_eq!(row.status, CaseStatus::Error);
        assert_eq!(row.attempts, 3);
        assert!(row.error.as_deref().unwrap().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_stop_before_run_skips_all_cases() {
        let tmp = tempdir().unwrap();
        let config = test_config(tmp.path());
        let stop = StopFlag::new();
        stop.request_stop();

        let cases = vec![entry("Case 01.sim", "Toyota")];
        let catalog = Catalog::new(&config.storage.sim_dir, cases.clone());
        let results = Runner::new(&config, catalog, stop).run(&cases).await.unwrap();
        assert!(results.rows().is_empty());
    }

    #[tokio::test]
    async fn test_second_runner_cannot_take_the_lock() {
        let tmp = tempdir().unwrap();
        let config = test_config(tmp.path());
        let dd = DataDir::new(&config.storage.data_dir);
        dd.init().unwrap();
        let _held = dd.acquire_lock().unwrap();

        let catalog = Catalog::new(&config.storage.sim_dir, vec![]);
        let err = Runner::new(&config, catalog, StopFlag::new())
            .run(&[])
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Lock(LockError::Held { .. })));
    }
}
