/// Hardware simulator lifecycle: spawn the simulator for a case with its
/// output captured to the case log, and stop it when the case is done.
use crate::config::{CommandConfig, SimulatorConfig};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

/// Errors that can occur while starting or stopping external processes.
#[derive(Debug)]
pub enum SimulatorError {
    /// Failed to create the log file.
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to spawn the subprocess.
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for SimulatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulatorError::LogFile { path, source } => {
                write!(f, "failed to create log file {}: {}", path.display(), source)
            }
            SimulatorError::Spawn { command, source } => {
                write!(f, "failed to spawn {command}: {source}")
            }
        }
    }
}

impl std::error::Error for SimulatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulatorError::LogFile { source, .. } => Some(source),
            SimulatorError::Spawn { source, .. } => Some(source),
        }
    }
}

/// Substitute `{name}` placeholders in every argument.
fn build_args(args: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

/// A running simulator process.
#[derive(Debug)]
pub struct Simulator {
    child: Child,
    pid: u32,
}

impl Simulator {
    /// Spawn the simulator for `sim_file`, truncating `log_path` and sending
    /// stdout and stderr there.
    ///
    /// The process runs in its own process group so `stop` can take down
    /// anything it spawned as well.
    pub fn start(
        config: &SimulatorConfig,
        sim_file: &Path,
        log_path: &Path,
    ) -> Result<Self, SimulatorError> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SimulatorError::LogFile {
                path: log_path.to_path_buf(),
                source: e,
            })?;
        }
        let log_file = std::fs::File::create(log_path).map_err(|e| SimulatorError::LogFile {
            path: log_path.to_path_buf(),
            source: e,
        })?;
        let log_file_stderr = log_file.try_clone().map_err(|e| SimulatorError::LogFile {
            path: log_path.to_path_buf(),
            source: e,
        })?;

        let sim_file = sim_file.to_string_lossy().into_owned();
        let args = build_args(
            &config.args,
            &[
                ("com_port", config.com_port.as_str()),
                ("sim_file", sim_file.as_str()),
            ],
        );
        tracing::info!(
            command = %config.command,
            args = ?args,
            log = %log_path.display(),
            "starting simulator"
        );

        let child = Command::new(&config.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_stderr))
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SimulatorError::Spawn {
                command: config.command.clone(),
                source: e,
            })?;

        let pid = child.id().unwrap_or(0);
        tracing::info!(pid, "simulator started");

        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Stop the simulator: SIGTERM to its process group, then SIGKILL if it
    /// is still around after `grace`.
    pub async fn stop(mut self, grace: Duration) {
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::info!(pid = self.pid, ?status, "simulator already exited");
            return;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Err(e) = killpg(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
                tracing::debug!(pid = self.pid, error = %e, "SIGTERM to simulator group failed");
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => tracing::info!(pid = self.pid, ?status, "simulator stopped"),
            Ok(Err(e)) => tracing::warn!(pid = self.pid, error = %e, "failed waiting on simulator"),
            Err(_) => {
                tracing::warn!(pid = self.pid, "simulator ignored SIGTERM, killing");
                #[cfg(unix)]
                {
                    use nix::sys::signal::{killpg, Signal};
                    use nix::unistd::Pid;
                    let _ = killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL);
                }
                let _ = self.child.kill().await;
            }
        }
    }
}

/// Result of running an automation step.
#[derive(Debug)]
pub struct StepResult {
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl StepResult {
    /// Exited with status 0. A step killed by a signal has no exit code and
    /// does not count as a success.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run an automation step to completion. `{case}` and `{settings}` in its
/// arguments are substituted. An empty command is skipped and reported as
/// `None`.
pub async fn run_step(
    step: &CommandConfig,
    case: &str,
    settings_path: &Path,
) -> Result<Option<StepResult>, SimulatorError> {
    if step.command.trim().is_empty() {
        tracing::debug!(case, "no automation command configured, skipping");
        return Ok(None);
    }

    let settings = settings_path.to_string_lossy().into_owned();
    let args = build_args(
        &step.args,
        &[("case", case), ("settings", settings.as_str())],
    );
    tracing::info!(command = %step.command, args = ?args, "running automation step");

    let start = Instant::now();
    let status = Command::new(&step.command)
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| SimulatorError::Spawn {
            command: step.command.clone(),
            source: e,
        })?;
    let duration = start.elapsed();

    let exit_code = status.code();
    if status.success() {
        tracing::info!(case, duration_secs = duration.as_secs(), "automation step finished");
    } else {
        tracing::warn!(case, exit_code = ?exit_code, "automation step exited unsuccessfully");
    }
    Ok(Some(StepResult {
        exit_code,
        duration,
    }))
}
