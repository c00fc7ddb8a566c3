use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from scanbench.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct HarnessConfig {
    pub storage: StorageConfig,
    pub monitor: MonitorConfig,
    pub simulator: SimulatorConfig,
    pub automation: AutomationConfig,
    pub runner: RunnerConfig,
    pub shutdown: ShutdownConfig,
    pub cases: Vec<CaseEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Root of the simulator scenario tree, laid out as `<sim_dir>/<make>/<case>`.
    pub sim_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub duration_secs: u64,
    pub poll_interval_ms: u64,
    /// Delay between launching the automation step and starting the monitor.
    pub start_delay_secs: u64,
    pub fast: CycleConfig,
    pub slow: CycleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub tokens: Vec<String>,
    /// Full passes through `tokens` required for a pass verdict.
    pub repetitions: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub command: String,
    /// Arguments; `{com_port}` and `{sim_file}` are substituted per case.
    pub args: Vec<String>,
    pub com_port: String,
    /// Grace period after stopping the simulator before the next case starts.
    pub settle_secs: u64,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub command: String,
    /// Arguments; `{case}` and `{settings}` are substituted per case.
    pub args: Vec<String>,
}

/// Automation commands per case kind. An empty command skips the step.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub relink: CommandConfig,
    pub led_mil: CommandConfig,
    pub monitor_icon: CommandConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub wait_between_cases_secs: u64,
    /// Total attempts per case when the monitor reports an error (1 = no retry).
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub stop_file: PathBuf,
}

/// One test case as listed in the config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaseEntry {
    pub name: String,
    pub make: String,
    pub years: String,
    pub location: String,
    /// Expected automation findings. Unset fields are not checked.
    pub led: Option<String>,
    pub dtc: Option<String>,
    pub freeze_frame: Option<String>,
    pub mil: Option<String>,
    pub monitor_color: Option<String>,
}

// --- Default implementations ---

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".scanbench"),
            sim_dir: PathBuf::from("simfiles"),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            duration_secs: 180,
            poll_interval_ms: 1000,
            start_delay_secs: 100,
            fast: CycleConfig {
                tokens: vec!["08 02 01 0C".to_string(), "08 02 01 41".to_string()],
                repetitions: 10,
            },
            slow: CycleConfig {
                tokens: vec![
                    "08 02 01".to_string(),
                    "08 03 02".to_string(),
                    "08 01 03".to_string(),
                    "08 01 07".to_string(),
                    "08 01 0A".to_string(),
                ],
                repetitions: 2,
            },
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            repetitions: 1,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            command: "SimulatorTest".to_string(),
            args: vec![
                "{com_port}".to_string(),
                "{sim_file}".to_string(),
                "showdata".to_string(),
            ],
            com_port: String::new(),
            settle_secs: 3,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            wait_between_cases_secs: 5,
            max_attempts: 1,
            retry_delay_secs: 5,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_file: PathBuf::from("STOP"),
        }
    }
}

/// Errors from loading or validating the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl HarnessConfig {
    /// Load the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::parse(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reject settings the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "monitor.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        for (name, cycle) in [("fast", &self.monitor.fast), ("slow", &self.monitor.slow)] {
            if cycle.tokens.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "monitor.{name}.tokens must not be empty"
                )));
            }
            if cycle.tokens.iter().any(|t| t.is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "monitor.{name}.tokens must not contain empty tokens"
                )));
            }
            if cycle.repetitions == 0 {
                return Err(ConfigError::Invalid(format!(
                    "monitor.{name}.repetitions must be at least 1"
                )));
            }
        }
        if self.runner.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "runner.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
