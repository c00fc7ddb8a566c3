//! Case catalog: which cases exist, what kind of check each one needs, and
//! where its simulator scenario lives.
//!
//! Cases come from `[[cases]]` in the config file. Without any, the catalog
//! is discovered from the scenario tree as `<sim_dir>/<make>/*.sim`.

use crate::config::CaseEntry;
use std::path::{Path, PathBuf};

/// Makes whose cases check the LED and MIL indicator.
const LED_MIL_MAKES: [&str; 3] = ["CARB", "Massachusetts", "No Program"];
const MONITOR_ICON_MAKE: &str = "Monitor Icon";

/// What a case verifies, which decides the automation step and whether the
/// relink monitor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseKind {
    Relink,
    LedMil,
    MonitorIcon,
    /// Neither a relink case nor a known indicator group.
    Other,
}

impl CaseKind {
    pub fn of(entry: &CaseEntry) -> Self {
        if entry.name.contains("Case") {
            CaseKind::Relink
        } else if LED_MIL_MAKES.contains(&entry.make.as_str()) {
            CaseKind::LedMil
        } else if entry.make == MONITOR_ICON_MAKE {
            CaseKind::MonitorIcon
        } else {
            CaseKind::Other
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CaseKind::Relink => "relink",
            CaseKind::LedMil => "led/mil",
            CaseKind::MonitorIcon => "monitor icon",
            CaseKind::Other => "other",
        }
    }
}

impl std::str::FromStr for CaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relink" => Ok(CaseKind::Relink),
            "led-mil" | "led/mil" | "led" => Ok(CaseKind::LedMil),
            "monitor-icon" | "monitor icon" => Ok(CaseKind::MonitorIcon),
            "other" => Ok(CaseKind::Other),
            _ => Err(format!(
                "unknown case kind '{s}' (expected relink, led-mil, monitor-icon or other)"
            )),
        }
    }
}

/// Narrow a selection to the given makes and kind. An empty `groups` list
/// and `None` kind leave the selection untouched. Makes compare without
/// regard to ASCII case.
pub fn filter(cases: Vec<CaseEntry>, groups: &[String], kind: Option<CaseKind>) -> Vec<CaseEntry> {
    cases
        .into_iter()
        .filter(|c| groups.is_empty() || groups.iter().any(|g| g.eq_ignore_ascii_case(&c.make)))
        .filter(|c| kind.map_or(true, |k| CaseKind::of(c) == k))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Catalog {
    sim_dir: PathBuf,
    cases: Vec<CaseEntry>,
}

impl Catalog {
    pub fn new(sim_dir: impl Into<PathBuf>, cases: Vec<CaseEntry>) -> Self {
        Self {
            sim_dir: sim_dir.into(),
            cases,
        }
    }

    /// Use the configured cases, or discover them from `sim_dir` when none
    /// are configured.
    pub fn load(sim_dir: &Path, configured: &[CaseEntry]) -> Self {
        if !configured.is_empty() {
            return Self::new(sim_dir, configured.to_vec());
        }
        let cases = discover(sim_dir);
        tracing::info!(
            sim_dir = %sim_dir.display(),
            count = cases.len(),
            "discovered cases from scenario tree"
        );
        Self::new(sim_dir, cases)
    }

    pub fn cases(&self) -> &[CaseEntry] {
        &self.cases
    }

    pub fn find(&self, name: &str) -> Option<&CaseEntry> {
        self.cases.iter().find(|c| c.name == name)
    }

    /// Pick cases by name, keeping the requested order. An empty request
    /// selects every case. Unknown names are returned separately.
    pub fn select(&self, names: &[String]) -> (Vec<CaseEntry>, Vec<String>) {
        if names.is_empty() {
            return (self.cases.clone(), Vec::new());
        }
        let mut selected = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match self.find(name) {
                Some(entry) => selected.push(entry.clone()),
                None => unknown.push(name.clone()),
            }
        }
        (selected, unknown)
    }

    /// Resolve `<sim_dir>/<make>/<case>`. `None` when the file is missing.
    pub fn sim_file(&self, entry: &CaseEntry) -> Option<PathBuf> {
        let path = self.sim_dir.join(&entry.make).join(&entry.name);
        if path.is_file() {
            Some(path)
        } else {
            tracing::warn!(path = %path.display(), "sim file not found");
            None
        }
    }
}

/// Find `*.sim` files one level below `sim_dir`, the directory naming the make.
fn discover(sim_dir: &Path) -> Vec<CaseEntry> {
    let pattern = sim_dir.join("*").join("*.sim");
    let pattern = pattern.to_string_lossy();
    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            tracing::warn!(error = %e, "invalid sim file pattern");
            return Vec::new();
        }
    };

    let mut cases: Vec<CaseEntry> = paths
        .filter_map(Result::ok)
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().into_owned();
            let make = path.parent()?.file_name()?.to_string_lossy().into_owned();
            Some(CaseEntry {
                name,
                make,
                ..Default::default()
            })
        })
        .collect();
    cases.sort_by(|a, b| (&a.make, &a.name).cmp(&(&b.make, &b.name)));
    cases
}
