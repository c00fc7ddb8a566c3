/// Per-case settings document shared with the automation step.
///
/// The automation scripts read the case identity from this flat JSON file and
/// write their findings (LED, DTC, freeze frame, MIL, monitor color) back into
/// it. The runner seeds a fresh document for each case and hands the value
/// around explicitly; the relink monitor never looks at it.
use crate::config::CaseEntry;
use crate::jsonfile::{self, JsonFileError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder the automation step overwrites with what it observed.
pub const UNSET: &str = "Null";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSettings {
    #[serde(rename = "Make")]
    pub make: String,
    #[serde(rename = "Case")]
    pub case: String,
    #[serde(rename = "Years")]
    pub years: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "OBD2", default)]
    pub obd2: String,
    #[serde(rename = "LED", default = "unset")]
    pub led: String,
    #[serde(rename = "DTC", default = "unset")]
    pub dtc: String,
    #[serde(rename = "Freeze Frame", default = "unset")]
    pub freeze_frame: String,
    #[serde(rename = "MIL", default = "unset")]
    pub mil: String,
    #[serde(rename = "Monitor Color", default = "unset")]
    pub monitor_color: String,
}

fn unset() -> String {
    UNSET.to_string()
}

impl CaseSettings {
    /// Fresh document for a case: identity from the catalog, findings unset.
    pub fn seed(entry: &CaseEntry) -> Self {
        Self {
            make: entry.make.clone(),
            case: entry.name.clone(),
            years: entry.years.clone(),
            location: entry.location.clone(),
            obd2: String::new(),
            led: unset(),
            dtc: unset(),
            freeze_frame: unset(),
            mil: unset(),
            monitor_color: unset(),
        }
    }

    /// Findings the automation step has filled in, as (field, value) pairs.
    pub fn findings(&self) -> Vec<(&'static str, &str)> {
        [
            ("LED", self.led.as_str()),
            ("DTC", self.dtc.as_str()),
            ("Freeze Frame", self.freeze_frame.as_str()),
            ("MIL", self.mil.as_str()),
            ("Monitor Color", self.monitor_color.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| *v != UNSET)
        .collect()
    }

    /// Compare the findings with the values `entry` expects. Returns one
    /// description per differing field; fields with no expectation are
    /// skipped.
    pub fn mismatches(&self, entry: &CaseEntry) -> Vec<String> {
        [
            ("LED", entry.led.as_deref(), self.led.as_str()),
            ("DTC", entry.dtc.as_deref(), self.dtc.as_str()),
            ("Freeze Frame", entry.freeze_frame.as_deref(), self.freeze_frame.as_str()),
            ("MIL", entry.mil.as_deref(), self.mil.as_str()),
            ("Monitor Color", entry.monitor_color.as_deref(), self.monitor_color.as_str()),
        ]
        .into_iter()
        .filter_map(|(field, expected, actual)| {
            let expected = expected?;
            (expected != actual).then(|| format!("{field}: expected {expected}, got {actual}"))
        })
        .collect()
    }
}

/// True when the case lists at least one expected finding.
pub fn has_expectations(entry: &CaseEntry) -> bool {
    [
        &entry.led,
        &entry.dtc,
        &entry.freeze_frame,
        &entry.mil,
        &entry.monitor_color,
    ]
    .iter()
    .any(|v| v.is_some())
}

/// The settings document on disk.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, settings: &CaseSettings) -> Result<(), JsonFileError> {
        jsonfile::write_atomic(&self.path, settings)
    }

    pub fn read(&self) -> Result<CaseSettings, JsonFileError> {
        jsonfile::read(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry() -> CaseEntry {
        CaseEntry {
            name: "Case 12 - Toyota.sim".to_string(),
            make: "Toyota".to_string(),
            years: "2008-2012".to_string(),
            location: "US".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_seed_uses_catalog_fields_and_placeholders() {
        let s = CaseSettings::seed(&entry());
        assert_eq!(s.case, "Case 12 - Toyota.sim");
        assert_eq!(s.make, "Toyota");
        assert_eq!(s.obd2, "");
        assert_eq!(s.led, "Null");
        assert_eq!(s.monitor_color, "Null");
        assert!(s.findings().is_empty());
    }

    #[test]
    fn test_document_uses_automation_field_names() {
        let value = serde_json::to_value(CaseSettings::seed(&entry())).unwrap();
        assert_eq!(value["Case"], "Case 12 - Toyota.sim");
        assert_eq!(value["Freeze Frame"], "Null");
        assert_eq!(value["Monitor Color"], "Null");
        assert_eq!(value["OBD2"], "");
        assert_eq!(value.as_object().unwrap().len(), 10);
    }

    #[test]
    fn test_write_and_read_back_automation_findings() {
        let dir = tempdir().unwrap();
        let file = SettingsFile::new(dir.path().join("settings.json"));
        file.write(&CaseSettings::seed(&entry())).unwrap();

        // The automation step rewrites the document with what it saw.
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        value["MIL"] = serde_json::json!("Red");
        value["DTC"] = serde_json::json!("P0300");
        std::fs::write(file.path(), value.to_string()).unwrap();

        let read = file.read().unwrap();
        assert_eq!(read.mil, "Red");
        assert_eq!(read.findings(), vec![("DTC", "P0300"), ("MIL", "Red")]);
    }

    #[test]
    fn test_mismatches_only_checks_expected_fields() {
        let mut expected = entry();
        assert!(!has_expectations(&expected));
        expected.mil = Some("Green".to_string());
        expected.dtc = Some("P0300".to_string());
        assert!(has_expectations(&expected));

        let mut found = CaseSettings::seed(&expected);
        found.mil = "Red".to_string();
        found.dtc = "P0300".to_string();
        found.led = "On".to_string();

        assert_eq!(found.mismatches(&expected), vec!["MIL: expected Green, got Red"]);

        found.mil = "Green".to_string();
        assert!(found.mismatches(&expected).is_empty());
    }

    #[test]
    fn test_unset_finding_is_a_mismatch_when_expected() {
        let mut expected = entry();
        expected.led = Some("On".to_string());
        let found = CaseSettings::seed(&expected);
        assert_eq!(found.mismatches(&expected), vec!["LED: expected On, got Null"]);
    }

    #[test]
    fn test_missing_findings_default_to_unset() {
        let s: CaseSettings = serde_json::from_str(
            r#"{"Make": "CARB", "Case": "Led 1.sim", "Years": "", "Location": ""}"#,
        )
        .unwrap();
        assert_eq!(s.led, "Null");
        assert_eq!(s.obd2, "");
    }
}
