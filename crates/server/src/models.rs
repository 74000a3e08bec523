use chrono::{DateTime, Utc};
use filamentdryer_core::{DryerError, Preset};
use filamentdryer_sync::{DryerSettings, SyncReport};
use serde::Serialize;

/// Settings row as stored in SQLite.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SettingsRow {
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

/// Saved settings plus the outcome of the sync that followed. Exactly one of
/// `sync` and `sync_error` is set.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSettingsResponse {
    pub settings: DryerSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub written: usize,
    pub failed: usize,
    #[serde(flatten)]
    pub report: SyncReport,
}

impl From<SyncReport> for SyncResponse {
    fn from(report: SyncReport) -> Self {
        Self {
            written: report.written(),
            failed: report.failed(),
            report,
        }
    }
}

/// One configured preset as the settings page shows it.
#[derive(Debug, Serialize, PartialEq)]
pub struct PresetView {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PresetView {
    pub fn new(index: usize, parsed: Result<Preset, DryerError>, filename_template: &str) -> Self {
        let preset = match parsed {
            Ok(p) => p,
            Err(e) => return Self::failed(index, None, e),
        };
        match preset.filename(filename_template) {
            Ok(filename) => Self {
                index,
                name: Some(preset.name().to_string()),
                display: Some(preset.display()),
                filename: Some(filename),
                minutes: Some(preset.duration_minutes()),
                error: None,
            },
            Err(e) => Self::failed(index, Some(preset.name().to_string()), e),
        }
    }

    fn failed(index: usize, name: Option<String>, error: DryerError) -> Self {
        Self {
            index,
            name,
            display: None,
            filename: None,
            minutes: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PresetsResponse {
    pub presets: Vec<PresetView>,
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub directory: String,
    pub files: Vec<filamentdryer_sync::StoredFile>,
}
