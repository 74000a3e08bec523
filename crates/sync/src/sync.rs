//! Keeps the preset folder in step with the settings.
//!
//! A sync renders every preset in memory first, then removes files the new set
//! no longer contains and uploads the new set over the old one. Presets that
//! fail are reported one by one; they never abort the rest of the batch.

use std::collections::BTreeSet;

use filamentdryer_core::{generate, Preset};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::DryerSettings;
use crate::storage::{PresetStorage, StorageError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("preset folder unavailable: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PresetOutcome {
    Written {
        index: usize,
        name: String,
        path: String,
        display: String,
        bytes: usize,
    },
    Failed {
        index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        error: String,
    },
}

impl PresetOutcome {
    pub fn index(&self) -> usize {
        match self {
            PresetOutcome::Written { index, .. } | PresetOutcome::Failed { index, .. } => *index,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, PresetOutcome::Written { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovalFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub directory: String,
    /// One entry per configured preset, in settings order.
    pub outcomes: Vec<PresetOutcome>,
    pub removed: Vec<String>,
    pub failed_removals: Vec<RemovalFailure>,
}

impl SyncReport {
    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_written()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.written()
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.failed_removals.is_empty()
    }
}

struct Rendered {
    index: usize,
    preset: Preset,
    path: String,
    display: String,
    script: Vec<u8>,
}

/// Brings the preset folder in line with `settings`.
pub fn sync_presets<S: PresetStorage + ?Sized>(
    settings: &DryerSettings,
    storage: &S,
) -> Result<SyncReport, SyncError> {
    let directory = settings.preset_folder();
    info!(directory = %directory, presets = settings.presets.len(), "Syncing preset files");
    storage.add_folder(&directory)?;

    let mut report = SyncReport {
        directory: directory.clone(),
        ..SyncReport::default()
    };

    // Build the new set
    let mut pending: Vec<Rendered> = Vec::new();
    let mut wanted: BTreeSet<String> = BTreeSet::new();
    for (index, raw) in settings.presets.iter().enumerate() {
        match render_preset(settings, &directory, index, raw) {
            Ok(rendered) if !wanted.insert(rendered.path.clone()) => {
                warn!(index, path = %rendered.path, "Duplicate preset file name");
                report.outcomes.push(PresetOutcome::Failed {
                    index,
                    name: Some(rendered.preset.name().to_string()),
                    error: format!("duplicate file name {}", rendered.path),
                });
            }
            Ok(rendered) => pending.push(rendered),
            Err(failed) => {
                warn!(index, preset = %raw, error = %failed_error(&failed), "Failed to build preset file");
                report.outcomes.push(failed);
            }
        }
    }

    // Drop stale files
    for file in storage.list_files(&directory)? {
        if wanted.contains(&file.path) {
            continue;
        }
        match storage.remove_file(&file.path) {
            Ok(()) => {
                info!(path = %file.path, "Removed stale preset file");
                report.removed.push(file.path);
            }
            Err(e) => {
                warn!(path = %file.path, error = %e, "Failed to remove stale preset file");
                report.failed_removals.push(RemovalFailure {
                    path: file.path,
                    error: e.to_string(),
                });
            }
        }
    }

    // Upload the new set
    for rendered in pending {
        let outcome = match storage.add_file(&rendered.path, &rendered.script, true, &rendered.display) {
            Ok(()) => {
                info!(path = %rendered.path, bytes = rendered.script.len(), "Wrote preset file");
                PresetOutcome::Written {
                    index: rendered.index,
                    name: rendered.preset.name().to_string(),
                    path: rendered.path,
                    display: rendered.display,
                    bytes: rendered.script.len(),
                }
            }
            Err(e) => {
                warn!(path = %rendered.path, error = %e, "Failed to write preset file");
                PresetOutcome::Failed {
                    index: rendered.index,
                    name: Some(rendered.preset.name().to_string()),
                    error: e.to_string(),
                }
            }
        };
        report.outcomes.push(outcome);
    }

    report.outcomes.sort_by_key(PresetOutcome::index);
    info!(
        written = report.written(),
        failed = report.failed(),
        removed = report.removed.len(),
        "Preset sync finished"
    );
    Ok(report)
}

fn render_preset(
    settings: &DryerSettings,
    directory: &str,
    index: usize,
    raw: &serde_json::Value,
) -> Result<Rendered, PresetOutcome> {
    let fail = |name: Option<String>, error: String| PresetOutcome::Failed { index, name, error };

    let preset = Preset::from_value(raw).map_err(|e| fail(None, e.to_string()))?;
    let named = |e: filamentdryer_core::DryerError| fail(Some(preset.name().to_string()), e.to_string());

    let path = preset
        .filepath(directory, &settings.filename_template)
        .map_err(named)?;
    let request = preset
        .to_request(settings.use_heated_bed, settings.use_heated_chamber)
        .map_err(named)?;
    let mut script = Vec::new();
    generate(&mut script, &request, &settings.script_options()).map_err(named)?;

    Ok(Rendered {
        index,
        display: preset.display(),
        preset,
        path,
        script,
    })
}

fn failed_error(outcome: &PresetOutcome) -> &str {
    match outcome {
        PresetOutcome::Failed { error, .. } => error,
        PresetOutcome::Written { .. } => "",
    }
}
