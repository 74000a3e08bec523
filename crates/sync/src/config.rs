use std::env;

use filamentdryer_core::{normalize_dir, CommandTemplates, Preset, ScriptOptions, DEFAULT_FILENAME_TEMPLATE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_PRESET_DIRECTORY: &str = "FilamentDryer Plugin";

/// Storage location class in the host's file tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    #[default]
    Local,
    Sdcard,
}

/// Snapshot of the dryer settings.
///
/// Rebuilt from the settings store on every save and handed by value to the
/// sync routine; never mutated while a sync runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DryerSettings {
    /// Raw preset entries; each one is validated on its own during a sync.
    pub presets: Vec<Value>,
    pub preset_origin: Origin,
    pub preset_directory: String,
    pub filename_template: String,
    pub use_heated_bed: bool,
    pub use_heated_chamber: bool,
    pub command_templates: CommandTemplates,
}

impl Default for DryerSettings {
    fn default() -> Self {
        Self {
            presets: vec![
                json!({ "name": "PLA", "temp": 50, "time": 4 }),
                json!({ "name": "ABS", "temp": 70, "time": 5 }),
                json!({ "name": "TPU", "temp": 45, "time": 4 }),
                json!({ "name": "NYLON", "temp": 70, "time": 6 }),
            ],
            preset_origin: Origin::Local,
            preset_directory: DEFAULT_PRESET_DIRECTORY.to_string(),
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            use_heated_bed: true,
            use_heated_chamber: true,
            command_templates: CommandTemplates::default(),
        }
    }
}

impl DryerSettings {
    pub fn from_env() -> Self {
        let mut cfg = DryerSettings::default();

        if let Ok(v) = env::var("FILAMENTDRYER_PRESET_DIRECTORY") {
            if !v.is_empty() {
                cfg.preset_directory = v;
            }
        }
        if let Ok(v) = env::var("FILAMENTDRYER_FILENAME_TEMPLATE") {
            if !v.is_empty() {
                cfg.filename_template = v;
            }
        }
        if let Ok(v) = env::var("FILAMENTDRYER_USE_HEATED_BED") {
            if let Some(b) = parse_flag(&v) {
                cfg.use_heated_bed = b;
            }
        }
        if let Ok(v) = env::var("FILAMENTDRYER_USE_HEATED_CHAMBER") {
            if let Some(b) = parse_flag(&v) {
                cfg.use_heated_chamber = b;
            }
        }

        cfg
    }

    /// Applies a partial settings document on top of `self`.
    ///
    /// Top-level keys present in `patch` replace the current values; absent
    /// keys are kept.
    pub fn merged(&self, patch: &Value) -> Result<Self, serde_json::Error> {
        let mut current = serde_json::to_value(self)?;
        if let (Value::Object(base), Value::Object(changes)) = (&mut current, patch) {
            for (key, value) in changes {
                base.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(current)
    }

    /// Parses every preset entry, keeping failures in place.
    pub fn parsed_presets(&self) -> Vec<filamentdryer_core::Result<Preset>> {
        self.presets.iter().map(Preset::from_value).collect()
    }

    /// `preset_directory` as a storage path: no leading, trailing or doubled `/`.
    pub fn preset_folder(&self) -> String {
        normalize_dir(&self.preset_directory)
    }

    pub fn script_options(&self) -> ScriptOptions {
        ScriptOptions {
            templates: self.command_templates.clone(),
            ..ScriptOptions::default()
        }
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
