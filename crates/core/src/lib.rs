//! Filament drying script generation.
//!
//! Builds G-code that holds a printer's bed and/or chamber at a fixed
//! temperature for a fixed time, plus the preset naming helpers used to lay
//! those scripts out as files.

pub mod commands;
pub mod error;
pub mod preset;
pub mod script;

pub use commands::{Chirp, CommandKind, CommandTemplates, CHIRPS};
pub use error::{DryerError, Result};
pub use preset::{
    normalize_dir, to_identifier, Preset, DEFAULT_FILENAME_TEMPLATE, FILE_EXTENSION, MAX_DURATION_MINUTES,
};
pub use script::{generate, generate_at, percent_complete, render, reports_progress, DryingRequest, ScriptOptions};
