//! Standalone drying script generator.
//!
//! Writes a G-code file that holds the bed and/or chamber at a temperature
//! for a number of minutes.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use filamentdryer_core::{generate, DryingRequest, ScriptOptions};

#[derive(Parser)]
#[command(name = "filament-dryer-script")]
#[command(about = "Generate a G-code script that dries filament on a heated bed or chamber", long_about = None)]
struct Cli {
    /// Output filename
    filename: PathBuf,
    /// Drying time, in minutes
    time: u32,
    /// Drying temperature, in degrees Celsius
    temperature: i32,
    /// Use the bed heater for drying
    #[arg(long)]
    bed: bool,
    /// Use the chamber heater for drying
    #[arg(long)]
    chamber: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let request = DryingRequest::new(cli.time, cli.temperature, cli.bed, cli.chamber)?;
    let bytes = write_script(&cli.filename, &request, &ScriptOptions::default())?;

    let name = cli
        .filename
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.filename.display().to_string());
    println!("Generated Dryer Script");
    println!("  File:    {}", name);
    println!("  Time:    {} mins", request.duration_minutes);
    println!("  Temp:    {} deg C", request.temperature_celsius);
    println!("  Bed:     {}", request.use_bed);
    println!("  Chamber: {}", request.use_chamber);
    println!("  Size:    {} bytes", bytes);
    Ok(())
}

/// Generates into a temporary file next to `path` and moves it into place
/// only once the whole script is written.
fn write_script(path: &Path, request: &DryingRequest, options: &ScriptOptions) -> Result<usize> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("cannot create a temporary file in {}", dir.display()))?;

    let mut out = BufWriter::new(tmp);
    let bytes = generate(&mut out, request, options)?;
    out.flush()?;
    let tmp = out.into_inner().map_err(|e| e.into_error())?;
    tmp.persist(path)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(bytes)
}
