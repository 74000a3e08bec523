//! Drying script generation.
//!
//! A script heats the enabled heaters, waits for them to reach temperature,
//! dwells one minute at a time while reporting progress, then chirps and turns
//! the heaters off.

use std::borrow::Cow;
use std::io::Write;

use chrono::{Local, NaiveDateTime};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::commands::{CommandTemplates, CHIRPS};
use crate::error::{DryerError, Result};

pub const GENERATOR_NAME: &str = "Filament Dryer Gcode Script Generator";
pub const GENERATOR_URL: &str = "https://github.com/kforth/Filament-Dryer-GCode-Scripts";
pub const GENERATOR_AUTHOR: &str = "Kestin Goforth";
pub const GENERATOR_COPYRIGHT: &str = "Copyright 2022";
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seconds per dwell-loop iteration.
pub const DWELL_SECONDS: u32 = 60;

/// Progress is reported every iteration once this many minutes or fewer remain.
const FINAL_STRETCH_MINUTES: u32 = 5;
const REPORT_EVERY_MINUTES: u32 = 5;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryingRequest {
    pub duration_minutes: u32,
    pub temperature_celsius: i32,
    pub use_bed: bool,
    pub use_chamber: bool,
}

impl DryingRequest {
    pub fn new(
        duration_minutes: u32,
        temperature_celsius: i32,
        use_bed: bool,
        use_chamber: bool,
    ) -> Result<Self> {
        let request = Self {
            duration_minutes,
            temperature_celsius,
            use_bed,
            use_chamber,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.use_bed && !self.use_chamber {
            return Err(DryerError::InvalidConfiguration(
                "must enable either bed or chamber".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScriptOptions {
    pub templates: CommandTemplates,
    pub line_separator: String,
    /// Output encoding of every line and separator. UTF-16 labels encode as
    /// UTF-8, as `encoding_rs` does for all output.
    pub encoding: &'static Encoding,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            templates: CommandTemplates::default(),
            line_separator: "\n".to_string(),
            encoding: encoding_rs::UTF_8,
        }
    }
}

/// `floor(100 * elapsed / total)`, or 0 for an empty run.
pub fn percent_complete(elapsed_minutes: u32, total_minutes: u32) -> u32 {
    if total_minutes == 0 {
        return 0;
    }
    (100 * u64::from(elapsed_minutes) / u64::from(total_minutes)) as u32
}

/// Whether the dwell iteration at `elapsed_minutes` starts with a progress report.
pub fn reports_progress(elapsed_minutes: u32, total_minutes: u32) -> bool {
    let remaining = total_minutes.saturating_sub(elapsed_minutes);
    remaining <= FINAL_STRETCH_MINUTES || elapsed_minutes % REPORT_EVERY_MINUTES == 0
}

/// Writes a drying script to `out`, stamped with the current local time.
///
/// Returns the number of bytes written. Nothing is written when the request
/// enables neither heater.
pub fn generate<W: Write>(
    out: &mut W,
    request: &DryingRequest,
    options: &ScriptOptions,
) -> Result<usize> {
    generate_at(out, request, options, Local::now().naive_local())
}

/// Same as [`generate`] with an explicit generation timestamp.
pub fn generate_at<W: Write>(
    out: &mut W,
    request: &DryingRequest,
    options: &ScriptOptions,
    generated_at: NaiveDateTime,
) -> Result<usize> {
    request.validate()?;

    let cmds = &options.templates;
    let mut script = ScriptWriter::new(out, &options.line_separator, options.encoding)?;
    let DryingRequest {
        duration_minutes: minutes,
        temperature_celsius: temp,
        use_bed,
        use_chamber,
    } = *request;

    // Header
    script.line(&format!("; generated by [{}]({})", GENERATOR_NAME, GENERATOR_URL))?;
    script.line(&format!("; {}  {}", GENERATOR_COPYRIGHT, GENERATOR_AUTHOR))?;
    script.line(&format!(
        "; version: {}, date: {}",
        GENERATOR_VERSION,
        generated_at.format(TIMESTAMP_FORMAT)
    ))?;
    script.line(&summary_line(request))?;
    script.blank()?;

    // Heat up
    script.line(&cmds.message("Heating"))?;
    script.line(&cmds.chirp(CHIRPS[0]))?;
    if use_bed {
        script.line(&cmds.bed_set(temp))?;
    }
    if use_chamber {
        script.line(&cmds.chamber_set(temp))?;
    }
    if use_bed {
        script.line(&cmds.bed_wait(temp))?;
    }
    if use_chamber {
        script.line(&cmds.chamber_wait(temp))?;
    }
    script.line(&cmds.chirp(CHIRPS[0]))?;
    script.line(&cmds.chirp(CHIRPS[1]))?;
    script.blank()?;

    // Dwell
    for elapsed in 0..minutes {
        if reports_progress(elapsed, minutes) {
            let remaining = minutes - elapsed;
            script.line(&cmds.progress(percent_complete(elapsed, minutes), remaining))?;
            script.line(&cmds.message(&format!("Drying: {} mins Remaining", remaining)))?;
        }
        script.line(&cmds.dwell(DWELL_SECONDS))?;
    }

    // Done
    script.line(&cmds.progress(100, 0))?;
    script.line(&cmds.message("Drying Done"))?;
    script.blank()?;
    for chirp in CHIRPS {
        script.line(&cmds.chirp(chirp))?;
    }
    if use_bed {
        script.line(&cmds.bed_set(0))?;
    }
    if use_chamber {
        script.line(&cmds.chamber_set(0))?;
    }
    script.blank()?;

    Ok(script.bytes_written())
}

/// Renders a whole script into memory.
pub fn render(request: &DryingRequest, options: &ScriptOptions) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    generate(&mut buf, request, options)?;
    Ok(buf)
}

fn summary_line(request: &DryingRequest) -> String {
    format!(
        "; temp: {} C; time: {} mins; use_bed: {}; use_chamber: {}",
        request.temperature_celsius, request.duration_minutes, request.use_bed, request.use_chamber
    )
}

/// Writes encoded lines and counts the bytes that reach `out`.
struct ScriptWriter<'a, W: Write> {
    out: &'a mut W,
    separator: Cow<'a, [u8]>,
    encoding: &'static Encoding,
    written: usize,
}

impl<'a, W: Write> ScriptWriter<'a, W> {
    fn new(out: &'a mut W, separator: &'a str, encoding: &'static Encoding) -> Result<Self> {
        let separator = encode(encoding, separator)?;
        Ok(Self { out, separator, encoding, written: 0 })
    }

    fn line(&mut self, text: &str) -> Result<()> {
        let bytes = encode(self.encoding, text)?;
        self.out.write_all(&bytes)?;
        self.out.write_all(&self.separator)?;
        self.written += bytes.len() + self.separator.len();
        Ok(())
    }

    fn blank(&mut self) -> Result<()> {
        self.line("")
    }

    fn bytes_written(&self) -> usize {
        self.written
    }
}

fn encode<'s>(encoding: &'static Encoding, text: &'s str) -> Result<Cow<'s, [u8]>> {
    let (bytes, _, unmappable) = encoding.encode(text);
    if unmappable {
        return Err(DryerError::Encoding {
            encoding: encoding.name(),
            text: text.to_string(),
        });
    }
    Ok(bytes)
}
