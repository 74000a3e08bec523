use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{DryerError, Result};
use crate::script::DryingRequest;

/// Extension of generated preset files.
pub const FILE_EXTENSION: &str = "filamentdryer";
pub const DEFAULT_FILENAME_TEMPLATE: &str = "{name}";
/// Longest drying run a preset may describe: one week.
pub const MAX_DURATION_MINUTES: u32 = 7 * 24 * 60;

/// A named drying profile.
///
/// Presets are immutable; settings replace the whole list instead of editing
/// one in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preset {
    name: String,
    #[serde(rename = "time")]
    time_hours: f64,
    #[serde(rename = "temp")]
    temperature_celsius: i32,
}

impl Preset {
    pub fn new(name: impl Into<String>, time_hours: f64, temperature_celsius: i32) -> Result<Self> {
        if !time_hours.is_finite() || time_hours <= 0.0 {
            return Err(DryerError::Validation(format!(
                "time must be a positive number of hours, got {}",
                time_hours
            )));
        }
        if (time_hours * 60.0).trunc() > f64::from(MAX_DURATION_MINUTES) {
            return Err(DryerError::Validation(format!(
                "time must be at most {} hours, got {}",
                MAX_DURATION_MINUTES / 60,
                time_hours
            )));
        }
        Ok(Self {
            name: name.into(),
            time_hours,
            temperature_celsius,
        })
    }

    /// Builds a preset from a loosely typed settings entry.
    ///
    /// Numbers may arrive as JSON numbers or numeric strings; a fractional
    /// temperature is truncated.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| DryerError::Validation(format!("preset must be an object, got {}", value)))?;
        let name = match obj.get("name") {
            Some(Value::String(s)) => s.clone(),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
            Some(other) => {
                return Err(DryerError::Validation(format!("preset name is not text: {}", other)))
            }
            None => return Err(DryerError::Validation("preset is missing `name`".to_string())),
        };
        let time = coerce_f64(obj.get("time"), "time")?;
        let temp = coerce_f64(obj.get("temp"), "temp")?.trunc();
        if temp < f64::from(i32::MIN) || temp > f64::from(i32::MAX) {
            return Err(DryerError::Validation(format!("temp out of range: {}", temp)));
        }
        Preset::new(name, time, temp as i32)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "time": self.time_hours,
            "temp": self.temperature_celsius,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time_hours(&self) -> f64 {
        self.time_hours
    }

    pub fn temperature_celsius(&self) -> i32 {
        self.temperature_celsius
    }

    /// Drying time in whole minutes, truncated. Never above
    /// [`MAX_DURATION_MINUTES`].
    pub fn duration_minutes(&self) -> u32 {
        (self.time_hours * 60.0) as u32
    }

    pub fn to_request(&self, use_bed: bool, use_chamber: bool) -> Result<DryingRequest> {
        DryingRequest::new(
            self.duration_minutes(),
            self.temperature_celsius,
            use_bed,
            use_chamber,
        )
    }

    /// `"<name> (<time>h @ <temp>°C)"` with the time to one decimal.
    pub fn display(&self) -> String {
        format!(
            "{} ({:.1}h @ {}°C)",
            self.name, self.time_hours, self.temperature_celsius
        )
    }

    /// File name for this preset: the expanded template plus the extension,
    /// normalized with [`to_identifier`].
    ///
    /// Recognized placeholders are `{name}`, `{time}` (hours, one decimal) and
    /// `{temp}`.
    pub fn filename(&self, template: &str) -> Result<String> {
        let stem = self.expand(template)?;
        Ok(to_identifier(&format!("{}.{}", stem, FILE_EXTENSION)))
    }

    /// Storage path of this preset's file inside `dir`; see [`normalize_dir`].
    pub fn filepath(&self, dir: &str, template: &str) -> Result<String> {
        let filename = self.filename(template)?;
        let dir = normalize_dir(dir);
        if dir.is_empty() {
            Ok(filename)
        } else {
            Ok(format!("{}/{}", dir, filename))
        }
    }

    fn expand(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len() + self.name.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after.find('}').ok_or_else(|| {
                DryerError::Validation(format!("unclosed placeholder in filename template {:?}", template))
            })?;
            match &after[..end] {
                "name" => out.push_str(&self.name),
                "time" => out.push_str(&format!("{:.1}", self.time_hours)),
                "temp" => out.push_str(&self.temperature_celsius.to_string()),
                other => {
                    return Err(DryerError::Validation(format!(
                        "unknown placeholder {{{}}} in filename template",
                        other
                    )))
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl<'de> Deserialize<'de> for Preset {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Preset::from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn coerce_f64(value: Option<&Value>, field: &str) -> Result<f64> {
    match value {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| DryerError::Validation(format!("`{}` is not representable: {}", field, n))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| DryerError::Validation(format!("`{}` is not a number: {:?}", field, s))),
        Some(other) => Err(DryerError::Validation(format!("`{}` is not a number: {}", field, other))),
        None => Err(DryerError::Validation(format!("preset is missing `{}`", field))),
    }
}

/// Folder path relative to the storage root: no leading, trailing or
/// repeated `/`. The root itself is `""`.
pub fn normalize_dir(dir: &str) -> String {
    dir.split('/').filter(|part| !part.is_empty()).collect::<Vec<_>>().join("/")
}

fn word_starts() -> &'static (Regex, Regex) {
    static RE: OnceLock<(Regex, Regex)> = OnceLock::new();
    RE.get_or_init(|| {
        (
            Regex::new("([A-Z]+)").expect("valid regex"),
            Regex::new("([A-Z][a-z]+)").expect("valid regex"),
        )
    })
}

/// Lower-case, underscore separated form of `s`, suitable for a file name.
///
/// Runs of capitals and capitalized words start new words, hyphens and
/// whitespace separate words, everything else stays attached.
pub fn to_identifier(s: &str) -> String {
    let (caps, capitalized) = word_starts();
    let spaced = s.replace('-', " ");
    let spaced = caps.replace_all(&spaced, " ${1}");
    let spaced = capitalized.replace_all(&spaced, " ${1}");
    spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_examples() {
        assert_eq!(to_identifier("PLA"), "pla");
        assert_eq!(to_identifier("High-Temp ABS"), "high_temp_abs");
        assert_eq!(to_identifier("PETG.filamentdryer"), "petg.filamentdryer");
        assert_eq!(to_identifier("nylonCF 12"), "nylon_cf_12");
        assert_eq!(to_identifier("  spaced   out  "), "spaced_out");
        assert_eq!(to_identifier("PLA+ (4.0h)"), "pla+_(4.0h)");
    }

    #[test]
    fn identifier_is_idempotent() {
        for s in ["PLA", "High-Temp ABS", "NYLON-cf", "Silk PLA 2", "pla_pro", "x-Y-z", "ÄBC def"] {
            let once = to_identifier(s);
            assert_eq!(to_identifier(&once), once, "input {:?}", s);
        }
    }

    #[test]
    fn display_uses_one_decimal() {
        let preset = Preset::new("PLA", 4.0, 50).unwrap();
        assert_eq!(preset.display(), "PLA (4.0h @ 50°C)");
        let preset = Preset::new("TPU", 2.5, 45).unwrap();
        assert_eq!(preset.to_string(), "TPU (2.5h @ 45°C)");
    }

    #[test]
    fn filename_from_templates() {
        let preset = Preset::new("High-Temp ABS", 5.0, 70).unwrap();
        assert_eq!(preset.filename(DEFAULT_FILENAME_TEMPLATE).unwrap(), "high_temp_abs.filamentdryer");
        assert_eq!(
            preset.filename("{name} {temp}C {time}h").unwrap(),
            "high_temp_abs_70_c_5.0h.filamentdryer"
        );
        assert_eq!(
            preset.filepath("FilamentDryer Plugin/", DEFAULT_FILENAME_TEMPLATE).unwrap(),
            "FilamentDryer Plugin/high_temp_abs.filamentdryer"
        );
        assert_eq!(
            preset.filepath("/FilamentDryer Plugin", DEFAULT_FILENAME_TEMPLATE).unwrap(),
            "FilamentDryer Plugin/high_temp_abs.filamentdryer"
        );
        assert_eq!(preset.filepath("//", DEFAULT_FILENAME_TEMPLATE).unwrap(), "high_temp_abs.filamentdryer");
        assert!(preset.filename("{name").is_err());
        assert!(preset.filename("{color}").is_err());
    }

    #[test]
    fn round_trip_coerces_types() {
        let input = json!({ "name": "PLA", "time": 4, "temp": 50 });
        let preset = Preset::from_value(&input).unwrap();
        let out = preset.to_value();
        assert_eq!(out["name"], "PLA");
        assert!(out["time"].is_f64());
        assert_eq!(out["time"].as_f64(), Some(4.0));
        assert!(out["temp"].is_i64());
        assert_eq!(out["temp"].as_i64(), Some(50));
    }

    #[test]
    fn loose_input_is_coerced() {
        let preset = Preset::from_value(&json!({ "name": "ABS", "time": "5.5", "temp": 70.9 })).unwrap();
        assert_eq!(preset.time_hours(), 5.5);
        assert_eq!(preset.temperature_celsius(), 70);
        assert_eq!(preset.duration_minutes(), 330);

        let preset: Preset = serde_json::from_value(json!({ "name": 42, "time": 1, "temp": "60" })).unwrap();
        assert_eq!(preset.name(), "42");
        assert_eq!(preset.temperature_celsius(), 60);
    }

    #[test]
    fn bad_input_is_a_validation_error() {
        for bad in [
            json!({ "time": 4, "temp": 50 }),
            json!({ "name": "PLA", "temp": 50 }),
            json!({ "name": "PLA", "time": "soon", "temp": 50 }),
            json!({ "name": "PLA", "time": 4, "temp": null }),
            json!({ "name": "PLA", "time": 0, "temp": 50 }),
            json!({ "name": "PLA", "time": -1, "temp": 50 }),
            json!(["PLA", 4, 50]),
        ] {
            let err = Preset::from_value(&bad).unwrap_err();
            assert!(matches!(err, DryerError::Validation(_)), "input {}", bad);
        }
    }

    #[test]
    fn normalized_dirs() {
        assert_eq!(normalize_dir("dryer"), "dryer");
        assert_eq!(normalize_dir("/dryer/"), "dryer");
        assert_eq!(normalize_dir("/a//b/"), "a/b");
        assert_eq!(normalize_dir(""), "");
        assert_eq!(normalize_dir("/"), "");
    }

    #[test]
    fn overlong_time_is_rejected() {
        for time in [json!(1e12), json!("1e300"), json!(168.1)] {
            let err = Preset::from_value(&json!({ "name": "PLA", "time": time, "temp": 50 })).unwrap_err();
            assert!(matches!(err, DryerError::Validation(_)), "time {}", time);
        }
        let week = Preset::new("PLA", 168.0, 50).unwrap();
        assert_eq!(week.duration_minutes(), MAX_DURATION_MINUTES);
    }

    #[test]
    fn request_uses_truncated_minutes() {
        let preset = Preset::new("PLA", 0.51, 50).unwrap();
        let request = preset.to_request(true, false).unwrap();
        assert_eq!(request.duration_minutes, 30);
        assert!(preset.to_request(false, false).is_err());
    }
}
