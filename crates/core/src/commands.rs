use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DryerError, Result};

/// Every line the generator can emit besides comments and blanks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    BedSet,
    ChamberSet,
    BedWait,
    ChamberWait,
    Dwell,
    Chirp,
    Message,
    Progress,
}

impl CommandKind {
    pub const ALL: [CommandKind; 8] = [
        CommandKind::BedSet,
        CommandKind::ChamberSet,
        CommandKind::BedWait,
        CommandKind::ChamberWait,
        CommandKind::Dwell,
        CommandKind::Chirp,
        CommandKind::Message,
        CommandKind::Progress,
    ];

    /// Number of `{}` placeholders a template for this kind must carry.
    pub fn arity(self) -> usize {
        match self {
            CommandKind::Chirp | CommandKind::Progress => 2,
            _ => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::BedSet => "bed_set",
            CommandKind::ChamberSet => "chamber_set",
            CommandKind::BedWait => "bed_wait",
            CommandKind::ChamberWait => "chamber_wait",
            CommandKind::Dwell => "dwell",
            CommandKind::Chirp => "chirp",
            CommandKind::Message => "message",
            CommandKind::Progress => "progress",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audible notification tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chirp {
    pub frequency_hz: u32,
    pub duration_ms: u32,
}

pub const CHIRPS: [Chirp; 3] = [
    Chirp { frequency_hz: 60, duration_ms: 100 },
    Chirp { frequency_hz: 60, duration_ms: 125 },
    Chirp { frequency_hz: 60, duration_ms: 150 },
];

const PLACEHOLDER: &str = "{}";

const DEFAULT_TEMPLATES: [(CommandKind, &str); 8] = [
    (CommandKind::BedSet, "M140 S{}; Set target bed temperature"),
    (CommandKind::ChamberSet, "M141 S{}; Set target chamber temperature"),
    (CommandKind::BedWait, "M190 S{}; Wait for target bed temperature"),
    (CommandKind::ChamberWait, "M191 S{}; Wait for target chamber temperature"),
    (CommandKind::Dwell, "G4 S{}"),
    (CommandKind::Chirp, "M300 S{} P{} ; Chirp"),
    (CommandKind::Message, "M117 {}"),
    (CommandKind::Progress, "M73 P{} R{}"),
];

/// Complete, arity-checked mapping from [`CommandKind`] to a one-line template.
///
/// A value of this type always holds a template for every kind, so rendering
/// can never fail halfway through a script. Partial maps are rejected when the
/// value is built or deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<CommandKind, String>",
    into = "BTreeMap<CommandKind, String>"
)]
pub struct CommandTemplates {
    templates: BTreeMap<CommandKind, String>,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        let templates = DEFAULT_TEMPLATES
            .iter()
            .map(|(kind, t)| (*kind, (*t).to_string()))
            .collect();
        Self { templates }
    }
}

impl CommandTemplates {
    pub fn from_map(templates: BTreeMap<CommandKind, String>) -> Result<Self> {
        for kind in CommandKind::ALL {
            match templates.get(&kind) {
                Some(template) => check_arity(kind, template)?,
                None => return Err(DryerError::MissingTemplate(kind)),
            }
        }
        Ok(Self { templates })
    }

    /// Replace a single template, keeping the rest of the mapping.
    pub fn with(mut self, kind: CommandKind, template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        check_arity(kind, &template)?;
        self.templates.insert(kind, template);
        Ok(self)
    }

    pub fn get(&self, kind: CommandKind) -> &str {
        self.templates.get(&kind).map(String::as_str).unwrap_or_default()
    }

    pub fn bed_set(&self, temperature: i32) -> String {
        self.fill(CommandKind::BedSet, &[&temperature])
    }

    pub fn chamber_set(&self, temperature: i32) -> String {
        self.fill(CommandKind::ChamberSet, &[&temperature])
    }

    pub fn bed_wait(&self, temperature: i32) -> String {
        self.fill(CommandKind::BedWait, &[&temperature])
    }

    pub fn chamber_wait(&self, temperature: i32) -> String {
        self.fill(CommandKind::ChamberWait, &[&temperature])
    }

    pub fn dwell(&self, seconds: u32) -> String {
        self.fill(CommandKind::Dwell, &[&seconds])
    }

    pub fn chirp(&self, chirp: Chirp) -> String {
        self.fill(CommandKind::Chirp, &[&chirp.frequency_hz, &chirp.duration_ms])
    }

    pub fn message(&self, text: &str) -> String {
        self.fill(CommandKind::Message, &[&text])
    }

    pub fn progress(&self, percent: u32, remaining_minutes: u32) -> String {
        self.fill(CommandKind::Progress, &[&percent, &remaining_minutes])
    }

    fn fill(&self, kind: CommandKind, args: &[&dyn fmt::Display]) -> String {
        let template = self.get(kind);
        let mut out = String::with_capacity(template.len() + 8);
        let mut parts = template.split(PLACEHOLDER);
        if let Some(first) = parts.next() {
            out.push_str(first);
        }
        for (part, arg) in parts.zip(args.iter()) {
            out.push_str(&arg.to_string());
            out.push_str(part);
        }
        out
    }
}

impl TryFrom<BTreeMap<CommandKind, String>> for CommandTemplates {
    type Error = DryerError;

    fn try_from(templates: BTreeMap<CommandKind, String>) -> Result<Self> {
        Self::from_map(templates)
    }
}

impl From<CommandTemplates> for BTreeMap<CommandKind, String> {
    fn from(value: CommandTemplates) -> Self {
        value.templates
    }
}

fn check_arity(kind: CommandKind, template: &str) -> Result<()> {
    if template.contains('\n') || template.contains('\r') {
        return Err(DryerError::Template {
            kind,
            reason: "template must be a single line".to_string(),
        });
    }
    let found = template.matches(PLACEHOLDER).count();
    if found != kind.arity() {
        return Err(DryerError::Template {
            kind,
            reason: format!("expected {} placeholder(s), found {}", kind.arity(), found),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_templates_render_marlin_commands() {
        let t = CommandTemplates::default();
        assert_eq!(t.bed_set(50), "M140 S50; Set target bed temperature");
        assert_eq!(t.chamber_wait(70), "M191 S70; Wait for target chamber temperature");
        assert_eq!(t.dwell(60), "G4 S60");
        assert_eq!(t.chirp(CHIRPS[1]), "M300 S60 P125 ; Chirp");
        assert_eq!(t.message("Heating"), "M117 Heating");
        assert_eq!(t.progress(75, 1), "M73 P75 R1");
    }

    #[test]
    fn message_text_is_not_treated_as_template() {
        let t = CommandTemplates::default();
        assert_eq!(t.message("odd {} text"), "M117 odd {} text");
    }

    #[test]
    fn partial_map_is_rejected() {
        let mut map: BTreeMap<CommandKind, String> = CommandTemplates::default().into();
        map.remove(&CommandKind::Progress);
        let err = CommandTemplates::from_map(map).unwrap_err();
        assert!(matches!(err, DryerError::MissingTemplate(CommandKind::Progress)));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let err = CommandTemplates::default()
            .with(CommandKind::Chirp, "M300 S{}")
            .unwrap_err();
        assert!(matches!(err, DryerError::Template { kind: CommandKind::Chirp, .. }));

        let err = CommandTemplates::default()
            .with(CommandKind::Dwell, "G4 S60")
            .unwrap_err();
        assert!(matches!(err, DryerError::Template { kind: CommandKind::Dwell, .. }));
    }

    #[test]
    fn override_keeps_other_templates() {
        let t = CommandTemplates::default()
            .with(CommandKind::Dwell, "G4 P{}000")
            .unwrap();
        assert_eq!(t.dwell(60), "G4 P60000");
        assert_eq!(t.bed_set(0), "M140 S0; Set target bed temperature");
    }

    #[test]
    fn deserialize_requires_every_kind() {
        let full = serde_json::to_value(CommandTemplates::default()).unwrap();
        assert_eq!(full["dwell"], "G4 S{}");
        let parsed: CommandTemplates = serde_json::from_value(full).unwrap();
        assert_eq!(parsed, CommandTemplates::default());

        let partial = serde_json::json!({ "dwell": "G4 S{}" });
        assert!(serde_json::from_value::<CommandTemplates>(partial).is_err());
    }
}
