//! Operating mode text from status flags

use std::fmt;

use crate::classifier::StatusSnapshot;
use crate::layout::{RegisterLayout, StatusRole};

/// Primary control mode, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryMode {
    Off,
    Manual,
    Test,
    Auto,
    Unknown,
}

impl fmt::Display for PrimaryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "OFF",
            Self::Manual => "Manual",
            Self::Test => "Test",
            Self::Auto => "Auto",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Mode modifiers, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeModifier {
    Amf,
    LoadTakeover,
    AmfActive,
}

impl fmt::Display for ModeModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Amf => "AMF",
            Self::LoadTakeover => "Load Takeover",
            Self::AmfActive => "AMF Active",
        };
        f.write_str(name)
    }
}

/// Flags the synthesizer reads; an undefined flag is `false`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub off: bool,
    pub manual: bool,
    pub test: bool,
    pub auto: bool,
    pub amf: bool,
    pub load_takeover: bool,
    pub amf_active: bool,
}

impl ModeFlags {
    /// Resolve flags through the layout's status roles
    pub fn from_status(status: &StatusSnapshot, layout: &RegisterLayout) -> Self {
        let flag = |role: StatusRole| {
            layout
                .role_key(role)
                .and_then(|key| status.get(key))
                .unwrap_or(false)
        };
        Self {
            off: flag(StatusRole::Off),
            manual: flag(StatusRole::Manual),
            test: flag(StatusRole::Test),
            auto: flag(StatusRole::Auto),
            amf: flag(StatusRole::Amf),
            load_takeover: flag(StatusRole::LoadTakeover),
            amf_active: flag(StatusRole::AmfActive),
        }
    }
}

/// Primary mode plus active modifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatingMode {
    pub primary: PrimaryMode,
    pub modifiers: Vec<ModeModifier>,
}

impl OperatingMode {
    pub fn synthesize(flags: &ModeFlags) -> Self {
        let primary = [
            (flags.off, PrimaryMode::Off),
            (flags.manual, PrimaryMode::Manual),
            (flags.test, PrimaryMode::Test),
            (flags.auto, PrimaryMode::Auto),
        ]
        .into_iter()
        .find_map(|(set, mode)| set.then_some(mode))
        .unwrap_or(PrimaryMode::Unknown);

        let modifiers = [
            (flags.amf, ModeModifier::Amf),
            (flags.load_takeover, ModeModifier::LoadTakeover),
            (flags.amf_active, ModeModifier::AmfActive),
        ]
        .into_iter()
        .filter_map(|(set, modifier)| set.then_some(modifier))
        .collect();

        Self { primary, modifiers }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if !self.modifiers.is_empty() {
            let names: Vec<String> = self.modifiers.iter().map(ToString::to_string).collect();
            write!(f, " ({})", names.join(", "))?;
        }
        Ok(())
    }
}

/// Mode string for a status snapshot
pub fn operating_mode(status: &StatusSnapshot, layout: &RegisterLayout) -> String {
    OperatingMode::synthesize(&ModeFlags::from_status(status, layout)).to_string()
}
