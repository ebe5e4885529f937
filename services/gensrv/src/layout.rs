//! Register layout
//!
//! The versioned register table of one controller revision: which address
//! ranges are polled, how measurement and counter words are decoded, which
//! bits are alarms and which are status, and which coils accept commands.
//! Loaded once from YAML, validated, then shared read-only.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GenSrvError, Result};

/// Bits per register word
pub const BITS_PER_REGISTER: u8 = 16;

/// Address of one bit inside one register
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BitKey {
    pub register: u16,
    pub bit: u8,
}

impl BitKey {
    pub fn new(register: u16, bit: u8) -> Self {
        Self { register, bit }
    }

    /// Key used in the published status map, `"<register>_<bit>"`
    pub fn status_key(&self) -> String {
        format!("{}_{}", self.register, self.bit)
    }
}

impl fmt::Display for BitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.register, self.bit)
    }
}

/// Contiguous register range read in a single request group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub name: String,
    pub start: u16,
    pub count: u16,
}

impl BlockRange {
    /// Exclusive end address
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.count)
    }

    pub fn contains(&self, register: u16) -> bool {
        register >= self.start && u32::from(register) < self.end()
    }
}

/// How a measurement word is turned into a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Unsigned,
    Signed,
    /// Unsigned word divided by `divisor`
    Scaled,
    /// Two's-complement word divided by `divisor`
    SignedScaled,
    /// Firmware version digits, e.g. `2220` -> `"2.2.20"`
    Version,
    Hex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementDefinition {
    pub name: String,
    pub register: u16,
    pub kind: ValueKind,
    #[serde(default)]
    pub divisor: Option<f64>,
    #[serde(default)]
    pub decimals: Option<u32>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// 32-bit counter spread over two big-endian words
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterDefinition {
    pub name: String,
    pub high: u16,
    pub low: u16,
    #[serde(default)]
    pub divisor: Option<f64>,
    #[serde(default)]
    pub decimals: Option<u32>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Registers summarising the controller's alarm list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSummaryDefinition {
    #[serde(default)]
    pub count_register: Option<u16>,
    #[serde(default)]
    pub unacknowledged_register: Option<u16>,
    #[serde(default)]
    pub ack_active: Option<BitKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmDefinition {
    pub register: u16,
    pub bit: u8,
    pub code: String,
    pub text: String,
}

impl AlarmDefinition {
    pub fn key(&self) -> BitKey {
        BitKey::new(self.register, self.bit)
    }
}

/// Meaning of a status bit for mode synthesis and run-cycle tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusRole {
    Off,
    Manual,
    Test,
    Auto,
    Amf,
    LoadTakeover,
    AmfActive,
    EngineRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDefinition {
    pub register: u16,
    pub bit: u8,
    pub code: String,
    pub text: String,
    #[serde(default)]
    pub role: Option<StatusRole>,
}

impl StatusDefinition {
    pub fn key(&self) -> BitKey {
        BitKey::new(self.register, self.bit)
    }
}

/// Inbound command identifier bound to a coil
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub identifier: String,
    pub coil: u16,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Complete register table for one controller revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterLayout {
    pub version: u32,
    #[serde(default)]
    pub device: String,
    pub blocks: Vec<BlockRange>,
    /// Name of the block holding the alarm and status registers
    pub alarm_block: String,
    #[serde(default)]
    pub measurements: Vec<MeasurementDefinition>,
    #[serde(default)]
    pub counters: Vec<CounterDefinition>,
    #[serde(default)]
    pub alarm_summary: AlarmSummaryDefinition,
    pub alarm_registers: Vec<u16>,
    pub status_registers: Vec<u16>,
    #[serde(default)]
    pub alarms: Vec<AlarmDefinition>,
    #[serde(default)]
    pub status: Vec<StatusDefinition>,
    #[serde(default)]
    pub commands: Vec<CommandDefinition>,

    #[serde(skip)]
    alarm_index: BTreeMap<BitKey, usize>,
    #[serde(skip)]
    status_index: BTreeMap<BitKey, usize>,
    #[serde(skip)]
    role_index: BTreeMap<StatusRole, BitKey>,
}

impl RegisterLayout {
    /// Read, parse and validate a layout file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GenSrvError::layout(format!("cannot read {}: {}", path.display(), e))
        })?;
        let layout = Self::from_yaml_str(&content)?;
        debug!(
            "Loaded layout v{} ({}) from {}",
            layout.version,
            layout.device,
            path.display()
        );
        Ok(layout)
    }

    /// Parse and validate a layout document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let layout: RegisterLayout = serde_yaml::from_str(content)?;
        layout.validated()
    }

    /// Check every table invariant and build the lookup indexes
    pub fn validated(mut self) -> Result<Self> {
        self.validate_blocks()?;
        let alarm_block = self.alarm_block()?.clone();

        let alarm_registers: BTreeSet<u16> = self.alarm_registers.iter().copied().collect();
        let status_registers: BTreeSet<u16> = self.status_registers.iter().copied().collect();
        for (list, registers) in [("alarm", &alarm_registers), ("status", &status_registers)] {
            if let Some(reg) = registers.iter().find(|r| !alarm_block.contains(**r)) {
                return Err(GenSrvError::layout(format!(
                    "{} register {} is outside block '{}' [{}, {})",
                    list,
                    reg,
                    alarm_block.name,
                    alarm_block.start,
                    alarm_block.end()
                )));
            }
        }

        let mut alarm_index = BTreeMap::new();
        for (i, def) in self.alarms.iter().enumerate() {
            check_bit_definition("alarm", def.key(), &alarm_registers)?;
            if alarm_index.insert(def.key(), i).is_some() {
                return Err(GenSrvError::layout(format!(
                    "alarm bit {} defined twice",
                    def.key()
                )));
            }
        }

        let mut status_index = BTreeMap::new();
        let mut role_index = BTreeMap::new();
        for (i, def) in self.status.iter().enumerate() {
            check_bit_definition("status", def.key(), &status_registers)?;
            if alarm_index.contains_key(&def.key()) {
                return Err(GenSrvError::layout(format!(
                    "bit {} claimed by both alarm and status tables",
                    def.key()
                )));
            }
            if status_index.insert(def.key(), i).is_some() {
                return Err(GenSrvError::layout(format!(
                    "status bit {} defined twice",
                    def.key()
                )));
            }
            if let Some(role) = def.role {
                if role_index.insert(role, def.key()).is_some() {
                    return Err(GenSrvError::layout(format!(
                        "status role {:?} assigned to more than one bit",
                        role
                    )));
                }
            }
        }

        self.validate_value_registers()?;
        self.validate_commands()?;

        if !role_index.contains_key(&StatusRole::EngineRunning) {
            warn!("Layout has no engine_running status bit, run cycles will not be tracked");
        }

        self.alarm_index = alarm_index;
        self.status_index = status_index;
        self.role_index = role_index;
        Ok(self)
    }

    fn validate_blocks(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(GenSrvError::layout("no register blocks defined"));
        }
        let mut names = HashSet::new();
        for block in &self.blocks {
            if block.count == 0 {
                return Err(GenSrvError::layout(format!(
                    "block '{}' has zero registers",
                    block.name
                )));
            }
            if block.end() > u32::from(u16::MAX) + 1 {
                return Err(GenSrvError::layout(format!(
                    "block '{}' overflows the 16-bit address space",
                    block.name
                )));
            }
            if !names.insert(block.name.as_str()) {
                return Err(GenSrvError::layout(format!(
                    "block name '{}' used twice",
                    block.name
                )));
            }
        }
        Ok(())
    }

    fn validate_value_registers(&self) -> Result<()> {
        let covered = |register: u16| self.blocks.iter().any(|b| b.contains(register));
        let mut referenced: Vec<(String, u16)> = Vec::new();

        for m in &self.measurements {
            referenced.push((format!("measurement '{}'", m.name), m.register));
            if matches!(m.kind, ValueKind::Scaled | ValueKind::SignedScaled) {
                check_scaling(&m.name, m.divisor, m.decimals)?;
            }
        }
        for c in &self.counters {
            referenced.push((format!("counter '{}'", c.name), c.high));
            referenced.push((format!("counter '{}'", c.name), c.low));
            if c.divisor.is_some() {
                check_scaling(&c.name, c.divisor, c.decimals)?;
            }
        }
        let summary = &self.alarm_summary;
        if let Some(reg) = summary.count_register {
            referenced.push(("alarm count".to_string(), reg));
        }
        if let Some(reg) = summary.unacknowledged_register {
            referenced.push(("unacknowledged alarm count".to_string(), reg));
        }
        if let Some(key) = summary.ack_active {
            if key.bit >= BITS_PER_REGISTER {
                return Err(GenSrvError::layout(format!(
                    "alarm acknowledge bit {} is out of range",
                    key
                )));
            }
            referenced.push(("alarm acknowledge flag".to_string(), key.register));
        }

        for (what, register) in referenced {
            if !covered(register) {
                return Err(GenSrvError::layout(format!(
                    "{} reads register {} which no block polls",
                    what, register
                )));
            }
        }
        Ok(())
    }

    fn validate_commands(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for cmd in &self.commands {
            let id = cmd.identifier.as_str();
            if id.is_empty() || id.contains(['/', '+', '#']) || id.contains(char::is_whitespace) {
                return Err(GenSrvError::layout(format!(
                    "command identifier '{}' is not a valid topic segment",
                    id
                )));
            }
            if !seen.insert(id) {
                return Err(GenSrvError::layout(format!(
                    "command identifier '{}' defined twice",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Block holding the alarm and status registers
    pub fn alarm_block(&self) -> Result<&BlockRange> {
        self.blocks
            .iter()
            .find(|b| b.name == self.alarm_block)
            .ok_or_else(|| {
                GenSrvError::layout(format!("alarm block '{}' is not defined", self.alarm_block))
            })
    }

    pub fn alarm_at(&self, key: BitKey) -> Option<&AlarmDefinition> {
        self.alarm_index.get(&key).map(|&i| &self.alarms[i])
    }

    pub fn status_at(&self, key: BitKey) -> Option<&StatusDefinition> {
        self.status_index.get(&key).map(|&i| &self.status[i])
    }

    /// Bit bound to a status role, if the table assigns one
    pub fn role_key(&self, role: StatusRole) -> Option<BitKey> {
        self.role_index.get(&role).copied()
    }

    pub fn is_alarm_register(&self, register: u16) -> bool {
        self.alarm_registers.contains(&register)
    }

    pub fn is_status_register(&self, register: u16) -> bool {
        self.status_registers.contains(&register)
    }

    pub fn command(&self, identifier: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|c| c.identifier == identifier)
    }

    pub fn enabled_commands(&self) -> impl Iterator<Item = &CommandDefinition> {
        self.commands.iter().filter(|c| c.enabled)
    }
}

fn check_bit_definition(table: &str, key: BitKey, allowed: &BTreeSet<u16>) -> Result<()> {
    if key.bit >= BITS_PER_REGISTER {
        return Err(GenSrvError::layout(format!(
            "{} bit {} is out of range",
            table, key
        )));
    }
    if !allowed.contains(&key.register) {
        return Err(GenSrvError::layout(format!(
            "{} bit {} is on register {} which is not in the {} allow-list",
            table, key, key.register, table
        )));
    }
    Ok(())
}

fn check_scaling(name: &str, divisor: Option<f64>, decimals: Option<u32>) -> Result<()> {
    match divisor {
        Some(d) if d.is_finite() && d != 0.0 => {},
        _ => {
            return Err(GenSrvError::layout(format!(
                "'{}' needs a finite non-zero divisor",
                name
            )))
        },
    }
    if decimals.unwrap_or(0) > 6 {
        return Err(GenSrvError::layout(format!(
            "'{}' asks for more than 6 decimals",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
pub(crate) fn default_layout() -> RegisterLayout {
    RegisterLayout::from_yaml_str(include_str!("../config/layouts/genset_v1.yaml")).unwrap()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
version: 1
device: test
blocks:
  - { name: alarms, start: 1000, count: 8 }
alarm_block: alarms
alarm_registers: [1000]
status_registers: [1001]
alarms:
  - { register: 1000, bit: 0, code: E001, text: Emergency stop }
status:
  - { register: 1001, bit: 0, code: S001, text: Engine running, role: engine_running }
commands:
  - { identifier: start, coil: 0 }
"#;

    fn with(extra: &str) -> String {
        format!("{}{}", MINIMAL, extra)
    }

    #[test]
    fn test_default_layout_is_valid() {
        let layout = default_layout();
        assert_eq!(layout.version, 1);
        assert!(layout.alarm_at(BitKey::new(1000, 0)).is_some());
        assert_eq!(
            layout.role_key(StatusRole::EngineRunning),
            Some(BitKey::new(1004, 0))
        );
        assert_eq!(layout.enabled_commands().count(), 6);
        assert!(layout.command("generator_breaker_toggle").is_some());
    }

    #[test]
    fn test_minimal_layout_indexes() {
        let layout = RegisterLayout::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(layout.alarm_at(BitKey::new(1000, 0)).unwrap().code, "E001");
        assert!(layout.alarm_at(BitKey::new(1000, 1)).is_none());
        assert!(layout.status_at(BitKey::new(1001, 0)).is_some());
        assert!(layout.command("start").unwrap().enabled);
    }

    #[test]
    fn test_bit_in_both_tables_is_rejected() {
        let doc = MINIMAL
            .replace("status_registers: [1001]", "status_registers: [1000, 1001]")
            .replace(
                "status:\n",
                "status:\n  - { register: 1000, bit: 0, code: S999, text: Overlap }\n",
            );
        let err = RegisterLayout::from_yaml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("claimed by both"), "{}", err);
    }

    #[test]
    fn test_alarm_outside_allow_list_is_rejected() {
        let doc = MINIMAL.replace(
            "alarms:\n",
            "alarms:\n  - { register: 1002, bit: 1, code: E999, text: Stray }\n",
        );
        let err = RegisterLayout::from_yaml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("allow-list"), "{}", err);
    }

    #[test]
    fn test_allow_list_outside_alarm_block_is_rejected() {
        let doc = MINIMAL.replace("alarm_registers: [1000]", "alarm_registers: [1000, 2000]");
        let err = RegisterLayout::from_yaml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("outside block"), "{}", err);
    }

    #[test]
    fn test_bit_sixteen_is_rejected() {
        let doc = MINIMAL.replace("bit: 0, code: E001", "bit: 16, code: E001");
        assert!(RegisterLayout::from_yaml_str(&doc).is_err());
    }

    #[test]
    fn test_uncovered_measurement_is_rejected() {
        let doc = with("measurements:\n  - { name: rpm, register: 6, kind: unsigned }\n");
        let err = RegisterLayout::from_yaml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("no block polls"), "{}", err);
    }

    #[test]
    fn test_scaled_without_divisor_is_rejected() {
        let doc = with("measurements:\n  - { name: volts, register: 1002, kind: scaled }\n");
        let err = RegisterLayout::from_yaml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("divisor"), "{}", err);
    }

    #[test]
    fn test_command_identifier_must_be_topic_safe() {
        let doc = MINIMAL.replace("identifier: start", "identifier: start/now");
        assert!(RegisterLayout::from_yaml_str(&doc).is_err());

        let doc = MINIMAL.replace(
            "  - { identifier: start, coil: 0 }\n",
            "  - { identifier: start, coil: 0 }\n  - { identifier: start, coil: 1 }\n",
        );
        let err = RegisterLayout::from_yaml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("defined twice"), "{}", err);
    }

    #[test]
    fn test_duplicate_role_is_rejected() {
        let doc = MINIMAL.replace(
            "status:\n",
            "status:\n  - { register: 1001, bit: 1, code: S002, text: Also running, role: engine_running }\n",
        );
        let err = RegisterLayout::from_yaml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("role"), "{}", err);
    }

    #[test]
    fn test_block_overflow_is_rejected() {
        let doc = MINIMAL.replace(
            "{ name: alarms, start: 1000, count: 8 }",
            "{ name: alarms, start: 1000, count: 8 }\n  - { name: top, start: 65530, count: 10 }",
        );
        let err = RegisterLayout::from_yaml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{}", err);
    }

    #[test]
    fn test_block_contains() {
        let block = BlockRange {
            name: "b".into(),
            start: 10,
            count: 2,
        };
        assert!(!block.contains(9));
        assert!(block.contains(10));
        assert!(block.contains(11));
        assert!(!block.contains(12));
        assert_eq!(BitKey::new(1003, 4).status_key(), "1003_4");
    }
}
