//! Alarm and status bit classification
//!
//! Only allow-listed registers are decoded. A register on the alarm list
//! yields alarms, a register on the status list yields status flags, and any
//! other register in the block is ignored no matter which bits are set.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::decoder::RegisterBlock;
use crate::layout::{BitKey, RegisterLayout, BITS_PER_REGISTER};

/// Text published when no alarm is active
pub const NO_ACTIVE_ALARMS: &str = "No active alarms";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveAlarm {
    pub register: u16,
    pub bit: u8,
    pub code: String,
    pub text: String,
}

impl ActiveAlarm {
    pub fn key(&self) -> BitKey {
        BitKey::new(self.register, self.bit)
    }
}

/// Status flags keyed by `"<register>_<bit>"`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusSnapshot {
    flags: BTreeMap<String, bool>,
}

impl StatusSnapshot {
    pub fn get(&self, key: BitKey) -> Option<bool> {
        self.flags.get(&key.status_key()).copied()
    }

    pub fn flags(&self) -> &BTreeMap<String, bool> {
        &self.flags
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Result of classifying one alarm/status block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Ascending by register, then bit
    pub active_alarms: Vec<ActiveAlarm>,
    pub status: StatusSnapshot,
}

/// Split one block into active alarms and status flags
///
/// Allow-listed registers missing from the block produce nothing.
pub fn classify(block: &RegisterBlock, layout: &RegisterLayout) -> Classification {
    let mut registers: Vec<u16> = layout.alarm_registers.clone();
    registers.sort_unstable();
    registers.dedup();

    let mut active_alarms = Vec::new();
    for register in registers {
        let Some(word) = block.get(register) else {
            continue;
        };
        for bit in 0..BITS_PER_REGISTER {
            if word & (1 << bit) == 0 {
                continue;
            }
            if let Some(def) = layout.alarm_at(BitKey::new(register, bit)) {
                active_alarms.push(ActiveAlarm {
                    register,
                    bit,
                    code: def.code.clone(),
                    text: def.text.clone(),
                });
            }
        }
    }

    let mut flags = BTreeMap::new();
    for def in &layout.status {
        if !layout.is_status_register(def.register) {
            continue;
        }
        if let Some(set) = block.bit(def.key()) {
            flags.insert(def.key().status_key(), set);
        }
    }

    Classification {
        active_alarms,
        status: StatusSnapshot { flags },
    }
}

/// One `"<code> <text>"` line per alarm, or [`NO_ACTIVE_ALARMS`]
pub fn format_active_alarms(alarms: &[ActiveAlarm]) -> String {
    if alarms.is_empty() {
        return NO_ACTIVE_ALARMS.to_string();
    }
    alarms
        .iter()
        .map(|a| format!("{} {}", a.code, a.text))
        .collect::<Vec<_>>()
        .join("\n")
}
