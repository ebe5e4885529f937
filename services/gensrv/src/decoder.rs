//! Register words to typed values
//!
//! The conversion functions are pure. Missing words (addresses outside the
//! block that was read) come back as `None` and stay `None` all the way to
//! the published snapshot.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::layout::{BitKey, CounterDefinition, MeasurementDefinition, ValueKind};

/// Two's-complement view of a register word
pub fn to_signed16(word: u16) -> i16 {
    word as i16
}

/// Big-endian combination of two register words
pub fn to_unsigned32(hi: u16, lo: u16) -> u32 {
    (u32::from(hi) << 16) | u32::from(lo)
}

/// Divide and round half away from zero to `decimals` places
///
/// Scaling happens before the division so a decimal half such as
/// `1005 / 1000` at two places stays exact and rounds up to `1.01`.
pub fn scaled_decimal(raw: i64, divisor: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    ((raw as f64 * factor) / divisor).round() / factor
}

/// Firmware version text: digit 1 major, digit 2 minor, digits 3-4 patch
///
/// `2220` becomes `"2.2.20"` and `305` becomes `"0.3.05"`.
pub fn format_version(word: u16) -> String {
    let digits = format!("{:04}", word);
    // five-digit words keep the extra leading digit in the major part
    let (head, patch) = digits.split_at(digits.len() - 2);
    let (major, minor) = head.split_at(head.len() - 1);
    format!("{}.{}.{}", major, minor, patch)
}

pub fn to_hex16(word: u16) -> String {
    format!("0x{:04X}", word)
}

/// Words of one polled range, `[start, start + words.len())`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock {
    pub start: u16,
    pub words: Vec<u16>,
}

impl RegisterBlock {
    pub fn new(start: u16, words: Vec<u16>) -> Self {
        Self { start, words }
    }

    /// Word at an absolute address, `None` outside the block
    pub fn get(&self, register: u16) -> Option<u16> {
        let offset = register.checked_sub(self.start)?;
        self.words.get(usize::from(offset)).copied()
    }

    pub fn contains(&self, register: u16) -> bool {
        self.get(register).is_some()
    }

    /// State of one bit, `None` if the register is not in the block
    pub fn bit(&self, key: BitKey) -> Option<bool> {
        self.get(key.register).map(|word| word & (1 << key.bit) != 0)
    }
}

/// All blocks read during one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterImage {
    blocks: Vec<RegisterBlock>,
}

impl RegisterImage {
    pub fn new(blocks: Vec<RegisterBlock>) -> Self {
        Self { blocks }
    }

    pub fn push(&mut self, block: RegisterBlock) {
        self.blocks.push(block);
    }

    pub fn get(&self, register: u16) -> Option<u16> {
        self.blocks.iter().find_map(|b| b.get(register))
    }

    pub fn bit(&self, key: BitKey) -> Option<bool> {
        self.get(key.register).map(|word| word & (1 << key.bit) != 0)
    }

    /// Block whose first address is `start`
    pub fn block_at(&self, start: u16) -> Option<&RegisterBlock> {
        self.blocks.iter().find(|b| b.start == start)
    }

    pub fn blocks(&self) -> &[RegisterBlock] {
        &self.blocks
    }
}

/// Decoded measurement or counter value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl MeasurementDefinition {
    pub fn decode(&self, image: &RegisterImage) -> Option<DecodedValue> {
        let word = image.get(self.register)?;
        let divisor = self.divisor.unwrap_or(1.0);
        let decimals = self.decimals.unwrap_or(0);
        let value = match self.kind {
            ValueKind::Unsigned => DecodedValue::Integer(i64::from(word)),
            ValueKind::Signed => DecodedValue::Integer(i64::from(to_signed16(word))),
            ValueKind::Scaled => {
                DecodedValue::Decimal(scaled_decimal(i64::from(word), divisor, decimals))
            },
            ValueKind::SignedScaled => DecodedValue::Decimal(scaled_decimal(
                i64::from(to_signed16(word)),
                divisor,
                decimals,
            )),
            ValueKind::Version => DecodedValue::Text(format_version(word)),
            ValueKind::Hex => DecodedValue::Text(to_hex16(word)),
        };
        Some(value)
    }
}

impl CounterDefinition {
    pub fn decode(&self, image: &RegisterImage) -> Option<DecodedValue> {
        let raw = to_unsigned32(image.get(self.high)?, image.get(self.low)?);
        Some(match self.divisor {
            Some(divisor) => DecodedValue::Decimal(scaled_decimal(
                i64::from(raw),
                divisor,
                self.decimals.unwrap_or(0),
            )),
            None => DecodedValue::Integer(i64::from(raw)),
        })
    }
}

/// Decode every measurement in table order
pub fn decode_measurements(
    defs: &[MeasurementDefinition],
    image: &RegisterImage,
) -> BTreeMap<String, Option<DecodedValue>> {
    defs.iter()
        .map(|def| (def.name.clone(), def.decode(image)))
        .collect()
}

pub fn decode_counters(
    defs: &[CounterDefinition],
    image: &RegisterImage,
) -> BTreeMap<String, Option<DecodedValue>> {
    defs.iter()
        .map(|def| (def.name.clone(), def.decode(image)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_to_signed16() {
        assert_eq!(to_signed16(0xFFFF), -1);
        assert_eq!(to_signed16(0x7FFF), 32767);
        assert_eq!(to_signed16(0x8000), -32768);
        assert_eq!(to_signed16(0), 0);
    }

    #[test]
    fn test_to_unsigned32() {
        assert_eq!(to_unsigned32(0x0001, 0x0000), 65536);
        assert_eq!(to_unsigned32(0xFFFF, 0xFFFF), u32::MAX);
        assert_eq!(to_unsigned32(0x0000, 0x1234), 0x1234);
    }

    #[test]
    fn test_scaled_decimal() {
        assert_eq!(scaled_decimal(2345, 10.0, 1), 234.5);
        assert_eq!(scaled_decimal(-85, 100.0, 2), -0.85);
        assert_eq!(scaled_decimal(125, 10.0, 0), 13.0);
        assert_eq!(scaled_decimal(-125, 10.0, 0), -13.0);
        // same input, same output
        let first = scaled_decimal(137, 3.0, 2);
        for _ in 0..100 {
            assert_eq!(scaled_decimal(137, 3.0, 2), first);
        }
        assert_eq!(first, 45.67);
    }

    #[test]
    fn test_scaled_decimal_half_not_exact_in_binary() {
        assert_eq!(scaled_decimal(1005, 1000.0, 2), 1.01);
        assert_eq!(scaled_decimal(-1005, 1000.0, 2), -1.01);
        assert_eq!(scaled_decimal(2675, 1000.0, 2), 2.68);
        assert_eq!(scaled_decimal(15, 100.0, 1), 0.2);
    }

    #[test]
    fn test_format_version() {
        assert_eq!(format_version(2220), "2.2.20");
        assert_eq!(format_version(305), "0.3.05");
        assert_eq!(format_version(0), "0.0.00");
        assert_eq!(format_version(12345), "12.3.45");
    }

    #[test]
    fn test_to_hex16() {
        assert_eq!(to_hex16(0x00AB), "0x00AB");
        assert_eq!(to_hex16(0xBEEF), "0xBEEF");
    }

    #[test]
    fn test_block_lookup_outside_range_is_none() {
        let block = RegisterBlock::new(1000, vec![1, 2, 3]);
        assert_eq!(block.get(999), None);
        assert_eq!(block.get(1000), Some(1));
        assert_eq!(block.get(1002), Some(3));
        assert_eq!(block.get(1003), None);
        assert_eq!(block.get(u16::MAX), None);
        assert_eq!(block.bit(BitKey::new(1001, 1)), Some(true));
        assert_eq!(block.bit(BitKey::new(1001, 0)), Some(false));
    }

    #[test]
    fn test_undefined_words_propagate() {
        let def = MeasurementDefinition {
            name: "battery_voltage".into(),
            register: 5,
            kind: ValueKind::Scaled,
            divisor: Some(10.0),
            decimals: Some(1),
            unit: Some("V".into()),
        };
        let short = RegisterImage::new(vec![RegisterBlock::new(0, vec![0; 5])]);
        assert_eq!(def.decode(&short), None);

        let full = RegisterImage::new(vec![RegisterBlock::new(0, vec![0, 0, 0, 0, 0, 274])]);
        assert_eq!(def.decode(&full), Some(DecodedValue::Decimal(27.4)));

        let counter = CounterDefinition {
            name: "starts".into(),
            high: 102,
            low: 103,
            divisor: None,
            decimals: None,
            unit: None,
        };
        let only_high = RegisterImage::new(vec![RegisterBlock::new(100, vec![0, 0, 1])]);
        assert_eq!(counter.decode(&only_high), None);
        let both = RegisterImage::new(vec![RegisterBlock::new(100, vec![0, 0, 1, 5])]);
        assert_eq!(counter.decode(&both), Some(DecodedValue::Integer(65541)));
    }

    #[test]
    fn test_decoded_values_serialize_flat() {
        let mut image = RegisterImage::default();
        image.push(RegisterBlock::new(28, vec![2220, 0x0A1F]));
        let defs = vec![
            MeasurementDefinition {
                name: "firmware_version".into(),
                register: 28,
                kind: ValueKind::Version,
                divisor: None,
                decimals: None,
                unit: None,
            },
            MeasurementDefinition {
                name: "missing".into(),
                register: 40,
                kind: ValueKind::Unsigned,
                divisor: None,
                decimals: None,
                unit: None,
            },
        ];
        let json = serde_json::to_value(decode_measurements(&defs, &image)).unwrap();
        assert_eq!(json["firmware_version"], "2.2.20");
        assert!(json["missing"].is_null());
    }
}
