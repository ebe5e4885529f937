//! Alarm activation and clearance logging

use std::collections::BTreeMap;

use tracing::info;

use crate::classifier::ActiveAlarm;
use crate::layout::BitKey;

/// Alarms that appeared and disappeared since the previous poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmTransitions {
    pub activated: Vec<ActiveAlarm>,
    pub cleared: Vec<ActiveAlarm>,
}

impl AlarmTransitions {
    pub fn is_empty(&self) -> bool {
        self.activated.is_empty() && self.cleared.is_empty()
    }
}

/// Diffs successive active-alarm sets by `(register, bit)`
#[derive(Debug, Clone, Default)]
pub struct AlarmTransitionLog {
    previous: BTreeMap<BitKey, ActiveAlarm>,
}

impl AlarmTransitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare with the previous set, log changes, remember `current`
    pub fn update(&mut self, current: &[ActiveAlarm]) -> AlarmTransitions {
        let current: BTreeMap<BitKey, ActiveAlarm> =
            current.iter().map(|a| (a.key(), a.clone())).collect();

        let activated: Vec<ActiveAlarm> = current
            .iter()
            .filter(|(key, _)| !self.previous.contains_key(key))
            .map(|(_, alarm)| alarm.clone())
            .collect();
        let cleared: Vec<ActiveAlarm> = self
            .previous
            .iter()
            .filter(|(key, _)| !current.contains_key(key))
            .map(|(_, alarm)| alarm.clone())
            .collect();

        for alarm in &activated {
            info!(
                register = alarm.register,
                bit = alarm.bit,
                "Alarm activated: {} {}",
                alarm.code,
                alarm.text
            );
        }
        for alarm in &cleared {
            info!(
                register = alarm.register,
                bit = alarm.bit,
                "Alarm cleared: {} {}",
                alarm.code,
                alarm.text
            );
        }

        self.previous = current;
        AlarmTransitions { activated, cleared }
    }

    pub fn active_count(&self) -> usize {
        self.previous.len()
    }
}
