//! Per-poll state snapshot
//!
//! [`StateAggregator`] owns the state that lives across polls (run cycle and
//! previous alarms) and composes one [`StateSnapshot`] from each complete
//! register image.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alarm_log::AlarmTransitionLog;
use crate::classifier::{classify, format_active_alarms, ActiveAlarm, Classification, StatusSnapshot};
use crate::decoder::{decode_counters, decode_measurements, DecodedValue, RegisterImage};
use crate::layout::{RegisterLayout, StatusRole};
use crate::mode::operating_mode;
use crate::run_cycle::{RunCycleInfo, RunCycleTracker};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmSection {
    pub count: Option<u16>,
    pub unacknowledged: Option<u16>,
    pub ack_active: Option<bool>,
    pub active: Vec<ActiveAlarm>,
    pub active_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSection {
    #[serde(flatten)]
    pub flags: StatusSnapshot,
    pub operating_mode: String,
}

/// Everything published for one successful poll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub layout_version: u32,
    pub measurements: BTreeMap<String, Option<DecodedValue>>,
    pub counters: BTreeMap<String, Option<DecodedValue>>,
    pub alarms: AlarmSection,
    pub status: StatusSection,
    pub run_cycle: RunCycleInfo,
    pub timestamp: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

pub struct StateAggregator {
    layout: Arc<RegisterLayout>,
    run_cycle: RunCycleTracker,
    alarm_log: AlarmTransitionLog,
}

impl StateAggregator {
    pub fn new(layout: Arc<RegisterLayout>) -> Self {
        Self {
            layout,
            run_cycle: RunCycleTracker::new(),
            alarm_log: AlarmTransitionLog::new(),
        }
    }

    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    pub fn run_cycle(&self) -> &RunCycleTracker {
        &self.run_cycle
    }

    /// Build the snapshot and advance the cross-poll state
    pub fn compose(&mut self, image: &RegisterImage, now: DateTime<Utc>) -> StateSnapshot {
        let layout = Arc::clone(&self.layout);

        let classification = layout
            .alarm_block()
            .ok()
            .and_then(|range| image.block_at(range.start))
            .map(|block| classify(block, &layout))
            .unwrap_or_default();
        let Classification {
            active_alarms,
            status,
        } = classification;

        if let Some(running) = layout
            .role_key(StatusRole::EngineRunning)
            .and_then(|key| status.get(key))
        {
            self.run_cycle.observe(running, now);
        }
        self.alarm_log.update(&active_alarms);

        let summary = &layout.alarm_summary;
        let alarms = AlarmSection {
            count: summary.count_register.and_then(|r| image.get(r)),
            unacknowledged: summary.unacknowledged_register.and_then(|r| image.get(r)),
            ack_active: summary.ack_active.and_then(|key| image.bit(key)),
            active_text: format_active_alarms(&active_alarms),
            active: active_alarms,
        };

        let mode = operating_mode(&status, &layout);

        StateSnapshot {
            layout_version: layout.version,
            measurements: decode_measurements(&layout.measurements, image),
            counters: decode_counters(&layout.counters, image),
            alarms,
            status: StatusSection {
                flags: status,
                operating_mode: mode,
            },
            run_cycle: self.run_cycle.info().clone(),
            timestamp: now,
        }
    }
}
