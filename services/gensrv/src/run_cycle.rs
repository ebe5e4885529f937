//! Engine run-cycle edge detection

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Uninitialized,
    Stopped,
    Running,
}

/// Emitted on a change of the engine-running input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunCycleEvent {
    Started {
        at: DateTime<Utc>,
    },
    Stopped {
        at: DateTime<Utc>,
        duration_seconds: Option<i64>,
    },
}

/// Last known run-cycle figures, as published
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCycleInfo {
    pub last_start: Option<DateTime<Utc>>,
    pub last_stop: Option<DateTime<Utc>>,
    pub last_duration_seconds: Option<i64>,
}

/// Tracks start and stop of the engine across polls
///
/// The first sample only sets the state. Every later change produces one
/// event; unchanged samples leave everything as it was.
#[derive(Debug, Clone)]
pub struct RunCycleTracker {
    state: RunState,
    info: RunCycleInfo,
}

impl Default for RunCycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCycleTracker {
    pub fn new() -> Self {
        Self {
            state: RunState::Uninitialized,
            info: RunCycleInfo::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn info(&self) -> &RunCycleInfo {
        &self.info
    }

    pub fn observe(&mut self, running: bool, now: DateTime<Utc>) -> Option<RunCycleEvent> {
        let next = if running {
            RunState::Running
        } else {
            RunState::Stopped
        };

        match (self.state, next) {
            (RunState::Uninitialized, _) => {
                self.state = next;
                None
            },
            (prev, next) if prev == next => None,
            (_, RunState::Running) => {
                self.state = RunState::Running;
                self.info.last_start = Some(now);
                info!("Engine started at {}", now.to_rfc3339());
                Some(RunCycleEvent::Started { at: now })
            },
            (_, _) => {
                self.state = RunState::Stopped;
                self.info.last_stop = Some(now);
                let duration_seconds = self.info.last_start.map(|start| {
                    let millis = (now - start).num_milliseconds();
                    ((millis as f64 / 1000.0).round() as i64).max(0)
                });
                if duration_seconds.is_some() {
                    self.info.last_duration_seconds = duration_seconds;
                }
                match duration_seconds {
                    Some(secs) => info!("Engine stopped at {} after {}s", now.to_rfc3339(), secs),
                    None => info!("Engine stopped at {}", now.to_rfc3339()),
                }
                Some(RunCycleEvent::Stopped {
                    at: now,
                    duration_seconds,
                })
            },
        }
    }
}
