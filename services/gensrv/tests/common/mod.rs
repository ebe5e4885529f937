//! Common test utilities and helpers
#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gensrv::{GenSrvError, RegisterLayout, RegisterTransport, Result, StatePublisher, StateSnapshot};

pub fn layout_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/layouts/genset_v1.yaml")
}

pub fn shipped_layout() -> Arc<RegisterLayout> {
    Arc::new(RegisterLayout::load(layout_path()).unwrap())
}

/// In-memory register table standing in for the controller
#[derive(Default)]
pub struct MockTransport {
    registers: Mutex<BTreeMap<u16, u16>>,
    failing_blocks: Mutex<BTreeSet<u16>>,
    fail_writes: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
    writes: Mutex<Vec<(u16, bool)>>,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, register: u16, value: u16) {
        self.registers.lock().unwrap().insert(register, value);
    }

    /// Make reads of the block starting at `start` fail
    pub fn fail_block(&self, start: u16, failing: bool) {
        let mut blocks = self.failing_blocks.lock().unwrap();
        if failing {
            blocks.insert(start);
        } else {
            blocks.remove(&start);
        }
    }

    pub fn fail_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    pub fn writes(&self) -> Vec<(u16, bool)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegisterTransport for MockTransport {
    async fn read_block(&self, start: u16, count: u16) -> Result<Vec<u16>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_blocks.lock().unwrap().contains(&start) {
            return Err(GenSrvError::timeout(format!("no reply for block at {}", start)));
        }
        let registers = self.registers.lock().unwrap();
        Ok((0..count)
            .map(|offset| registers.get(&(start + offset)).copied().unwrap_or(0))
            .collect())
    }

    async fn write_single_coil(&self, coil: u16, value: bool) -> Result<()> {
        self.writes.lock().unwrap().push((coil, value));
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GenSrvError::protocol(format!("exception writing coil {}", coil)));
        }
        Ok(())
    }
}

/// Publisher that keeps every snapshot it is given
#[derive(Default)]
pub struct RecordingPublisher {
    snapshots: Mutex<Vec<StateSnapshot>>,
    refuse: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, refusing: bool) {
        self.refuse.store(refusing, Ordering::SeqCst);
    }

    pub fn snapshots(&self) -> Vec<StateSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<StateSnapshot> {
        self.snapshots.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl StatePublisher for RecordingPublisher {
    async fn publish_state(&self, snapshot: &StateSnapshot) -> Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(GenSrvError::messaging("broker not connected"));
        }
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}
