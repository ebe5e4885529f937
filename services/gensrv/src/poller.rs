//! Poll loop
//!
//! One cycle reads every block of the layout in order. Only a complete
//! image is composed and published; any failed read abandons the cycle
//! without touching run-cycle or alarm state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use errors::ServiceErrorTrait;

use crate::decoder::{RegisterBlock, RegisterImage};
use crate::error::{log_at_level, Result};
use crate::layout::RegisterLayout;
use crate::snapshot::{StateAggregator, StateSnapshot};
use crate::transport::RegisterTransport;

/// Sink for composed snapshots
#[async_trait]
pub trait StatePublisher: Send + Sync {
    async fn publish_state(&self, snapshot: &StateSnapshot) -> Result<()>;
}

/// Polling statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollStats {
    pub cycles: u64,
    pub published: u64,
    pub read_failures: u64,
    pub publish_failures: u64,
    pub consecutive_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Published,
    /// Image was composed but the publisher refused it
    PublishFailed,
    /// A block read failed; nothing was composed
    ReadFailed,
}

pub struct PollEngine {
    layout: Arc<RegisterLayout>,
    transport: Arc<dyn RegisterTransport>,
    publisher: Arc<dyn StatePublisher>,
    aggregator: StateAggregator,
    stats: PollStats,
}

impl PollEngine {
    pub fn new(
        layout: Arc<RegisterLayout>,
        transport: Arc<dyn RegisterTransport>,
        publisher: Arc<dyn StatePublisher>,
    ) -> Self {
        Self {
            aggregator: StateAggregator::new(Arc::clone(&layout)),
            layout,
            transport,
            publisher,
            stats: PollStats::default(),
        }
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    pub fn aggregator(&self) -> &StateAggregator {
        &self.aggregator
    }

    /// Read all layout blocks, stopping at the first failure
    pub async fn read_image(&self) -> Result<RegisterImage> {
        let mut image = RegisterImage::default();
        for block in &self.layout.blocks {
            let words = self.transport.read_block(block.start, block.count).await?;
            debug!("Block '{}' read: {} registers", block.name, words.len());
            image.push(RegisterBlock::new(block.start, words));
        }
        Ok(image)
    }

    pub async fn poll_once(&mut self) -> PollOutcome {
        self.stats.cycles += 1;

        let image = match self.read_image().await {
            Ok(image) => image,
            Err(e) => {
                self.stats.read_failures += 1;
                self.stats.consecutive_failures += 1;
                log_at_level!(
                    e,
                    "Poll cycle {} abandoned ({} in a row) [{}]: {}",
                    self.stats.cycles,
                    self.stats.consecutive_failures,
                    e.error_code(),
                    e
                );
                return PollOutcome::ReadFailed;
            },
        };

        if self.stats.consecutive_failures > 0 {
            info!(
                "Device reads recovered after {} failed cycles",
                self.stats.consecutive_failures
            );
            self.stats.consecutive_failures = 0;
        }

        let now = Utc::now();
        let snapshot = self.aggregator.compose(&image, now);
        self.stats.last_success = Some(now);

        match self.publisher.publish_state(&snapshot).await {
            Ok(()) => {
                self.stats.published += 1;
                PollOutcome::Published
            },
            Err(e) => {
                self.stats.publish_failures += 1;
                log_at_level!(e, "State publish failed [{}]: {}", e.error_code(), e);
                PollOutcome::PublishFailed
            },
        }
    }

    /// Poll on a fixed period until cancelled
    ///
    /// A cycle that overruns the period delays the next tick instead of
    /// queueing a burst, so polls never overlap.
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) -> PollStats {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Polling every {}ms", period.as_millis());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Poll loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        info!(
            "Poll loop stopped: {} cycles, {} published, {} read failures",
            self.stats.cycles, self.stats.published, self.stats.read_failures
        );
        self.stats
    }
}
