//! Inbound command dispatch
//!
//! Each accepted command turns into exactly one coil write. Commands are
//! checked in a fixed order: known and enabled, not a retained replay, then
//! the global cooldown. A failed write is not retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::layout::RegisterLayout;
use crate::transport::RegisterTransport;

/// Command request received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub identifier: String,
    /// Delivered from the broker's retained store rather than sent just now
    pub retained: bool,
}

impl InboundCommand {
    pub fn new(identifier: impl Into<String>, retained: bool) -> Self {
        Self {
            identifier: identifier.into(),
            retained,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnknownCommand,
    Disabled,
    Retained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched { coil: u16 },
    Rejected(RejectReason),
    /// Cooldown still running
    Skipped { remaining: Duration },
    WriteFailed { coil: u16, error: String },
}

const NEVER: u64 = u64::MAX;

/// One timestamp shared by every command identifier
///
/// Check-and-set is a compare-exchange loop, so of several commands racing
/// inside one window exactly one is admitted.
#[derive(Debug)]
pub struct CooldownGate {
    origin: Instant,
    cooldown_ms: u64,
    last_dispatch_ms: AtomicU64,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            origin: Instant::now(),
            cooldown_ms: cooldown.as_millis() as u64,
            last_dispatch_ms: AtomicU64::new(NEVER),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Admit now, or return the time left
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now_ms = self.origin.elapsed().as_millis() as u64;
        self.try_acquire_at(now_ms)
    }

    /// Admit at `now_ms` on the gate's monotonic timeline
    pub fn try_acquire_at(&self, now_ms: u64) -> Result<(), Duration> {
        let mut last = self.last_dispatch_ms.load(Ordering::Acquire);
        loop {
            if last != NEVER {
                let since = now_ms.saturating_sub(last);
                if since < self.cooldown_ms {
                    return Err(Duration::from_millis(self.cooldown_ms - since));
                }
            }
            match self.last_dispatch_ms.compare_exchange_weak(
                last,
                now_ms,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => last = actual,
            }
        }
    }
}

/// Validates commands and forwards them to the transport
pub struct CommandDispatcher {
    layout: Arc<RegisterLayout>,
    transport: Arc<dyn RegisterTransport>,
    gate: CooldownGate,
}

impl CommandDispatcher {
    pub fn new(
        layout: Arc<RegisterLayout>,
        transport: Arc<dyn RegisterTransport>,
        cooldown: Duration,
    ) -> Self {
        Self {
            layout,
            transport,
            gate: CooldownGate::new(cooldown),
        }
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    pub async fn handle(&self, command: &InboundCommand) -> DispatchOutcome {
        let id = command.identifier.as_str();
        let coil = match self.layout.command(id) {
            None => {
                warn!("Rejected unknown command '{}'", id);
                return DispatchOutcome::Rejected(RejectReason::UnknownCommand);
            },
            Some(def) if !def.enabled => {
                warn!("Rejected disabled command '{}'", id);
                return DispatchOutcome::Rejected(RejectReason::Disabled);
            },
            Some(def) => def.coil,
        };

        if command.retained {
            warn!("Ignoring retained command '{}', send it as a fresh message", id);
            return DispatchOutcome::Rejected(RejectReason::Retained);
        }

        if let Err(remaining) = self.gate.try_acquire() {
            info!(
                "Command '{}' skipped: cooldown active for another {}ms",
                id,
                remaining.as_millis()
            );
            return DispatchOutcome::Skipped { remaining };
        }

        match self.transport.write_single_coil(coil, true).await {
            Ok(()) => {
                info!("Command '{}' dispatched to coil {}", id, coil);
                DispatchOutcome::Dispatched { coil }
            },
            Err(e) => {
                error!("Command '{}' failed writing coil {}: {}", id, coil, e);
                DispatchOutcome::WriteFailed {
                    coil,
                    error: e.to_string(),
                }
            },
        }
    }
}

/// Consume commands one at a time until cancelled or the sender closes
pub async fn run_command_loop(
    mut rx: mpsc::Receiver<InboundCommand>,
    dispatcher: Arc<CommandDispatcher>,
    cancel: CancellationToken,
) {
    debug!(
        "Command loop started (cooldown {}ms)",
        dispatcher.gate().cooldown().as_millis()
    );
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Command loop cancelled");
                break;
            }
            message = rx.recv() => {
                match message {
                    Some(command) => {
                        dispatcher.handle(&command).await;
                    }
                    None => {
                        debug!("Command channel closed");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_admits_first_then_blocks() {
        let gate = CooldownGate::new(Duration::from_millis(5000));
        assert!(gate.try_acquire_at(1_000).is_ok());
        assert_eq!(
            gate.try_acquire_at(1_100),
            Err(Duration::from_millis(4_900))
        );
        assert!(gate.try_acquire_at(5_999).is_err());
        assert!(gate.try_acquire_at(6_000).is_ok());
    }

    #[test]
    fn test_gate_admits_at_time_zero() {
        let gate = CooldownGate::new(Duration::from_millis(5000));
        assert!(gate.try_acquire_at(0).is_ok());
        assert!(gate.try_acquire_at(0).is_err());
    }

    #[test]
    fn test_gate_admits_one_of_many_racers() {
        let gate = Arc::new(CooldownGate::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.try_acquire_at(42).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_zero_cooldown_never_blocks() {
        let gate = CooldownGate::new(Duration::ZERO);
        assert!(gate.try_acquire_at(10).is_ok());
        assert!(gate.try_acquire_at(10).is_ok());
    }
}
