//! Push-based progress reporting
//!
//! Observers receive snapshots and per-entity events from the coordinator.
//! Delivery is fire-and-forget: an observer must return immediately and may
//! drop events, but it can never slow down or fail a ledger transition.

use drover_domain::{EntityId, Outcome, ProgressSnapshot, SweepReport};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Something observers may want to know about
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Counts per lifecycle state and escalation status
    Snapshot(ProgressSnapshot),
    /// A sweep reclaimed expired leases
    Swept(SweepReport),
    /// A verdict was recorded
    Verdict {
        /// Entity judged
        entity: EntityId,
        /// Cycle the verdict belongs to
        cycle: u32,
        /// Pass or flagged
        outcome: Outcome,
        /// Final confidence
        confidence: f64,
        /// Number of objections raised
        objections: usize,
        /// Intent label chosen by the escalation controller
        decision: &'static str,
    },
    /// An entity failed permanently
    Failed {
        /// Entity concerned
        entity: EntityId,
        /// Last failure reason
        reason: String,
    },
    /// Storage failed; claims are no longer issued
    Halted {
        /// Storage error
        reason: String,
    },
    /// Storage is reachable again
    Resumed,
}

/// Receives progress events; must not block
pub trait ProgressObserver: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: &ProgressEvent);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Emits events as structured `tracing` records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Snapshot(snap) => info!(
                pending = snap.pending,
                claimed = snap.claimed,
                done = snap.done,
                failed = snap.failed,
                accepted = snap.accepted,
                exhausted = snap.exhausted,
                live_claims = snap.live_claims,
                health = ?snap.health(),
                "Progress"
            ),
            ProgressEvent::Swept(report) => info!(
                reverted = report.reverted,
                released = report.released,
                failed = report.failed,
                "Swept expired leases"
            ),
            ProgressEvent::Verdict {
                entity,
                cycle,
                outcome,
                confidence,
                objections,
                decision,
            } => info!(
                entity = %entity,
                cycle,
                outcome = ?outcome,
                confidence,
                objections,
                decision,
                "Verdict"
            ),
            ProgressEvent::Failed { entity, reason } => {
                warn!(entity = %entity, reason = %reason, "Entity failed permanently")
            }
            ProgressEvent::Halted { reason } => warn!(reason = %reason, "Coordinator halted"),
            ProgressEvent::Resumed => info!("Coordinator resumed"),
        }
    }
}

/// Forwards events to a bounded channel, dropping them when it is full
#[derive(Debug)]
pub struct ChannelObserver {
    tx: mpsc::Sender<ProgressEvent>,
    dropped: AtomicU64,
}

impl ChannelObserver {
    /// Observer plus the receiving end of a channel holding `capacity` events
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events dropped because the channel was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, event: &ProgressEvent) {
        if self.tx.try_send(event.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_delivers_in_order() {
        let (observer, mut rx) = ChannelObserver::channel(4);
        observer.on_event(&ProgressEvent::Resumed);
        observer.on_event(&ProgressEvent::Halted {
            reason: "disk full".into(),
        });

        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::Resumed);
        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::Halted { .. }));
        assert_eq!(observer.dropped(), 0);
    }

    #[test]
    fn test_channel_observer_drops_when_full() {
        let (observer, mut rx) = ChannelObserver::channel(2);
        for _ in 0..5 {
            observer.on_event(&ProgressEvent::Resumed);
        }
        assert_eq!(observer.dropped(), 3);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_observer_survives_closed_receiver() {
        let (observer, rx) = ChannelObserver::channel(2);
        drop(rx);
        observer.on_event(&ProgressEvent::Resumed);
        assert_eq!(observer.dropped(), 1);
    }

    #[test]
    fn test_tracing_observer_accepts_every_event() {
        let observer = TracingObserver;
        observer.on_event(&ProgressEvent::Snapshot(ProgressSnapshot::default()));
        observer.on_event(&ProgressEvent::Swept(SweepReport::default()));
        observer.on_event(&ProgressEvent::Failed {
            entity: EntityId::new("acme"),
            reason: "404".into(),
        });
    }
}
