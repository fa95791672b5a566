//! Progress snapshots and the needs-attention set

use crate::entity::EntityId;
use crate::verdict::Objection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Overall health derived from settled entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// At least 80% of settled entities were accepted
    Healthy,
    /// At least 60%
    Degraded,
    /// Below 60%
    Critical,
}

/// Counts per lifecycle state and escalation status at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// When the snapshot was taken (ms since Unix epoch)
    pub taken_at: u64,

    /// Entities waiting for collection
    pub pending: usize,
    /// Entities with an outstanding collection lease
    pub claimed: usize,
    /// Entities with a stored payload
    pub done: usize,
    /// Permanently failed entities
    pub failed: usize,

    /// Escalation: waiting for (re)collection
    pub collecting: usize,
    /// Escalation: waiting for analysis
    pub analyzing: usize,
    /// Escalation: awaiting a verdict
    pub evaluating: usize,
    /// Escalation: accepted
    pub accepted: usize,
    /// Escalation: exhausted
    pub exhausted: usize,

    /// Claims whose lease had not expired when the snapshot was taken
    pub live_claims: usize,

    /// Current cycle of every entity that has entered analysis
    pub cycles: BTreeMap<EntityId, u32>,
}

impl ProgressSnapshot {
    /// Total registered entities
    pub fn total(&self) -> usize {
        self.pending + self.claimed + self.done + self.failed
    }

    /// Entities that reached a final outcome
    pub fn settled(&self) -> usize {
        self.accepted + self.exhausted + self.failed
    }

    /// Fraction of settled entities that were accepted, in [0, 1]
    pub fn success_rate(&self) -> f64 {
        let settled = self.settled();
        if settled == 0 {
            return 1.0;
        }
        self.accepted as f64 / settled as f64
    }

    /// Health classification over settled entities
    pub fn health(&self) -> Health {
        let rate = self.success_rate();
        if rate >= 0.8 {
            Health::Healthy
        } else if rate >= 0.6 {
            Health::Degraded
        } else {
            Health::Critical
        }
    }

    /// Whether every entity has settled
    ///
    /// An empty ledger is complete: there is nothing left to settle.
    pub fn is_complete(&self) -> bool {
        self.settled() == self.total()
    }
}

/// Why an entity is in the needs-attention set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttentionReason {
    /// Collection or analysis failed for good
    PermanentlyFailed {
        /// Last recorded failure
        reason: String,
        /// Attempts consumed
        attempts: u32,
    },
    /// Still flagged after the last allowed cycle
    Exhausted {
        /// Cycles run
        cycles: u32,
        /// Every objection raised along the way
        objections: Vec<Objection>,
    },
}

/// An entity that needs human or external review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionItem {
    /// Entity concerned
    pub entity_id: EntityId,
    /// Why it needs attention
    pub reason: AttentionReason,
    /// Last transition time (ms since Unix epoch)
    pub updated_at: u64,
}

/// What one sweep of expired leases did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Collection leases reverted to pending
    pub reverted: usize,
    /// Analysis leases released back to the analysis queue
    pub released: usize,
    /// Entities that ran out of attempts and were marked failed
    pub failed: usize,
}

impl SweepReport {
    /// Total leases reclaimed
    pub fn reclaimed(&self) -> usize {
        self.reverted + self.released + self.failed
    }
}
