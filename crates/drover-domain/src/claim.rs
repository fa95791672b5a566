//! Claim module - time-bounded exclusive leases on entities

use crate::entity::{EntityId, WorkerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a claim based on UUIDv7
///
/// Every grant gets a fresh id, so a worker that re-claims the same entity
/// after losing its lease holds a different token than before. Comparing ids
/// is how the ledger tells a current claim from a superseded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimId(u128);

impl ClaimId {
    /// Fresh id; later grants sort after earlier ones
    ///
    /// ```
    /// use drover_domain::ClaimId;
    ///
    /// let first = ClaimId::new();
    /// let token: ClaimId = first.to_string().parse().unwrap();
    /// assert_eq!(token, first);
    /// ```
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7().as_u128())
    }

    /// Underlying 128-bit value
    pub fn as_u128(self) -> u128 {
        self.0
    }

    /// Big-endian bytes, the order the ledger stores and compares
    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl From<u128> for ClaimId {
    fn from(raw: u128) -> Self {
        Self(raw)
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ClaimId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(|parsed| Self(parsed.as_u128()))
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&uuid::Uuid::from_u128(self.0).hyphenated(), f)
    }
}

/// Which kind of work a claim grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPhase {
    /// Fetch the raw payload through the collection collaborator
    Collection,
    /// Run one analyze/evaluate round on an already collected payload
    Analysis,
}

impl ClaimPhase {
    /// Storage name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimPhase::Collection => "collection",
            ClaimPhase::Analysis => "analysis",
        }
    }

    /// Parse a phase from its storage name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collection" => Some(ClaimPhase::Collection),
            "analysis" => Some(ClaimPhase::Analysis),
            _ => None,
        }
    }
}

/// A lease granted to one worker for one entity
///
/// A claim is valid only while `lease_expires_at` is in the future. Once it
/// passes, the claim is logically absent even if the ledger has not swept it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Token identifying this particular grant
    pub id: ClaimId,

    /// Entity the lease covers
    pub entity_id: EntityId,

    /// Worker holding the lease
    pub worker_id: WorkerId,

    /// Work the holder is expected to perform
    pub phase: ClaimPhase,

    /// Grant time (ms since Unix epoch)
    pub issued_at: u64,

    /// Expiry (ms since Unix epoch)
    pub lease_expires_at: u64,
}

impl Claim {
    /// Whether the lease is still live at `now_ms`
    pub fn is_live(&self, now_ms: u64) -> bool {
        self.lease_expires_at > now_ms
    }

    /// Milliseconds left on the lease (zero once expired)
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.lease_expires_at.saturating_sub(now_ms)
    }
}

/// Result of asking the ledger for work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// A lease was granted
    Granted(Claim),
    /// Nothing is claimable right now; informational, not an error
    NoAvailableWork,
}

impl ClaimOutcome {
    /// The granted claim, if any
    pub fn into_claim(self) -> Option<Claim> {
        match self {
            ClaimOutcome::Granted(claim) => Some(claim),
            ClaimOutcome::NoAvailableWork => None,
        }
    }
}
