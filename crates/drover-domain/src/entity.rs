//! Entity module - the unit of work and its durable record

use crate::analysis::AnalysisResult;
use crate::claim::Claim;
use crate::escalation::EscalationState;
use crate::verdict::Verdict;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of an entity (one company, one article, ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a collection worker
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collection lifecycle of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Waiting for a collection worker
    Pending,
    /// A collection lease is outstanding
    Claimed,
    /// Payload stored; analysis may still be in progress
    Done,
    /// Permanently failed; needs attention
    Failed,
}

impl LifecycleState {
    /// Storage name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Claimed => "claimed",
            LifecycleState::Done => "done",
            LifecycleState::Failed => "failed",
        }
    }

    /// Parse a state from its storage name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LifecycleState::Pending),
            "claimed" => Some(LifecycleState::Claimed),
            "done" => Some(LifecycleState::Done),
            "failed" => Some(LifecycleState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw data returned by the collection collaborator
///
/// `body` is opaque to the core. The evaluator only looks at the metadata:
/// which sources were available, which sections came back missing, and the
/// collector's own quality estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    /// Opaque collected bytes
    pub body: Vec<u8>,

    /// Identifiers of every source present in the payload
    pub source_ids: BTreeSet<String>,

    /// Sections the collector expected but could not obtain
    pub missing_sections: BTreeSet<String>,

    /// Collector-reported completeness in [0, 1], if known
    pub data_quality: Option<f64>,
}

impl RawPayload {
    /// Payload with a body and a set of sources
    pub fn new<I, S>(body: impl Into<Vec<u8>>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            body: body.into(),
            source_ids: sources.into_iter().map(Into::into).collect(),
            missing_sections: BTreeSet::new(),
            data_quality: None,
        }
    }

    /// Mark a section as missing
    pub fn with_missing_section(mut self, section: impl Into<String>) -> Self {
        self.missing_sections.insert(section.into());
        self
    }

    /// Attach the collector's quality estimate
    pub fn with_data_quality(mut self, quality: f64) -> Self {
        self.data_quality = Some(quality);
        self
    }

    /// Whether the collector reported any gap
    pub fn is_incomplete(&self) -> bool {
        !self.missing_sections.is_empty()
    }
}

/// The durable record of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Unique identifier
    pub id: EntityId,

    /// Collection lifecycle state
    pub state: LifecycleState,

    /// Failed tries so far (retryable failures and expired leases)
    pub attempts: u32,

    /// Collected payload, once collection has succeeded
    pub payload: Option<RawPayload>,

    /// Last failure reason, if any
    pub failure_reason: Option<String>,

    /// Stored claim; may already be expired until the next sweep
    pub claim: Option<Claim>,

    /// Escalation control state
    pub escalation: EscalationState,

    /// Compare-and-set version, bumped by every transition
    pub version: u64,

    /// Registration time (ms since Unix epoch)
    pub created_at: u64,

    /// Last transition time (ms since Unix epoch)
    pub updated_at: u64,
}

impl Entity {
    /// The stored claim if it is still live at `now_ms`
    pub fn live_claim(&self, now_ms: u64) -> Option<&Claim> {
        self.claim.as_ref().filter(|c| c.is_live(now_ms))
    }
}

/// One AnalysisResult in an entity's history, with its Verdict once judged
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Monotonic sequence number within the ledger
    pub seq: u64,

    /// Escalation cycle the result belongs to
    pub cycle: u32,

    /// The candidate result
    pub result: AnalysisResult,

    /// The verdict, set exactly once
    pub verdict: Option<Verdict>,

    /// Append time (ms since Unix epoch)
    pub recorded_at: u64,
}
