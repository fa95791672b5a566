//! Per-entity escalation control state
//!
//! `collecting → analyzing → evaluating → {accepted | analyzing | exhausted}`.
//! `accepted` and `exhausted` are terminal.

use crate::entity::EntityId;
use crate::verdict::Objection;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an entity is in the collect/analyze/evaluate loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    /// Waiting for (re)collection
    Collecting,
    /// Waiting for an analysis attempt
    Analyzing,
    /// An analysis result awaits its verdict
    Evaluating,
    /// Passed; terminal
    Accepted,
    /// Still flagged after the last allowed cycle; terminal
    Exhausted,
}

impl EscalationStatus {
    /// Storage name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Collecting => "collecting",
            EscalationStatus::Analyzing => "analyzing",
            EscalationStatus::Evaluating => "evaluating",
            EscalationStatus::Accepted => "accepted",
            EscalationStatus::Exhausted => "exhausted",
        }
    }

    /// Parse a status from its storage name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collecting" => Some(EscalationStatus::Collecting),
            "analyzing" => Some(EscalationStatus::Analyzing),
            "evaluating" => Some(EscalationStatus::Evaluating),
            "accepted" => Some(EscalationStatus::Accepted),
            "exhausted" => Some(EscalationStatus::Exhausted),
            _ => None,
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscalationStatus::Accepted | EscalationStatus::Exhausted)
    }

    /// Statuses in which the entity offers analysis work
    pub fn wants_analysis(&self) -> bool {
        matches!(self, EscalationStatus::Analyzing | EscalationStatus::Evaluating)
    }
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escalation state of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    /// Entity this state belongs to
    pub entity_id: EntityId,

    /// Current cycle, 1-based once analysis has started
    pub cycle: u32,

    /// Current status
    pub status: EscalationStatus,

    /// Every objection raised so far, oldest first
    pub objections: Vec<Objection>,
}

impl EscalationState {
    /// Fresh state for a newly registered entity
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            cycle: 0,
            status: EscalationStatus::Collecting,
            objections: Vec::new(),
        }
    }

    /// Whether the state is terminal
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `analyzing` after a successful collection
    ///
    /// The first collection opens cycle 1; a recollection keeps the cycle the
    /// controller already advanced to.
    pub fn begin_analysis(&mut self) {
        if self.cycle == 0 {
            self.cycle = 1;
        }
        self.status = EscalationStatus::Analyzing;
    }

    /// Accumulated objection texts, handed to the next analysis attempt
    pub fn prior_questions(&self) -> Vec<String> {
        self.objections.iter().map(|o| o.text.clone()).collect()
    }
}
