//! Error types for coordinator operations

use crate::config::ConfigError;
use drover_domain::{EntityId, EscalationStatus, LedgerError};
use thiserror::Error;

/// Errors that can occur while coordinating work
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Ledger call failed (after retries, for storage failures)
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The evaluation task died before producing a verdict
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    /// The escalation controller refused a decision
    #[error("Invalid escalation transition for {entity}: {reason} (status {status})")]
    InvalidTransition {
        /// Entity concerned
        entity: EntityId,
        /// Status at the time of the decision
        status: EscalationStatus,
        /// Why the decision was refused
        reason: &'static str,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The ledger could not be opened
    #[error("Failed to open ledger: {0}")]
    Open(String),
}

impl CoordinatorError {
    /// Whether the caller's lease was lost; local work must be discarded
    pub fn is_stale(&self) -> bool {
        matches!(self, CoordinatorError::Ledger(e) if e.is_stale())
    }

    /// Whether durable storage is failing
    pub fn is_storage(&self) -> bool {
        matches!(self, CoordinatorError::Ledger(e) if e.is_storage())
    }
}
