//! Ledger error taxonomy

use crate::claim::ClaimId;
use crate::entity::EntityId;
use thiserror::Error;

/// Errors returned by [`crate::traits::Ledger`] operations
///
/// Everything except `Storage` and `Corrupt` is local to one entity and must
/// never stop work on other entities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The caller's lease expired or was superseded; discard local work
    #[error("Stale claim {claim} on entity {entity}")]
    StaleClaim {
        /// Entity the claim referred to
        entity: EntityId,
        /// The claim that is no longer current
        claim: ClaimId,
    },

    /// Renewal refused because the lease is no longer current
    #[error("Claim {claim} on entity {entity} has expired")]
    ClaimExpired {
        /// Entity the claim referred to
        entity: EntityId,
        /// The expired claim
        claim: ClaimId,
    },

    /// No such entity
    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// The entity is not in a state that allows the operation
    #[error("Invalid transition for {entity}: cannot {operation} from {from}")]
    InvalidTransition {
        /// Entity concerned
        entity: EntityId,
        /// Current state description
        from: String,
        /// Attempted operation
        operation: String,
    },

    /// Durable storage unreachable or failing; system-wide
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored record could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl LedgerError {
    /// Whether the failure concerns the storage layer rather than one entity
    pub fn is_storage(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }

    /// Whether the caller held a lease that is no longer current
    pub fn is_stale(&self) -> bool {
        matches!(self, LedgerError::StaleClaim { .. } | LedgerError::ClaimExpired { .. })
    }
}
