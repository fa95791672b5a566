//! Gatekeeper error types

use thiserror::Error;

/// Errors that can occur while configuring the evaluator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatekeeperError {
    /// A threshold lies outside its allowed range
    #[error("Invalid threshold {name} = {value}: {reason}")]
    InvalidThreshold {
        /// Configuration key
        name: &'static str,
        /// Offending value
        value: f64,
        /// What the value must satisfy
        reason: &'static str,
    },

    /// A rule weight is negative or otherwise unusable
    #[error("Invalid weight {weight} for rule {rule}")]
    InvalidWeight {
        /// Rule code
        rule: &'static str,
        /// Offending weight
        weight: f64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
