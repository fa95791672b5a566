//! Drover Storage Layer
//!
//! Implements the [`Ledger`](drover_domain::traits::Ledger) trait on SQLite.
//!
//! # Architecture
//!
//! - One `entities` row per entity: lifecycle state, attempts, payload, the
//!   current claim and the escalation state
//! - An append-only `history` table of analysis results; each row's verdict
//!   is attached exactly once (enforced by triggers in `schema.sql`)
//! - Every mutation runs inside one `BEGIN IMMEDIATE` transaction and is
//!   guarded by a per-entity `version` column
//! - WAL journal so readers in other processes never block a writer
//!
//! # Examples
//!
//! ```no_run
//! use drover_store::{LedgerOptions, SqliteLedger};
//!
//! let ledger = SqliteLedger::open("drover.db", LedgerOptions::default()).unwrap();
//! // Ledger is now ready for claim operations
//! ```

#![warn(missing_docs)]

mod ledger;
mod rows;

use drover_domain::{Clock, LedgerError, SystemClock};
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON column could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A row changed between read and write inside one transaction
    #[error("Concurrent modification of entity {0}")]
    Conflict(String),

    /// Another thread panicked while holding the connection
    #[error("Ledger lock poisoned")]
    LockPoisoned,

    /// Domain-level refusal (stale claim, invalid transition, ...)
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Ledger(e) => e,
            StoreError::Serialization(e) => LedgerError::Corrupt(e.to_string()),
            StoreError::InvalidData(msg) => LedgerError::Corrupt(msg),
            StoreError::Database(e) => match e {
                rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::IntegralValueOutOfRange(..) => {
                    LedgerError::Corrupt(e.to_string())
                }
                rusqlite::Error::SqliteFailure(ref failure, _)
                    if failure.code == ErrorCode::ConstraintViolation =>
                {
                    LedgerError::Corrupt(e.to_string())
                }
                other => LedgerError::Storage(other.to_string()),
            },
            StoreError::Conflict(id) => {
                LedgerError::Storage(format!("Concurrent modification of entity {}", id))
            }
            StoreError::LockPoisoned => LedgerError::Storage("Ledger lock poisoned".to_string()),
        }
    }
}

/// Tunables owned by the ledger itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOptions {
    /// Failed tries (retryable failures and expired leases) before an
    /// entity is marked permanently failed
    pub max_attempts: u32,

    /// How long a writer waits for another process's transaction
    pub busy_timeout: Duration,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite-based implementation of Ledger
///
/// # Thread Safety
///
/// The connection sits behind a mutex, so one `SqliteLedger` can be shared
/// across threads and tasks through an `Arc`. Separate processes opening the
/// same file are serialized by SQLite's write lock.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    options: LedgerOptions,
}

impl SqliteLedger {
    /// Open (or create) a ledger file using the system clock
    ///
    /// Use `:memory:` for an in-memory database (useful for testing).
    pub fn open<P: AsRef<Path>>(path: P, options: LedgerOptions) -> Result<Self, StoreError> {
        Self::open_with_clock(path, options, Arc::new(SystemClock))
    }

    /// Open (or create) a ledger file with an explicit time source
    pub fn open_with_clock<P: AsRef<Path>>(
        path: P,
        options: LedgerOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, options, clock)
    }

    /// Private in-memory ledger
    ///
    /// # Examples
    ///
    /// ```
    /// use drover_domain::{traits::Ledger, EntityId, ManualClock};
    /// use drover_store::{LedgerOptions, SqliteLedger};
    /// use std::sync::Arc;
    ///
    /// let clock = Arc::new(ManualClock::new(0));
    /// let ledger = SqliteLedger::in_memory(LedgerOptions::default(), clock).unwrap();
    /// assert_eq!(ledger.register(&[EntityId::new("acme")]).unwrap(), 1);
    /// ```
    pub fn in_memory(options: LedgerOptions, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, options, clock)
    }

    fn from_connection(
        conn: Connection,
        options: LedgerOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        conn.busy_timeout(options.busy_timeout)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(include_str!("schema.sql"))?;

        debug!(journal_mode = %journal_mode, max_attempts = options.max_attempts, "Ledger opened");

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            options,
        })
    }

    /// Options this ledger was opened with
    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    /// Run `op` inside one immediate transaction
    ///
    /// `now` is read after the write lock is held, so transition timestamps
    /// follow commit order. Any error rolls the whole transaction back.
    fn write<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection, u64) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = self.clock.now_ms();
        let out = op(&tx, now)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run a read-only `op` against the connection
    fn read<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection, u64) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = self.clock.now_ms();
        op(&conn, now)
    }
}
