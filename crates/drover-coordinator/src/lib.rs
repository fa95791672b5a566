//! Drover Coordinator
//!
//! Distributes entities to collection workers, drives each one through the
//! analyze / evaluate / escalate loop, and keeps the ledger tidy.
//!
//! # Overview
//!
//! The coordinator crate is responsible for:
//! - **Task distribution**: exclusive, lease-based claims with idle backoff
//! - **Escalation**: accept, rerun with objections, recollect, or exhaust
//! - **Maintenance**: sweeping expired leases and periodic checkpoints
//! - **Observability**: metrics, progress snapshots and verdict events
//!
//! The ledger remains the single source of truth. Nothing here keeps entity
//! state in memory, so any number of coordinators and workers (in one process
//! or several) can share one ledger file, and a restart resumes where the
//! ledger left off.
//!
//! # Usage
//!
//! ```no_run
//! use drover_coordinator::{CollectionWorker, Coordinator, DroverConfig};
//! use drover_domain::traits::{Analyzer, Collector};
//! use drover_domain::WorkerId;
//! use drover_gatekeeper::Gatekeeper;
//! use std::sync::Arc;
//!
//! # async fn example(collector: Arc<dyn Collector>, analyzer: Arc<dyn Analyzer>)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! drover_coordinator::init_tracing();
//!
//! let config = DroverConfig::from_file("drover.toml")?;
//! let coordinator = Arc::new(Coordinator::open(&config)?);
//! let evaluator = Arc::new(Gatekeeper::new(config.evaluator.clone()));
//!
//! let maintenance = {
//!     let coordinator = Arc::clone(&coordinator);
//!     tokio::spawn(async move {
//!         coordinator
//!             .run_maintenance(async {
//!                 let _ = tokio::signal::ctrl_c().await;
//!             })
//!             .await
//!     })
//! };
//!
//! let worker = CollectionWorker::new(
//!     WorkerId::new("worker-1"),
//!     Arc::clone(&coordinator),
//!     collector,
//!     analyzer,
//!     evaluator,
//! )
//! .with_config(config.worker.clone());
//! let report = worker.run(std::future::pending()).await;
//!
//! coordinator.shutdown();
//! maintenance.await?;
//! println!("{:?}\n{}", report, coordinator.metrics().summary());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```toml
//! [coordinator]
//! lease_duration_secs = 300
//! sweep_interval_secs = 30
//! backoff_base_ms = 100
//! backoff_cap_ms = 10000
//! storage_retry_limit = 5
//! checkpoint_interval = 100
//! max_cycles = 3
//! recollect_on_missing_evidence = false
//! ```

#![warn(missing_docs)]

mod backoff;
mod config;
mod coordinator;
mod error;
mod escalation;
mod metrics;
mod observer;
mod worker;

pub use backoff::Backoff;
pub use config::{ConfigError, CoordinatorConfig, DroverConfig, LedgerConfig, WorkerConfig};
pub use coordinator::{ClaimDecision, Coordinator};
pub use error::CoordinatorError;
pub use escalation::{EscalationController, EscalationDecision, Intent};
pub use metrics::{CoordinatorMetrics, MetricsSnapshot};
pub use observer::{ChannelObserver, NoopObserver, ProgressEvent, ProgressObserver, TracingObserver};
pub use worker::{CollectionWorker, WorkerReport};

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber for embedding applications
///
/// Reads `RUST_LOG` (defaulting to `info`) and logs to stderr. Does nothing
/// if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
