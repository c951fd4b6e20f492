//! # On-Call Stats
//!
//! Alert lifecycle statistics for on-call engineers.
//!
//! Every time an alert fires, is acknowledged or resolves, the transition is
//! captured as an occurrence row. Engineers then query aggregate statistics
//! (counts, durations, time to acknowledge) narrowed by their own on-call
//! rules, and browse recently resolved alerts with their hidden alerts
//! filtered out.
//!
//! ## Architecture
//!
//! - **Rules**: validated multi-criterion predicates compiled to a [`filter::Filter`]
//! - **Collector**: idempotent capture service fed by a bounded worker pool
//! - **Query**: aggregate, period-bucketed and resolved-alert queries
//! - **Storage**: PostgreSQL via sqlx, or an in-memory store
//!
//! ## Quick Start
//!
//! ```bash
//! # Apply migrations
//! oncall-stats migrate
//!
//! # Daily breakdown for one user
//! oncall-stats stats --user alice --from 2024-05-01T00:00:00Z --to 2024-05-08T00:00:00Z \
//!     --group-by period --period day
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod models;
pub mod query;
pub mod rules;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::collector::{CaptureJob, StatisticsCaptureService, StatisticsWorkerPool};
    pub use crate::config::Config;
    pub use crate::db::{MemoryStore, PgStatisticsStore, PostgresPool, StatisticsStore};
    pub use crate::error::{Error, Result};
    pub use crate::filter::Filter;
    pub use crate::models::*;
    pub use crate::query::{HiddenAlertResolver, StatisticsQueryService};
    pub use crate::rules::RuleEngine;
}
