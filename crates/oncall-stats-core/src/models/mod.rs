//! Data models for alert statistics

mod hidden;
mod query;
mod rule;
mod statistic;

pub use hidden::*;
pub use query::*;
pub use rule::*;
pub use statistic::*;
