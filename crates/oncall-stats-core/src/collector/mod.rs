//! Alert lifecycle capture
//!
//! [`StatisticsCaptureService`] writes lifecycle transitions to the store and
//! [`StatisticsWorkerPool`] feeds it from a bounded, non-blocking queue.

mod capture;
mod pool;

pub use capture::StatisticsCaptureService;
pub use pool::{CaptureJob, PoolStats, StatisticsWorkerPool};
