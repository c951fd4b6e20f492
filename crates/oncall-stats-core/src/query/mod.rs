//! Read-side services: aggregate statistics, resolved alerts and hiding

mod hidden;
pub mod period;
mod service;

pub use hidden::HiddenAlertResolver;
pub use service::StatisticsQueryService;
