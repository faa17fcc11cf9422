/// Monitoring engine module - handles execution of monitoring checks
///
/// This module is responsible for:
/// - Probing HTTP, TCP, ping and SSL targets
/// - Deciding which checks are due and dispatching them
/// - Turning probe outcomes into status transitions
pub mod checker;
pub mod error;
pub mod executor;
pub mod scheduler;
pub mod tls;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub mod test_support;

pub use error::ProbeConfigError;
pub use executor::{MonitoringExecutor, Prober};
pub use scheduler::{BatchReport, CheckDispatcher};
pub use tracker::{StatusPolicy, StatusTracker};
pub use types::{CheckResult, CheckType, CurrentStatus, ProbeOutcome};
