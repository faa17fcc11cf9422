use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use super::checker::{Checker, HttpChecker, PingChecker, SslChecker, TcpChecker, build_client};
use super::tls::CertificateInspector;
use super::types::{CheckType, ProbeOutcome};
use crate::config::ProbeConfig;
use crate::database::models::MonitoringCheck;

/// Runs one probe for a check. Implementations never fail: problems come
/// back as [`ProbeOutcome::Failure`].
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, check: &MonitoringCheck) -> ProbeOutcome;
}

/// Monitoring executor - routes each check to the checker for its type
pub struct MonitoringExecutor {
    http_checker: HttpChecker,
    ping_checker: PingChecker,
    tcp_checker: TcpChecker,
    ssl_checker: SslChecker,
    default_timeout_seconds: u64,
}

impl MonitoringExecutor {
    /// Create a new monitoring executor
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let client = build_client(&config.user_agent)?;

        let inspector = if config.inspect_certificates {
            match CertificateInspector::new() {
                Ok(inspector) => Some(Arc::new(inspector)),
                Err(e) => {
                    warn!("Certificate inspection disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            http_checker: HttpChecker::new(client.clone(), config.user_agent.clone()),
            ping_checker: PingChecker::new(client.clone()),
            tcp_checker: TcpChecker,
            ssl_checker: SslChecker::new(client, inspector),
            default_timeout_seconds: config.default_timeout_seconds.max(1),
        })
    }

    /// Deadline for a check, falling back to the configured default
    pub fn timeout_for(&self, check: &MonitoringCheck) -> u64 {
        check.timeout_seconds.filter(|t| *t > 0).unwrap_or(self.default_timeout_seconds)
    }
}

#[async_trait::async_trait]
impl Prober for MonitoringExecutor {
    async fn probe(&self, check: &MonitoringCheck) -> ProbeOutcome {
        let check_type = match check.check_type.parse::<CheckType>() {
            Ok(check_type) => check_type,
            Err(e) => return ProbeOutcome::failure(0, e.to_string()),
        };

        let checker: &dyn Checker = match check_type {
            CheckType::Http => &self.http_checker,
            CheckType::Ping => &self.ping_checker,
            CheckType::Tcp => &self.tcp_checker,
            CheckType::Ssl => &self.ssl_checker,
        };

        let timeout_seconds = self.timeout_for(check);
        let outcome = checker.check(check, timeout_seconds).await;

        debug!(
            check_id = %check.id,
            check_type = %check_type,
            success = outcome.is_successful(),
            elapsed_ms = outcome.response_time_ms(),
            "Probe finished"
        );

        outcome
    }
}
