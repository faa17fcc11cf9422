use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::ProbeConfigError;

/// Kind of probe a monitoring check runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Http,
    Tcp,
    Ping,
    Ssl,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckType::Http => write!(f, "http"),
            CheckType::Tcp => write!(f, "tcp"),
            CheckType::Ping => write!(f, "ping"),
            CheckType::Ssl => write!(f, "ssl"),
        }
    }
}

impl FromStr for CheckType {
    type Err = ProbeConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(CheckType::Http),
            "tcp" => Ok(CheckType::Tcp),
            "ping" => Ok(CheckType::Ping),
            "ssl" => Ok(CheckType::Ssl),
            _ => Err(ProbeConfigError::UnsupportedCheckType(s.to_string())),
        }
    }
}

/// Administrative state of a check; only active checks are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Active,
    Disabled,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Active => write!(f, "active"),
            CheckStatus::Disabled => write!(f, "disabled"),
        }
    }
}

impl CheckStatus {
    /// Anything that is not explicitly active is treated as disabled
    pub fn parse_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("active") { CheckStatus::Active } else { CheckStatus::Disabled }
    }
}

/// Observed health of a check, derived from its probe history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrentStatus {
    Up,
    Down,
    Pending,
    Unknown,
}

impl fmt::Display for CurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrentStatus::Up => write!(f, "up"),
            CurrentStatus::Down => write!(f, "down"),
            CurrentStatus::Pending => write!(f, "pending"),
            CurrentStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl CurrentStatus {
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "up" => CurrentStatus::Up,
            "down" => CurrentStatus::Down,
            "pending" => CurrentStatus::Pending,
            _ => CurrentStatus::Unknown,
        }
    }
}

/// Certificate details collected by the SSL probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslInfo {
    pub valid: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_until_expiry: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl SslInfo {
    /// Used when the endpoint answered over TLS but the certificate could not be read
    pub fn placeholder() -> Self {
        Self { valid: true, expires_at: None, days_until_expiry: None, issuer: None, subject: None }
    }
}

/// Outcome of a single probe attempt.
///
/// Probes never fail with an error: every problem, including a bad check
/// configuration, ends up as a `Failure` carrying a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ProbeOutcome {
    Success {
        response_time_ms: u64,
        status_code: Option<u16>,
        ssl_info: Option<SslInfo>,
    },
    Failure {
        response_time_ms: u64,
        status_code: Option<u16>,
        error_message: String,
    },
}

impl ProbeOutcome {
    pub fn success(response_time_ms: u64, status_code: Option<u16>) -> Self {
        ProbeOutcome::Success { response_time_ms, status_code, ssl_info: None }
    }

    pub fn failure(response_time_ms: u64, error_message: impl Into<String>) -> Self {
        ProbeOutcome::Failure { response_time_ms, status_code: None, error_message: error_message.into() }
    }

    /// Failure that still got a protocol answer (e.g. unexpected HTTP status)
    pub fn failure_with_status(
        response_time_ms: u64,
        status_code: u16,
        error_message: impl Into<String>,
    ) -> Self {
        ProbeOutcome::Failure {
            response_time_ms,
            status_code: Some(status_code),
            error_message: error_message.into(),
        }
    }

    pub fn with_ssl_info(self, info: SslInfo) -> Self {
        match self {
            ProbeOutcome::Success { response_time_ms, status_code, .. } => {
                ProbeOutcome::Success { response_time_ms, status_code, ssl_info: Some(info) }
            }
            failure => failure,
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, ProbeOutcome::Success { .. })
    }

    pub fn response_time_ms(&self) -> u64 {
        match self {
            ProbeOutcome::Success { response_time_ms, .. }
            | ProbeOutcome::Failure { response_time_ms, .. } => *response_time_ms,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProbeOutcome::Success { status_code, .. } | ProbeOutcome::Failure { status_code, .. } => {
                *status_code
            }
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Success { .. } => None,
            ProbeOutcome::Failure { error_message, .. } => Some(error_message),
        }
    }

    pub fn ssl_info(&self) -> Option<&SslInfo> {
        match self {
            ProbeOutcome::Success { ssl_info, .. } => ssl_info.as_ref(),
            ProbeOutcome::Failure { .. } => None,
        }
    }
}

/// Persisted record of one executed probe. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: Uuid,
    pub monitoring_check_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub is_successful: bool,
    pub response_time_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub ssl_info: Option<SslInfo>,
}

impl CheckResult {
    /// Build the history record for a probe outcome
    pub fn from_outcome(monitoring_check_id: Uuid, outcome: &ProbeOutcome, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            monitoring_check_id,
            timestamp,
            is_successful: outcome.is_successful(),
            response_time_ms: Some(outcome.response_time_ms()),
            status_code: outcome.status_code(),
            error_message: outcome.error_message().map(str::to_owned),
            ssl_info: outcome.ssl_info().cloned(),
        }
    }
}
