use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::warn;
use url::Url;

use super::error::ProbeConfigError;
use super::tls::CertificateInspector;
use super::types::{ProbeOutcome, SslInfo};
use crate::database::models::MonitoringCheck;

/// Status code an HTTP check expects when none is configured
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Checker trait for the different kinds of probes
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Probe the check's target once, giving up after `timeout_seconds`
    async fn check(&self, check: &MonitoringCheck, timeout_seconds: u64) -> ProbeOutcome;
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Render an error together with its whole source chain
fn describe_error(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

fn timeout_message(timeout_seconds: u64) -> String {
    format!("Timeout after {timeout_seconds}s")
}

/// Message for a request that never produced a response
fn request_error_message(error: &reqwest::Error, timeout_seconds: u64, context: &str) -> String {
    if error.is_timeout() {
        timeout_message(timeout_seconds)
    } else {
        format!("{context}: {}", describe_error(error))
    }
}

/// Build a shared HTTP client; redirects are followed with reqwest's default policy
pub fn build_client(user_agent: &str) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().user_agent(user_agent.to_string()).build()
}

/// HTTP checker: custom method, headers and body, matched against an expected status
pub struct HttpChecker {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpChecker {
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self { client, user_agent: user_agent.into() }
    }

    fn request_headers(&self, check: &MonitoringCheck) -> Result<HeaderMap, ProbeConfigError> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|_| ProbeConfigError::InvalidHeader(USER_AGENT.to_string()))?;
        headers.insert(USER_AGENT, agent);

        // Check-supplied headers win over the default user agent
        for (name, value) in &check.headers {
            let name_header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ProbeConfigError::InvalidHeader(name.clone()))?;
            let value_header = HeaderValue::from_str(value)
                .map_err(|_| ProbeConfigError::InvalidHeader(name.clone()))?;
            headers.insert(name_header, value_header);
        }

        Ok(headers)
    }
}

/// Parse the configured method, defaulting to GET
pub(crate) fn request_method(check: &MonitoringCheck) -> Result<Method, ProbeConfigError> {
    let raw = check.method.as_deref().map(str::trim).filter(|m| !m.is_empty()).unwrap_or("GET");
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| ProbeConfigError::InvalidMethod(raw.to_string()))
}

/// Decide whether an HTTP response satisfies the check
pub(crate) fn evaluate_status(check: &MonitoringCheck, status: StatusCode, response_time_ms: u64) -> ProbeOutcome {
    let expected = check.expected_status_code.unwrap_or(DEFAULT_EXPECTED_STATUS);
    let actual = status.as_u16();

    if actual == expected {
        ProbeOutcome::success(response_time_ms, Some(actual))
    } else {
        ProbeOutcome::failure_with_status(
            response_time_ms,
            actual,
            format!("Expected status code {expected}, got {actual}"),
        )
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, check: &MonitoringCheck, timeout_seconds: u64) -> ProbeOutcome {
        let start = Instant::now();

        let prepared = request_method(check).and_then(|method| Ok((method, self.request_headers(check)?)));
        let (method, headers) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return ProbeOutcome::failure(elapsed_ms(start), e.to_string()),
        };

        let mut request = self
            .client
            .request(method, check.target.as_str())
            .headers(headers)
            .timeout(Duration::from_secs(timeout_seconds));

        if let Some(body) = check.body.as_ref().filter(|b| !b.is_empty()) {
            request = request.body(body.clone());
        }

        match request.send().await {
            Ok(response) => evaluate_status(check, response.status(), elapsed_ms(start)),
            Err(e) => ProbeOutcome::failure(
                elapsed_ms(start),
                request_error_message(&e, timeout_seconds, "HTTP request failed"),
            ),
        }
    }
}

/// Reduce a ping target to a bare hostname, accepting URLs and `host[:port][/path]`
pub(crate) fn ping_hostname(target: &str) -> Result<String, ProbeConfigError> {
    let trimmed = target.trim();

    if trimmed.contains("://") {
        let url = Url::parse(trimmed).map_err(|e| ProbeConfigError::InvalidTarget(format!("{trimmed}: {e}")))?;
        return url
            .host_str()
            .map(str::to_owned)
            .ok_or_else(|| ProbeConfigError::InvalidTarget(trimmed.to_string()));
    }

    let authority = trimmed.split('/').next().unwrap_or_default();
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => authority,
    };

    if host.is_empty() {
        Err(ProbeConfigError::InvalidTarget(trimmed.to_string()))
    } else {
        Ok(host.to_string())
    }
}

/// Any HTTP answer proves the host is reachable
pub(crate) fn evaluate_reachability(status: StatusCode, response_time_ms: u64) -> ProbeOutcome {
    ProbeOutcome::success(response_time_ms, Some(status.as_u16()))
}

/// Ping checker.
///
/// ICMP needs raw sockets, so reachability is approximated with a HEAD
/// request to `http://<host>`; any response at all counts as up.
pub struct PingChecker {
    client: reqwest::Client,
}

impl PingChecker {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Checker for PingChecker {
    async fn check(&self, check: &MonitoringCheck, timeout_seconds: u64) -> ProbeOutcome {
        let start = Instant::now();

        let host = match ping_hostname(&check.target) {
            Ok(host) => host,
            Err(e) => return ProbeOutcome::failure(elapsed_ms(start), e.to_string()),
        };

        let response = self
            .client
            .head(format!("http://{host}"))
            .timeout(Duration::from_secs(timeout_seconds))
            .send()
            .await;

        match response {
            Ok(response) => evaluate_reachability(response.status(), elapsed_ms(start)),
            Err(e) => ProbeOutcome::failure(
                elapsed_ms(start),
                request_error_message(&e, timeout_seconds, &format!("Host {host} unreachable")),
            ),
        }
    }
}

/// Split a `hostname:port` target
pub(crate) fn parse_tcp_target(target: &str) -> Result<(String, u16), ProbeConfigError> {
    let (host, port) = target.trim().rsplit_once(':').ok_or(ProbeConfigError::TcpTargetFormat)?;
    if host.is_empty() {
        return Err(ProbeConfigError::TcpTargetFormat);
    }

    let port: u16 = port.parse().map_err(|_| ProbeConfigError::TcpPort(port.to_string()))?;
    if port == 0 {
        return Err(ProbeConfigError::TcpPort(port.to_string()));
    }

    // Bracketed IPv6 literals are connected to without the brackets
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

/// TCP port checker, opens a real connection and drops it
pub struct TcpChecker;

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(&self, check: &MonitoringCheck, timeout_seconds: u64) -> ProbeOutcome {
        let start = Instant::now();

        let (host, port) = match parse_tcp_target(&check.target) {
            Ok(parts) => parts,
            Err(e) => return ProbeOutcome::failure(elapsed_ms(start), e.to_string()),
        };

        let connect = TcpStream::connect((host.as_str(), port));
        match timeout(Duration::from_secs(timeout_seconds), connect).await {
            Ok(Ok(_stream)) => ProbeOutcome::success(elapsed_ms(start), None),
            Ok(Err(e)) => ProbeOutcome::failure(
                elapsed_ms(start),
                format!("TCP connection to {host}:{port} failed: {e}"),
            ),
            Err(_) => ProbeOutcome::failure(elapsed_ms(start), timeout_message(timeout_seconds)),
        }
    }
}

/// Coerce a target to an `https://` URL
pub(crate) fn ssl_url(target: &str) -> String {
    let trimmed = target.trim();
    if trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("https://{rest}")
    } else {
        format!("https://{trimmed}")
    }
}

/// An HTTPS endpoint is healthy while it answers below 500
pub(crate) fn evaluate_ssl_status(status: StatusCode, response_time_ms: u64) -> ProbeOutcome {
    let code = status.as_u16();
    if code < 500 {
        ProbeOutcome::success(response_time_ms, Some(code))
    } else {
        ProbeOutcome::failure_with_status(
            response_time_ms,
            code,
            format!("SSL endpoint returned status code {code}"),
        )
    }
}

/// SSL checker: the endpoint must answer over HTTPS with a status below 500
pub struct SslChecker {
    client: reqwest::Client,
    inspector: Option<Arc<CertificateInspector>>,
}

impl SslChecker {
    pub fn new(client: reqwest::Client, inspector: Option<Arc<CertificateInspector>>) -> Self {
        Self { client, inspector }
    }

    /// Read the leaf certificate within `budget`, falling back to the placeholder info
    async fn ssl_info(&self, url: &str, budget: Duration) -> SslInfo {
        let Some(inspector) = &self.inspector else {
            return SslInfo::placeholder();
        };
        if budget.is_zero() {
            return SslInfo::placeholder();
        }

        let Some((host, port)) = Url::parse(url)
            .ok()
            .and_then(|u| Some((u.host_str()?.to_string(), u.port_or_known_default()?)))
        else {
            return SslInfo::placeholder();
        };

        match inspector.inspect(&host, port, budget, chrono::Utc::now()).await {
            Ok(info) => info,
            Err(e) => {
                warn!(host = %host, port, "Certificate inspection failed: {:#}", e);
                SslInfo::placeholder()
            }
        }
    }
}

#[async_trait::async_trait]
impl Checker for SslChecker {
    async fn check(&self, check: &MonitoringCheck, timeout_seconds: u64) -> ProbeOutcome {
        let start = Instant::now();
        let url = ssl_url(&check.target);
        let deadline = Duration::from_secs(timeout_seconds);

        let response = self.client.head(url.as_str()).timeout(deadline).send().await;
        let response_time_ms = elapsed_ms(start);

        match response {
            Ok(response) => {
                let outcome = evaluate_ssl_status(response.status(), response_time_ms);
                if !outcome.is_successful() {
                    return outcome;
                }

                // Certificate inspection shares the probe's deadline
                let info = self.ssl_info(&url, deadline.saturating_sub(start.elapsed())).await;
                outcome.with_ssl_info(info)
            }
            Err(e) => ProbeOutcome::failure(
                response_time_ms,
                request_error_message(&e, timeout_seconds, "SSL connection failed"),
            ),
        }
    }
}
