//! Leaf certificate inspection for SSL checks.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;
use x509_parser::parse_x509_certificate;

use super::types::SslInfo;

/// Performs a TLS handshake and reports on the certificate the server presents
pub struct CertificateInspector {
    connector: TlsConnector,
}

impl CertificateInspector {
    /// Build an inspector trusting the platform's root certificates
    pub fn new() -> Result<Self> {
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            debug!("Skipping unreadable native certificate: {}", error);
        }

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        debug!(added, ignored, "Loaded native root certificates");

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self { connector: TlsConnector::from(Arc::new(config)) })
    }

    /// Connect to `host:port`, complete the handshake and describe the leaf certificate
    pub async fn inspect(
        &self,
        host: &str,
        port: u16,
        deadline: Duration,
        now: DateTime<Utc>,
    ) -> Result<SslInfo> {
        let server_name = ServerName::try_from(host.to_string())?;

        let handshake = async {
            let tcp = TcpStream::connect((host, port)).await?;
            self.connector.connect(server_name, tcp).await
        };

        let stream = timeout(deadline, handshake)
            .await
            .map_err(|_| anyhow!("TLS handshake with {host}:{port} timed out"))??;

        let (_, session) = stream.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or_else(|| anyhow!("{host}:{port} presented no certificate"))?;

        certificate_info(leaf.as_ref(), now)
    }
}

/// Summarise a DER encoded certificate relative to `now`
pub fn certificate_info(der: &[u8], now: DateTime<Utc>) -> Result<SslInfo> {
    let (_, cert) = parse_x509_certificate(der).map_err(|e| anyhow!("Invalid certificate: {e}"))?;
    let validity = cert.validity();

    let not_before = validity.not_before.timestamp();
    let not_after = validity.not_after.timestamp();
    let expires_at = DateTime::from_timestamp(not_after, 0)
        .ok_or_else(|| anyhow!("Certificate expiry out of range: {not_after}"))?;

    Ok(SslInfo {
        valid: not_before <= now.timestamp() && now < expires_at,
        expires_at: Some(expires_at),
        days_until_expiry: Some((expires_at - now).num_days()),
        issuer: Some(cert.issuer().to_string()),
        subject: Some(cert.subject().to_string()),
    })
}
