use thiserror::Error;

/// Problems with a check's configuration, reported as probe failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeConfigError {
    #[error("TCP check requires hostname:port format")]
    TcpTargetFormat,

    #[error("Invalid port in TCP target: {0}")]
    TcpPort(String),

    #[error("Unsupported check type: {0}")]
    UnsupportedCheckType(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid header {0}")]
    InvalidHeader(String),
}
