use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("cannot reach gateway: {0}")]
    Unreachable(String),
    #[error("gateway request timed out after {0:?}")]
    Timeout(Duration),
    #[error("gateway rejected credentials (HTTP {status})")]
    Auth { status: u16 },
    #[error("unexpected gateway status HTTP {status}")]
    Status { status: u16 },
    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Transport-level failures: the gateway may come back on its own.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, GatewayError::Unreachable(_) | GatewayError::Timeout(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, GatewayError::Auth { .. })
    }

    /// `None` for 2xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 => Some(GatewayError::Auth { status }),
            _ => Some(GatewayError::Status { status }),
        }
    }

    pub(crate) fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(timeout)
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Unreachable(err.to_string())
        }
    }
}
