//! Remote-service client.
//!
//! A firing sends one [`ServiceRequest`] and gets back a classified
//! [`ServiceResponse`]. Clients never return errors: every failure mode is an
//! outcome on the response.

pub mod http;

use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

pub use http::{HttpClientFactory, HttpServiceClient};

/// Request built from a process's stored template and its service address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub service_id: String,
    pub process_id: String,
    pub address: String,
    pub body: String,
}

/// Classification of one remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ResponseOutcome {
    Success,
    /// The service answered with an error (HTTP error status or an exception report).
    ServiceException,
    /// The service could not be reached.
    TransportException,
    /// Anything else that went wrong on the client side.
    OtherException,
}

/// Result of one remote call.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub outcome: ResponseOutcome,
    pub status: Option<u16>,
    pub body: Bytes,
    pub sent_at: DateTime<Utc>,
    /// Set on every outcome except [`ResponseOutcome::TransportException`].
    pub received_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ServiceResponse {
    pub fn success(sent_at: DateTime<Utc>, status: u16, body: Bytes) -> Self {
        Self {
            outcome: ResponseOutcome::Success,
            status: Some(status),
            body,
            sent_at,
            received_at: Some(Utc::now()),
            error: None,
        }
    }

    pub fn service_exception(
        sent_at: DateTime<Utc>,
        status: u16,
        body: Bytes,
        error: impl Into<String>,
    ) -> Self {
        Self {
            outcome: ResponseOutcome::ServiceException,
            status: Some(status),
            body,
            sent_at,
            received_at: Some(Utc::now()),
            error: Some(error.into()),
        }
    }

    pub fn transport_exception(sent_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            outcome: ResponseOutcome::TransportException,
            status: None,
            body: Bytes::new(),
            sent_at,
            received_at: None,
            error: Some(error.into()),
        }
    }

    pub fn other_exception(sent_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            outcome: ResponseOutcome::OtherException,
            status: None,
            body: Bytes::new(),
            sent_at,
            received_at: Some(Utc::now()),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ResponseOutcome::Success
    }

    pub fn is_service_exception(&self) -> bool {
        self.outcome == ResponseOutcome::ServiceException
    }

    pub fn is_transport_exception(&self) -> bool {
        self.outcome == ResponseOutcome::TransportException
    }

    pub fn is_other_exception(&self) -> bool {
        self.outcome == ResponseOutcome::OtherException
    }
}

/// Client for one firing.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn execute(&self, request: &ServiceRequest) -> ServiceResponse;
}

/// Creates a fresh client for every firing.
pub trait ClientFactory: Send + Sync {
    fn create(&self) -> Box<dyn ServiceClient>;
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_predicates() {
        let now = Utc::now();
        let transport = ServiceResponse::transport_exception(now, "refused");
        assert!(transport.is_transport_exception());
        assert!(transport.received_at.is_none());

        let service = ServiceResponse::service_exception(now, 500, Bytes::new(), "boom");
        assert!(service.is_service_exception());
        assert!(service.received_at.is_some());

        let other = ServiceResponse::other_exception(now, "bad url");
        assert!(other.is_other_exception());
        assert!(other.received_at.is_some());

        let ok = ServiceResponse::success(now, 200, Bytes::from_static(b"<ok/>"));
        assert!(ok.is_success());
        assert_eq!(ok.outcome.to_string(), "success");
    }
}
