//! Probes shipped with the monitor.

use serde_json::json;

use super::Probe;
use crate::Result;
use crate::client::{ServiceRequest, ServiceResponse};
use crate::domain::ProbeResult;

/// Milliseconds between request send and response receipt.
#[derive(Debug, Default)]
pub struct ResponseTimeProbe {
    elapsed_ms: Option<i64>,
}

impl ResponseTimeProbe {
    pub const NAME: &'static str = "response_time";
}

impl Probe for ResponseTimeProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn execute(&mut self, _request: &ServiceRequest, response: &ServiceResponse) -> Result<()> {
        self.elapsed_ms = response
            .received_at
            .map(|received| (received - response.sent_at).num_milliseconds().max(0));
        Ok(())
    }

    fn result(&self) -> Option<ProbeResult> {
        self.elapsed_ms
            .map(|ms| ProbeResult::new(Self::NAME, json!({ "milliseconds": ms })))
    }
}

/// Size of the response body in bytes.
#[derive(Debug, Default)]
pub struct ResponseSizeProbe {
    bytes: Option<usize>,
}

impl ResponseSizeProbe {
    pub const NAME: &'static str = "response_size";
}

impl Probe for ResponseSizeProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn execute(&mut self, _request: &ServiceRequest, response: &ServiceResponse) -> Result<()> {
        self.bytes = Some(response.body.len());
        Ok(())
    }

    fn result(&self) -> Option<ProbeResult> {
        self.bytes
            .map(|bytes| ProbeResult::new(Self::NAME, json!({ "bytes": bytes })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::{TimeDelta, Utc};

    fn request() -> ServiceRequest {
        ServiceRequest {
            service_id: "s".into(),
            process_id: "p".into(),
            address: "http://localhost".into(),
            body: String::new(),
        }
    }

    #[test]
    fn test_response_time() {
        let mut response = ServiceResponse::success(Utc::now(), 200, Bytes::new());
        response.received_at = Some(response.sent_at + TimeDelta::milliseconds(250));

        let mut probe = ResponseTimeProbe::default();
        assert!(probe.result().is_none());
        probe.execute(&request(), &response).unwrap();

        let result = probe.result().unwrap();
        assert_eq!(result.probe, "response_time");
        assert_eq!(result.value["milliseconds"], 250);
    }

    #[test]
    fn test_response_time_without_receipt_emits_nothing() {
        let response = ServiceResponse::transport_exception(Utc::now(), "refused");
        let mut probe = ResponseTimeProbe::default();
        probe.execute(&request(), &response).unwrap();
        assert!(probe.result().is_none());
    }

    #[test]
    fn test_response_size() {
        let response = ServiceResponse::success(Utc::now(), 200, Bytes::from_static(b"12345"));
        let mut probe = ResponseSizeProbe::default();
        probe.execute(&request(), &response).unwrap();
        assert_eq!(probe.result().unwrap().value["bytes"], 5);
    }
}
