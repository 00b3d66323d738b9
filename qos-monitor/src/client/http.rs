//! HTTP implementation of the service client.
//!
//! The stored request template is POSTed verbatim to the service address.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, trace};
use url::Url;

use super::{ClientFactory, ServiceClient, ServiceRequest, ServiceResponse, install_rustls_provider};
use crate::{Error, Result};

/// Marker of an OGC exception document in a response body.
const EXCEPTION_REPORT_MARKER: &str = "ExceptionReport";

/// How much of the body is scanned for [`EXCEPTION_REPORT_MARKER`].
const EXCEPTION_SCAN_LIMIT: usize = 4096;

fn is_exception_report(body: &[u8]) -> bool {
    let head = &body[..body.len().min(EXCEPTION_SCAN_LIMIT)];
    String::from_utf8_lossy(head).contains(EXCEPTION_REPORT_MARKER)
}

/// Per-firing HTTP client. Shares the factory's connection pool.
pub struct HttpServiceClient {
    client: reqwest::Client,
}

impl HttpServiceClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn execute(&self, request: &ServiceRequest) -> ServiceResponse {
        let sent_at = Utc::now();

        let url = match Url::parse(&request.address) {
            Ok(url) => url,
            Err(e) => {
                return ServiceResponse::other_exception(
                    sent_at,
                    format!("invalid service address '{}': {e}", request.address),
                );
            }
        };

        trace!(url = %url, process = %request.process_id, "Sending service request");
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(request.body.clone())
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                return ServiceResponse::transport_exception(sent_at, e.to_string());
            }
            Err(e) => return ServiceResponse::other_exception(sent_at, e.to_string()),
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => {
                return ServiceResponse::transport_exception(sent_at, e.to_string());
            }
            Err(e) => return ServiceResponse::other_exception(sent_at, e.to_string()),
        };

        if !status.is_success() {
            debug!(status = status.as_u16(), process = %request.process_id, "Service returned error status");
            return ServiceResponse::service_exception(
                sent_at,
                status.as_u16(),
                body,
                format!("HTTP {status}"),
            );
        }
        if is_exception_report(&body) {
            debug!(process = %request.process_id, "Service returned an exception report");
            return ServiceResponse::service_exception(
                sent_at,
                status.as_u16(),
                body,
                "exception report",
            );
        }

        ServiceResponse::success(sent_at, status.as_u16(), body)
    }
}

/// Builds [`HttpServiceClient`]s over one shared `reqwest::Client`.
#[derive(Clone)]
pub struct HttpClientFactory {
    client: reqwest::Client,
}

impl HttpClientFactory {
    pub fn new(timeout: Duration) -> Result<Self> {
        install_rustls_provider();

        let mut builder = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if timeout > Duration::ZERO {
            builder = builder.timeout(timeout).connect_timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl ClientFactory for HttpClientFactory {
    fn create(&self) -> Box<dyn ServiceClient> {
        Box::new(HttpServiceClient::new(self.client.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/ows")
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    return;
                }
            }
        }
    }

    fn request(address: String) -> ServiceRequest {
        ServiceRequest {
            service_id: "wps-1".into(),
            process_id: "GetCapabilities".into(),
            address,
            body: "<GetCapabilities/>".into(),
        }
    }

    fn client() -> Box<dyn ServiceClient> {
        HttpClientFactory::new(Duration::from_secs(5)).unwrap().create()
    }

    #[tokio::test]
    async fn test_success() {
        let url = serve_once("200 OK", "<Capabilities/>").await;
        let response = client().execute(&request(url)).await;
        assert!(response.is_success(), "{response:?}");
        assert_eq!(response.status, Some(200));
        assert_eq!(&response.body[..], b"<Capabilities/>");
        assert!(response.received_at.unwrap() >= response.sent_at);
    }

    #[tokio::test]
    async fn test_error_status_is_service_exception() {
        let url = serve_once("500 Internal Server Error", "oops").await;
        let response = client().execute(&request(url)).await;
        assert!(response.is_service_exception());
        assert_eq!(response.status, Some(500));
    }

    #[tokio::test]
    async fn test_exception_report_is_service_exception() {
        let url = serve_once(
            "200 OK",
            "<ows:ExceptionReport><ows:Exception exceptionCode=\"NoApplicableCode\"/></ows:ExceptionReport>",
        )
        .await;
        let response = client().execute(&request(url)).await;
        assert!(response.is_service_exception());
        assert!(response.received_at.is_some());
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_exception() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let response = client().execute(&request(format!("http://{addr}/ows"))).await;
        assert!(response.is_transport_exception(), "{response:?}");
        assert!(response.received_at.is_none());
    }

    #[tokio::test]
    async fn test_bad_address_is_other_exception() {
        let response = client().execute(&request("not a url".into())).await;
        assert!(response.is_other_exception());
        assert!(response.body.is_empty());
    }
}
