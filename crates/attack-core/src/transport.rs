use crate::error::AttackError;
use crate::target::Target;
use std::collections::BTreeMap;
use std::error::Error as _;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// What a transport reports back for a completed exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub bytes_in: u64,
    /// Captured response headers, keyed by lowercase name
    pub headers: BTreeMap<String, String>,
}

/// A request that never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timeout")]
    Timeout,
    #[error("connect: {message}")]
    Connect { message: String },
    #[error("request: {message}")]
    Request { message: String },
}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + 'a>>;

/// Capability to issue one request described by a [`Target`].
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn send<'a>(&'a self, target: &'a Target) -> TransportFuture<'a>;
}

/// Mock transport for tests and dry runs (fixed delay, fixed outcome)
pub struct MockTransport {
    delay: Duration,
    outcome: Result<Response, TransportError>,
    calls: AtomicU64,
}

impl MockTransport {
    /// Always answers `code` after `delay`.
    pub fn new(delay: Duration, code: u16) -> Self {
        Self {
            delay,
            outcome: Ok(Response {
                code,
                ..Response::default()
            }),
            calls: AtomicU64::new(0),
        }
    }

    /// Always fails with `error` after `delay`.
    pub fn failing(delay: Duration, error: TransportError) -> Self {
        Self {
            delay,
            outcome: Err(error),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.outcome = Ok(response);
        self
    }

    /// Number of requests issued so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn send<'a>(&'a self, _target: &'a Target) -> TransportFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            sleep(self.delay).await;
            self.outcome.clone()
        })
    }
}

/// reqwest-backed transport. The client and its connection pool live as long
/// as this value, so one transport per run scopes the pool to the run.
pub struct HttpTransport {
    client: reqwest::Client,
    capture_headers: Vec<String>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, AttackError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            capture_headers: Vec::new(),
        })
    }

    /// Copy the named response headers into every result.
    pub fn with_capture_headers(mut self, names: &[String]) -> Self {
        self.capture_headers = names.iter().map(|n| n.to_ascii_lowercase()).collect();
        self
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn send<'a>(&'a self, target: &'a Target) -> TransportFuture<'a> {
        Box::pin(async move {
            let mut request = self
                .client
                .request(target.method().clone(), target.url().clone());
            for (name, value) in target.headers() {
                request = request.header(name.as_str(), value.as_str());
            }
            if !target.body().is_empty() {
                request = request.body(target.body().clone());
            }

            let response = request.send().await.map_err(classify)?;
            let code = response.status().as_u16();

            let mut headers = BTreeMap::new();
            for name in &self.capture_headers {
                if let Some(value) = response
                    .headers()
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                {
                    headers.insert(name.clone(), value.to_string());
                }
            }

            // Drain the body so the connection goes back to the pool
            let body = response.bytes().await.map_err(classify)?;

            Ok(Response {
                code,
                bytes_in: body.len() as u64,
                headers,
            })
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }

    // reqwest's own message is generic; the root cause is further down the chain
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message = cause.to_string();
        source = cause.source();
    }

    if err.is_connect() {
        TransportError::Connect { message }
    } else {
        TransportError::Request { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_counts_calls() {
        let transport = MockTransport::new(Duration::from_millis(1), 204);
        let target = Target::get("http://localhost/").unwrap();

        let response = transport.send(&target).await.unwrap();
        assert_eq!(response.code, 204);
        transport.send(&target).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_failing() {
        let transport = MockTransport::failing(Duration::ZERO, TransportError::Timeout);
        let target = Target::get("http://localhost/").unwrap();

        let err = transport.send(&target).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout);
        assert_eq!(err.to_string(), "timeout");
    }

    #[tokio::test]
    async fn test_http_transport_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        let target = Target::get(&format!("http://127.0.0.1:{port}/")).unwrap();

        let err = transport.send(&target).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }), "got {err:?}");
    }
}
