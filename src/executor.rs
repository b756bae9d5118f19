use crate::config::ExecutorSettings;
use crate::error::{ExecuteError, Result};
use crate::types::{HttpMethod, RequestResult};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const RATE_LIMITED_MESSAGE: &str = "Rate Limited (429)";

/// Everything needed to issue one call; shared by every request of a run.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
}

/// Issues exactly one request per call and never retries.
///
/// Ordinary HTTP and network failures come back as unsuccessful
/// [`RequestResult`]s. `Err` is reserved for cancellation and for requests
/// that cannot be dispatched at all.
#[async_trait]
pub trait RequestExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        request: &PreparedRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<RequestResult, ExecuteError>;
}

/// Transport failures that produced no HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    /// Connection refused, DNS failure and other failures with no
    /// distinguishable cause.
    Network(String),
    Other(String),
}

impl TransportFailure {
    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportFailure::Timeout
        } else if err.is_connect() || err.is_request() {
            TransportFailure::Network(err.to_string())
        } else {
            TransportFailure::Other(err.to_string())
        }
    }
}

/// Turns a status-less failure into a sample, applying the optional
/// network-failure-as-429 heuristic.
pub fn classify_transport_failure(
    failure: TransportFailure,
    elapsed_ms: f64,
    timeout: Duration,
    settings: &ExecutorSettings,
) -> RequestResult {
    match failure {
        TransportFailure::Timeout => RequestResult::transport_failure(
            elapsed_ms,
            format!("Request timeout after {} ms", timeout.as_millis()),
        ),
        TransportFailure::Network(_) if settings.assume_rate_limited_on_network_failure => {
            RequestResult::http_failure(429, elapsed_ms, None, RATE_LIMITED_MESSAGE)
        }
        TransportFailure::Network(message) => {
            RequestResult::transport_failure(elapsed_ms, format!("Network error: {message}"))
        }
        TransportFailure::Other(message) => RequestResult::transport_failure(elapsed_ms, message),
    }
}

/// Sample for a response that arrived with `status`.
pub fn classify_status(status: StatusCode, elapsed_ms: f64, size: Option<u64>) -> RequestResult {
    if status.is_success() {
        RequestResult::ok(status.as_u16(), elapsed_ms, size)
    } else {
        let message = format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        );
        RequestResult::http_failure(status.as_u16(), elapsed_ms, size, message)
    }
}

pub struct HttpExecutor {
    client: Client,
    settings: ExecutorSettings,
}

impl HttpExecutor {
    pub fn new(settings: ExecutorSettings) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client, settings })
    }

    async fn round_trip(
        &self,
        request: &PreparedRequest,
        started: Instant,
    ) -> std::result::Result<(StatusCode, f64, Option<u64>), reqwest::Error> {
        // Build request
        let mut request_builder = self
            .client
            .request(request.method.as_reqwest(), &request.url)
            .timeout(request.timeout);
        // Add headers
        for (key, value) in &request.headers {
            request_builder = request_builder.header(key, value);
        }

        // Latency stops at the response head
        let response = request_builder.send().await?;
        let elapsed_ms = elapsed_ms(started);
        let status = response.status();

        // Body size is best effort
        let size = match response.bytes().await {
            Ok(body) => Some(body.len() as u64),
            Err(e) => {
                debug!("Could not read response body: {}", e);
                None
            }
        };
        Ok((status, elapsed_ms, size))
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(
        &self,
        request: &PreparedRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<RequestResult, ExecuteError> {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecuteError::Cancelled),
            outcome = self.round_trip(request, started) => outcome,
        };

        // Only undispatchable requests escape as errors
        match outcome {
            Ok((status, elapsed, size)) => Ok(classify_status(status, elapsed, size)),
            Err(e) if e.is_builder() => Err(ExecuteError::Fatal(e.to_string())),
            Err(e) => Ok(classify_transport_failure(
                TransportFailure::from_reqwest(&e),
                elapsed_ms(started),
                request.timeout,
                &self.settings,
            )),
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
