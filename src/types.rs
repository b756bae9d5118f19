use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// One backend operation that can be load-tested.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiDescriptor {
    #[serde(rename = "urlPattern")]
    pub url_pattern: String,
    #[serde(rename = "httpMethods", default)]
    pub http_methods: String,
}

impl ApiDescriptor {
    pub fn new(url_pattern: impl Into<String>, http_methods: impl Into<String>) -> Self {
        Self {
            url_pattern: url_pattern.into(),
            http_methods: http_methods.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// Parameters of a single stress-test run.
///
/// `rounds` is the number of sequential batches; the run issues
/// `concurrency * rounds` requests in total.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestConfiguration {
    pub target: ApiDescriptor,
    pub concurrency: u32,
    pub rounds: u32,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: u64,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: BTreeMap<String, serde_json::Value>,
}

impl TestConfiguration {
    pub fn new(target: ApiDescriptor, concurrency: u32, rounds: u32) -> Self {
        Self {
            target,
            concurrency,
            rounds,
            method: HttpMethod::Get,
            headers: HashMap::new(),
            timeout_ms: 30_000,
            custom_parameters: BTreeMap::new(),
        }
    }

    /// Planned request count, `None` on overflow.
    pub fn total_requests(&self) -> Option<u64> {
        u64::from(self.concurrency).checked_mul(u64::from(self.rounds))
    }
}

/// Outcome of one HTTP call. A missing `status_code` means the request failed
/// before any status was received.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RequestResult {
    pub success: bool,
    #[serde(rename = "responseTimeMs")]
    pub response_time_ms: f64,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
    #[serde(rename = "responseSizeBytes")]
    pub response_size_bytes: Option<u64>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

impl RequestResult {
    pub fn ok(status_code: u16, response_time_ms: f64, response_size_bytes: Option<u64>) -> Self {
        Self {
            success: true,
            response_time_ms,
            status_code: Some(status_code),
            response_size_bytes,
            error_message: None,
        }
    }

    pub fn http_failure(
        status_code: u16,
        response_time_ms: f64,
        response_size_bytes: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            response_time_ms,
            status_code: Some(status_code),
            response_size_bytes,
            error_message: Some(message.into()),
        }
    }

    pub fn transport_failure(response_time_ms: f64, message: impl Into<String>) -> Self {
        Self {
            success: false,
            response_time_ms,
            status_code: None,
            response_size_bytes: None,
            error_message: Some(message.into()),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status_code == Some(429)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p99_9: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum Termination {
    Completed,
    Stopped,
    Aborted,
    Failed(String),
}

impl Termination {
    pub fn is_completed(&self) -> bool {
        matches!(self, Termination::Completed)
    }
}

/// Aggregate of a finished (or stopped) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(rename = "runId")]
    pub run_id: Uuid,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    #[serde(rename = "durationMs")]
    pub duration_ms: f64,
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    #[serde(rename = "successRequests")]
    pub success_requests: u64,
    #[serde(rename = "failedRequests")]
    pub failed_requests: u64,
    #[serde(rename = "rateLimitedRequests")]
    pub rate_limited_requests: u64,
    #[serde(rename = "otherFailedRequests")]
    pub other_failed_requests: u64,
    #[serde(rename = "successRatePercent")]
    pub success_rate_percent: f64,
    #[serde(rename = "requestsPerSecond")]
    pub requests_per_second: f64,
    #[serde(rename = "effectiveRequestsPerSecond")]
    pub effective_requests_per_second: f64,
    pub latency: LatencyStats,
    #[serde(rename = "errorTaxonomy")]
    pub error_taxonomy: BTreeMap<String, u64>,
    #[serde(rename = "statusCodes")]
    pub status_codes: BTreeMap<u16, u64>,
    pub termination: Termination,
    pub samples: Vec<RequestResult>,
}

/// Live view of a run, refreshed after every round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(rename = "currentRequests")]
    pub current_requests: u64,
    #[serde(rename = "plannedRequests")]
    pub planned_requests: u64,
    #[serde(rename = "roundsCompleted")]
    pub rounds_completed: u32,
    #[serde(rename = "totalRounds")]
    pub total_rounds: u32,
    #[serde(rename = "progressPercent")]
    pub progress_percent: f64,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: f64,
    #[serde(rename = "currentRps")]
    pub current_rps: f64,
    #[serde(rename = "successSoFar")]
    pub success_so_far: u64,
    #[serde(rename = "failedSoFar")]
    pub failed_so_far: u64,
    #[serde(rename = "liveP95")]
    pub live_p95: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Stopped,
}

impl TestStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, TestStatus::Completed | TestStatus::Stopped)
    }
}

/// What a UI subscriber sees: state, latest progress and the final result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(rename = "runId")]
    pub run_id: Option<Uuid>,
    pub status: TestStatus,
    pub progress: ProgressSnapshot,
    pub result: Option<TestResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn configuration_from_ui_json() {
        let config: TestConfiguration = serde_json::from_value(json!({
            "target": { "urlPattern": "/mid-year/rank", "httpMethods": "GET,POST" },
            "concurrency": 20,
            "rounds": 5,
            "method": "POST",
            "timeoutMs": 8000,
            "customParameters": { "actId": 7, "uid": "abc" }
        }))
        .unwrap();

        assert_eq!(config.target.url_pattern, "/mid-year/rank");
        assert_eq!(config.method, HttpMethod::Post);
        assert!(config.headers.is_empty());
        assert_eq!(config.total_requests(), Some(100));
        assert_eq!(config.custom_parameters.get("actId"), Some(&json!(7)));
    }

    #[test]
    fn termination_and_status_wire_names() {
        assert_eq!(
            serde_json::to_value(Termination::Failed("bad header".to_string())).unwrap(),
            json!({ "kind": "failed", "message": "bad header" })
        );
        assert_eq!(
            serde_json::to_value(Termination::Stopped).unwrap(),
            json!({ "kind": "stopped" })
        );
        assert_eq!(serde_json::to_value(TestStatus::Running).unwrap(), json!("running"));
    }
}
