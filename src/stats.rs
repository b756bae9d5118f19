use crate::error::{Result, StressError};
use crate::types::{LatencyStats, RequestResult, TestResult, Termination};
use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Highest latency the live histogram tracks; larger values are clamped.
const LIVE_MAX_MS: u64 = 3_600_000;

/// Timing and identity of a run, everything the summary needs besides the
/// samples themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct RunWindow {
    pub run_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: f64,
    pub termination: Termination,
}

/// Reduces the samples of a run into its report.
///
/// Pure: no I/O, no hidden state, so it can also be used on a partial sample
/// set while a run is still going. Latency figures only consider successful
/// samples and are all `0` when there are none.
pub fn summarize(samples: &[RequestResult], window: &RunWindow) -> TestResult {
    let total = samples.len() as u64;
    let success = samples.iter().filter(|s| s.success).count() as u64;
    let failed = total - success;
    let rate_limited = samples
        .iter()
        .filter(|s| !s.success && s.is_rate_limited())
        .count() as u64;

    let mut error_taxonomy = BTreeMap::new();
    for sample in samples.iter().filter(|s| !s.success) {
        *error_taxonomy.entry(error_category(sample)).or_insert(0) += 1;
    }

    let mut status_codes = BTreeMap::new();
    for code in samples.iter().filter_map(|s| s.status_code) {
        *status_codes.entry(code).or_insert(0) += 1;
    }

    let seconds = window.duration_ms / 1000.0;
    let per_second = |count: u64| {
        if window.duration_ms > 0.0 {
            count as f64 / seconds
        } else {
            0.0
        }
    };

    let mut latencies: Vec<f64> = samples
        .iter()
        .filter(|s| s.success)
        .map(|s| s.response_time_ms)
        .filter(|ms| ms.is_finite())
        .collect();
    latencies.sort_by(f64::total_cmp);

    TestResult {
        run_id: window.run_id,
        start_time: window.start_time,
        end_time: window.end_time,
        duration_ms: window.duration_ms,
        total_requests: total,
        success_requests: success,
        failed_requests: failed,
        rate_limited_requests: rate_limited,
        other_failed_requests: failed - rate_limited,
        success_rate_percent: if total == 0 {
            0.0
        } else {
            success as f64 / total as f64 * 100.0
        },
        requests_per_second: per_second(total),
        effective_requests_per_second: per_second(success),
        latency: latency_stats(&latencies),
        error_taxonomy,
        status_codes,
        termination: window.termination.clone(),
        samples: samples.to_vec(),
    }
}

/// `sorted` must be ascending.
pub fn latency_stats(sorted: &[f64]) -> LatencyStats {
    let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
        return LatencyStats::default();
    };

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    LatencyStats {
        mean,
        min,
        max,
        stddev: variance.sqrt(),
        p50: percentile(sorted, 50.0),
        p90: percentile(sorted, 90.0),
        p95: percentile(sorted, 95.0),
        p99: percentile(sorted, 99.0),
        p99_9: percentile(sorted, 99.9),
    }
}

/// Linear interpolation between the two closest ranks of an ascending slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let Some(&last) = sorted.last() else {
        return 0.0;
    };

    let index = p / 100.0 * (sorted.len() - 1) as f64;
    let lower_index = index.floor() as usize;
    let upper_index = index.ceil() as usize;
    let (Some(&lower), Some(&upper)) = (sorted.get(lower_index), sorted.get(upper_index)) else {
        return last;
    };

    let weight = index - lower_index as f64;
    (lower + (upper - lower) * weight).max(lower).min(upper)
}

pub fn error_category(sample: &RequestResult) -> String {
    match sample.status_code {
        Some(429) => return "Rate Limiting (429)".to_string(),
        Some(404) => return "Not Found (404)".to_string(),
        Some(500) => return "Internal Server Error (500)".to_string(),
        Some(502) => return "Bad Gateway (502)".to_string(),
        Some(503) => return "Service Unavailable (503)".to_string(),
        Some(504) => return "Gateway Timeout (504)".to_string(),
        Some(code @ 400..=499) => return format!("Client Error ({code})"),
        Some(code @ 500..=599) => return format!("Server Error ({code})"),
        _ => {}
    }

    match sample.error_message.as_deref().map(str::trim) {
        Some(message) if message.to_lowercase().contains("timeout") => "Request Timeout".to_string(),
        Some(message) if message.to_lowercase().contains("network") => "Network Error".to_string(),
        Some(message) if !message.is_empty() => message.to_string(),
        _ => "Unknown Error".to_string(),
    }
}

/// Running latency view for progress snapshots. Approximate (3 significant
/// digits); the final report uses [`summarize`].
pub struct LiveLatency {
    histogram: Histogram<u64>,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

impl LiveLatency {
    pub fn new() -> Result<Self> {
        Ok(Self {
            histogram: Histogram::<u64>::new_with_bounds(1, LIVE_MAX_MS, 3)
                .map_err(|e| StressError::Histogram(format!("{e:?}")))?,
            successful_requests: 0,
            failed_requests: 0,
        })
    }

    pub fn record(&mut self, sample: &RequestResult) {
        if sample.success {
            self.successful_requests += 1;
            self.histogram
                .saturating_record(sample.response_time_ms.round().max(1.0) as u64);
        } else {
            self.failed_requests += 1;
        }
    }

    pub fn p95(&self) -> f64 {
        if self.histogram.len() == 0 {
            0.0
        } else {
            self.histogram.value_at_quantile(0.95) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn window(duration_ms: f64) -> RunWindow {
        let now = Utc::now();
        RunWindow {
            run_id: Uuid::nil(),
            start_time: now,
            end_time: now,
            duration_ms,
            termination: Termination::Completed,
        }
    }

    fn ok(ms: f64) -> RequestResult {
        RequestResult::ok(200, ms, Some(2))
    }

    fn http(code: u16, message: &str) -> RequestResult {
        RequestResult::http_failure(code, 5.0, None, message)
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&sorted, 0.0), 10.0);
        assert_eq!(percentile(&sorted, 50.0), 25.0);
        assert_eq!(percentile(&sorted, 100.0), 40.0);
        assert!((percentile(&sorted, 90.0) - 37.0).abs() < 1e-9);
        assert_eq!(percentile(&[7.0], 99.9), 7.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn non_finite_latency_is_left_out() {
        let samples = vec![ok(1.0), ok(f64::NAN), ok(3.0), ok(f64::INFINITY)];
        let result = summarize(&samples, &window(100.0));

        assert_eq!(result.success_requests, 4);
        assert_eq!(result.latency.min, 1.0);
        assert_eq!(result.latency.max, 3.0);
        assert_eq!(result.latency.p50, 2.0);
        assert!(result.latency.mean.is_finite());
        assert_eq!(percentile(&[1.0, f64::NAN], 50.0), 1.0);
    }

    #[test]
    fn uniform_latency_run() {
        let samples: Vec<_> = (0..10).map(|_| ok(100.0)).collect();
        let result = summarize(&samples, &window(1000.0));

        assert_eq!(result.total_requests, 10);
        assert_eq!(result.success_requests, 10);
        assert_eq!(result.success_rate_percent, 100.0);
        assert_eq!(result.latency.p50, 100.0);
        assert_eq!(result.latency.stddev, 0.0);
        assert_eq!(result.requests_per_second, 10.0);
        assert_eq!(result.effective_requests_per_second, 10.0);
        assert!(result.error_taxonomy.is_empty());
        assert_eq!(result.status_codes.get(&200), Some(&10));
    }

    #[test]
    fn all_rate_limited() {
        let samples: Vec<_> = (0..4).map(|_| http(429, "HTTP 429: Too Many Requests")).collect();
        let result = summarize(&samples, &window(200.0));

        assert_eq!(result.success_rate_percent, 0.0);
        assert_eq!(result.rate_limited_requests, 4);
        assert_eq!(result.other_failed_requests, 0);
        assert_eq!(result.latency, LatencyStats::default());
        assert_eq!(result.effective_requests_per_second, 0.0);
        assert_eq!(result.error_taxonomy.get("Rate Limiting (429)"), Some(&4));
    }

    #[test]
    fn empty_run_is_all_zero() {
        let result = summarize(&[], &window(0.0));

        assert_eq!(result.total_requests, 0);
        assert_eq!(result.success_rate_percent, 0.0);
        assert_eq!(result.requests_per_second, 0.0);
        assert_eq!(result.latency, LatencyStats::default());
    }

    #[test]
    fn taxonomy_buckets() {
        let samples = vec![
            http(404, "HTTP 404: Not Found"),
            http(418, "HTTP 418: I'm a teapot"),
            http(500, "HTTP 500: Internal Server Error"),
            http(502, "HTTP 502: Bad Gateway"),
            http(503, "HTTP 503: Service Unavailable"),
            http(503, "HTTP 503: Service Unavailable"),
            http(504, "HTTP 504: Gateway Timeout"),
            http(507, "HTTP 507: Insufficient Storage"),
            RequestResult::transport_failure(30.0, "Request timeout after 30 ms"),
            RequestResult::transport_failure(1.0, "Network error: connection refused"),
            RequestResult::transport_failure(1.0, "redirect loop"),
            RequestResult::transport_failure(1.0, ""),
        ];
        let result = summarize(&samples, &window(100.0));
        let taxonomy = &result.error_taxonomy;

        assert_eq!(taxonomy.get("Not Found (404)"), Some(&1));
        assert_eq!(taxonomy.get("Client Error (418)"), Some(&1));
        assert_eq!(taxonomy.get("Internal Server Error (500)"), Some(&1));
        assert_eq!(taxonomy.get("Bad Gateway (502)"), Some(&1));
        assert_eq!(taxonomy.get("Service Unavailable (503)"), Some(&2));
        assert_eq!(taxonomy.get("Gateway Timeout (504)"), Some(&1));
        assert_eq!(taxonomy.get("Server Error (507)"), Some(&1));
        assert_eq!(taxonomy.get("Request Timeout"), Some(&1));
        assert_eq!(taxonomy.get("Network Error"), Some(&1));
        assert_eq!(taxonomy.get("redirect loop"), Some(&1));
        assert_eq!(taxonomy.get("Unknown Error"), Some(&1));
        assert_eq!(result.other_failed_requests, 12);
    }

    #[test]
    fn live_latency_tracks_successes() {
        let mut live = LiveLatency::new().unwrap();
        assert_eq!(live.p95(), 0.0);

        for ms in [10.0, 20.0, 30.0] {
            live.record(&ok(ms));
        }
        live.record(&http(500, "HTTP 500: Internal Server Error"));

        assert_eq!(live.successful_requests, 3);
        assert_eq!(live.failed_requests, 1);
        assert!((live.p95() - 30.0).abs() < 1.0);
    }

    fn sample_strategy() -> impl Strategy<Value = RequestResult> {
        prop_oneof![
            (0.0f64..10_000.0).prop_map(ok),
            Just(http(429, "HTTP 429: Too Many Requests")),
            Just(http(500, "HTTP 500: Internal Server Error")),
            Just(RequestResult::transport_failure(3.0, "Network error: reset")),
        ]
    }

    proptest! {
        #[test]
        fn counts_are_consistent(
            samples in prop::collection::vec(sample_strategy(), 0..200),
            duration in 0.0f64..60_000.0,
        ) {
            let result = summarize(&samples, &window(duration));
            prop_assert_eq!(result.total_requests, samples.len() as u64);
            prop_assert_eq!(result.success_requests + result.failed_requests, result.total_requests);
            prop_assert_eq!(
                result.rate_limited_requests + result.other_failed_requests,
                result.failed_requests
            );
            prop_assert_eq!(
                result.error_taxonomy.values().sum::<u64>(),
                result.failed_requests
            );
            if result.success_requests == 0 {
                prop_assert_eq!(result.latency, LatencyStats::default());
            }
        }

        #[test]
        fn percentiles_are_monotonic(latencies in prop::collection::vec(0.0f64..10_000.0, 1..300)) {
            let samples: Vec<_> = latencies.iter().copied().map(ok).collect();
            let stats = summarize(&samples, &window(1000.0)).latency;
            prop_assert!(stats.min <= stats.p50);
            prop_assert!(stats.p50 <= stats.p90);
            prop_assert!(stats.p90 <= stats.p95);
            prop_assert!(stats.p95 <= stats.p99);
            prop_assert!(stats.p99 <= stats.p99_9);
            prop_assert!(stats.p99_9 <= stats.max);
        }

        #[test]
        fn summarize_is_idempotent(
            samples in prop::collection::vec(sample_strategy(), 0..100),
            duration in 0.0f64..10_000.0,
        ) {
            let window = window(duration);
            let first = summarize(&samples, &window);
            let second = summarize(&samples, &window);
            prop_assert_eq!(first, second);
        }
    }
}
