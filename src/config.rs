use crate::error::{Result, StressError};
use crate::types::{ApiDescriptor, HttpMethod, TestConfiguration};
use log::warn;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::str::FromStr;

pub const DEFAULT_ROUTE_NAMESPACE: &str = "activity";
pub const DEFAULT_ROUTE_PARAM: &str = "r";
pub const DEFAULT_FIXED_PARAMS: &str = "debug=1&stress_test=1";
pub const DEFAULT_MAX_TOTAL_REQUESTS: u64 = 100_000;

/// Where test traffic goes and which fixed parameters it always carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEnvironment {
    pub base_url: Option<String>,
    pub route_namespace: String,
    pub route_param: String,
    pub fixed_params: Vec<(String, String)>,
}

impl TargetEnvironment {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }
}

impl Default for TargetEnvironment {
    fn default() -> Self {
        Self {
            base_url: None,
            route_namespace: DEFAULT_ROUTE_NAMESPACE.to_string(),
            route_param: DEFAULT_ROUTE_PARAM.to_string(),
            fixed_params: parse_pairs(DEFAULT_FIXED_PARAMS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorSettings {
    /// Report undifferentiated network failures as 429. This is a guess: a
    /// genuine outage is indistinguishable from a throttled, CORS-blocked
    /// response, so the report can overcount rate limiting when enabled.
    pub assume_rate_limited_on_network_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_total_requests: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_total_requests: DEFAULT_MAX_TOTAL_REQUESTS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub environment: TargetEnvironment,
    pub executor: ExecutorSettings,
    pub session: SessionSettings,
}

impl Settings {
    /// Reads `STRESS_*` variables, after loading a `.env` file if present.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let base_url = env::var("STRESS_BASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let environment = TargetEnvironment {
            base_url,
            route_namespace: env::var("STRESS_ROUTE_NAMESPACE")
                .unwrap_or_else(|_| DEFAULT_ROUTE_NAMESPACE.to_string()),
            route_param: env::var("STRESS_ROUTE_PARAM")
                .unwrap_or_else(|_| DEFAULT_ROUTE_PARAM.to_string()),
            fixed_params: parse_pairs(
                &env::var("STRESS_FIXED_PARAMS").unwrap_or_else(|_| DEFAULT_FIXED_PARAMS.to_string()),
            ),
        };

        Self {
            environment,
            executor: ExecutorSettings {
                assume_rate_limited_on_network_failure: env_or("STRESS_ASSUME_RATE_LIMITED", false),
            },
            session: SessionSettings {
                max_total_requests: env_or("STRESS_MAX_TOTAL_REQUESTS", DEFAULT_MAX_TOTAL_REQUESTS),
            },
        }
    }
}

/// Test configuration for the headless runner.
pub fn test_configuration_from_env() -> Result<TestConfiguration> {
    let url_pattern = env::var("STRESS_URL_PATTERN").map_err(|_| {
        StressError::InvalidConfiguration("STRESS_URL_PATTERN must be set".to_string())
    })?;
    let target = ApiDescriptor::new(
        url_pattern,
        env::var("STRESS_HTTP_METHODS").unwrap_or_else(|_| "GET".to_string()),
    );

    let method = match env::var("STRESS_METHOD") {
        Ok(value) if value.eq_ignore_ascii_case("post") => HttpMethod::Post,
        Ok(value) if value.eq_ignore_ascii_case("get") => HttpMethod::Get,
        Ok(value) => {
            return Err(StressError::InvalidConfiguration(format!(
                "unsupported method {value}"
            )))
        }
        Err(_) => HttpMethod::Get,
    };

    let headers: HashMap<String, String> = json_env("STRESS_HEADERS")?.unwrap_or_default();
    let custom_parameters: BTreeMap<String, serde_json::Value> =
        json_env("STRESS_PARAMS")?.unwrap_or_default();

    let mut config = TestConfiguration::new(
        target,
        env_or("STRESS_CONCURRENCY", 10),
        env_or("STRESS_ROUNDS", 1),
    );
    config.method = method;
    config.headers = headers;
    config.timeout_ms = env_or("STRESS_TIMEOUT_MS", 30_000);
    config.custom_parameters = custom_parameters;
    Ok(config)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn json_env<T: serde::de::DeserializeOwned>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StressError::InvalidConfiguration(format!("{key} is not valid JSON: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Parses `k=v&k2=v2`, keeping order. Keys without `=` get an empty value.
pub fn parse_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
