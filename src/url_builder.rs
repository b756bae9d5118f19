use crate::config::TargetEnvironment;
use crate::error::{Result, StressError};
use crate::types::ApiDescriptor;
use std::collections::BTreeMap;
use url::form_urlencoded::byte_serialize;
use url::Url;

/// Builds the request URL for `target`.
///
/// The routing parameter (`r=activity/...` by default) is written verbatim,
/// every other key and value is percent-encoded. Custom parameters replace
/// fixed ones with the same name, but can never replace the routing parameter.
pub fn build_url(
    environment: &TargetEnvironment,
    target: &ApiDescriptor,
    custom_parameters: &BTreeMap<String, serde_json::Value>,
) -> Result<String> {
    let base = environment
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|base| !base.is_empty())
        .ok_or_else(|| StressError::Configuration("base endpoint root is not configured".to_string()))?;
    let mut url = Url::parse(base)
        .map_err(|e| StressError::Configuration(format!("invalid base endpoint root {base:?}: {e}")))?;

    // Fixed parameters first, in configured order
    let mut params: Vec<(String, String)> = environment
        .fixed_params
        .iter()
        .filter(|(key, _)| *key != environment.route_param)
        .cloned()
        .collect();

    // Custom values replace fixed ones in place, new keys go last
    for (key, value) in custom_parameters {
        if *key == environment.route_param {
            continue;
        }
        let value = parameter_value(value);
        match params.iter_mut().find(|(existing, _)| existing == key) {
            Some(slot) => slot.1 = value,
            None => params.push((key.clone(), value)),
        }
    }

    // Routing parameter leads and stays unescaped
    let mut query = format!(
        "{}={}",
        encode(&environment.route_param),
        route_value(&environment.route_namespace, &target.url_pattern)
    );
    for (key, value) in &params {
        query.push('&');
        query.push_str(&encode(key));
        query.push('=');
        query.push_str(&encode(value));
    }

    // Keep any query the base already carries, and its fragment
    let query = match url.query() {
        Some(existing) if !existing.is_empty() && !existing.ends_with('&') => {
            format!("{existing}&{query}")
        }
        Some(existing) => format!("{existing}{query}"),
        None => query,
    };
    url.set_query(Some(&query));
    Ok(url.to_string())
}

fn route_value(namespace: &str, url_pattern: &str) -> String {
    let namespace = namespace.trim_end_matches('/');
    let pattern = url_pattern.trim();
    if pattern.starts_with('/') {
        format!("{namespace}{pattern}")
    } else {
        format!("{namespace}/{pattern}")
    }
}

fn parameter_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn encode(raw: &str) -> String {
    byte_serialize(raw.as_bytes()).collect()
}
