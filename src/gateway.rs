//! Shared plumbing for the JSON gateways in front of the live-data feed and
//! the exchange.

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::error::FeedOutcome;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Attach the gateway key, when one is configured.
pub fn with_key(req: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => req.header("X-Api-Key", key),
        None => req,
    }
}

/// GET a JSON document. Transport errors and 5xx are outages, 404 is a
/// reachable gateway with nothing to say.
pub async fn get_json(
    http: &Client,
    url: &str,
    api_key: Option<&str>,
) -> FeedOutcome<serde_json::Value> {
    debug!("GET {}", url);
    let resp = match with_key(http.get(url), api_key).send().await {
        Ok(r) => r,
        Err(e) => return FeedOutcome::Unreachable(e.to_string()),
    };
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return FeedOutcome::Empty;
    }
    if !status.is_success() {
        return FeedOutcome::Unreachable(format!("HTTP {}", status));
    }
    match resp.json::<serde_json::Value>().await {
        Ok(v) if v.is_null() => FeedOutcome::Empty,
        Ok(v) => FeedOutcome::Data(v),
        Err(e) => FeedOutcome::Unreachable(format!("invalid JSON: {}", e)),
    }
}

/// Integer field that may arrive as a number or a numeric string.
pub fn int_field(v: &serde_json::Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}
