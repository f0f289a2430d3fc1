//! Plumbing shared by the HTTP clients: a process-wide pool of
//! `reqwest::Client`s and base-URL validation.
//!
//! One `reqwest::Client` is kept per proxy setting, so every agent that talks
//! to the same endpoint reuses the same keep-alive connections. Timeouts are
//! applied per request, which lets clients with different timeouts share a
//! pooled instance.

use crate::groupllm::client_wrapper::ClientError;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    static ref HTTP_CLIENT_POOL: Mutex<HashMap<String, reqwest::Client>> =
        Mutex::new(HashMap::new());
    static ref BASE_URL: Regex = Regex::new(r"^https?://.+/v\d+$").expect("base URL pattern is valid");
}

/// Pool key used when no proxy is configured.
const DIRECT: &str = "";

/// Get or create the shared HTTP client for `proxy` (`None` connects
/// directly and ignores proxy environment variables).
pub fn get_http_client(proxy: Option<&str>) -> Result<reqwest::Client, ClientError> {
    let key = proxy.unwrap_or(DIRECT);
    let mut pool = HTTP_CLIENT_POOL.lock().unwrap_or_else(|p| p.into_inner());

    if let Some(client) = pool.get(key) {
        return Ok(client.clone());
    }

    let mut builder = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)));

    builder = match proxy {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url)
                .map_err(|e| ClientError::HttpClient(format!("invalid proxy '{}': {}", url, e)))?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    let client = builder
        .build()
        .map_err(|e| ClientError::HttpClient(e.to_string()))?;

    log::debug!(
        "groupllm::clients::common: created pooled HTTP client (proxy: {})",
        proxy.unwrap_or("none")
    );
    pool.insert(key.to_string(), client.clone());
    Ok(client)
}

/// Number of distinct pooled clients.
pub fn pooled_client_count() -> usize {
    HTTP_CLIENT_POOL
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .len()
}

/// Check that `url` looks like `http(s)://host/.../v<N>` and return it
/// without a trailing slash.
pub fn validate_base_url(url: &str) -> Result<String, ClientError> {
    let normalized = url.trim().trim_end_matches('/');
    if BASE_URL.is_match(normalized) {
        Ok(normalized.to_string())
    } else {
        Err(ClientError::InvalidBaseUrl(url.to_string()))
    }
}

/// First `max_chars` characters of `text`, marked when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
