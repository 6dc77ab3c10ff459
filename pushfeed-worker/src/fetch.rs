use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, IF_NONE_MATCH};
use serde_json::Value;
use tracing::warn;

use crate::error::FetchError;

/// Response headers from the feed that are kept for scheduling and logging.
pub const EVENTS_HEADER_WHITELIST: [&str; 7] = [
    "etag",
    "x-poll-interval",
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-ratelimit-reset",
    "retry-after",
    "x-github-request-id",
];

/// Result of a single conditional GET.
///
/// `status` is 0 when no response was received at all. `decode_error` is only
/// ever set for a 200 whose body was empty or not JSON; bodies of other
/// statuses are never decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub json: Option<Value>,
    pub decode_error: bool,
}

impl FetchResponse {
    pub fn transport_failure() -> Self {
        Self::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Percent-encode the square brackets that show up in bot logins, which the
/// API hands back unescaped in resource urls.
pub fn sanitize_url(url: &str) -> String {
    url.replace('[', "%5B").replace(']', "%5D")
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut collected = HashMap::with_capacity(headers.len());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            // first value wins for repeated headers
            collected
                .entry(name.as_str().to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }
    }
    collected
}

fn decode_json(body: &[u8]) -> Option<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

/// HTTP client for one kind of upstream resource, with its own user agent and timeouts.
#[derive(Clone, Debug)]
pub struct ResourceClient {
    client: reqwest::Client,
}

impl ResourceClient {
    pub fn new(
        user_agent: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
        token: Option<&str>,
    ) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            match HeaderValue::from_str(&format!("Bearer {}", token.trim())) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("ignoring github token that is not a valid header value"),
            }
        }

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()?;

        Ok(Self { client })
    }

    /// One GET, conditional on `etag` when given. Transport errors are
    /// returned as is so each caller decides how hard to fail.
    pub async fn get(&self, url: &str, etag: Option<&str>) -> Result<FetchResponse, reqwest::Error> {
        let mut request = self.client.get(sanitize_url(url));
        if let Some(etag) = etag.filter(|e| !e.trim().is_empty()) {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());

        if status != 200 {
            return Ok(FetchResponse {
                status,
                headers,
                json: None,
                decode_error: false,
            });
        }

        let body = response.bytes().await?;
        let json = decode_json(&body);
        Ok(FetchResponse {
            status,
            headers,
            decode_error: json.is_none(),
            json,
        })
    }

    /// Fetch a secondary resource. Any transport failure becomes a status 0
    /// response so a single bad item never fails the batch.
    pub async fn fetch_resource(&self, url: &str, etag: Option<&str>) -> FetchResponse {
        match self.get(url, etag).await {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                warn!(url, "timed out fetching resource: {}", error);
                FetchResponse::transport_failure()
            }
            Err(error) => {
                warn!(url, "failed to fetch resource: {}", error);
                FetchResponse::transport_failure()
            }
        }
    }
}

/// Client for the public events feed.
#[derive(Clone, Debug)]
pub struct EventsClient {
    inner: ResourceClient,
    url: String,
}

impl EventsClient {
    pub fn new(inner: ResourceClient, url: impl Into<String>) -> Self {
        Self {
            inner,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the feed, conditional on the stored etag. Only whitelisted headers
    /// are kept. Timeouts and connection failures are errors; anything else
    /// that prevents a response comes back as status 0.
    pub async fn fetch(&self, etag: Option<&str>) -> Result<FetchResponse, FetchError> {
        match self.inner.get(&self.url, etag).await {
            Ok(mut response) => {
                response
                    .headers
                    .retain(|name, _| EVENTS_HEADER_WHITELIST.contains(&name.as_str()));
                Ok(response)
            }
            Err(error) if error.is_timeout() || error.is_connect() => Err(FetchError::Transport {
                url: self.url.clone(),
                error,
            }),
            Err(error) => {
                warn!(url = self.url.as_str(), "failed to fetch events: {}", error);
                Ok(FetchResponse::transport_failure())
            }
        }
    }
}
