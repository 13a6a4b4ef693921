//! Upstream data sources for generators and URL template handling.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not build HTTP client: {0}")]
    Client(String),
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned a body that is not JSON: {message}")]
    Decode { url: String, message: String },
}

/// Anything that can answer a generator's API call with JSON.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError>;
}

/// Fetches over HTTP. Non-2xx responses are errors.
pub struct HttpDataSource {
    client: reqwest::Client,
}

impl HttpDataSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(HttpDataSource { client })
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.json::<Value>().await.map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// In-memory source for tests and offline previews. Every fetch is
/// recorded, including ones for unknown URLs (which fail with 404).
#[derive(Default)]
pub struct MemoryDataSource {
    responses: HashMap<String, Value>,
    log: Mutex<Vec<String>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, url: impl Into<String>, body: Value) -> Self {
        self.responses.insert(url.into(), body);
        self
    }

    /// URLs fetched so far, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.log.lock().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        self.log.lock().push(url.to_string());
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Replace every `<key>` in `template` with `params[key]`. Unknown keys
/// are left in place.
pub fn swap_url(template: &str, params: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find(|c| c == '>' || c == '<') {
            Some(end) if after.as_bytes()[end] == b'>' => {
                let key = &after[..end];
                match params.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('<');
                        out.push_str(key);
                        out.push('>');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Prefix relative URLs with `origin`.
pub fn absolutize(url: &str, origin: Option<&str>) -> String {
    match origin {
        Some(origin) if !url.starts_with("http") => {
            let origin = origin.trim_end_matches('/');
            if url.starts_with('/') {
                format!("{}{}", origin, url)
            } else {
                format!("{}/{}", origin, url)
            }
        }
        _ => url.to_string(),
    }
}
