//! HTTP client that fetches one table of rows as JSON.
//!
//! Serves as the `request` operation for the CLI. Accepts both a bare JSON
//! array and a `{ "rows": [...] }` envelope.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors from a single table fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server replied with a non-2xx status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },
    /// Body was not a row array or a `rows` envelope.
    #[error("JSON parse error on field '{field}': {detail}")]
    Json { field: String, detail: String },
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },
}

/// Parse a response body into rows.
pub fn parse_rows(bytes: &[u8]) -> Result<Vec<Value>, FetchError> {
    if let Ok(rows) = serde_json::from_slice::<Vec<Value>>(bytes) {
        return Ok(rows);
    }

    #[derive(Deserialize)]
    struct Wrapped {
        rows: Vec<Value>,
    }

    serde_json::from_slice::<Wrapped>(bytes)
        .map(|w| w.rows)
        .map_err(|e| FetchError::Json {
            field: "rows".into(),
            detail: e.to_string(),
        })
}

/// Key a row by `field`, rendered as a string. Rows without the field key by
/// their full JSON text.
pub fn row_key(row: &Value, field: &str) -> String {
    match row.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => row.to_string(),
    }
}

/// Fetches rows from a fixed URL.
#[derive(Debug, Clone)]
pub struct TableClient {
    url: String,
    client: reqwest::Client,
}

impl TableClient {
    pub fn builder(url: impl Into<String>) -> TableClientBuilder {
        TableClientBuilder {
            url: url.into(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// GET the table.
    ///
    /// # Returns
    /// - `Err(FetchError::Connect)` when the request could not be sent.
    /// - `Err(FetchError::Http)` on a non-2xx status.
    /// - `Err(FetchError::Json)` when the body is not rows.
    pub async fn fetch_rows(&self) -> Result<Vec<Value>, FetchError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FetchError::Connect {
                url: self.url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(FetchError::Http {
                status: resp.status().as_u16(),
                url: self.url.clone(),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| FetchError::Json {
            field: "body".into(),
            detail: e.to_string(),
        })?;
        parse_rows(&bytes)
    }
}

/// Builder for [`TableClient`].
#[derive(Debug, Clone)]
pub struct TableClientBuilder {
    url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TableClientBuilder {
    /// Override the TCP connect timeout (default 3 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the per-request timeout (default 10 s). This is the only
    /// bound on how long a tick can stay in flight.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> TableClient {
        // Falls back to a default client instead of panicking.
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .unwrap_or_default();
        TableClient {
            url: self.url,
            client,
        }
    }
}
