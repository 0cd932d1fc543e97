//! Remote datastore access
//!
//! The data-source boundary: a trait the synchronizer fetches through, the
//! HTTP implementation against the dashboard's datastore, and the typed
//! fetch errors the classifier maps onto the recovery taxonomy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::RawTradeRow;

/// Failures at the data-source boundary.
///
/// These stay close to the transport; classification into severity and
/// recovery behavior happens in `error::classify`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("datastore returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("local cache failure: {0}")]
    Cache(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Read operations the synchronizer needs from the remote datastore.
///
/// `since` limits the result to rows newer than the given instant; `None`
/// fetches everything. Rows come back in datastore order; the store takes
/// care of dedup and indexing.
#[async_trait]
pub trait DataSource {
    async fn fetch_completed(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawTradeRow>, FetchError>;

    async fn fetch_active(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawTradeRow>, FetchError>;
}

/// HTTP client for the dashboard's remote datastore
pub struct HttpDataSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDataSource {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        HttpDataSource {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    async fn fetch_rows(
        &self,
        path: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawTradeRow>, FetchError> {
        let mut url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        if let Some(since) = since {
            url.push_str(&format!("?since={}", since.timestamp_millis()));
        }

        debug!("Fetching {}", url);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let rows: Vec<RawTradeRow> = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        debug!("Fetched {} rows from {}", rows.len(), path);
        Ok(rows)
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch_completed(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawTradeRow>, FetchError> {
        self.fetch_rows("trades/completed", since).await
    }

    async fn fetch_active(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawTradeRow>, FetchError> {
        self.fetch_rows("trades/active", since).await
    }
}
