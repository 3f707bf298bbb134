//! HTTP table gateway store
//!
//! Talks to a table service exposing two JSON endpoints:
//!
//! - `POST {endpoint}/tables` with `{"TableName": "..."}`; `201`/`204` mean
//!   the table was created, `409` means it already existed.
//! - `POST {endpoint}/tables/{table}/batch` with
//!   `{"operations": [{"op": "upsert", "entity": {...}}, ...]}`, committed as
//!   one transaction.
//!
//! `429` and `503` are throughput signals and become
//! [`StoreError::Backpressure`], carrying a numeric `Retry-After` header as the
//! hint. Every other failure is [`StoreError::Fatal`].
//!
//! `reqwest::Client` is a cheap handle over a shared connection pool, so every
//! [`HttpStore`] the factory builds shares connections with its siblings.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{Store, StoreError, StoreFactory};
use crate::config::StoreConfig;
use crate::record::SyntheticRecord;

#[derive(Serialize)]
struct Operation<'a> {
    op: &'static str,
    entity: &'a SyntheticRecord,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    operations: Vec<Operation<'a>>,
}

/// Builds [`HttpStore`] clients for one table
#[derive(Clone)]
pub struct HttpStoreFactory {
    client: Client,
    endpoint: String,
    table: String,
    api_token: Option<String>,
}

impl HttpStoreFactory {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| StoreError::fatal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            table: config.table_name.clone(),
            api_token: config.api_token.clone(),
        })
    }
}

impl StoreFactory for HttpStoreFactory {
    type Client = HttpStore;

    fn connect(&self) -> Result<Self::Client, StoreError> {
        Ok(HttpStore {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            table: self.table.clone(),
            api_token: self.api_token.clone(),
        })
    }
}

/// Client for one table behind the HTTP gateway
pub struct HttpStore {
    client: Client,
    endpoint: String,
    table: String,
    api_token: Option<String>,
}

impl HttpStore {
    fn post(&self, url: String) -> reqwest::RequestBuilder {
        let request = self.client.post(url);
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl Store for HttpStore {
    async fn ensure_container_exists(&mut self, name: &str) -> Result<bool, StoreError> {
        let response = self
            .post(format!("{}/tables", self.endpoint))
            .json(&json!({ "TableName": name }))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            _ => Err(classify_failure(response).await),
        }
    }

    async fn submit_chunk(&mut self, records: &[SyntheticRecord]) -> Result<(), StoreError> {
        let body = BatchRequest {
            operations: records
                .iter()
                .map(|entity| Operation {
                    op: "upsert",
                    entity,
                })
                .collect(),
        };

        let response = self
            .post(format!("{}/tables/{}/batch", self.endpoint, self.table))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            debug!(records = records.len(), table = %self.table, "Chunk committed");
            Ok(())
        } else {
            Err(classify_failure(response).await)
        }
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    StoreError::fatal(format!("request failed: {}", err))
}

async fn classify_failure(response: Response) -> StoreError {
    let status = response.status();
    if is_throughput_status(status) {
        return StoreError::Backpressure {
            retry_after: retry_after_hint(response.headers()),
        };
    }

    let body = response.text().await.unwrap_or_default();
    StoreError::fatal(format!("HTTP {}: {}", status.as_u16(), body.trim()))
}

fn is_throughput_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
