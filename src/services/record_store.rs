//! Remote record store.
//!
//! `RecordStoreTrait` is the table-level interface the sync controller
//! persists through. `RestRecordStore` implements it against the hosted
//! backend's REST endpoint (`/rest/v1/<table>`) using `reqwest`.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use crate::types::errors::StoreError;
use crate::types::query::{Filter, Order};
use crate::types::settings::AppConfig;

/// Trait defining the record store operations.
#[async_trait]
pub trait RecordStoreTrait: Send + Sync {
    /// Sets the bearer token used for subsequent requests. `None` falls back
    /// to anonymous access.
    fn set_access_token(&self, token: Option<&str>);

    /// Returns all rows of `table` matching every filter, in `order`.
    async fn query(&self, table: &str, filters: &[Filter], order: &Order) -> Result<Vec<Value>, StoreError>;

    /// Inserts one row.
    async fn insert(&self, table: &str, record: Value) -> Result<(), StoreError>;

    /// Deletes every row matching all filters.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), StoreError>;
}

/// Record store backed by the platform's REST interface.
pub struct RestRecordStore {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: RwLock<Option<String>>,
}

impl RestRecordStore {
    /// Creates a store for the configured project.
    pub fn new(config: &AppConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            access_token: RwLock::new(None),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn bearer(&self) -> String {
        let guard = match self.access_token.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone().unwrap_or_else(|| self.anon_key.clone())
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    async fn check(resp: Response) -> Result<Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = error_message(&body, status);
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StoreError::Unauthorized(message));
        }
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RecordStoreTrait for RestRecordStore {
    fn set_access_token(&self, token: Option<&str>) {
        let mut guard = match self.access_token.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = token.filter(|t| !t.is_empty()).map(str::to_string);
    }

    async fn query(&self, table: &str, filters: &[Filter], order: &Order) -> Result<Vec<Value>, StoreError> {
        let mut params: Vec<(String, String)> = vec![("select".to_string(), "*".to_string())];
        params.extend(filters.iter().map(Filter::to_query_pair));
        params.push(("order".to_string(), order.to_expression()));

        let resp = self
            .request(Method::GET, table)
            .query(&params)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        let resp = Self::check(resp).await?;

        resp.json::<Vec<Value>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn insert(&self, table: &str, record: Value) -> Result<(), StoreError> {
        let resp = self
            .request(Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(&record)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), StoreError> {
        // An unfiltered DELETE would address the whole table.
        if filters.is_empty() {
            return Err(StoreError::Rejected {
                status: 0,
                message: "delete requires at least one filter".to_string(),
            });
        }
        let params: Vec<(String, String)> = filters.iter().map(Filter::to_query_pair).collect();
        let resp = self
            .request(Method::DELETE, table)
            .query(&params)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        Self::check(resp).await?;
        Ok(())
    }
}

/// Extracts a human-readable message from an error response body.
///
/// The backend answers with `{"message": "..."}` (REST) or
/// `{"error_description": "..."}` / `{"msg": "..."}` (auth); anything else
/// falls back to the raw body, then to the status text.
pub fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error_description", "msg", "error"] {
            if let Some(msg) = v.get(key).and_then(|m| m.as_str()) {
                return msg.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}
