//! # REST Store
//!
//! `RecordStore` over a PostgREST-compatible HTTP endpoint.
//!
//! Selectors map onto query parameters (`select=`, `col=eq.v`, `col=like.p*`,
//! `col=not.is.null`, `order=`, `limit=`, `offset=`). Updates are
//! `PATCH ?id=eq.<id>`, bulk creates a single `POST` of a JSON array.

use crate::config::StoreConfig;
use crate::model::{Patch, RecordId};
use crate::store::{Filter, RecordStore, Row, Selector, StoreError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestStore {
    /// Build a client from configuration; the API key is read from the configured env var.
    pub fn from_config(config: &StoreConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("store.base_url is not configured"))?;
        let api_key = std::env::var(&config.api_key_env).ok();
        Self::new(base_url, api_key, config.request_timeout())
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("solarlink/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }
}

/// Query parameters for a selector.
pub fn selector_query(selector: &Selector) -> Vec<(String, String)> {
    let mut query = Vec::new();
    if !selector.fields.is_empty() {
        query.push(("select".to_string(), selector.fields.join(",")));
    }
    for filter in &selector.filters {
        query.push(match filter {
            Filter::Eq(field, value) => (field.clone(), format!("eq.{value}")),
            Filter::Prefix(field, prefix) => (field.clone(), format!("like.{prefix}*")),
            Filter::NotNull(field) => (field.clone(), "not.is.null".to_string()),
        });
    }
    if let Some(order) = &selector.order_by {
        query.push(("order".to_string(), format!("{order}.asc")));
    }
    query.push(("limit".to_string(), selector.limit.to_string()));
    query.push(("offset".to_string(), selector.offset.to_string()));
    query
}

fn classify_transport(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Transient(err.to_string())
    }
}

/// Map a non-success status onto the store error taxonomy.
pub fn classify_status(status: StatusCode, body: String) -> StoreError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        StoreError::Transient(format!("HTTP {}: {}", status.as_u16(), body))
    } else {
        StoreError::Rejected {
            status: status.as_u16(),
            message: body,
        }
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, body))
}

#[async_trait]
impl RecordStore for RestStore {
    async fn fetch_page(&self, selector: &Selector) -> Result<Vec<Row>, StoreError> {
        let request = self
            .client
            .get(self.url(&selector.table))
            .query(&selector_query(selector));
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(classify_transport)?;
        let rows: Vec<Value> = check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        rows.into_iter()
            .map(|row| match row {
                Value::Object(map) => Ok(map),
                other => Err(StoreError::Decode(format!("expected object row, got {other}"))),
            })
            .collect()
    }

    async fn update(&self, table: &str, id: &RecordId, patch: &Patch) -> Result<(), StoreError> {
        let request = self
            .client
            .patch(self.url(table))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(&patch.to_json());
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(classify_transport)?;
        check(response).await?;
        Ok(())
    }

    async fn create_many(&self, table: &str, rows: Vec<Row>) -> Result<Vec<RecordId>, StoreError> {
        let request = self
            .client
            .post(self.url(table))
            .query(&[("select", "id")])
            .header("Prefer", "return=representation")
            .json(&rows);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(classify_transport)?;
        let created: Vec<Row> = check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        created
            .into_iter()
            .map(|row| {
                row.get("id")
                    .cloned()
                    .ok_or_else(|| StoreError::Decode("created row without id".into()))
                    .and_then(|id| {
                        serde_json::from_value::<RecordId>(id)
                            .map_err(|e| StoreError::Decode(e.to_string()))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_query() {
        let selector = Selector::new("solar_installations")
            .fields(["id", "crossref_ids"])
            .filter(Filter::Prefix("source_record_id".into(), "eia860_".into()))
            .filter(Filter::NotNull("latitude".into()))
            .filter(Filter::Eq("state".into(), "TX".into()))
            .order_by("id")
            .page(500, 1000);
        let query = selector_query(&selector);
        assert_eq!(
            query,
            vec![
                ("select".into(), "id,crossref_ids".into()),
                ("source_record_id".into(), "like.eia860_*".into()),
                ("latitude".into(), "not.is.null".into()),
                ("state".into(), "eq.TX".into()),
                ("order".into(), "id.asc".into()),
                ("limit".into(), "500".into()),
                ("offset".into(), "1000".into()),
            ]
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        let rejected = classify_status(StatusCode::BAD_REQUEST, "column does not exist".into());
        assert!(!rejected.is_transient());
        assert!(rejected.to_string().contains("column does not exist"));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let store = RestStore::new("http://db.local/rest/v1/", None, std::time::Duration::from_secs(1))
            .unwrap();
        assert_eq!(store.url("solar_equipment"), "http://db.local/rest/v1/solar_equipment");
    }
}
