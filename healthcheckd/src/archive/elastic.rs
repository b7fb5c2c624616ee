use std::collections::HashMap;
use std::time::Duration;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use super::{ArchiveIndex, IndexError, IndexItem, ItemOutcome};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Elasticsearch `_bulk` client
pub struct ElasticIndex {
    client: reqwest::Client,
    url: String,
    index: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkItemResult>>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ElasticIndex {
    /// `timeout` bounds each whole request; connecting is bounded separately
    pub fn new(url: &str, index: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.url, path));
        match &self.api_key {
            Some(key) => builder.header(reqwest::header::AUTHORIZATION, format!("ApiKey {}", key)),
            None => builder,
        }
    }

    /// Check the cluster is reachable. Used once at startup.
    pub async fn ping(&self) -> Result<(), IndexError> {
        let resp = self.request(reqwest::Method::GET, "/").send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!("Connected to archival index at {} (index {})", self.url, self.index);
        Ok(())
    }
}

#[async_trait]
impl ArchiveIndex for ElasticIndex {
    async fn bulk_insert(&self, items: &[IndexItem]) -> Result<Vec<ItemOutcome>, IndexError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let body = bulk_body(&self.index, items)?;
        let resp = self
            .request(reqwest::Method::POST, "/_bulk")
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let response: BulkResponse = resp.json().await?;
        Ok(item_outcomes(items, response))
    }
}

/// NDJSON body: a `create` action line followed by the document, per item
fn bulk_body(index: &str, items: &[IndexItem]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for item in items {
        let action = json!({ "create": { "_index": index, "_id": item.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&item.document)?);
        body.push('\n');
    }
    Ok(body)
}

/// Pair response items with the request items, in order. Items the
/// response does not mention count as failed.
fn item_outcomes(items: &[IndexItem], response: BulkResponse) -> Vec<ItemOutcome> {
    let mut results = response.items.into_iter();
    items
        .iter()
        .map(|item| {
            let result = results.next().and_then(|mut entry| entry.remove("create"));
            match result {
                Some(r) if (200..300).contains(&r.status) && r.error.is_none() => {
                    ItemOutcome::Created {
                        id: r.id.unwrap_or_else(|| item.id.clone()),
                    }
                }
                Some(r) => ItemOutcome::Failed {
                    id: item.id.clone(),
                    reason: error_reason(r.status, r.error.as_ref()),
                },
                None => ItemOutcome::Failed {
                    id: item.id.clone(),
                    reason: "missing from bulk response".to_string(),
                },
            }
        })
        .collect()
}

fn error_reason(status: u16, error: Option<&serde_json::Value>) -> String {
    let kind = error.and_then(|e| e.get("type")).and_then(|v| v.as_str());
    let reason = error.and_then(|e| e.get("reason")).and_then(|v| v.as_str());
    match (kind, reason) {
        (Some(kind), Some(reason)) => format!("{} ({}): {}", kind, status, reason),
        (Some(kind), None) => format!("{} ({})", kind, status),
        _ => format!("status {}", status),
    }
}
