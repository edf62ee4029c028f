//! HTTP implementation of [`ExternalSource`].

use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;

use crate::{ExternalSource, Page, PageRequest, MAX_RECORDS_PER_REQUEST};

pub const DEFAULT_API_URL: &str = "https://api.airtable.com/v0";

/// Longest error body kept in error messages.
const MAX_ERROR_BODY: usize = 500;

/// Connection settings for the external source.
#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_url: String,
    pub base_id: String,
    pub table: String,
    pub token: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for AirtableConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            base_id: String::new(),
            table: String::new(),
            token: String::new(),
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl AirtableConfig {
    /// Reject configurations that cannot possibly work before any request is made.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.base_id.trim().is_empty() {
            missing.push("base id");
        }
        if self.table.trim().is_empty() {
            missing.push("table name");
        }
        if self.token.trim().is_empty() {
            missing.push("access token");
        }
        if !missing.is_empty() {
            anyhow::bail!("Missing external source {}", missing.join(", "));
        }
        reqwest::Url::parse(&self.api_url)
            .with_context(|| format!("Invalid API URL: {}", self.api_url))?;
        Ok(())
    }

    /// `{api_url}/{base_id}/{table}` with each segment percent-encoded.
    pub fn table_url(&self) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(self.api_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid API URL: {}", self.api_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API URL cannot be a base: {}", self.api_url))?
            .pop_if_empty()
            .push(self.base_id.trim())
            .push(self.table.trim());
        Ok(url)
    }
}

/// Client for the external source's REST API.
pub struct AirtableClient {
    http: reqwest::Client,
    config: AirtableConfig,
}

impl AirtableClient {
    pub fn new(config: AirtableConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AirtableConfig {
        &self.config
    }

    async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        anyhow::bail!("{what} failed with status {status}: {body}")
    }
}

#[async_trait::async_trait]
impl ExternalSource for AirtableClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        let url = self.config.table_url()?;
        let mut query: Vec<(&str, String)> = vec![("pageSize", request.page_size.to_string())];
        if !request.offset.is_empty() {
            query.push(("offset", request.offset.clone()));
        }
        if let Some(formula) = &request.filter_formula {
            query.push(("filterByFormula", formula.clone()));
        }

        let response = self
            .http
            .get(url.clone())
            .bearer_auth(&self.config.token)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Failed to fetch records from {url}"))?;
        let response = Self::check_status(response, "Record fetch").await?;

        let page: Page = response
            .json()
            .await
            .with_context(|| format!("Failed to decode records page from {url}"))?;

        tracing::debug!(
            "Fetched {} records (more: {})",
            page.records.len(),
            page.offset.is_some()
        );
        Ok(page)
    }

    async fn mark_synced(&self, record_ids: &[String], synced_field: &str) -> Result<()> {
        if record_ids.is_empty() {
            return Ok(());
        }
        if record_ids.len() > MAX_RECORDS_PER_REQUEST {
            anyhow::bail!(
                "Cannot mark {} records in one request (limit {MAX_RECORDS_PER_REQUEST})",
                record_ids.len()
            );
        }

        let records: Vec<serde_json::Value> = record_ids
            .iter()
            .map(|id| {
                let mut fields = serde_json::Map::new();
                fields.insert(synced_field.to_string(), serde_json::Value::Bool(true));
                json!({ "id": id, "fields": fields })
            })
            .collect();
        let url = self.config.table_url()?;
        let response = self
            .http
            .patch(url.clone())
            .bearer_auth(&self.config.token)
            .json(&json!({ "records": records }))
            .send()
            .await
            .with_context(|| format!("Failed to send write-back to {url}"))?;
        Self::check_status(response, "Write-back").await?;
        Ok(())
    }
}
