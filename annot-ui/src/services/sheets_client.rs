//! Google Sheets client
//!
//! Appends annotation rows to a spreadsheet through the `values:append`
//! endpoint. A whole write-back buffer is sent as one request, so a batch
//! either lands completely or not at all.

use annot_common::{AnnotationRecord, RemoteSink};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use super::credentials::{CredentialError, TokenSource};

pub const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";
const USER_AGENT: &str = concat!("annot-ui/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Sheets client errors
#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Authorization failed: {0}")]
    Auth(#[from] CredentialError),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid spreadsheet URL: {0}")]
    InvalidUrl(String),
}

impl From<SheetsError> for annot_common::Error {
    fn from(err: SheetsError) -> Self {
        annot_common::Error::Flush(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_range: Option<String>,
    #[serde(default)]
    updated_rows: Option<usize>,
}

/// One spreadsheet row: annotator, text_id, text, sentiment_score
pub fn row_values(record: &AnnotationRecord) -> Value {
    json!([
        record.annotator,
        record.text_id,
        record.text,
        record.sentiment_score.value(),
    ])
}

/// Spreadsheet append client
#[derive(Debug)]
pub struct SheetsClient {
    http_client: reqwest::Client,
    tokens: TokenSource,
    append_url: Url,
}

impl SheetsClient {
    /// Shared HTTP client for the token exchange and the Sheets API
    pub fn http_client() -> Result<reqwest::Client, SheetsError> {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SheetsError::NetworkError(e.to_string()))
    }

    pub fn new(
        http_client: reqwest::Client,
        tokens: TokenSource,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Self, SheetsError> {
        Self::with_base_url(http_client, tokens, SHEETS_BASE_URL, spreadsheet_id, range)
    }

    /// Point the client at another API host (used for testing)
    pub fn with_base_url(
        http_client: reqwest::Client,
        tokens: TokenSource,
        base_url: &str,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Self, SheetsError> {
        let mut append_url =
            Url::parse(base_url).map_err(|e| SheetsError::InvalidUrl(e.to_string()))?;
        append_url
            .path_segments_mut()
            .map_err(|_| SheetsError::InvalidUrl(base_url.to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id, "values"])
            .push(&format!("{}:append", range));
        // RAW: cells are stored as sent, never parsed as formulas or dates
        append_url
            .query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");

        Ok(Self {
            http_client,
            tokens,
            append_url,
        })
    }

    pub fn append_url(&self) -> &Url {
        &self.append_url
    }

    /// Append rows in order with a single request
    pub async fn append_values(&self, records: &[AnnotationRecord]) -> Result<usize, SheetsError> {
        if records.is_empty() {
            return Ok(0);
        }

        let bearer = self.tokens.bearer().await?;
        let values: Vec<Value> = records.iter().map(row_values).collect();
        let body = json!({ "values": values });

        tracing::debug!(rows = records.len(), url = %self.append_url, "Appending rows to spreadsheet");

        let response = self
            .http_client
            .post(self.append_url.clone())
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .map_err(|e| SheetsError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SheetsError::ApiError(status.as_u16(), error_text));
        }

        let parsed: AppendResponse = response
            .json()
            .await
            .map_err(|e| SheetsError::ParseError(e.to_string()))?;

        let updates = parsed.updates.as_ref();
        let updated_rows = updates.and_then(|u| u.updated_rows).unwrap_or(records.len());
        tracing::info!(
            rows = updated_rows,
            range = %updates.and_then(|u| u.updated_range.as_deref()).unwrap_or("?"),
            "Appended rows to spreadsheet"
        );

        Ok(updated_rows)
    }
}

#[async_trait]
impl RemoteSink for SheetsClient {
    fn name(&self) -> &'static str {
        "google-sheets"
    }

    async fn append_row(&self, record: &AnnotationRecord) -> annot_common::Result<()> {
        self.append_rows(std::slice::from_ref(record)).await
    }

    async fn append_rows(&self, records: &[AnnotationRecord]) -> annot_common::Result<()> {
        self.append_values(records).await?;
        Ok(())
    }
}
