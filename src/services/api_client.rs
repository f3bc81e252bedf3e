use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::config::ReviewConfig;
use crate::error::{Result, ReviewError};
use crate::image_loader::ImageReference;
use crate::types::{ProcessingRun, ReviewDocument};

/// Blocking client for the document processing backend.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ReviewConfig) -> Result<Self> {
        if config.api_base_url.trim().is_empty() {
            return Err(ReviewError::Config("DOCFLOW_API_URL is empty".to_string()));
        }
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(ReviewError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub fn fetch_document(&self, document_id: &str) -> Result<ReviewDocument> {
        let url = self.url(&format!("processing-runs/documents/{}", document_id));
        debug!(document_id, %url, "fetching document");
        let response = self.authorize(self.client.get(&url)).send()?;
        Self::read_json(response)
    }

    /// Persist a correction; the backend answers with the updated document.
    pub fn update_field(&self, document_id: &str, field_index: usize, value: &str) -> Result<ReviewDocument> {
        let url = self.url(&format!("processing-runs/documents/{}/fields", document_id));
        let response = self
            .authorize(self.client.patch(&url))
            .json(&json!({ "field_index": field_index, "value": value }))
            .send()?;
        let doc = Self::read_json(response)?;
        info!(document_id, field_index, "field update saved");
        Ok(doc)
    }

    pub fn mark_reviewed(&self, document_id: &str) -> Result<ReviewDocument> {
        let url = self.url(&format!("processing-runs/documents/{}/mark-reviewed", document_id));
        let response = self.authorize(self.client.post(&url)).send()?;
        let doc = Self::read_json(response)?;
        info!(document_id, "document marked reviewed");
        Ok(doc)
    }

    pub fn fetch_run(&self, run_id: &str) -> Result<ProcessingRun> {
        let url = self.url(&format!("processing-runs/{}", run_id));
        debug!(run_id, %url, "fetching processing run");
        let response = self.authorize(self.client.get(&url)).send()?;
        Self::read_json(response)
    }

    /// Raster uploads are shown as-is; PDF and Word files through the
    /// pre-rendered first-page preview.
    pub fn image_reference(&self, doc: &ReviewDocument) -> ImageReference {
        let raster = doc
            .mime_type
            .as_deref()
            .map(|m| m.starts_with("image/"))
            .unwrap_or(false);
        let kind = if raster { "file" } else { "preview" };
        ImageReference::authenticated(self.url(&format!("documents/{}/{}", doc.id, kind)))
    }
}
