//! HTTP collaborators: latest-reading lookup and north ingest forwarding.

use std::time::Duration;

use async_trait::async_trait;
use pqgate_core::collaborator::{IngestRecord, LatestReadingSource, ReadingSink};
use pqgate_core::{Fields, Reading};
use serde::Deserialize;
use tracing::debug;

use crate::error::AdapterError;

fn build_client(timeout: Duration) -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AdapterError::Configuration(format!("HTTP client: {}", e)))
}

#[derive(Debug, Deserialize)]
struct StoredReading {
    reading: Fields,
}

/// Fetches the most recent stored reading of an asset from the storage
/// service's asset endpoint.
pub struct HttpLatestReadingSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLatestReadingSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, asset: &str) -> String {
        format!(
            "{}/fledge/asset/{}?limit=1&skip=0&previous=false",
            self.base_url, asset
        )
    }

    async fn fetch(&self, asset: &str) -> Result<Option<Fields>, AdapterError> {
        let url = self.url_for(asset);
        debug!(asset = %asset, url = %url, "Fetching latest reading");
        let rows: Vec<StoredReading> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows.into_iter().next().map(|row| row.reading))
    }
}

#[async_trait]
impl LatestReadingSource for HttpLatestReadingSource {
    async fn latest(&self, asset: &str) -> pqgate_core::Result<Option<Fields>> {
        Ok(self.fetch(asset).await?)
    }
}

/// Forwards each reading north as a one-element batch.
pub struct HttpIngestSink {
    client: reqwest::Client,
    url: String,
}

impl HttpIngestSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }

    async fn post(&self, reading: &Reading) -> Result<(), AdapterError> {
        self.client
            .post(&self.url)
            .json(&[IngestRecord::new(reading)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl ReadingSink for HttpIngestSink {
    async fn ingest(&self, reading: &Reading) -> pqgate_core::Result<()> {
        Ok(self.post(reading).await?)
    }

    fn name(&self) -> &str {
        "http"
    }
}
