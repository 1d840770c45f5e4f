//! REST API access for facts, fact details and areas

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Config;
use crate::constants;
use crate::costs::DetailLine;
use crate::engine::Area;
use crate::records::RawRecord;

/// Remote data source for the consultation screens
#[async_trait]
pub trait FactGateway: Send + Sync {
    /// Facts created between `start` and `end` (both inclusive, YYYY-MM-DD)
    async fn fetch_records_in_range(&self, start: &str, end: &str) -> Result<Vec<RawRecord>>;

    /// Line items of one fact
    async fn fetch_record_details(&self, record_id: &str) -> Result<Vec<DetailLine>>;

    async fn fetch_areas(&self) -> Result<Vec<Area>>;

    /// All active facts
    async fn fetch_facts(&self) -> Result<Vec<RawRecord>>;

    /// Soft-deleted facts
    async fn fetch_removed_facts(&self) -> Result<Vec<RawRecord>>;
}

// =============================================================================
// HTTP Gateway
// =============================================================================

/// Gateway backed by the point-of-sale REST API
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request failed: GET {}", path))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("API returned status {} for GET {}", status, path);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response of GET {}", path))
    }
}

#[async_trait]
impl FactGateway for HttpGateway {
    async fn fetch_records_in_range(&self, start: &str, end: &str) -> Result<Vec<RawRecord>> {
        self.get_json(&format!("{}/{}/{}", constants::FACTS_RANGE_PATH, start, end))
            .await
    }

    async fn fetch_record_details(&self, record_id: &str) -> Result<Vec<DetailLine>> {
        self.get_json(&format!("{}/{}", constants::FACT_DETAILS_PATH, record_id))
            .await
    }

    async fn fetch_areas(&self) -> Result<Vec<Area>> {
        self.get_json(constants::AREAS_PATH).await
    }

    async fn fetch_facts(&self) -> Result<Vec<RawRecord>> {
        self.get_json(constants::FACTS_PATH).await
    }

    async fn fetch_removed_facts(&self) -> Result<Vec<RawRecord>> {
        self.get_json(constants::REMOVED_FACTS_PATH).await
    }
}
