//! OpenAlex works API client.
//!
//! Fetches one page or one random sample of works per call. Requests are
//! never retried here; the scrape orchestrator decides what a failed fetch
//! means for the run.
//!
//! API notes (per OpenAlex docs):
//! - `per-page` is capped at 200
//! - `sample` returns a random subset and ignores paging
//! - a `mailto` parameter moves requests into the polite pool

use crate::config::Settings;
use crate::error::{HarvestError, Result};
use crate::record::PaperRecord;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Maximum results per page (OpenAlex limit)
pub const MAX_PER_PAGE: usize = 200;

/// Sort order used for paged retrieval
const PAGED_SORT: &str = "publication_year:desc";

const USER_AGENT: &str = concat!("bibharvest/", env!("CARGO_PKG_VERSION"));

/// Filter expression for the works endpoint.
///
/// Always restricted to open-access works in one language; keywords are
/// OR-ed together.
#[derive(Debug, Clone)]
pub struct WorkFilter {
    pub keyword_ids: Vec<String>,
    pub language: String,
    pub publication_year: Option<i32>,
}

impl Default for WorkFilter {
    fn default() -> Self {
        Self {
            keyword_ids: Vec::new(),
            language: "en".to_string(),
            publication_year: None,
        }
    }
}

impl WorkFilter {
    pub fn new(keyword_ids: Vec<String>) -> Self {
        Self {
            keyword_ids,
            ..Default::default()
        }
    }

    /// Render the `filter` query value.
    pub fn to_query_value(&self) -> String {
        let mut filter = format!("open_access.is_oa:true,language:{}", self.language);

        let keywords: Vec<String> = self
            .keyword_ids
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| format!("keywords/{}", k))
            .collect();
        if !keywords.is_empty() {
            filter.push_str(&format!(",keywords.id:{}", keywords.join("|")));
        }

        if let Some(year) = self.publication_year {
            filter.push_str(&format!(",publication_year:{}", year));
        }

        filter
    }
}

/// Which slice of the result set to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieval {
    /// Random sample of `size` works
    Sample { size: usize },
    /// 1-indexed page of the sorted result set
    Page { number: u32 },
}

/// One decoded response.
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub results: Vec<PaperRecord>,
    /// `meta.count`, the size of the full result set
    pub total_count: Option<u64>,
}

impl PageResult {
    /// Number of pages at `per_page`, rounding up. `None` without a count.
    pub fn total_pages(&self, per_page: usize) -> Option<u32> {
        let per_page = per_page.max(1) as u64;
        self.total_count
            .map(|count| u32::try_from(count.div_ceil(per_page)).unwrap_or(u32::MAX))
    }
}

/// Anything that can serve works for the scrape loop.
#[async_trait]
pub trait WorkSource: Send + Sync {
    async fn fetch(&self, filter: &WorkFilter, retrieval: Retrieval, per_page: usize) -> Result<PageResult>;
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    meta: Option<WorksMeta>,
    results: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct WorksMeta {
    count: Option<u64>,
}

/// HTTP client for the works endpoint.
pub struct OpenAlexClient {
    client: Client,
    works_url: Url,
    mailto: Option<String>,
}

impl OpenAlexClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HarvestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            works_url: settings.works_url.clone(),
            mailto: settings.mailto.clone(),
        })
    }

    /// Query parameters for one request.
    fn query_params(&self, filter: &WorkFilter, retrieval: Retrieval, per_page: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![("filter", filter.to_query_value())];
        match retrieval {
            Retrieval::Sample { size } => params.push(("sample", size.to_string())),
            Retrieval::Page { number } => {
                params.push(("page", number.to_string()));
                params.push(("sort", PAGED_SORT.to_string()));
            }
        }
        params.push(("per-page", per_page.to_string()));
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }
        params
    }

    /// Fetch one page or sample of works.
    pub async fn fetch(&self, filter: &WorkFilter, retrieval: Retrieval, per_page: usize) -> Result<PageResult> {
        let params = self.query_params(filter, retrieval, per_page);
        debug!(url = %self.works_url, ?retrieval, per_page, "Fetching works");

        let response = self.client.get(self.works_url.clone()).query(&params).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %excerpt(&body), "Works API error");
            return Err(HarvestError::Api {
                code: status.as_u16(),
                message: format!("Failed to retrieve data, status code: {}", status.as_u16()),
            });
        }

        let body = response.text().await?;
        parse_response(&body)
    }
}

#[async_trait]
impl WorkSource for OpenAlexClient {
    async fn fetch(&self, filter: &WorkFilter, retrieval: Retrieval, per_page: usize) -> Result<PageResult> {
        OpenAlexClient::fetch(self, filter, retrieval, per_page).await
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Decode a works response body.
///
/// Entries that do not decode as a work are skipped with a warning.
pub fn parse_response(body: &str) -> Result<PageResult> {
    let response: WorksResponse = serde_json::from_str(body)
        .map_err(|e| HarvestError::Parse(format!("Failed to parse works response: {}", e)))?;

    let raw = response
        .results
        .ok_or_else(|| HarvestError::Parse("Response has no results array".to_string()))?;

    let mut results = Vec::with_capacity(raw.len());
    for (idx, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<PaperRecord>(value) {
            Ok(record) => results.push(record),
            Err(e) => warn!(index = idx, error = %e, "Skipping undecodable work"),
        }
    }

    Ok(PageResult {
        results,
        total_count: response.meta.and_then(|m| m.count),
    })
}
