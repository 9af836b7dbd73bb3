//! Scrape orchestration.
//!
//! Drives the fetch -> filter -> accumulate loop against a [`WorkSource`]
//! until the target is reached, the pages run out, or one of the request
//! bounds trips. One request is in flight at a time.

use crate::dedup::{DedupIndex, DedupMode};
use crate::error::{HarvestError, Result};
use crate::openalex::{Retrieval, WorkFilter, WorkSource, MAX_PER_PAGE};
use crate::record::PaperRecord;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

/// Default number of consecutive failed fetches before giving up
pub const DEFAULT_MAX_FAILURE_STREAK: u32 = 5;

/// Default cap on requests per run
pub const DEFAULT_MAX_REQUESTS: usize = 1_000;

/// How works are pulled from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetrievalMode {
    /// Independent random samples; needs a target count to terminate
    #[default]
    Sample,
    /// Sequential pages until the result set is exhausted
    Paged,
}

impl FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sample" => Ok(RetrievalMode::Sample),
            "paged" | "page" => Ok(RetrievalMode::Paged),
            other => Err(format!("unknown retrieval mode '{}' (expected sample or paged)", other)),
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetrievalMode::Sample => "sample",
            RetrievalMode::Paged => "paged",
        })
    }
}

/// Parameters of one scrape run.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub keyword_ids: Vec<String>,
    pub publication_year: Option<i32>,
    /// Upper bound on returned records; required in sampling mode
    pub target_count: Option<usize>,
    /// Page size, and sample size in sampling mode
    pub per_page: usize,
    pub mode: RetrievalMode,
    pub dedup: DedupMode,
    pub max_failure_streak: u32,
    pub max_requests: usize,
}

impl Default for ScrapeRequest {
    fn default() -> Self {
        Self {
            keyword_ids: Vec::new(),
            publication_year: None,
            target_count: None,
            per_page: MAX_PER_PAGE,
            mode: RetrievalMode::default(),
            dedup: DedupMode::default(),
            max_failure_streak: DEFAULT_MAX_FAILURE_STREAK,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

impl ScrapeRequest {
    pub fn validate(&self) -> Result<()> {
        if self.per_page == 0 || self.per_page > MAX_PER_PAGE {
            return Err(HarvestError::Validation(format!(
                "per_page must be between 1 and {}, got {}",
                MAX_PER_PAGE, self.per_page
            )));
        }
        if self.mode == RetrievalMode::Sample && self.target_count.is_none() {
            return Err(HarvestError::Validation(
                "sampling mode needs a target count to terminate".to_string(),
            ));
        }
        if self.max_failure_streak == 0 || self.max_requests == 0 {
            return Err(HarvestError::Validation(
                "max_failure_streak and max_requests must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn filter(&self) -> WorkFilter {
        WorkFilter {
            keyword_ids: self.keyword_ids.clone(),
            publication_year: self.publication_year,
            ..Default::default()
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    TargetReached,
    PagesExhausted,
    /// Too many consecutive failed fetches
    FailureStreak { failures: u32, last_error: String },
    /// `max_requests` fetches were made without reaching another stop
    RequestBudget { requests: usize },
}

impl StopReason {
    /// True when the run ended on a bound rather than a natural stop.
    pub fn is_abnormal(&self) -> bool {
        matches!(self, StopReason::FailureStreak { .. } | StopReason::RequestBudget { .. })
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TargetReached => write!(f, "target reached"),
            StopReason::PagesExhausted => write!(f, "no more pages"),
            StopReason::FailureStreak { failures, last_error } => {
                write!(f, "aborted after {} consecutive failed requests: {}", failures, last_error)
            }
            StopReason::RequestBudget { requests } => write!(f, "request budget of {} exhausted", requests),
        }
    }
}

/// Result of a run: the truncated batch plus bookkeeping.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub records: Vec<PaperRecord>,
    pub stop_reason: StopReason,
    pub requests: usize,
    /// Records rejected by the dedup index
    pub dropped: usize,
}

/// Scrape orchestrator over a work source and a fixed dedup index.
pub struct Scraper<'a> {
    source: &'a dyn WorkSource,
    index: &'a DedupIndex,
}

impl<'a> Scraper<'a> {
    pub fn new(source: &'a dyn WorkSource, index: &'a DedupIndex) -> Self {
        Self { source, index }
    }

    /// Run one scrape.
    ///
    /// The returned batch never exceeds `target_count`. Fetch errors do not
    /// fail the run; they end it only once the failure streak is reached.
    pub async fn run(&self, request: &ScrapeRequest) -> Result<ScrapeOutcome> {
        request.validate()?;

        let filter = request.filter();
        info!(
            filter = %filter.to_query_value(),
            mode = %request.mode,
            dedup = %request.dedup,
            target_count = ?request.target_count,
            "Starting scrape"
        );

        let target_reached = |len: usize| request.target_count.is_some_and(|t| len >= t);

        let mut batch: Vec<PaperRecord> = Vec::new();
        let mut page: u32 = 1;
        let mut requests = 0usize;
        let mut failures = 0u32;
        let mut dropped = 0usize;

        let stop_reason = loop {
            if target_reached(batch.len()) {
                break StopReason::TargetReached;
            }
            if requests >= request.max_requests {
                warn!(requests, "Request budget exhausted before target");
                break StopReason::RequestBudget { requests };
            }

            let retrieval = match request.mode {
                RetrievalMode::Sample => Retrieval::Sample { size: request.per_page },
                RetrievalMode::Paged => Retrieval::Page { number: page },
            };
            requests += 1;

            let result = match self.source.fetch(&filter, retrieval, request.per_page).await {
                Ok(result) => {
                    failures = 0;
                    result
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, ?retrieval, "Error fetching papers");
                    if failures >= request.max_failure_streak {
                        error!(failures, error = %e, "Giving up after consecutive failures");
                        break StopReason::FailureStreak {
                            failures,
                            last_error: e.to_string(),
                        };
                    }
                    continue;
                }
            };

            let total_pages = result.total_pages(request.per_page);
            for record in result.results {
                if self.index.admits(&record, request.dedup) {
                    batch.push(record);
                } else {
                    dropped += 1;
                }
            }

            if target_reached(batch.len()) {
                info!(target_count = ?request.target_count, "Target reached, stopping scrape");
                break StopReason::TargetReached;
            }

            match request.mode {
                RetrievalMode::Sample => {
                    info!(collected = batch.len(), dropped, "Collected papers so far");
                }
                RetrievalMode::Paged => {
                    let last_page = total_pages.unwrap_or(0);
                    info!(page, total_pages = last_page, collected = batch.len(), "Page fetched");
                    if page >= last_page {
                        break StopReason::PagesExhausted;
                    }
                    page += 1;
                }
            }
        };

        if let Some(target) = request.target_count {
            batch.truncate(target);
        }

        info!(
            collected = batch.len(),
            requests,
            dropped,
            reason = %stop_reason,
            "Scrape finished"
        );

        Ok(ScrapeOutcome {
            records: batch,
            stop_reason,
            requests,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openalex::PageResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses and records every request.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<PageResult>>>,
        calls: Mutex<Vec<Retrieval>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<PageResult>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Retrieval> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl WorkSource for ScriptedSource {
        async fn fetch(&self, _filter: &WorkFilter, retrieval: Retrieval, _per_page: usize) -> Result<PageResult> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(retrieval);
            }
            self.responses
                .lock()
                .ok()
                .and_then(|mut r| r.pop_front())
                .unwrap_or_else(|| Err(HarvestError::Api { code: 503, message: "script exhausted".into() }))
        }
    }

    fn work(n: usize, issns: &[&str]) -> PaperRecord {
        serde_json::from_value(json!({
            "id": format!("https://openalex.org/W{}", n),
            "title": format!("Paper {}", n),
            "primary_location": {"source": {"issn": issns}}
        }))
        .unwrap_or_default()
    }

    fn page(records: Vec<PaperRecord>, count: Option<u64>) -> Result<PageResult> {
        Ok(PageResult { results: records, total_count: count })
    }

    fn unique_page(start: usize, len: usize, count: Option<u64>) -> Result<PageResult> {
        let records = (start..start + len)
            .map(|n| {
                let issn = format!("{:04}-0000", n);
                work(n, &[issn.as_str()])
            })
            .collect();
        page(records, count)
    }

    fn api_error() -> Result<PageResult> {
        Err(HarvestError::Api { code: 500, message: "boom".into() })
    }

    #[tokio::test]
    async fn test_sampling_truncates_to_target() -> Result<()> {
        let source = ScriptedSource::new(vec![unique_page(0, 3, None), unique_page(3, 3, None)]);
        let index = DedupIndex::new();
        let request = ScrapeRequest {
            target_count: Some(4),
            per_page: 3,
            ..Default::default()
        };

        let outcome = Scraper::new(&source, &index).run(&request).await?;
        assert_eq!(outcome.records.len(), 4);
        assert_eq!(outcome.stop_reason, StopReason::TargetReached);
        assert_eq!(outcome.records[3].title.as_deref(), Some("Paper 3"));
        assert_eq!(source.calls(), vec![Retrieval::Sample { size: 3 }; 2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicates_are_dropped() -> Result<()> {
        let source = ScriptedSource::new(vec![page(
            vec![
                work(1, &["1234-5678", "9999-0000"]),
                work(2, &["9999-0000"]),
                work(3, &[]),
            ],
            None,
        )]);
        let index: DedupIndex = ["1234-5678"].into_iter().collect();
        let request = ScrapeRequest {
            target_count: Some(1),
            per_page: 3,
            ..Default::default()
        };

        let outcome = Scraper::new(&source, &index).run(&request).await?;
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].title.as_deref(), Some("Paper 2"));
        assert_eq!(outcome.dropped, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_paged_mode_stops_at_last_page() -> Result<()> {
        let source = ScriptedSource::new(vec![
            unique_page(0, 100, Some(250)),
            unique_page(100, 100, Some(250)),
            unique_page(200, 50, Some(250)),
            unique_page(250, 100, Some(250)),
        ]);
        let index = DedupIndex::new();
        let request = ScrapeRequest {
            mode: RetrievalMode::Paged,
            per_page: 100,
            ..Default::default()
        };

        let outcome = Scraper::new(&source, &index).run(&request).await?;
        assert_eq!(outcome.stop_reason, StopReason::PagesExhausted);
        assert_eq!(outcome.records.len(), 250);
        assert_eq!(
            source.calls(),
            vec![
                Retrieval::Page { number: 1 },
                Retrieval::Page { number: 2 },
                Retrieval::Page { number: 3 },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_page_is_retried_then_run_continues() -> Result<()> {
        let source = ScriptedSource::new(vec![
            unique_page(0, 2, Some(4)),
            api_error(),
            unique_page(2, 2, Some(4)),
        ]);
        let index = DedupIndex::new();
        let request = ScrapeRequest {
            mode: RetrievalMode::Paged,
            per_page: 2,
            ..Default::default()
        };

        let outcome = Scraper::new(&source, &index).run(&request).await?;
        assert_eq!(outcome.records.len(), 4);
        assert_eq!(outcome.requests, 3);
        assert_eq!(
            source.calls(),
            vec![
                Retrieval::Page { number: 1 },
                Retrieval::Page { number: 2 },
                Retrieval::Page { number: 2 },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_persistent_failure_is_bounded() -> Result<()> {
        let source = ScriptedSource::new(vec![unique_page(0, 2, None)]);
        let index = DedupIndex::new();
        let request = ScrapeRequest {
            target_count: Some(10),
            per_page: 2,
            max_failure_streak: 3,
            ..Default::default()
        };

        let outcome = Scraper::new(&source, &index).run(&request).await?;
        assert!(matches!(outcome.stop_reason, StopReason::FailureStreak { failures: 3, .. }));
        assert!(outcome.stop_reason.is_abnormal());
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.requests, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_all_duplicate_samples_hit_request_budget() -> Result<()> {
        let responses = (0..10).map(|_| page(vec![work(1, &["1234-5678"])], None)).collect();
        let source = ScriptedSource::new(responses);
        let index: DedupIndex = ["1234-5678"].into_iter().collect();
        let request = ScrapeRequest {
            target_count: Some(5),
            per_page: 1,
            max_requests: 4,
            ..Default::default()
        };

        let outcome = Scraper::new(&source, &index).run(&request).await?;
        assert_eq!(outcome.stop_reason, StopReason::RequestBudget { requests: 4 });
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.dropped, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_sampling_without_target_is_rejected() {
        let source = ScriptedSource::new(Vec::new());
        let index = DedupIndex::new();
        let request = ScrapeRequest::default();

        let result = Scraper::new(&source, &index).run(&request).await;
        assert!(matches!(result, Err(HarvestError::Validation(_))));
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_zero_target_makes_no_requests() -> Result<()> {
        let source = ScriptedSource::new(Vec::new());
        let index = DedupIndex::new();
        let request = ScrapeRequest {
            target_count: Some(0),
            ..Default::default()
        };

        let outcome = Scraper::new(&source, &index).run(&request).await?;
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.requests, 0);
        Ok(())
    }

    #[test]
    fn test_per_page_bounds() {
        let too_big = ScrapeRequest {
            target_count: Some(1),
            per_page: 201,
            ..Default::default()
        };
        assert!(too_big.validate().is_err());
    }
}
