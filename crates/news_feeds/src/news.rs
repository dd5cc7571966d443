use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, warn};

use common::config::NewsConfig;
use common::normalize::{canonicalize_link, normalize_text};
use common::retention::RetentionOutcome;
use common::{
    retry_with_backoff, CanonicalItem, DocumentStore, KeywordFilter, PipelineResult,
    RetentionSweeper, RetryPolicy, RunCounts, RunLog, RunLogger, RunStatus, Summarizer,
    UpsertEngine,
};

use crate::feed::{curated_ai_feeds, FeedEntry, FeedSource, FetchFeed};

pub const NEWS_COLLECTION: &str = "news";
pub const NEWS_JOB_NAME: &str = "news_ingestion";

#[derive(Debug, Clone, Serialize)]
pub struct FeedOutcome {
    pub source: String,
    pub url: String,
    pub success: bool,
    pub fetched: u64,
    pub matched: u64,
    pub inserted: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct NewsRunReport {
    pub feeds_processed: u64,
    pub total_fetched: u64,
    pub total_matched: u64,
    pub total_inserted: u64,
    pub total_skipped: u64,
    pub total_retried: u64,
    pub feed_results: Vec<FeedOutcome>,
    pub deleted_by_age: u64,
    pub deleted_by_overflow: u64,
}

/// Curated AI news ingestion: append-only writes into `news` plus the
/// retention sweep, one run log entry per run.
pub struct NewsIngest {
    fetcher: Arc<dyn FetchFeed>,
    store: Arc<dyn DocumentStore>,
    engine: UpsertEngine,
    sweeper: RetentionSweeper,
    logger: RunLogger,
    summarizer: Summarizer,
    filter: KeywordFilter,
    feeds: Vec<FeedSource>,
    config: NewsConfig,
}

impl NewsIngest {
    pub fn new(
        fetcher: Arc<dyn FetchFeed>,
        store: Arc<dyn DocumentStore>,
        logger: RunLogger,
        summarizer: Summarizer,
        config: NewsConfig,
    ) -> Self {
        Self {
            fetcher,
            engine: UpsertEngine::new(store.clone()),
            sweeper: RetentionSweeper::new(store.clone()),
            store,
            logger,
            summarizer,
            filter: KeywordFilter::ai_news(),
            feeds: curated_ai_feeds(),
            config,
        }
    }

    pub fn with_feeds(mut self, feeds: Vec<FeedSource>) -> Self {
        self.feeds = feeds;
        self
    }

    fn normalize_entry(&self, entry: &FeedEntry, source: &str) -> Option<CanonicalItem> {
        let title = normalize_text(&entry.title);
        let link = canonicalize_link(&entry.link);
        if title.is_empty() || link.is_empty() {
            return None;
        }

        let now = OffsetDateTime::now_utc();
        Some(CanonicalItem {
            title,
            link,
            summary: normalize_text(&entry.summary),
            source: source.to_string(),
            published_at: entry.published_at.unwrap_or(now),
            fetched_at: now,
            tags: entry.categories.clone(),
            image_url: entry.image_url.trim().to_string(),
            ai_summary: None,
            popularity: None,
        })
    }

    async fn ingest_feed(
        &self,
        feed: &FeedSource,
        seen_links: &mut HashSet<String>,
        report: &mut NewsRunReport,
    ) -> PipelineResult<FeedOutcome> {
        let mut outcome = FeedOutcome {
            source: feed.source.to_string(),
            url: feed.url.to_string(),
            success: false,
            fetched: 0,
            matched: 0,
            inserted: 0,
            attempts: 0,
            error: None,
        };

        let policy = RetryPolicy::new(
            self.config.fetch_retry_attempts,
            StdDuration::from_millis(self.config.fetch_retry_backoff_ms),
        );
        let url = feed.url;
        let (mut entries, attempts) =
            retry_with_backoff(policy, || self.fetcher.fetch(url)).await?;
        outcome.attempts = attempts;
        report.total_retried += u64::from(attempts.saturating_sub(1));

        entries.truncate(self.config.max_items_per_feed);
        outcome.fetched = entries.len() as u64;
        report.total_fetched += entries.len() as u64;

        // Relevance, normalization and run-wide link dedup. Everything
        // dropped here counts as skipped, not as an error.
        let mut candidates: Vec<CanonicalItem> = Vec::new();
        for entry in &entries {
            if !self
                .filter
                .matches_parts(&entry.title, &entry.summary, &entry.categories)
            {
                report.total_skipped += 1;
                continue;
            }

            let Some(item) = self.normalize_entry(entry, feed.source) else {
                report.total_skipped += 1;
                continue;
            };

            if !seen_links.insert(item.link.clone()) {
                report.total_skipped += 1;
                continue;
            }

            candidates.push(item);
        }

        outcome.matched = candidates.len() as u64;
        report.total_matched += candidates.len() as u64;

        if candidates.is_empty() {
            outcome.success = true;
            return Ok(outcome);
        }

        let keys: Vec<String> = candidates.iter().map(|c| c.link.clone()).collect();
        let existing = self
            .store
            .existing_values(NEWS_COLLECTION, "link", &keys)
            .await?;

        let mut new_items: Vec<CanonicalItem> = Vec::new();
        for candidate in candidates {
            if existing.contains(&candidate.link) {
                report.total_skipped += 1;
            } else {
                new_items.push(candidate);
            }
        }

        // Summaries only for items about to be inserted; existing rows keep
        // whatever summary they already carry.
        for item in &mut new_items {
            if !item.summary.is_empty() && self.summarizer.is_enabled() {
                let summary = self
                    .summarizer
                    .summarize(&item.title, &item.summary, &item.source)
                    .await;
                if !summary.is_empty() {
                    item.ai_summary = Some(summary);
                }
            }
        }

        let docs = new_items.iter().map(CanonicalItem::to_doc).collect();
        let inserted = self
            .engine
            .insert_new(NEWS_COLLECTION, &["link"], docs)
            .await?;

        outcome.inserted = inserted.inserted;
        report.total_inserted += inserted.inserted;
        report.total_skipped += inserted.skipped_existing + inserted.deduped_in_batch;
        outcome.success = true;
        Ok(outcome)
    }

    async fn fetch_and_save(&self, report: &mut NewsRunReport) -> PipelineResult<()> {
        let mut seen_links = HashSet::new();
        let feeds = self.feeds.clone();

        for feed in &feeds {
            match self.ingest_feed(feed, &mut seen_links, report).await {
                Ok(outcome) => report.feed_results.push(outcome),
                Err(e) if matches!(e, common::PipelineError::Store(_)) => return Err(e),
                Err(e) => {
                    warn!("feed {} failed: {}", feed.source, e);
                    report.feed_results.push(FeedOutcome {
                        source: feed.source.to_string(),
                        url: feed.url.to_string(),
                        success: false,
                        fetched: 0,
                        matched: 0,
                        inserted: 0,
                        attempts: self.config.fetch_retry_attempts,
                        error: Some(e.to_string()),
                    });
                }
            }
            report.feeds_processed += 1;
        }

        Ok(())
    }

    /// One full run: fetch + filter + insert, optional cleanup, run log.
    pub async fn run(&self, trigger: &str, with_cleanup: bool) -> PipelineResult<NewsRunReport> {
        let started_at = OffsetDateTime::now_utc();
        let mut report = NewsRunReport::default();

        let result = self.fetch_and_save(&mut report).await;

        let mut cleanup = RetentionOutcome::default();
        let cleanup_result = if result.is_ok() && with_cleanup {
            self.sweeper
                .sweep(
                    NEWS_COLLECTION,
                    "published_at",
                    self.config.retention_days,
                    self.config.max_records,
                    OffsetDateTime::now_utc(),
                )
                .await
                .map(|outcome| cleanup = outcome)
        } else {
            Ok(())
        };

        report.deleted_by_age = cleanup.deleted_by_age;
        report.deleted_by_overflow = cleanup.deleted_by_overflow;

        let counts = RunCounts {
            fetched: report.total_fetched,
            matched: report.total_matched,
            inserted: report.total_inserted,
            skipped: report.total_skipped,
            deleted: cleanup.total(),
        };

        if let Err(e) = result.and(cleanup_result) {
            self.logger
                .record_best_effort(
                    RunLog::finish(NEWS_JOB_NAME, trigger, RunStatus::Error, started_at, counts)
                        .with_error(e.to_string())
                        .with_meta(json!({"feeds_processed": report.feeds_processed})),
                )
                .await;
            return Err(e);
        }

        let has_feed_errors = report.feed_results.iter().any(|f| !f.success);
        let status = if has_feed_errors {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };

        self.logger
            .record(
                RunLog::finish(NEWS_JOB_NAME, trigger, status, started_at, counts).with_meta(
                    json!({
                        "feeds_processed": report.feeds_processed,
                        "retried": report.total_retried,
                        "feed_results": report.feed_results,
                    }),
                ),
            )
            .await?;

        info!(
            "news run: feeds={}, fetched={}, matched={}, inserted={}, deleted={}",
            report.feeds_processed,
            report.total_fetched,
            report.total_matched,
            report.total_inserted,
            counts.deleted
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::store::FindQuery;
    use common::{MemoryStore, PipelineError};
    use std::collections::HashMap;

    struct StubFetcher {
        feeds: HashMap<&'static str, Vec<FeedEntry>>,
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl FetchFeed for StubFetcher {
        async fn fetch(&self, url: &str) -> PipelineResult<Vec<FeedEntry>> {
            if self.failing.contains(&url) {
                return Err(PipelineError::Parse("selector drift".to_string()));
            }
            Ok(self.feeds.get(url).cloned().unwrap_or_default())
        }
    }

    fn entry(title: &str, link: &str, summary: &str) -> FeedEntry {
        FeedEntry {
            title: title.to_string(),
            link: link.to_string(),
            summary: summary.to_string(),
            categories: Vec::new(),
            published_at: Some(OffsetDateTime::now_utc()),
            image_url: String::new(),
        }
    }

    fn ingest(store: Arc<MemoryStore>, fetcher: StubFetcher, feeds: Vec<FeedSource>) -> NewsIngest {
        NewsIngest::new(
            Arc::new(fetcher),
            store.clone(),
            RunLogger::new(store),
            Summarizer::disabled(),
            NewsConfig::default(),
        )
        .with_feeds(feeds)
    }

    #[tokio::test]
    async fn end_to_end_counts_match_the_pipeline_contract() {
        // 5 items: 3 AI-relevant and new, 2 AI-relevant but duplicate links
        // of those 3 within the same batch.
        let items = vec![
            entry("GPT release", "https://x.com/a", "new llm"),
            entry("Claude update", "https://x.com/b", "assistant"),
            entry("Gemini notes", "https://x.com/c", "model card"),
            entry("GPT release again", "https://x.com/a", "duplicate"),
            entry("Claude update again", "https://x.com/b", "duplicate"),
        ];
        let store = Arc::new(MemoryStore::new());
        let fetcher = StubFetcher {
            feeds: HashMap::from([("https://feed/one", items)]),
            failing: vec![],
        };
        let job = ingest(
            store.clone(),
            fetcher,
            vec![FeedSource::new("one", "https://feed/one")],
        );

        let report = job.run("manual", false).await.unwrap();

        assert_eq!(report.total_fetched, 5);
        assert_eq!(report.total_matched, 3);
        assert_eq!(report.total_inserted, 3);
        assert_eq!(report.total_skipped, 2);

        let rows = store.find(NEWS_COLLECTION, FindQuery::new()).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn irrelevant_and_existing_items_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_many(
                NEWS_COLLECTION,
                &[serde_json::json!({"link": "https://x.com/seen", "title": "old"})],
            )
            .await
            .unwrap();

        let items = vec![
            entry("Machine learning digest", "https://x.com/seen", "weekly"),
            entry("Gardening tips", "https://x.com/garden", "tomatoes"),
            entry("New NLP paper", "https://x.com/new", "tokenizer"),
        ];
        let fetcher = StubFetcher {
            feeds: HashMap::from([("https://feed/one", items)]),
            failing: vec![],
        };
        let job = ingest(
            store.clone(),
            fetcher,
            vec![FeedSource::new("one", "https://feed/one")],
        );

        let report = job.run("manual", false).await.unwrap();
        assert_eq!(report.total_fetched, 3);
        assert_eq!(report.total_matched, 2);
        assert_eq!(report.total_inserted, 1);
        // One irrelevant, one already present.
        assert_eq!(report.total_skipped, 2);
    }

    #[tokio::test]
    async fn one_failing_feed_yields_partial_not_abort() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = StubFetcher {
            feeds: HashMap::from([(
                "https://feed/good",
                vec![entry("LLM news", "https://x.com/ok", "fine")],
            )]),
            failing: vec!["https://feed/bad"],
        };
        let job = ingest(
            store.clone(),
            fetcher,
            vec![
                FeedSource::new("bad", "https://feed/bad"),
                FeedSource::new("good", "https://feed/good"),
            ],
        );

        let report = job.run("manual", false).await.unwrap();
        assert_eq!(report.feeds_processed, 2);
        assert_eq!(report.total_inserted, 1);
        assert!(report.feed_results.iter().any(|f| !f.success));

        let logger = RunLogger::new(store);
        let log = logger
            .latest_for(NEWS_JOB_NAME, "manual")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.status, RunStatus::Partial);
    }

    #[tokio::test]
    async fn cleanup_is_reported_in_the_run_log() {
        let store = Arc::new(MemoryStore::new());
        let old = common::normalize::to_rfc3339(OffsetDateTime::now_utc() - time::Duration::days(30));
        store
            .insert_many(
                NEWS_COLLECTION,
                &[serde_json::json!({"link": "https://x.com/old", "published_at": old})],
            )
            .await
            .unwrap();

        let fetcher = StubFetcher {
            feeds: HashMap::new(),
            failing: vec![],
        };
        let job = ingest(
            store.clone(),
            fetcher,
            vec![FeedSource::new("one", "https://feed/one")],
        );

        let report = job.run("manual", true).await.unwrap();
        assert_eq!(report.deleted_by_age, 1);

        let logger = RunLogger::new(store);
        let log = logger
            .latest_for(NEWS_JOB_NAME, "manual")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.counts.deleted, 1);
    }
}
