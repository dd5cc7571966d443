use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::warn;

use common::normalize::{canonicalize_link, normalize_text};
use common::{
    KeywordFilter, PipelineResult, RunCounts, RunLog, RunLogger, RunStatus, UpsertEngine,
};

use crate::feed::{sweep_feeds, FeedSource, FetchFeed};

pub const EXTERNAL_SOURCES_COLLECTION: &str = "external_sources";
pub const SWEEP_JOB_NAME: &str = "source_feed_sweep";

const SWEEP_MAX_ITEMS_PER_FEED: usize = 20;

/// Looser keyword net than the news filter; candidates land in a pending
/// queue for curation instead of the public news list.
const SWEEP_KEYWORDS: &[&str] = &[
    "ai",
    "artificial intelligence",
    "machine learning",
    "gpt",
    "llm",
    "startup",
];

#[derive(Debug, Clone, Serialize)]
pub struct SweepFeedOutcome {
    pub source: String,
    pub url: String,
    pub success: bool,
    pub fetched: u64,
    pub matched: u64,
    pub inserted: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub feeds_processed: u64,
    pub total_fetched: u64,
    pub total_matched: u64,
    pub total_inserted: u64,
    pub total_skipped: u64,
    pub feed_results: Vec<SweepFeedOutcome>,
}

/// Broad feed sweep into `external_sources` (status `pending`).
pub struct SourceFeedSweep {
    fetcher: Arc<dyn FetchFeed>,
    engine: UpsertEngine,
    logger: RunLogger,
    filter: KeywordFilter,
    feeds: Vec<FeedSource>,
}

impl SourceFeedSweep {
    pub fn new(
        fetcher: Arc<dyn FetchFeed>,
        store: Arc<dyn common::DocumentStore>,
        logger: RunLogger,
    ) -> Self {
        Self {
            fetcher,
            engine: UpsertEngine::new(store),
            logger,
            filter: KeywordFilter::new(SWEEP_KEYWORDS, &[]),
            feeds: sweep_feeds(),
        }
    }

    pub fn with_feeds(mut self, feeds: Vec<FeedSource>) -> Self {
        self.feeds = feeds;
        self
    }

    pub async fn run(&self, trigger: &str) -> PipelineResult<SweepReport> {
        let started_at = OffsetDateTime::now_utc();
        let mut report = SweepReport::default();

        for feed in &self.feeds {
            match self.sweep_feed(feed).await {
                Ok(outcome) => {
                    report.feeds_processed += 1;
                    report.total_fetched += outcome.fetched;
                    report.total_matched += outcome.matched;
                    report.total_inserted += outcome.inserted;
                    report.total_skipped += outcome.matched - outcome.inserted;
                    report.feed_results.push(outcome);
                }
                Err(e) if matches!(e, common::PipelineError::Store(_)) => {
                    self.logger
                        .record_best_effort(
                            RunLog::finish(
                                SWEEP_JOB_NAME,
                                trigger,
                                RunStatus::Error,
                                started_at,
                                RunCounts {
                                    fetched: report.total_fetched,
                                    matched: report.total_matched,
                                    inserted: report.total_inserted,
                                    skipped: report.total_skipped,
                                    deleted: 0,
                                },
                            )
                            .with_error(e.to_string()),
                        )
                        .await;
                    return Err(e);
                }
                Err(e) => {
                    warn!("sweep feed {} failed: {}", feed.source, e);
                    report.feed_results.push(SweepFeedOutcome {
                        source: feed.source.to_string(),
                        url: feed.url.to_string(),
                        success: false,
                        fetched: 0,
                        matched: 0,
                        inserted: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let status = if report.feed_results.iter().any(|f| !f.success) {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };

        self.logger
            .record(
                RunLog::finish(
                    SWEEP_JOB_NAME,
                    trigger,
                    status,
                    started_at,
                    RunCounts {
                        fetched: report.total_fetched,
                        matched: report.total_matched,
                        inserted: report.total_inserted,
                        skipped: report.total_skipped,
                        deleted: 0,
                    },
                )
                .with_meta(json!({"feed_results": report.feed_results})),
            )
            .await?;

        Ok(report)
    }

    async fn sweep_feed(&self, feed: &FeedSource) -> PipelineResult<SweepFeedOutcome> {
        let mut entries = self.fetcher.fetch(feed.url).await?;
        entries.truncate(SWEEP_MAX_ITEMS_PER_FEED);

        let fetched = entries.len() as u64;
        let docs: Vec<serde_json::Value> = entries
            .iter()
            .filter(|entry| {
                self.filter
                    .matches_parts(&entry.title, &entry.summary, &entry.categories)
            })
            .filter_map(|entry| {
                let title = normalize_text(&entry.title);
                let link = canonicalize_link(&entry.link);
                if title.is_empty() || link.is_empty() {
                    return None;
                }
                Some(json!({
                    "title": title,
                    "description": normalize_text(&entry.summary),
                    "link": link,
                    "source": feed.source,
                    "status": "pending",
                }))
            })
            .collect();

        let outcome = self
            .engine
            .insert_new(EXTERNAL_SOURCES_COLLECTION, &["link"], docs)
            .await?;

        Ok(SweepFeedOutcome {
            source: feed.source.to_string(),
            url: feed.url.to_string(),
            success: true,
            fetched,
            matched: outcome.unique,
            inserted: outcome.inserted,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedEntry;
    use async_trait::async_trait;
    use common::store::FindQuery;
    use common::{DocumentStore, MemoryStore};
    use std::collections::HashMap;

    struct StubFetcher {
        feeds: HashMap<&'static str, Vec<FeedEntry>>,
    }

    #[async_trait]
    impl FetchFeed for StubFetcher {
        async fn fetch(&self, url: &str) -> PipelineResult<Vec<FeedEntry>> {
            Ok(self.feeds.get(url).cloned().unwrap_or_default())
        }
    }

    fn entry(title: &str, link: &str) -> FeedEntry {
        FeedEntry {
            title: title.to_string(),
            link: link.to_string(),
            summary: String::new(),
            categories: Vec::new(),
            published_at: None,
            image_url: String::new(),
        }
    }

    #[tokio::test]
    async fn matched_entries_become_pending_sources() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = StubFetcher {
            feeds: HashMap::from([(
                "https://feed/a",
                vec![
                    entry("An LLM benchmark", "https://s.com/1"),
                    entry("Sourdough basics", "https://s.com/2"),
                ],
            )]),
        };

        let sweep = SourceFeedSweep::new(
            Arc::new(fetcher),
            store.clone(),
            RunLogger::new(store.clone()),
        )
        .with_feeds(vec![FeedSource::new("a", "https://feed/a")]);

        let report = sweep.run("manual").await.unwrap();
        assert_eq!(report.total_fetched, 2);
        assert_eq!(report.total_matched, 1);
        assert_eq!(report.total_inserted, 1);

        let rows = store
            .find(EXTERNAL_SOURCES_COLLECTION, FindQuery::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["status"], json!("pending"));
    }

    #[tokio::test]
    async fn rerun_inserts_nothing_new() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher {
            feeds: HashMap::from([(
                "https://feed/a",
                vec![entry("GPT tooling roundup", "https://s.com/1")],
            )]),
        });

        let sweep = SourceFeedSweep::new(fetcher, store.clone(), RunLogger::new(store.clone()))
            .with_feeds(vec![FeedSource::new("a", "https://feed/a")]);

        sweep.run("manual").await.unwrap();
        let second = sweep.run("manual").await.unwrap();

        assert_eq!(second.total_inserted, 0);
        assert_eq!(second.total_skipped, 1);
        assert_eq!(
            store
                .count(EXTERNAL_SOURCES_COLLECTION, &[])
                .await
                .unwrap(),
            1
        );
    }
}
