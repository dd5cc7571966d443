pub mod graph;
pub mod models;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use time::{Date, Duration, OffsetDateTime};
use tracing::{info, warn};

use common::normalize::to_rfc3339;
use common::store::{Condition, FindQuery, Order};
use common::{
    DocumentStore, PipelineResult, RunCounts, RunLog, RunLogger, RunStatus, UpsertEngine,
};

use graph::{
    GraphExecutor, POSTS_QUERY, PRODUCTS_BY_TOPIC_QUERY, TOPICS_QUERY, TOP_OF_DAY_QUERY,
    TRENDING_QUERY,
};
use models::{
    day_key, post_to_product_doc, post_to_snapshot_doc, post_to_source_doc, post_to_trending_doc,
    snapshot_expiry, snapshot_key, topic_to_doc, utc_day_window, Connection, PostNode, TopicNode,
};

pub const SOURCES_COLLECTION: &str = "ph_sources";
pub const TOPICS_COLLECTION: &str = "ph_topics";
pub const PRODUCTS_COLLECTION: &str = "ph_products";
pub const TOP_PRODUCTS_COLLECTION: &str = "ph_top_products";
pub const TRENDING_COLLECTION: &str = "ph_trending";

pub const SOURCES_JOB: &str = "producthunt_sources";
pub const TOPICS_JOB: &str = "producthunt_topics";
pub const TOPIC_PRODUCTS_JOB: &str = "producthunt_topic_products";
pub const TOP_SNAPSHOT_JOB: &str = "producthunt_top_snapshot";
pub const TRENDING_BOARD_JOB: &str = "producthunt_trending_board";

pub const DAILY_SNAPSHOT_LIMIT: usize = 50;
pub const SNAPSHOT_CLEANUP_DELETE_COUNT: usize = 50;
pub const LOW_VOTE_CLEANUP_DELETE_COUNT: usize = 40;

const SNAPSHOT_PAGE_SIZE: usize = 20;
const MAX_SNAPSHOT_LIMIT: usize = 50;
const TOPIC_FETCH_DELAY: StdDuration = StdDuration::from_secs(1);

fn connection_from<T>(payload: &Value, root: &str) -> Connection<T>
where
    T: DeserializeOwned + Default,
{
    serde_json::from_value(payload["data"][root].clone()).unwrap_or_default()
}

#[derive(Debug, Default, Serialize)]
pub struct FeedReport {
    pub fetched: u64,
    pub matched: u64,
    pub inserted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicOutcome {
    pub topic: String,
    pub success: bool,
    pub fetched: u64,
    pub inserted: u64,
    pub updated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct TopicProductsReport {
    pub topics_processed: u64,
    pub total_fetched: u64,
    pub total_inserted: u64,
    pub total_updated: u64,
    pub results: Vec<TopicOutcome>,
}

#[derive(Debug, Default, Serialize)]
pub struct TopSnapshotReport {
    pub snapshot_key: String,
    pub posted_after: String,
    pub posted_before: String,
    pub fallback_used: bool,
    pub fetched: u64,
    pub saved: u64,
    pub expires_at: String,
}

#[derive(Debug, Default, Serialize)]
pub struct TrendingBoardReport {
    pub fetched: u64,
    pub inserted: u64,
    pub removed: u64,
    pub source_date: String,
}

#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    pub requested: u64,
    pub candidates: u64,
    pub deleted: u64,
}

struct DayWindowFetch {
    posts: Vec<PostNode>,
    posted_after: OffsetDateTime,
    posted_before: OffsetDateTime,
    window_day: Date,
    fallback_used: bool,
}

/// Product Hunt job family sharing one authenticated GraphQL executor.
pub struct ProductHuntJobs {
    executor: Arc<dyn GraphExecutor>,
    store: Arc<dyn DocumentStore>,
    engine: UpsertEngine,
    logger: RunLogger,
}

impl ProductHuntJobs {
    pub fn new(
        executor: Arc<dyn GraphExecutor>,
        store: Arc<dyn DocumentStore>,
        logger: RunLogger,
    ) -> Self {
        Self {
            executor,
            engine: UpsertEngine::new(store.clone()),
            store,
            logger,
        }
    }

    async fn record_outcome<T: Serialize>(
        &self,
        job_name: &str,
        trigger: &str,
        started_at: OffsetDateTime,
        counts: RunCounts,
        status: RunStatus,
        meta: &T,
        error: Option<String>,
    ) -> PipelineResult<()> {
        let mut log = RunLog::finish(job_name, trigger, status, started_at, counts)
            .with_meta(serde_json::to_value(meta).unwrap_or(Value::Null));
        if let Some(error) = error {
            log = log.with_error(error);
        }

        if status == RunStatus::Error {
            self.logger.record_best_effort(log).await;
            Ok(())
        } else {
            self.logger.record(log).await
        }
    }

    /// Newest launches into the append-only sources feed. Natural key is
    /// (ph_id, url): a post matching either is already known.
    pub async fn run_sources(&self, trigger: &str) -> PipelineResult<FeedReport> {
        let started_at = OffsetDateTime::now_utc();

        let result: PipelineResult<FeedReport> = async {
            let payload = self.executor.execute(POSTS_QUERY, json!({})).await?;
            let posts: Vec<PostNode> = connection_from(&payload, "posts").nodes();
            let fetched = posts.len() as u64;

            let docs: Vec<Value> = posts.iter().filter_map(post_to_source_doc).collect();
            let outcome = self
                .engine
                .insert_new(SOURCES_COLLECTION, &["ph_id", "url"], docs)
                .await?;

            Ok(FeedReport {
                fetched,
                matched: outcome.unique,
                inserted: outcome.inserted,
            })
        }
        .await;

        match result {
            Ok(report) => {
                self.record_outcome(
                    SOURCES_JOB,
                    trigger,
                    started_at,
                    RunCounts {
                        fetched: report.fetched,
                        matched: report.matched,
                        inserted: report.inserted,
                        skipped: report.matched - report.inserted,
                        deleted: 0,
                    },
                    RunStatus::Success,
                    &report,
                    None,
                )
                .await?;
                Ok(report)
            }
            Err(e) => {
                self.record_outcome(
                    SOURCES_JOB,
                    trigger,
                    started_at,
                    RunCounts::default(),
                    RunStatus::Error,
                    &json!({}),
                    Some(e.to_string()),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// Topic catalog; append-only on (ph_id, slug).
    pub async fn run_topics(&self, trigger: &str) -> PipelineResult<FeedReport> {
        let started_at = OffsetDateTime::now_utc();

        let result: PipelineResult<FeedReport> = async {
            let payload = self.executor.execute(TOPICS_QUERY, json!({})).await?;
            let topics: Vec<TopicNode> = connection_from(&payload, "topics").nodes();
            let fetched = topics.len() as u64;

            let docs: Vec<Value> = topics.iter().filter_map(topic_to_doc).collect();
            let outcome = self
                .engine
                .insert_new(TOPICS_COLLECTION, &["ph_id", "slug"], docs)
                .await?;

            Ok(FeedReport {
                fetched,
                matched: outcome.unique,
                inserted: outcome.inserted,
            })
        }
        .await;

        match result {
            Ok(report) => {
                self.record_outcome(
                    TOPICS_JOB,
                    trigger,
                    started_at,
                    RunCounts {
                        fetched: report.fetched,
                        matched: report.matched,
                        inserted: report.inserted,
                        skipped: report.matched - report.inserted,
                        deleted: 0,
                    },
                    RunStatus::Success,
                    &report,
                    None,
                )
                .await?;
                Ok(report)
            }
            Err(e) => {
                self.record_outcome(
                    TOPICS_JOB,
                    trigger,
                    started_at,
                    RunCounts::default(),
                    RunStatus::Error,
                    &json!({}),
                    Some(e.to_string()),
                )
                .await?;
                Err(e)
            }
        }
    }

    async fn refresh_topic(&self, topic_slug: &str) -> PipelineResult<TopicOutcome> {
        let payload = self
            .executor
            .execute(PRODUCTS_BY_TOPIC_QUERY, json!({"topic": topic_slug}))
            .await?;
        let posts: Vec<PostNode> = connection_from(&payload, "posts").nodes();
        let fetched = posts.len() as u64;

        let docs: Vec<Value> = posts
            .iter()
            .filter_map(|post| post_to_product_doc(post, topic_slug))
            .collect();
        let outcome = self
            .engine
            .refresh(PRODUCTS_COLLECTION, "ph_id", &[], docs)
            .await?;

        Ok(TopicOutcome {
            topic: topic_slug.to_string(),
            success: true,
            fetched,
            inserted: outcome.inserted,
            updated: outcome.updated,
            error: None,
        })
    }

    async fn stored_topic_slugs(&self) -> PipelineResult<Vec<String>> {
        let rows = self
            .store
            .find(
                TOPICS_COLLECTION,
                FindQuery::new()
                    .filter(Condition::ne("slug", ""))
                    .sort("followers_count", Order::Desc)
                    .select(&["slug"]),
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get("slug").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Refresh the product catalog topic by topic, sequentially, with a
    /// politeness delay between upstream calls. One failing topic marks
    /// the run partial; it never aborts the remaining topics.
    pub async fn run_topic_products(&self, trigger: &str) -> PipelineResult<TopicProductsReport> {
        let started_at = OffsetDateTime::now_utc();
        let mut report = TopicProductsReport::default();

        let slugs = match self.stored_topic_slugs().await {
            Ok(slugs) => slugs,
            Err(e) => {
                self.record_outcome(
                    TOPIC_PRODUCTS_JOB,
                    trigger,
                    started_at,
                    RunCounts::default(),
                    RunStatus::Error,
                    &json!({}),
                    Some(e.to_string()),
                )
                .await?;
                return Err(e);
            }
        };

        for (index, slug) in slugs.iter().enumerate() {
            match self.refresh_topic(slug).await {
                Ok(outcome) => {
                    report.total_fetched += outcome.fetched;
                    report.total_inserted += outcome.inserted;
                    report.total_updated += outcome.updated;
                    report.results.push(outcome);
                }
                Err(e) => {
                    warn!("topic {} refresh failed: {}", slug, e);
                    report.results.push(TopicOutcome {
                        topic: slug.clone(),
                        success: false,
                        fetched: 0,
                        inserted: 0,
                        updated: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
            report.topics_processed += 1;

            if index + 1 < slugs.len() {
                tokio::time::sleep(TOPIC_FETCH_DELAY).await;
            }
        }

        let status = if report.results.iter().any(|r| !r.success) {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };

        self.record_outcome(
            TOPIC_PRODUCTS_JOB,
            trigger,
            started_at,
            RunCounts {
                fetched: report.total_fetched,
                matched: report.total_fetched,
                inserted: report.total_inserted,
                skipped: 0,
                deleted: 0,
            },
            status,
            &report,
            None,
        )
        .await?;

        info!(
            "topic products run: topics={}, inserted={}, updated={}",
            report.topics_processed, report.total_inserted, report.total_updated
        );
        Ok(report)
    }

    async fn fetch_day_window(&self, day: Date, limit: usize) -> PipelineResult<Vec<PostNode>> {
        let (posted_after, posted_before) = utc_day_window(day);
        let mut posts: Vec<PostNode> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut has_next_page = true;

        while has_next_page && posts.len() < limit {
            let first = SNAPSHOT_PAGE_SIZE.min(limit - posts.len());
            let payload = self
                .executor
                .execute(
                    TOP_OF_DAY_QUERY,
                    json!({
                        "first": first,
                        "after": cursor,
                        "postedAfter": to_rfc3339(posted_after),
                        "postedBefore": to_rfc3339(posted_before),
                    }),
                )
                .await?;

            let connection: Connection<PostNode> = connection_from(&payload, "posts");
            let page_info = connection.page_info.clone().unwrap_or_default();
            let page_posts = connection.nodes();

            if page_posts.is_empty() {
                break;
            }
            posts.extend(page_posts);

            has_next_page = page_info.has_next_page;
            cursor = page_info.end_cursor;
            if cursor.is_none() {
                break;
            }
        }

        posts.truncate(limit);
        Ok(posts)
    }

    /// Top posts for one UTC day. Without an explicit date, an empty
    /// current day falls back once to the previous UTC day (the current
    /// day has no launches yet right after midnight).
    async fn fetch_top_live(
        &self,
        limit: usize,
        date: Option<Date>,
        now: OffsetDateTime,
    ) -> PipelineResult<DayWindowFetch> {
        let limit = limit.clamp(1, MAX_SNAPSHOT_LIMIT);
        let base_day = date.unwrap_or_else(|| now.date());

        let mut posts = self.fetch_day_window(base_day, limit).await?;
        let mut window_day = base_day;
        let mut fallback_used = false;

        if date.is_none() && posts.is_empty() {
            let yesterday = base_day - Duration::days(1);
            posts = self.fetch_day_window(yesterday, limit).await?;
            window_day = yesterday;
            fallback_used = true;
        }

        let (posted_after, posted_before) = utc_day_window(window_day);
        Ok(DayWindowFetch {
            posts,
            posted_after,
            posted_before,
            window_day,
            fallback_used,
        })
    }

    /// Ranked snapshot of the day's top posts, upserted on the composite
    /// (ph_id, snapshot_key) so re-running within a minute is idempotent.
    pub async fn run_top_snapshot(
        &self,
        trigger: &str,
        limit: usize,
        date: Option<Date>,
    ) -> PipelineResult<TopSnapshotReport> {
        let started_at = OffsetDateTime::now_utc();

        let result: PipelineResult<TopSnapshotReport> = async {
            let now = OffsetDateTime::now_utc();
            let live = self.fetch_top_live(limit, date, now).await?;

            let key = snapshot_key(now);
            let expires_at = snapshot_expiry(live.window_day);

            let docs: Vec<Value> = live
                .posts
                .iter()
                .enumerate()
                .filter_map(|(index, post)| {
                    post_to_snapshot_doc(
                        post,
                        index + 1,
                        &key,
                        live.posted_after,
                        live.posted_before,
                        expires_at,
                    )
                })
                .collect();

            let saved = self
                .engine
                .upsert_composite(TOP_PRODUCTS_COLLECTION, &["ph_id", "snapshot_key"], docs)
                .await?;

            Ok(TopSnapshotReport {
                snapshot_key: key,
                posted_after: to_rfc3339(live.posted_after),
                posted_before: to_rfc3339(live.posted_before),
                fallback_used: live.fallback_used,
                fetched: live.posts.len() as u64,
                saved,
                expires_at: to_rfc3339(expires_at),
            })
        }
        .await;

        match result {
            Ok(report) => {
                self.record_outcome(
                    TOP_SNAPSHOT_JOB,
                    trigger,
                    started_at,
                    RunCounts {
                        fetched: report.fetched,
                        matched: report.saved,
                        inserted: report.saved,
                        skipped: 0,
                        deleted: 0,
                    },
                    RunStatus::Success,
                    &report,
                    None,
                )
                .await?;
                Ok(report)
            }
            Err(e) => {
                self.record_outcome(
                    TOP_SNAPSHOT_JOB,
                    trigger,
                    started_at,
                    RunCounts::default(),
                    RunStatus::Error,
                    &json!({}),
                    Some(e.to_string()),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// Bounded cleanup of snapshot rows that are not part of the most
    /// recent snapshot, oldest snapshots first.
    pub async fn run_snapshot_cleanup(&self, delete_count: usize) -> PipelineResult<CleanupReport> {
        let delete_count = delete_count.clamp(1, 200);

        let latest = self
            .store
            .find(
                TOP_PRODUCTS_COLLECTION,
                FindQuery::new()
                    .sort("snapshot_key", Order::Desc)
                    .limit(1)
                    .select(&["snapshot_key"]),
            )
            .await?;
        let Some(latest_key) = latest
            .first()
            .and_then(|row| row.get("snapshot_key"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(CleanupReport {
                requested: delete_count as u64,
                ..Default::default()
            });
        };

        let candidates = self
            .store
            .find(
                TOP_PRODUCTS_COLLECTION,
                FindQuery::new()
                    .filter(Condition::ne("snapshot_key", latest_key.as_str()))
                    .sort("snapshot_key", Order::Asc)
                    .sort("rank", Order::Asc)
                    .limit(delete_count)
                    .select(&["id"]),
            )
            .await?;

        let ids: Vec<Value> = candidates
            .iter()
            .filter_map(|row| row.get("id").cloned())
            .collect();
        if ids.is_empty() {
            return Ok(CleanupReport {
                requested: delete_count as u64,
                ..Default::default()
            });
        }

        let deleted = self
            .store
            .delete_where(TOP_PRODUCTS_COLLECTION, &[Condition::is_in("id", ids)])
            .await?;

        Ok(CleanupReport {
            requested: delete_count as u64,
            candidates: candidates.len() as u64,
            deleted,
        })
    }

    /// Daily trending board; every run is authoritative for the full set.
    pub async fn run_trending_board(&self, trigger: &str) -> PipelineResult<TrendingBoardReport> {
        let started_at = OffsetDateTime::now_utc();

        let result: PipelineResult<TrendingBoardReport> = async {
            let payload = self.executor.execute(TRENDING_QUERY, json!({})).await?;
            let posts: Vec<PostNode> = connection_from(&payload, "posts").nodes();
            let fetched = posts.len() as u64;

            let source_date = day_key(OffsetDateTime::now_utc().date());
            let mut seen: HashSet<String> = HashSet::new();
            let docs: Vec<Value> = posts
                .iter()
                .filter_map(|post| post_to_trending_doc(post, &source_date))
                .filter(|doc| {
                    let key = format!(
                        "{}::{}",
                        doc["name"].as_str().unwrap_or("").to_lowercase(),
                        doc["website"].as_str().unwrap_or("").to_lowercase()
                    );
                    seen.insert(key)
                })
                .collect();

            let outcome = self.engine.replace_all(TRENDING_COLLECTION, docs).await?;

            Ok(TrendingBoardReport {
                fetched,
                inserted: outcome.inserted,
                removed: outcome.deleted,
                source_date,
            })
        }
        .await;

        match result {
            Ok(report) => {
                self.record_outcome(
                    TRENDING_BOARD_JOB,
                    trigger,
                    started_at,
                    RunCounts {
                        fetched: report.fetched,
                        matched: report.inserted,
                        inserted: report.inserted,
                        skipped: 0,
                        deleted: report.removed,
                    },
                    RunStatus::Success,
                    &report,
                    None,
                )
                .await?;
                Ok(report)
            }
            Err(e) => {
                self.record_outcome(
                    TRENDING_BOARD_JOB,
                    trigger,
                    started_at,
                    RunCounts::default(),
                    RunStatus::Error,
                    &json!({}),
                    Some(e.to_string()),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// Weekly catalog trim: drop the lowest-voted products, bounded per
    /// run, ties broken by insertion id.
    pub async fn run_low_vote_cleanup(&self, delete_count: usize) -> PipelineResult<CleanupReport> {
        let delete_count = delete_count.clamp(1, 500);

        let candidates = self
            .store
            .find(
                PRODUCTS_COLLECTION,
                FindQuery::new()
                    .sort("votes_count", Order::Asc)
                    .sort("id", Order::Asc)
                    .limit(delete_count)
                    .select(&["id"]),
            )
            .await?;

        let ids: Vec<Value> = candidates
            .iter()
            .filter_map(|row| row.get("id").cloned())
            .collect();
        if ids.is_empty() {
            return Ok(CleanupReport {
                requested: delete_count as u64,
                ..Default::default()
            });
        }

        let deleted = self
            .store
            .delete_where(PRODUCTS_COLLECTION, &[Condition::is_in("id", ids)])
            .await?;

        Ok(CleanupReport {
            requested: delete_count as u64,
            candidates: candidates.len() as u64,
            deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::MemoryStore;
    use std::sync::Mutex;
    use time::macros::date;

    /// Scripted executor: returns canned payloads keyed by query + call
    /// order, recording the variables of every call.
    struct ScriptedExecutor {
        responses: Mutex<Vec<Value>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedExecutor {
        fn new(responses: Vec<Value>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GraphExecutor for ScriptedExecutor {
        async fn execute(&self, query: &str, variables: Value) -> PipelineResult<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((query.to_string(), variables));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(json!({"data": {"posts": {"edges": []}}}))
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    fn jobs(executor: ScriptedExecutor) -> (Arc<MemoryStore>, ProductHuntJobs) {
        let (store, jobs, _) = jobs_with(executor);
        (store, jobs)
    }

    fn jobs_with(
        executor: ScriptedExecutor,
    ) -> (Arc<MemoryStore>, ProductHuntJobs, Arc<ScriptedExecutor>) {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(executor);
        let jobs = ProductHuntJobs::new(
            executor.clone(),
            store.clone(),
            RunLogger::new(store.clone()),
        );
        (store, jobs, executor)
    }

    fn post_edge(id: &str, name: &str, votes: i64) -> Value {
        json!({"node": {
            "id": id,
            "name": name,
            "slug": name.to_lowercase(),
            "url": format!("https://ph/{id}"),
            "website": format!("https://{id}.example"),
            "votesCount": votes,
        }})
    }

    fn page(edges: Vec<Value>, has_next: bool, cursor: Option<&str>) -> Value {
        json!({"data": {"posts": {
            "edges": edges,
            "pageInfo": {"hasNextPage": has_next, "endCursor": cursor},
        }}})
    }

    #[tokio::test(start_paused = true)]
    async fn pagination_follows_cursors_until_limit() {
        let executor = ScriptedExecutor::new(vec![
            page(
                (0..20).map(|n| post_edge(&format!("a{n}"), &format!("A{n}"), n)).collect(),
                true,
                Some("cursor-1"),
            ),
            page(
                (0..10).map(|n| post_edge(&format!("b{n}"), &format!("B{n}"), n)).collect(),
                false,
                None,
            ),
        ]);
        let (_, jobs) = jobs(executor);

        let report = jobs
            .run_top_snapshot("manual", 30, Some(date!(2026 - 08 - 07)))
            .await
            .unwrap();
        assert_eq!(report.fetched, 30);
        assert_eq!(report.saved, 30);
        assert!(!report.fallback_used);
        assert_eq!(report.posted_after, "2026-08-07T00:00:00Z");
        assert_eq!(report.posted_before, "2026-08-08T00:00:00Z");
    }

    #[tokio::test(start_paused = true)]
    async fn second_page_requests_use_the_end_cursor() {
        let executor = ScriptedExecutor::new(vec![
            page(vec![post_edge("a", "A", 1)], true, Some("cursor-1")),
            page(vec![post_edge("b", "B", 2)], false, None),
        ]);
        let (_, jobs, executor) = jobs_with(executor);

        let report = jobs
            .run_top_snapshot("manual", 2, Some(date!(2026 - 08 - 07)))
            .await
            .unwrap();
        assert_eq!(report.fetched, 2);

        let calls = executor.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1["after"], json!(null));
        assert_eq!(calls[0].1["first"], json!(2));
        assert_eq!(calls[1].1["after"], json!("cursor-1"));
        assert_eq!(calls[1].1["first"], json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_day_without_explicit_date_falls_back_to_yesterday() {
        let executor = ScriptedExecutor::new(vec![
            page(vec![], false, None),
            page(vec![post_edge("y1", "Yesterday", 7)], false, None),
        ]);
        let (_, jobs) = jobs(executor);

        let report = jobs.run_top_snapshot("manual", 10, None).await.unwrap();
        assert!(report.fallback_used);
        assert_eq!(report.fetched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_date_never_falls_back() {
        let executor = ScriptedExecutor::new(vec![page(vec![], false, None)]);
        let (_, jobs) = jobs(executor);

        let report = jobs
            .run_top_snapshot("manual", 10, Some(date!(2026 - 08 - 07)))
            .await
            .unwrap();
        assert!(!report.fallback_used);
        assert_eq!(report.fetched, 0);
    }

    #[tokio::test]
    async fn sources_feed_skips_posts_seen_by_id_or_url() {
        let executor = ScriptedExecutor::new(vec![json!({"data": {"posts": {"edges": [
            post_edge("p1", "One", 10),
            post_edge("p2", "Two", 20),
        ]}}})]);
        let (store, jobs) = jobs(executor);
        store
            .insert_many(
                SOURCES_COLLECTION,
                &[json!({"ph_id": "p1", "url": "https://other/url"})],
            )
            .await
            .unwrap();

        let report = jobs.run_sources("manual").await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn trending_board_replaces_prior_set_and_dedupes() {
        let executor = ScriptedExecutor::new(vec![json!({"data": {"posts": {"edges": [
            post_edge("t1", "Same", 5),
            post_edge("t1", "Same", 5),
            post_edge("t2", "Other", 3),
        ]}}})]);
        let (store, jobs) = jobs(executor);
        store
            .insert_many(TRENDING_COLLECTION, &[json!({"name": "stale"})])
            .await
            .unwrap();

        let report = jobs.run_trending_board("manual").await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.removed, 1);
        // The two "Same" posts share a website, so one survives.
        assert_eq!(report.inserted, 2);

        assert_eq!(store.count(TRENDING_COLLECTION, &[]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn snapshot_cleanup_spares_the_latest_snapshot() {
        let executor = ScriptedExecutor::new(vec![]);
        let (store, jobs) = jobs(executor);

        store
            .insert_many(
                TOP_PRODUCTS_COLLECTION,
                &[
                    json!({"ph_id": "a", "snapshot_key": "2026-08-06T00:05:00Z", "rank": 1}),
                    json!({"ph_id": "b", "snapshot_key": "2026-08-06T00:05:00Z", "rank": 2}),
                    json!({"ph_id": "a", "snapshot_key": "2026-08-07T00:05:00Z", "rank": 1}),
                ],
            )
            .await
            .unwrap();

        let report = jobs.run_snapshot_cleanup(50).await.unwrap();
        assert_eq!(report.deleted, 2);

        let remaining = store
            .find(TOP_PRODUCTS_COLLECTION, FindQuery::new())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["snapshot_key"], json!("2026-08-07T00:05:00Z"));
    }

    #[tokio::test]
    async fn low_vote_cleanup_deletes_bounded_oldest_lowest() {
        let executor = ScriptedExecutor::new(vec![]);
        let (store, jobs) = jobs(executor);

        store
            .insert_many(
                PRODUCTS_COLLECTION,
                &[
                    json!({"ph_id": "a", "votes_count": 5}),
                    json!({"ph_id": "b", "votes_count": 1}),
                    json!({"ph_id": "c", "votes_count": 3}),
                ],
            )
            .await
            .unwrap();

        let report = jobs.run_low_vote_cleanup(2).await.unwrap();
        assert_eq!(report.deleted, 2);

        let remaining = store.find(PRODUCTS_COLLECTION, FindQuery::new()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["ph_id"], json!("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn topic_refresh_isolates_a_failing_topic() {
        struct FlakyExecutor;

        #[async_trait]
        impl GraphExecutor for FlakyExecutor {
            async fn execute(&self, _query: &str, variables: Value) -> PipelineResult<Value> {
                if variables["topic"] == json!("broken") {
                    return Err(common::PipelineError::Api("boom".to_string()));
                }
                Ok(json!({"data": {"posts": {"edges": [
                    {"node": {"id": "p1", "name": "One", "slug": "one", "url": "https://ph/p1"}}
                ]}}}))
            }
        }

        let store = Arc::new(MemoryStore::new());
        store
            .insert_many(
                TOPICS_COLLECTION,
                &[
                    json!({"ph_id": "t1", "slug": "broken", "followers_count": 10}),
                    json!({"ph_id": "t2", "slug": "ai", "followers_count": 5}),
                ],
            )
            .await
            .unwrap();

        let jobs = ProductHuntJobs::new(
            Arc::new(FlakyExecutor),
            store.clone(),
            RunLogger::new(store.clone()),
        );

        let report = jobs.run_topic_products("manual").await.unwrap();
        assert_eq!(report.topics_processed, 2);
        assert_eq!(report.total_inserted, 1);
        assert!(report.results.iter().any(|r| !r.success));

        let logger = RunLogger::new(store);
        let log = logger
            .latest_for(TOPIC_PRODUCTS_JOB, "manual")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.status, RunStatus::Partial);
    }
}
