//! Composes the ingestion jobs into per-job run() entry points. This is
//! also the administrative trigger surface: every method is idempotent to
//! call, respects the cooldown gates, and returns the run's summary
//! counts; `recent_run_logs` and `run_log_summary` are the read side.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use time::Date;
use tracing::info;

use airdrops::{AirdropsIngest, AirdropsReport, MirrorHtmlFetcher};
use common::run_log::RunLogSummary;
use common::{
    Config, DocumentStore, PipelineError, PipelineResult, RunLog, RunLogger, RunStatus, Summarizer,
    SupabaseStore,
};
use github_search::{GithubReport, GithubSearchIngest};
use hacker_news::{api::HackerNewsApi, HackerNewsIngest, HackerNewsReport};
use market_data::{MarketDataSync, MarketReport};
use news_feeds::{HttpFeedFetcher, NewsIngest, NewsRunReport, SourceFeedSweep, SweepReport};
use product_hunt::{
    graph::HttpGraphClient, CleanupReport, FeedReport, ProductHuntJobs, TopSnapshotReport,
    TopicProductsReport, TrendingBoardReport, DAILY_SNAPSHOT_LIMIT, LOW_VOTE_CLEANUP_DELETE_COUNT,
    SNAPSHOT_CLEANUP_DELETE_COUNT,
};
use scheduler::PipelineScheduler;

const CRON_TRIGGER: &str = "cron";

const NEWS_SYNC_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);
const MARKET_SYNC_INTERVAL: Duration = Duration::from_secs(10 * 60);
const TOP_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5 * 60);
const AIRDROPS_SYNC_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

pub struct Orchestrator {
    logger: RunLogger,
    news: NewsIngest,
    sweep: SourceFeedSweep,
    hacker_news: HackerNewsIngest,
    github: GithubSearchIngest,
    market: MarketDataSync,
    airdrops: AirdropsIngest,
    product_hunt: Option<ProductHuntJobs>,
}

impl Orchestrator {
    /// Build against the configured Supabase store.
    pub fn from_env() -> Result<Arc<Self>> {
        let config = Config::from_env()?;
        let store: Arc<dyn DocumentStore> = Arc::new(SupabaseStore::new(
            &config.supabase.rest_url,
            &config.supabase.key,
        ));
        Ok(Self::new(&config, store))
    }

    /// An absent Product Hunt token disables that adapter family only;
    /// everything else runs.
    pub fn new(config: &Config, store: Arc<dyn DocumentStore>) -> Arc<Self> {
        let logger = RunLogger::new(store.clone());
        let summarizer = Summarizer::new(config.openai_api_key.clone());
        let feed_fetcher = Arc::new(HttpFeedFetcher::new());

        let product_hunt = config.producthunt_token.as_ref().map(|token| {
            ProductHuntJobs::new(
                Arc::new(HttpGraphClient::new(token)),
                store.clone(),
                logger.clone(),
            )
        });
        if product_hunt.is_none() {
            info!("PRODUCTHUNT_TOKEN not set; Product Hunt jobs disabled");
        }

        Arc::new(Self {
            news: NewsIngest::new(
                feed_fetcher.clone(),
                store.clone(),
                logger.clone(),
                summarizer.clone(),
                config.news.clone(),
            ),
            sweep: SourceFeedSweep::new(feed_fetcher, store.clone(), logger.clone()),
            hacker_news: HackerNewsIngest::new(
                HackerNewsApi::new(),
                store.clone(),
                logger.clone(),
            ),
            github: GithubSearchIngest::new(store.clone(), logger.clone()),
            market: MarketDataSync::new(store.clone(), logger.clone()),
            airdrops: AirdropsIngest::new(
                Arc::new(MirrorHtmlFetcher::new()),
                store,
                logger.clone(),
                summarizer,
                config.airdrops_min_interval_hours,
            ),
            product_hunt,
            logger,
        })
    }

    fn product_hunt(&self) -> PipelineResult<&ProductHuntJobs> {
        self.product_hunt
            .as_ref()
            .ok_or(PipelineError::MissingCredential("PRODUCTHUNT_TOKEN"))
    }

    pub async fn run_news(&self, trigger: &str) -> PipelineResult<NewsRunReport> {
        self.news.run(trigger, true).await
    }

    pub async fn run_source_feeds(&self, trigger: &str) -> PipelineResult<SweepReport> {
        self.sweep.run(trigger).await
    }

    pub async fn run_hacker_news(&self, trigger: &str) -> PipelineResult<HackerNewsReport> {
        self.hacker_news.run(trigger).await
    }

    pub async fn run_github_search(&self, trigger: &str) -> PipelineResult<GithubReport> {
        self.github.run(trigger).await
    }

    pub async fn run_market_data(&self, trigger: &str) -> PipelineResult<MarketReport> {
        self.market.run(trigger).await
    }

    pub async fn run_airdrops(&self, trigger: &str, force: bool) -> PipelineResult<AirdropsReport> {
        self.airdrops.run(trigger, force).await
    }

    pub async fn run_product_hunt_sources(&self, trigger: &str) -> PipelineResult<FeedReport> {
        self.product_hunt()?.run_sources(trigger).await
    }

    pub async fn run_product_hunt_topics(&self, trigger: &str) -> PipelineResult<FeedReport> {
        self.product_hunt()?.run_topics(trigger).await
    }

    pub async fn run_topic_products(&self, trigger: &str) -> PipelineResult<TopicProductsReport> {
        self.product_hunt()?.run_topic_products(trigger).await
    }

    pub async fn run_top_products_snapshot(
        &self,
        trigger: &str,
        limit: usize,
        date: Option<Date>,
    ) -> PipelineResult<TopSnapshotReport> {
        self.product_hunt()?.run_top_snapshot(trigger, limit, date).await
    }

    pub async fn run_trending_board(&self, trigger: &str) -> PipelineResult<TrendingBoardReport> {
        self.product_hunt()?.run_trending_board(trigger).await
    }

    pub async fn run_snapshot_cleanup(&self) -> PipelineResult<CleanupReport> {
        self.product_hunt()?
            .run_snapshot_cleanup(SNAPSHOT_CLEANUP_DELETE_COUNT)
            .await
    }

    pub async fn run_low_vote_cleanup(&self) -> PipelineResult<CleanupReport> {
        self.product_hunt()?
            .run_low_vote_cleanup(LOW_VOTE_CLEANUP_DELETE_COUNT)
            .await
    }

    /// Snapshot plus the bounded cleanup of older snapshot rows; the
    /// recurring timer body.
    pub async fn run_top_snapshot_cycle(&self, trigger: &str) -> PipelineResult<TopSnapshotReport> {
        let report = self
            .run_top_products_snapshot(trigger, DAILY_SNAPSHOT_LIMIT, None)
            .await?;
        let cleanup = self.run_snapshot_cleanup().await?;
        info!(
            "top snapshot cycle: saved={}, fallback={}, old_deleted={}",
            report.saved, report.fallback_used, cleanup.deleted
        );
        Ok(report)
    }

    /// Weekly catalog refresh: topics first, then their products.
    pub async fn run_weekly_topic_refresh(&self, trigger: &str) -> PipelineResult<TopicProductsReport> {
        self.run_product_hunt_topics(trigger).await?;
        self.run_topic_products(trigger).await
    }

    pub async fn recent_run_logs(
        &self,
        page: usize,
        limit: usize,
        job_name: Option<&str>,
        status: Option<RunStatus>,
    ) -> PipelineResult<Vec<RunLog>> {
        self.logger
            .recent(page, limit.clamp(1, 50), job_name, status)
            .await
    }

    pub async fn run_log_summary(&self, days: i64) -> PipelineResult<RunLogSummary> {
        self.logger.summary(days).await
    }

    /// Wire every recurring job onto the scheduler. Jobs whose adapter is
    /// disabled by configuration are simply not registered.
    pub async fn register_jobs(
        self: Arc<Self>,
        scheduler: &mut PipelineScheduler,
    ) -> Result<()> {
        let orchestrator = self.clone();
        scheduler
            .add_interval_job("news_ingestion", NEWS_SYNC_INTERVAL, move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.run_news(CRON_TRIGGER).await?;
                    Ok(())
                }
            })
            .await?;

        let orchestrator = self.clone();
        scheduler
            .add_interval_job("market_data_sync", MARKET_SYNC_INTERVAL, move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.run_market_data(CRON_TRIGGER).await?;
                    Ok(())
                }
            })
            .await?;

        let orchestrator = self.clone();
        scheduler
            .add_interval_job("airdrops_ingestion", AIRDROPS_SYNC_INTERVAL, move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.run_airdrops(CRON_TRIGGER, false).await?;
                    Ok(())
                }
            })
            .await?;

        let orchestrator = self.clone();
        scheduler
            .add_daily_utc_job("source_feed_sweep", 3, 10, move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.run_source_feeds(CRON_TRIGGER).await?;
                    Ok(())
                }
            })
            .await?;

        let orchestrator = self.clone();
        scheduler
            .add_daily_utc_job("hackernews_ingestion", 3, 20, move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.run_hacker_news(CRON_TRIGGER).await?;
                    Ok(())
                }
            })
            .await?;

        let orchestrator = self.clone();
        scheduler
            .add_daily_utc_job("github_ingestion", 3, 30, move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.run_github_search(CRON_TRIGGER).await?;
                    Ok(())
                }
            })
            .await?;

        if self.product_hunt.is_some() {
            let orchestrator = self.clone();
            scheduler
                .add_interval_job("producthunt_top_snapshot", TOP_SNAPSHOT_INTERVAL, move || {
                    let orchestrator = orchestrator.clone();
                    async move {
                        orchestrator.run_top_snapshot_cycle(CRON_TRIGGER).await?;
                        Ok(())
                    }
                })
                .await?;

            let orchestrator = self.clone();
            scheduler
                .add_daily_utc_job("producthunt_trending_board", 0, 25, move || {
                    let orchestrator = orchestrator.clone();
                    async move {
                        orchestrator.run_trending_board(CRON_TRIGGER).await?;
                        Ok(())
                    }
                })
                .await?;

            let orchestrator = self.clone();
            scheduler
                .add_weekly_utc_job("producthunt_weekly_refresh", "Sun", 0, 5, move || {
                    let orchestrator = orchestrator.clone();
                    async move {
                        orchestrator.run_weekly_topic_refresh(CRON_TRIGGER).await?;
                        Ok(())
                    }
                })
                .await?;

            let orchestrator = self.clone();
            scheduler
                .add_weekly_utc_job("producthunt_weekly_cleanup", "Sun", 0, 15, move || {
                    let orchestrator = orchestrator.clone();
                    async move {
                        orchestrator.run_low_vote_cleanup().await?;
                        Ok(())
                    }
                })
                .await?;
        }

        Ok(())
    }
}
