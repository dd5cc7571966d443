pub mod parse;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};

use common::error::AttemptFailure;
use common::normalize::to_rfc3339;
use common::{
    CooldownDecision, CooldownGate, DocumentStore, PipelineError, PipelineResult, RunCounts,
    RunLog, RunLogger, RunStatus, Summarizer, UpsertEngine,
};

use parse::{parse_airdrops_page, ParsedPage, ScrapedCard};

pub const AIRDROPS_JOB_NAME: &str = "airdrops_external_ingestion";
pub const AIRDROPS_SOURCE: &str = "airdrops.io";
pub const AIRDROPS_COLLECTION: &str = "airdrop_sources";

const AIRDROPS_BASE_URL: &str = "https://airdrops.io/";
const AIRDROPS_MIRROR_URLS: &[&str] = &["https://airdrops.io/", "https://www.airdrops.io/"];
const SCRAPE_TIMEOUT_SECS: u64 = 30;
const SCRAPE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/130.0 Safari/537.36";

/// Network seam: fetch the listing HTML from whichever mirror answers.
#[async_trait]
pub trait FetchListingHtml: Send + Sync {
    async fn fetch(&self) -> PipelineResult<String>;
}

/// Walks the mirror list in order; only if every mirror fails does the
/// caller see one aggregated unreachable error with all the diagnostics.
pub struct MirrorHtmlFetcher {
    client: Client,
    urls: Vec<String>,
}

impl MirrorHtmlFetcher {
    pub fn new() -> Self {
        Self::with_urls(AIRDROPS_MIRROR_URLS.iter().map(|u| u.to_string()).collect())
    }

    pub fn with_urls(urls: Vec<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(SCRAPE_TIMEOUT_SECS))
                .user_agent(SCRAPE_USER_AGENT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            urls,
        }
    }
}

impl Default for MirrorHtmlFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchListingHtml for MirrorHtmlFetcher {
    async fn fetch(&self) -> PipelineResult<String> {
        let mut attempts: Vec<AttemptFailure> = Vec::new();

        for url in &self.urls {
            let result = async {
                let response = self
                    .client
                    .get(url)
                    .header(
                        "Accept",
                        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                    )
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(PipelineError::Api(format!(
                        "status {}",
                        response.status()
                    )));
                }
                Ok(response.text().await?)
            }
            .await;

            match result {
                Ok(html) => return Ok(html),
                Err(e) => {
                    error!("airdrops request failed for {}: {}", url, e);
                    attempts.push(AttemptFailure {
                        url: url.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(PipelineError::SourceUnreachable {
            message: format!(
                "airdrops source unreachable after {} attempts; check DNS/network and retry",
                attempts.len()
            ),
            attempts,
        })
    }
}

#[derive(Debug, Default, Serialize)]
pub struct AirdropsReport {
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_allowed_at: Option<String>,
    pub fetched: u64,
    pub inserted: u64,
    pub updated: u64,
    pub selector_used: String,
    pub status_summary: HashMap<String, u64>,
    pub first_seed: bool,
    pub force: bool,
}

fn card_to_doc(card: &ScrapedCard, imported_at: OffsetDateTime) -> Value {
    json!({
        "title": card.title,
        "description": card.description,
        "source_url": card.source_url,
        "logo": card.logo,
        "status": card.status,
        "source": AIRDROPS_SOURCE,
        "imported_at": to_rfc3339(imported_at),
        "selector_used": card.selector_used,
    })
}

fn status_summary(cards: &[ScrapedCard]) -> HashMap<String, u64> {
    let mut summary = HashMap::new();
    for card in cards {
        let key = if card.status.is_empty() {
            "unlabeled".to_string()
        } else {
            card.status.clone()
        };
        *summary.entry(key).or_insert(0) += 1;
    }
    summary
}

/// Cooldown-gated scrape of the airdrops listing; refreshable upserts keyed
/// on the card URL, with AI summaries written once on first insert.
pub struct AirdropsIngest {
    fetcher: Arc<dyn FetchListingHtml>,
    store: Arc<dyn DocumentStore>,
    engine: UpsertEngine,
    gate: CooldownGate,
    logger: RunLogger,
    summarizer: Summarizer,
    min_interval: Duration,
}

impl AirdropsIngest {
    pub fn new(
        fetcher: Arc<dyn FetchListingHtml>,
        store: Arc<dyn DocumentStore>,
        logger: RunLogger,
        summarizer: Summarizer,
        min_interval_hours: i64,
    ) -> Self {
        Self {
            fetcher,
            engine: UpsertEngine::new(store.clone()),
            gate: CooldownGate::new(store.clone(), logger.clone()),
            store,
            logger,
            summarizer,
            min_interval: Duration::hours(min_interval_hours),
        }
    }

    pub async fn run(&self, trigger: &str, force: bool) -> PipelineResult<AirdropsReport> {
        let started_at = OffsetDateTime::now_utc();

        let decision = self
            .gate
            .check(
                AIRDROPS_JOB_NAME,
                AIRDROPS_SOURCE,
                AIRDROPS_COLLECTION,
                self.min_interval,
                force,
                started_at,
            )
            .await?;

        let first_seed = match decision {
            CooldownDecision::Skip { next_allowed_at } => {
                let next_allowed = to_rfc3339(next_allowed_at);
                self.logger
                    .record(
                        RunLog::finish(
                            AIRDROPS_JOB_NAME,
                            trigger,
                            RunStatus::Partial,
                            started_at,
                            RunCounts {
                                skipped: 1,
                                ..Default::default()
                            },
                        )
                        .with_meta(json!({
                            "reason": "cooldown",
                            "next_allowed_at": next_allowed,
                        })),
                    )
                    .await?;

                info!("airdrops run skipped by cooldown until {}", next_allowed);
                return Ok(AirdropsReport {
                    skipped: true,
                    reason: Some("cooldown".to_string()),
                    next_allowed_at: Some(next_allowed),
                    force,
                    ..Default::default()
                });
            }
            CooldownDecision::Proceed { first_seed } => first_seed,
        };

        match self.execute(force, first_seed).await {
            Ok((report, page)) => {
                let status = if report.fetched == 0 {
                    RunStatus::Partial
                } else {
                    RunStatus::Success
                };

                let meta = if report.fetched == 0 {
                    warn!(
                        "airdrops scrape parsed nothing; selectors may have drifted: {:?}",
                        page.attempts
                    );
                    json!({
                        "selector_used": page.selector_used,
                        "selector_attempts": page.attempts,
                        "warning": "no listings parsed; check selector strategy",
                    })
                } else {
                    json!({
                        "selector_used": page.selector_used,
                        "force": force,
                        "first_seed": first_seed,
                    })
                };

                self.logger
                    .record(
                        RunLog::finish(
                            AIRDROPS_JOB_NAME,
                            trigger,
                            status,
                            started_at,
                            RunCounts {
                                fetched: report.fetched,
                                matched: report.fetched,
                                inserted: report.inserted,
                                skipped: u64::from(report.fetched == 0),
                                deleted: 0,
                            },
                        )
                        .with_meta(meta),
                    )
                    .await?;

                info!(
                    "airdrops run: fetched={}, inserted={}, updated={}, selector={}",
                    report.fetched, report.inserted, report.updated, report.selector_used
                );
                Ok(report)
            }
            Err(e) => {
                let meta = match &e {
                    PipelineError::SourceUnreachable { attempts, .. } => {
                        json!({"attempts": attempts})
                    }
                    _ => json!({}),
                };

                self.logger
                    .record_best_effort(
                        RunLog::finish(
                            AIRDROPS_JOB_NAME,
                            trigger,
                            RunStatus::Error,
                            started_at,
                            RunCounts::default(),
                        )
                        .with_error(e.to_string())
                        .with_meta(meta),
                    )
                    .await;

                error!("airdrops scrape failed: {}", e);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        force: bool,
        first_seed: bool,
    ) -> PipelineResult<(AirdropsReport, ParsedPage)> {
        let html = self.fetcher.fetch().await?;
        let page = parse_airdrops_page(&html, AIRDROPS_BASE_URL)?;

        if page.cards.is_empty() {
            return Ok((
                AirdropsReport {
                    selector_used: page.selector_used.clone(),
                    force,
                    first_seed,
                    ..Default::default()
                },
                page,
            ));
        }

        let imported_at = OffsetDateTime::now_utc();
        let keys: Vec<String> = page.cards.iter().map(|c| c.source_url.clone()).collect();
        let existing = self
            .store
            .existing_values(AIRDROPS_COLLECTION, "source_url", &keys)
            .await?;

        let mut docs = Vec::with_capacity(page.cards.len());
        for card in &page.cards {
            let mut doc = card_to_doc(card, imported_at);

            // Summaries cost an upstream call; only fresh cards get one.
            // The upsert protects the field on update anyway.
            if !existing.contains(&card.source_url) && self.summarizer.is_enabled() {
                let input = if card.description.is_empty() {
                    &card.title
                } else {
                    &card.description
                };
                let summary = self
                    .summarizer
                    .summarize(&card.title, input, AIRDROPS_SOURCE)
                    .await;
                if let Value::Object(map) = &mut doc {
                    map.insert("ai_summary".to_string(), Value::from(summary));
                }
            }

            docs.push(doc);
        }

        let outcome = self
            .engine
            .refresh(AIRDROPS_COLLECTION, "source_url", &["ai_summary"], docs)
            .await?;

        let report = AirdropsReport {
            skipped: false,
            reason: None,
            next_allowed_at: None,
            fetched: page.cards.len() as u64,
            inserted: outcome.inserted,
            updated: outcome.updated,
            selector_used: page.selector_used.clone(),
            status_summary: status_summary(&page.cards),
            first_seed,
            force,
        };

        Ok((report, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::store::FindQuery;
    use common::MemoryStore;

    struct StubFetcher {
        html: String,
    }

    #[async_trait]
    impl FetchListingHtml for StubFetcher {
        async fn fetch(&self) -> PipelineResult<String> {
            Ok(self.html.clone())
        }
    }

    struct DeadFetcher;

    #[async_trait]
    impl FetchListingHtml for DeadFetcher {
        async fn fetch(&self) -> PipelineResult<String> {
            Err(PipelineError::SourceUnreachable {
                message: "airdrops source unreachable after 2 attempts".to_string(),
                attempts: vec![
                    AttemptFailure {
                        url: "https://airdrops.io/".to_string(),
                        message: "dns failure".to_string(),
                    },
                    AttemptFailure {
                        url: "https://www.airdrops.io/".to_string(),
                        message: "timeout".to_string(),
                    },
                ],
            })
        }
    }

    const CARDS_HTML: &str = r#"
        <div class="latest-airdrops">
          <div class="card"><span class="badge">Hot</span><h3>Alpha</h3>
            <p>First</p><a href="/airdrop/alpha">go</a></div>
          <div class="card"><h3>Beta</h3><p>Second</p><a href="/airdrop/beta">go</a></div>
        </div>"#;

    fn ingest(store: Arc<MemoryStore>, html: &str) -> AirdropsIngest {
        AirdropsIngest::new(
            Arc::new(StubFetcher {
                html: html.to_string(),
            }),
            store.clone(),
            RunLogger::new(store),
            Summarizer::disabled(),
            6,
        )
    }

    #[tokio::test]
    async fn scrape_upserts_cards_and_logs_success() {
        let store = Arc::new(MemoryStore::new());
        let job = ingest(store.clone(), CARDS_HTML);

        let report = job.run("manual", false).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.status_summary.get("hot"), Some(&1));
        assert_eq!(report.status_summary.get("unlabeled"), Some(&1));

        let logger = RunLogger::new(store);
        let log = logger
            .latest_for(AIRDROPS_JOB_NAME, "manual")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn second_run_within_cooldown_is_skipped_partial() {
        let store = Arc::new(MemoryStore::new());
        let job = ingest(store.clone(), CARDS_HTML);

        job.run("manual", false).await.unwrap();
        let second = job.run("manual", false).await.unwrap();

        assert!(second.skipped);
        assert_eq!(second.reason.as_deref(), Some("cooldown"));
        assert!(second.next_allowed_at.is_some());

        let logger = RunLogger::new(store);
        let log = logger
            .latest_for(AIRDROPS_JOB_NAME, "manual")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.status, RunStatus::Partial);
        assert_eq!(log.meta["reason"], json!("cooldown"));
    }

    #[tokio::test]
    async fn force_bypasses_cooldown_and_preserves_manual_edits() {
        let store = Arc::new(MemoryStore::new());
        let job = ingest(store.clone(), CARDS_HTML);

        job.run("manual", false).await.unwrap();

        // Operator edits a summary by hand.
        store
            .upsert_many(
                AIRDROPS_COLLECTION,
                &["source_url"],
                &[json!({
                    "source_url": "https://airdrops.io/airdrop/alpha",
                    "ai_summary": "curated by hand",
                })],
            )
            .await
            .unwrap();

        let second = job.run("manual", true).await.unwrap();
        assert!(!second.skipped);
        assert_eq!(second.updated, 2);

        let rows = store.find(AIRDROPS_COLLECTION, FindQuery::new()).await.unwrap();
        let alpha = rows
            .iter()
            .find(|r| r["source_url"] == json!("https://airdrops.io/airdrop/alpha"))
            .unwrap();
        assert_eq!(alpha["ai_summary"], json!("curated by hand"));
    }

    #[tokio::test]
    async fn zero_parsed_cards_logs_partial_with_diagnostics() {
        let store = Arc::new(MemoryStore::new());
        let job = ingest(store.clone(), "<html><body><p>redesigned</p></body></html>");

        let report = job.run("manual", false).await.unwrap();
        assert_eq!(report.fetched, 0);

        let logger = RunLogger::new(store);
        let log = logger
            .latest_for(AIRDROPS_JOB_NAME, "manual")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.status, RunStatus::Partial);
        assert!(log.meta["selector_attempts"].is_array());
    }

    #[tokio::test]
    async fn unreachable_source_logs_error_with_attempts() {
        let store = Arc::new(MemoryStore::new());
        let job = AirdropsIngest::new(
            Arc::new(DeadFetcher),
            store.clone(),
            RunLogger::new(store.clone()),
            Summarizer::disabled(),
            6,
        );

        let result = job.run("manual", false).await;
        assert!(matches!(
            result,
            Err(PipelineError::SourceUnreachable { .. })
        ));

        let logger = RunLogger::new(store);
        let log = logger
            .latest_for(AIRDROPS_JOB_NAME, "manual")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.status, RunStatus::Error);
        assert_eq!(log.meta["attempts"].as_array().unwrap().len(), 2);
    }
}
