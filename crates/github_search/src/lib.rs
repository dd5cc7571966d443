use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::info;

use common::{
    DocumentStore, PipelineError, PipelineResult, RunCounts, RunLog, RunLogger, RunStatus,
    UpsertEngine,
};

pub const GITHUB_JOB_NAME: &str = "github_ingestion";
pub const GITHUB_SOURCE: &str = "github";
pub const EXTERNAL_SOURCES_COLLECTION: &str = "external_sources";

const GITHUB_SEARCH_URL: &str = "https://api.github.com/search/repositories";
const SEARCH_QUERY: &str = "ai in:name,description";
const PER_PAGE: u32 = 20;
const GITHUB_USER_AGENT: &str = "LaunchPulse-Automation";

#[derive(Debug, Clone, Deserialize)]
pub struct RepoRow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub stargazers_count: i64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    items: Vec<RepoRow>,
}

#[derive(Debug, Default, Serialize)]
pub struct GithubReport {
    pub total_count: u64,
    pub fetched: u64,
    pub matched: u64,
    pub inserted: u64,
}

pub fn repo_to_doc(repo: &RepoRow) -> Option<Value> {
    let title = repo.name.trim();
    let link = repo.html_url.trim();
    if title.is_empty() || link.is_empty() {
        return None;
    }

    Some(json!({
        "title": title,
        "description": repo.description.as_deref().unwrap_or("").trim(),
        "link": link,
        "source": GITHUB_SOURCE,
        "popularity": repo.stargazers_count,
        "status": "pending",
    }))
}

/// Star-sorted repository search feeding the pending-sources queue.
pub struct GithubSearchIngest {
    client: Client,
    engine: UpsertEngine,
    logger: RunLogger,
    search_url: String,
}

impl GithubSearchIngest {
    pub fn new(store: Arc<dyn DocumentStore>, logger: RunLogger) -> Self {
        Self {
            client: Client::new(),
            engine: UpsertEngine::new(store),
            logger,
            search_url: GITHUB_SEARCH_URL.to_string(),
        }
    }

    pub fn with_search_url(mut self, url: &str) -> Self {
        self.search_url = url.to_string();
        self
    }

    async fn search(&self) -> PipelineResult<SearchResponse> {
        let per_page = PER_PAGE.to_string();
        let response = self
            .client
            .get(&self.search_url)
            .query(&[
                ("q", SEARCH_QUERY),
                ("sort", "stars"),
                ("order", "desc"),
                ("per_page", per_page.as_str()),
            ])
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", GITHUB_USER_AGENT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Api(format!(
                "GitHub fetch failed: {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    pub async fn run(&self, trigger: &str) -> PipelineResult<GithubReport> {
        let started_at = OffsetDateTime::now_utc();

        match self.execute().await {
            Ok(report) => {
                self.logger
                    .record(
                        RunLog::finish(
                            GITHUB_JOB_NAME,
                            trigger,
                            RunStatus::Success,
                            started_at,
                            RunCounts {
                                fetched: report.fetched,
                                matched: report.matched,
                                inserted: report.inserted,
                                skipped: report.matched - report.inserted,
                                deleted: 0,
                            },
                        )
                        .with_meta(json!({"total_count": report.total_count})),
                    )
                    .await?;

                info!(
                    "github run: fetched={}, matched={}, inserted={}",
                    report.fetched, report.matched, report.inserted
                );
                Ok(report)
            }
            Err(e) => {
                self.logger
                    .record_best_effort(
                        RunLog::finish(
                            GITHUB_JOB_NAME,
                            trigger,
                            RunStatus::Error,
                            started_at,
                            RunCounts::default(),
                        )
                        .with_error(e.to_string()),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn execute(&self) -> PipelineResult<GithubReport> {
        let payload = self.search().await?;
        let fetched = payload.items.len() as u64;

        let docs: Vec<Value> = payload.items.iter().filter_map(repo_to_doc).collect();
        if docs.is_empty() {
            return Ok(GithubReport {
                total_count: payload.total_count,
                fetched,
                ..Default::default()
            });
        }

        let outcome = self
            .engine
            .insert_new(EXTERNAL_SOURCES_COLLECTION, &["link"], docs)
            .await?;

        Ok(GithubReport {
            total_count: payload.total_count,
            fetched,
            matched: outcome.unique,
            inserted: outcome.inserted,
        })
    }
}
