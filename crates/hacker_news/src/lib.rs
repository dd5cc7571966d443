pub mod api;
pub mod models;

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tracing::{info, warn};

use common::normalize::normalize_text;
use common::{
    DocumentStore, PipelineResult, RunCounts, RunLog, RunLogger, RunStatus, UpsertEngine,
};

use api::HackerNewsApi;
use models::HnStory;

pub const HN_JOB_NAME: &str = "hackernews_ingestion";
pub const HN_SOURCE: &str = "hackernews";
pub const EXTERNAL_SOURCES_COLLECTION: &str = "external_sources";
pub const LISTINGS_COLLECTION: &str = "listings";

const MAX_STORIES: usize = 100;

/// Keywords that mark a Hacker News title as AI-related. Bare "ai" needs a
/// word boundary so "maintain" or "airline" do not match.
const HN_AI_KEYWORDS: &[&str] = &[
    "artificial intelligence",
    "machine learning",
    "deep learning",
    "neural",
    "llm",
    "large language model",
    "gpt",
    "openai",
    "claude",
    "gemini",
    "anthropic",
    "copilot",
    "rag",
    "vector db",
    "fine-tune",
    "fine tune",
    "inference",
    "prompt",
    "agent",
    "agents",
    "multimodal",
    "diffusion",
    "transformer",
    "mistral",
    "llama",
    "grok",
];

pub fn is_ai_related_title(title: &str, ai_word: &Regex) -> bool {
    let text = title.to_lowercase();
    if ai_word.is_match(&text) {
        return true;
    }
    HN_AI_KEYWORDS.iter().any(|k| text.contains(k))
}

fn story_to_source_doc(story: &HnStory) -> Option<Value> {
    let title = story.title.trim();
    let link = story.url.as_deref().unwrap_or("").trim();
    if title.is_empty() || link.is_empty() {
        return None;
    }

    Some(json!({
        "title": title,
        "description": normalize_text(story.text.as_deref().unwrap_or("")),
        "link": link,
        "category": "News",
        "news": true,
        "tags": ["ai", "hn", "news"],
        "source": HN_SOURCE,
        "popularity": story.score,
        "status": "approved",
    }))
}

fn source_doc_to_listing(doc: &Value) -> Value {
    json!({
        "link": doc["link"],
        "title": doc["title"],
        "description": doc["description"],
        "category": "News",
        "tags": doc["tags"],
    })
}

#[derive(Debug, Default, Serialize)]
pub struct HackerNewsReport {
    pub fetched: u64,
    pub matched: u64,
    pub inserted: u64,
    pub published: u64,
    pub updated: u64,
}

/// AI-relevant top stories into the pending-sources queue, mirrored into
/// the listings catalog as refreshable entries.
pub struct HackerNewsIngest {
    api: HackerNewsApi,
    engine: UpsertEngine,
    logger: RunLogger,
    ai_word: Regex,
    max_stories: usize,
}

impl HackerNewsIngest {
    pub fn new(api: HackerNewsApi, store: Arc<dyn DocumentStore>, logger: RunLogger) -> Self {
        Self {
            api,
            engine: UpsertEngine::new(store),
            logger,
            ai_word: Regex::new(r"(?i)\bai\b").unwrap(),
            max_stories: MAX_STORIES,
        }
    }

    async fn fetch_candidates(&self) -> PipelineResult<(u64, Vec<Value>)> {
        let ids = self.api.top_story_ids(self.max_stories).await?;
        let fetched = ids.len() as u64;

        let mut tasks = JoinSet::new();
        for (index, id) in ids.into_iter().enumerate() {
            let api = self.api.clone();
            tasks.spawn(async move {
                match api.story(id).await {
                    Ok(story) => (index, story),
                    Err(e) => {
                        warn!("error fetching story {}: {}", id, e);
                        (index, None)
                    }
                }
            });
        }

        let mut stories: Vec<(usize, HnStory)> = Vec::new();
        while let Some(result) = tasks.join_next().await {
            if let Ok((index, Some(story))) = result {
                stories.push((index, story));
            }
        }
        // Restore top-stories order; the fan-out completes out of order.
        stories.sort_by_key(|(index, _)| *index);

        let docs = stories
            .iter()
            .filter(|(_, story)| is_ai_related_title(&story.title, &self.ai_word))
            .filter_map(|(_, story)| story_to_source_doc(story))
            .collect();

        Ok((fetched, docs))
    }

    pub async fn run(&self, trigger: &str) -> PipelineResult<HackerNewsReport> {
        let started_at = OffsetDateTime::now_utc();

        let result = self.execute().await;
        match result {
            Ok(report) => {
                self.logger
                    .record(
                        RunLog::finish(
                            HN_JOB_NAME,
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
                        .with_meta(json!({"published": report.published, "updated": report.updated})),
                    )
                    .await?;

                info!(
                    "hacker news run: fetched={}, matched={}, inserted={}",
                    report.fetched, report.matched, report.inserted
                );
                Ok(report)
            }
            Err(e) => {
                self.logger
                    .record_best_effort(
                        RunLog::finish(
                            HN_JOB_NAME,
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

    async fn execute(&self) -> PipelineResult<HackerNewsReport> {
        let (fetched, docs) = self.fetch_candidates().await?;

        if docs.is_empty() {
            return Ok(HackerNewsReport {
                fetched,
                ..Default::default()
            });
        }

        let listings: Vec<Value> = docs.iter().map(source_doc_to_listing).collect();

        let sources_outcome = self
            .engine
            .insert_new(EXTERNAL_SOURCES_COLLECTION, &["link"], docs)
            .await?;

        // The catalog mirrors every matched story; existing entries get
        // their title/description refreshed.
        let listings_outcome = self
            .engine
            .refresh(LISTINGS_COLLECTION, "link", &[], listings)
            .await?;

        Ok(HackerNewsReport {
            fetched,
            matched: sources_outcome.unique,
            inserted: sources_outcome.inserted,
            published: listings_outcome.inserted,
            updated: listings_outcome.updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ai_word() -> Regex {
        Regex::new(r"(?i)\bai\b").unwrap()
    }

    #[test]
    fn bare_ai_requires_a_word_boundary() {
        let re = ai_word();
        assert!(is_ai_related_title("AI beats benchmark", &re));
        assert!(is_ai_related_title("Shipping an AI-powered editor", &re));
        assert!(!is_ai_related_title("Maintaining old airline systems", &re));
    }

    #[test]
    fn keyword_titles_match_without_the_word_ai() {
        let re = ai_word();
        assert!(is_ai_related_title("Running Llama locally", &re));
        assert!(is_ai_related_title("Fine-tune embeddings on a laptop", &re));
        assert!(!is_ai_related_title("Rust 2.0 release notes", &re));
    }

    #[test]
    fn stories_without_title_or_url_are_dropped() {
        let story = HnStory {
            id: 1,
            title: "Prompt caching deep dive".to_string(),
            score: 120,
            url: None,
            text: None,
        };
        assert!(story_to_source_doc(&story).is_none());

        let story = HnStory {
            url: Some("https://example.com/post".to_string()),
            ..story
        };
        let doc = story_to_source_doc(&story).unwrap();
        assert_eq!(doc["popularity"], json!(120));
        assert_eq!(doc["status"], json!("approved"));
    }

    #[test]
    fn listing_doc_carries_catalog_fields_only() {
        let story = HnStory {
            id: 2,
            title: "LLM routing".to_string(),
            score: 10,
            url: Some("https://example.com/llm".to_string()),
            text: Some("<p>details</p>".to_string()),
        };
        let doc = story_to_source_doc(&story).unwrap();
        let listing = source_doc_to_listing(&doc);

        assert_eq!(listing["link"], doc["link"]);
        assert_eq!(listing["description"], json!("details"));
        assert!(listing.get("popularity").is_none());
    }
}
