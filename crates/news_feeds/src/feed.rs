use async_trait::async_trait;
use reqwest::Client;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use common::{PipelineError, PipelineResult};

const FEED_USER_AGENT: &str = "LaunchPulse-NewsBot/1.0";
const FEED_ACCEPT: &str = "application/rss+xml, application/xml, text/xml;q=0.9, */*;q=0.8";
const FEED_TIMEOUT_SECS: u64 = 15;

/// One configured feed endpoint.
#[derive(Debug, Clone)]
pub struct FeedSource {
    pub source: &'static str,
    pub url: &'static str,
}

impl FeedSource {
    pub const fn new(source: &'static str, url: &'static str) -> Self {
        Self { source, url }
    }
}

/// Curated AI-news feeds backing the `news` collection.
pub fn curated_ai_feeds() -> Vec<FeedSource> {
    vec![
        FeedSource::new("hackernews", "https://news.ycombinator.com/rss"),
        FeedSource::new(
            "techcrunch-ai",
            "https://techcrunch.com/tag/artificial-intelligence/feed/",
        ),
        FeedSource::new("venturebeat-ai", "https://venturebeat.com/category/ai/feed/"),
        FeedSource::new("openai-blog", "https://openai.com/blog/rss.xml"),
        FeedSource::new("huggingface", "https://huggingface.co/blog/feed.xml"),
        FeedSource::new("arxiv-ai", "https://arxiv.org/rss/cs.AI"),
        FeedSource::new("kdnuggets", "https://feeds.feedburner.com/kdnuggets"),
    ]
}

/// Broader sweep list feeding the external-sources queue.
pub fn sweep_feeds() -> Vec<FeedSource> {
    vec![
        FeedSource::new("hackernews", "https://news.ycombinator.com/rss"),
        FeedSource::new("devto-ai", "https://dev.to/feed/tag/ai"),
        FeedSource::new(
            "techcrunch-ai",
            "https://techcrunch.com/tag/artificial-intelligence/feed/",
        ),
        FeedSource::new("venturebeat-ai", "https://venturebeat.com/category/ai/feed/"),
        FeedSource::new("producthunt", "https://www.producthunt.com/feed"),
        FeedSource::new("reddit-ai", "https://www.reddit.com/r/artificial/.rss"),
        FeedSource::new("reddit-ml", "https://www.reddit.com/r/MachineLearning/.rss"),
        FeedSource::new("tds", "https://towardsdatascience.com/feed"),
        FeedSource::new("google-ai-blog", "https://ai.googleblog.com/feeds/posts/default"),
        FeedSource::new("openai-blog", "https://openai.com/blog/rss.xml"),
        FeedSource::new("huggingface", "https://huggingface.co/blog/feed.xml"),
        FeedSource::new("marktechpost", "https://www.marktechpost.com/feed/"),
        FeedSource::new("analyticsvidhya", "https://www.analyticsvidhya.com/blog/feed/"),
        FeedSource::new("unite-ai", "https://www.unite.ai/feed/"),
        FeedSource::new("ml-mastery", "https://machinelearningmastery.com/blog/feed/"),
        FeedSource::new(
            "theverge-ai",
            "https://www.theverge.com/ai-artificial-intelligence/rss/index.xml",
        ),
        FeedSource::new("arxiv-ai", "https://arxiv.org/rss/cs.AI"),
        FeedSource::new("kdnuggets", "https://feeds.feedburner.com/kdnuggets"),
    ]
}

/// Raw feed record before normalization; one variant shape for both RSS
/// and Atom inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub categories: Vec<String>,
    pub published_at: Option<OffsetDateTime>,
    pub image_url: String,
}

fn parse_feed_timestamp(value: &str) -> Option<OffsetDateTime> {
    let mut value = value.trim().to_string();
    // Feeds still emit the obsolete RFC 822 zone names; the parser wants a
    // numeric offset.
    for zone in ["GMT", "UTC", "UT"] {
        if let Some(stripped) = value.strip_suffix(zone) {
            if stripped.ends_with(' ') {
                value = format!("{stripped}+0000");
            }
            break;
        }
    }

    OffsetDateTime::parse(&value, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(&value, &Rfc3339))
        .ok()
}

fn entries_from_rss(channel: &rss::Channel) -> Vec<FeedEntry> {
    channel
        .items()
        .iter()
        .map(|item| {
            let summary = item
                .description()
                .or_else(|| item.content())
                .unwrap_or_default();
            let link = item
                .link()
                .map(str::to_string)
                .or_else(|| item.guid().map(|g| g.value().to_string()))
                .unwrap_or_default();

            FeedEntry {
                title: item.title().unwrap_or_default().to_string(),
                link,
                summary: summary.to_string(),
                categories: item
                    .categories()
                    .iter()
                    .map(|c| c.name().trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
                published_at: item.pub_date().and_then(parse_feed_timestamp),
                image_url: item
                    .enclosure()
                    .filter(|e| e.mime_type().starts_with("image/"))
                    .map(|e| e.url().to_string())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

fn entries_from_atom(feed: &atom_syndication::Feed) -> Vec<FeedEntry> {
    feed.entries()
        .iter()
        .map(|entry| {
            let summary = entry
                .summary()
                .map(|s| s.to_string())
                .or_else(|| entry.content().and_then(|c| c.value().map(str::to_string)))
                .unwrap_or_default();
            let timestamp = entry
                .published()
                .map(|d| d.timestamp())
                .unwrap_or_else(|| entry.updated().timestamp());

            FeedEntry {
                title: entry.title().to_string(),
                link: entry
                    .links()
                    .first()
                    .map(|l| l.href().to_string())
                    .unwrap_or_default(),
                summary,
                categories: entry
                    .categories()
                    .iter()
                    .map(|c| c.term().trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
                published_at: OffsetDateTime::from_unix_timestamp(timestamp).ok(),
                image_url: String::new(),
            }
        })
        .collect()
}

/// Parse a feed body, trying RSS 2.0 first and Atom second.
pub fn parse_feed(body: &[u8]) -> PipelineResult<Vec<FeedEntry>> {
    if let Ok(channel) = rss::Channel::read_from(body) {
        return Ok(entries_from_rss(&channel));
    }

    if let Ok(feed) = atom_syndication::Feed::read_from(body) {
        return Ok(entries_from_atom(&feed));
    }

    Err(PipelineError::Parse(
        "body is neither RSS nor Atom".to_string(),
    ))
}

/// Fetch seam so the ingest pipeline is testable without a network.
#[async_trait]
pub trait FetchFeed: Send + Sync {
    async fn fetch(&self, url: &str) -> PipelineResult<Vec<FeedEntry>>;
}

pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(FEED_TIMEOUT_SECS))
                .user_agent(FEED_USER_AGENT)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

impl Default for HttpFeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchFeed for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> PipelineResult<Vec<FeedEntry>> {
        let response = self
            .client
            .get(url)
            .header("Accept", FEED_ACCEPT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Api(format!(
                "feed fetch failed ({}): {}",
                response.status(),
                url
            )));
        }

        let body = response.bytes().await?;
        parse_feed(&body)
    }
}
