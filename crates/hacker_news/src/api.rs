use reqwest::Client;

use common::{PipelineError, PipelineResult};

use crate::models::HnStory;

const HN_BASE_URL: &str = "https://hacker-news.firebaseio.com/v0";

#[derive(Clone)]
pub struct HackerNewsApi {
    client: Client,
    base_url: String,
}

impl HackerNewsApi {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: HN_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn top_story_ids(&self, limit: usize) -> PipelineResult<Vec<u64>> {
        let url = format!("{}/topstories.json", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(PipelineError::Api(format!(
                "top stories fetch failed: {}",
                response.status()
            )));
        }

        let ids: Vec<u64> = response.json().await?;
        Ok(ids.into_iter().take(limit).collect())
    }

    /// A story that cannot be fetched is simply absent; individual item
    /// failures never fail the run.
    pub async fn story(&self, id: u64) -> PipelineResult<Option<HnStory>> {
        let url = format!("{}/item/{}.json", self.base_url, id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        Ok(response.json().await.ok())
    }
}

impl Default for HackerNewsApi {
    fn default() -> Self {
        Self::new()
    }
}
