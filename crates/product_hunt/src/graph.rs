use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use common::{PipelineError, PipelineResult};

const PRODUCTHUNT_GRAPHQL_URL: &str = "https://api.producthunt.com/v2/api/graphql";
const GRAPH_USER_AGENT: &str = "LaunchPulse-Automation";

pub const POSTS_QUERY: &str = r#"
query PulseNewestPosts {
  posts(first: 50, order: NEWEST) {
    edges {
      node {
        id
        name
        tagline
        description
        slug
        website
        url
        votesCount
        commentsCount
        dailyRank
        weeklyRank
        featuredAt
        createdAt
      }
    }
  }
}
"#;

pub const TOPICS_QUERY: &str = r#"
query PulseTopics {
  topics(first: 50, order: FOLLOWERS_COUNT) {
    edges {
      node {
        id
        name
        slug
        followersCount
        postsCount
      }
    }
  }
}
"#;

pub const PRODUCTS_BY_TOPIC_QUERY: &str = r#"
query PulseProductsByTopic($topic: String!) {
  posts(first: 20, order: VOTES, topic: $topic) {
    edges {
      node {
        id
        name
        slug
        tagline
        description
        website
        url
        votesCount
        commentsCount
        dailyRank
        featuredAt
        createdAt
        thumbnail { url }
        topics { edges { node { name slug } } }
        makers { name username twitterUsername }
      }
    }
  }
}
"#;

pub const TOP_OF_DAY_QUERY: &str = r#"
query PulseTopOfDay($first: Int!, $after: String, $postedAfter: DateTime!, $postedBefore: DateTime!) {
  posts(first: $first, after: $after, order: VOTES, postedAfter: $postedAfter, postedBefore: $postedBefore) {
    edges {
      cursor
      node {
        id
        name
        slug
        tagline
        website
        url
        votesCount
        commentsCount
        dailyRank
        featuredAt
        createdAt
        thumbnail { url }
      }
    }
    pageInfo {
      hasNextPage
      endCursor
    }
  }
}
"#;

pub const TRENDING_QUERY: &str = r#"
query PulseTrending {
  posts(first: 10, order: VOTES) {
    edges {
      node {
        name
        tagline
        votesCount
        website
      }
    }
  }
}
"#;

/// Seam between the jobs and the GraphQL upstream; the tests drive the
/// pagination and fallback logic through a scripted executor.
#[async_trait]
pub trait GraphExecutor: Send + Sync {
    async fn execute(&self, query: &str, variables: Value) -> PipelineResult<Value>;
}

pub struct HttpGraphClient {
    client: Client,
    token: String,
    url: String,
}

impl HttpGraphClient {
    pub fn new(token: &str) -> Self {
        Self {
            client: Client::new(),
            token: token.to_string(),
            url: PRODUCTHUNT_GRAPHQL_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[async_trait]
impl GraphExecutor for HttpGraphClient {
    async fn execute(&self, query: &str, variables: Value) -> PipelineResult<Value> {
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", GRAPH_USER_AGENT)
            .json(&json!({"query": query, "variables": variables}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Api(format!(
                "Product Hunt fetch failed: {}",
                response.status()
            )));
        }

        let payload: Value = response.json().await?;

        if let Some(message) = payload["errors"][0]["message"].as_str() {
            return Err(PipelineError::Api(format!(
                "Product Hunt GraphQL error: {message}"
            )));
        }

        Ok(payload)
    }
}
