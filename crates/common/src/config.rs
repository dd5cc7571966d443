use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub rest_url: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct NewsConfig {
    pub max_items_per_feed: usize,
    pub retention_days: i64,
    pub max_records: u64,
    pub fetch_retry_attempts: u32,
    pub fetch_retry_backoff_ms: u64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            max_items_per_feed: 20,
            retention_days: 14,
            max_records: 500,
            fetch_retry_attempts: 3,
            fetch_retry_backoff_ms: 700,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub supabase: SupabaseConfig,
    pub producthunt_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub news: NewsConfig,
    pub airdrops_min_interval_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let supabase_url = env::var("SUPABASE_URL").context("SUPABASE_URL must be set")?;
        let supabase_key =
            env::var("SUPABASE_SERVICE_ROLE_KEY").context("SUPABASE_SERVICE_ROLE_KEY must be set")?;

        let rest_url = format!("{}/rest/v1", supabase_url.trim_end_matches('/'));

        let news = NewsConfig {
            max_items_per_feed: env::var("NEWS_MAX_ITEMS_PER_FEED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
            retention_days: env::var("NEWS_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(14),
            max_records: env::var("NEWS_MAX_RECORDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
            fetch_retry_attempts: env::var("NEWS_FETCH_RETRY_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            fetch_retry_backoff_ms: env::var("NEWS_FETCH_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(700),
        };

        Ok(Config {
            supabase: SupabaseConfig {
                url: supabase_url,
                rest_url,
                key: supabase_key,
            },
            producthunt_token: env::var("PRODUCTHUNT_TOKEN").ok(),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            news,
            airdrops_min_interval_hours: env::var("AIRDROPS_MIN_INTERVAL_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6),
        })
    }

    /// Missing token disables the Product Hunt adapter only; callers turn
    /// this into a job-start failure rather than a pipeline failure.
    pub fn require_producthunt_token(&self) -> Result<&String> {
        self.producthunt_token
            .as_ref()
            .context("PRODUCTHUNT_TOKEN must be set")
    }
}
