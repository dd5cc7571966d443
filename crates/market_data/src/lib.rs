use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use common::normalize::to_rfc3339;
use common::{
    DocumentStore, PipelineError, PipelineResult, RunCounts, RunLog, RunLogger, RunStatus,
    UpsertEngine,
};

pub const MARKET_JOB_NAME: &str = "market_data_sync";
pub const MARKET_SOURCE: &str = "coingecko";
pub const COINS_COLLECTION: &str = "crypto_coins";

const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const TOP_COINS_PER_PAGE: u32 = 50;
const MARKET_TIMEOUT_SECS: u64 = 20;

/// Market row as served by the coins/markets endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub current_price: f64,
    #[serde(default)]
    pub market_cap: f64,
    #[serde(default)]
    pub total_volume: f64,
    #[serde(default)]
    pub price_change_percentage_24h: f64,
    #[serde(default)]
    pub market_cap_rank: i64,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct MarketReport {
    pub fetched: u64,
    pub upserted: u64,
}

pub fn coin_to_doc(row: &MarketRow, now: OffsetDateTime) -> Option<Value> {
    let coin_id = row.id.trim();
    if coin_id.is_empty() {
        return None;
    }

    let last_updated = row
        .last_updated
        .as_deref()
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        .unwrap_or(now);

    Some(json!({
        "coin_id": coin_id,
        "symbol": row.symbol.trim(),
        "name": row.name.trim(),
        "image": row.image.trim(),
        "current_price": row.current_price,
        "market_cap": row.market_cap,
        "total_volume": row.total_volume,
        "price_change_24h": row.price_change_percentage_24h,
        "market_cap_rank": row.market_cap_rank,
        "last_updated": to_rfc3339(last_updated),
    }))
}

/// Top coins by market cap, refreshed in place on every run.
pub struct MarketDataSync {
    client: Client,
    engine: UpsertEngine,
    logger: RunLogger,
    base_url: String,
}

impl MarketDataSync {
    pub fn new(store: Arc<dyn DocumentStore>, logger: RunLogger) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(MARKET_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            engine: UpsertEngine::new(store),
            logger,
            base_url: COINGECKO_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn fetch_top_coins(&self) -> PipelineResult<Vec<MarketRow>> {
        let per_page = TOP_COINS_PER_PAGE.to_string();
        let url = format!("{}/coins/markets", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("vs_currency", "usd"),
                ("order", "market_cap_desc"),
                ("per_page", per_page.as_str()),
                ("page", "1"),
                ("sparkline", "false"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Api(format!(
                "market data fetch failed: {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    pub async fn run(&self, trigger: &str) -> PipelineResult<MarketReport> {
        let started_at = OffsetDateTime::now_utc();

        match self.execute().await {
            Ok(report) => {
                self.logger
                    .record(RunLog::finish(
                        MARKET_JOB_NAME,
                        trigger,
                        RunStatus::Success,
                        started_at,
                        RunCounts {
                            fetched: report.fetched,
                            matched: report.upserted,
                            inserted: report.upserted,
                            skipped: 0,
                            deleted: 0,
                        },
                    ))
                    .await?;

                info!(
                    "market data run: fetched={}, upserted={}",
                    report.fetched, report.upserted
                );
                Ok(report)
            }
            Err(e) => {
                self.logger
                    .record_best_effort(
                        RunLog::finish(
                            MARKET_JOB_NAME,
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

    async fn execute(&self) -> PipelineResult<MarketReport> {
        let rows = self.fetch_top_coins().await?;
        let now = OffsetDateTime::now_utc();

        let docs: Vec<Value> = rows.iter().filter_map(|row| coin_to_doc(row, now)).collect();
        if docs.is_empty() {
            return Ok(MarketReport {
                fetched: 0,
                upserted: 0,
            });
        }

        let fetched = docs.len() as u64;
        let outcome = self
            .engine
            .refresh(COINS_COLLECTION, "coin_id", &[], docs)
            .await?;

        Ok(MarketReport {
            fetched,
            upserted: outcome.inserted + outcome.updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_mapping_requires_an_id() {
        let now = OffsetDateTime::from_unix_timestamp(1_770_000_000).unwrap();
        let row = MarketRow {
            id: "bitcoin".to_string(),
            symbol: "btc".to_string(),
            name: "Bitcoin".to_string(),
            market_cap_rank: 1,
            last_updated: Some("2026-02-01T00:00:00Z".to_string()),
            ..Default::default()
        };

        let doc = coin_to_doc(&row, now).unwrap();
        assert_eq!(doc["coin_id"], json!("bitcoin"));
        assert_eq!(doc["last_updated"], json!("2026-02-01T00:00:00Z"));

        let blank = MarketRow::default();
        assert!(coin_to_doc(&blank, now).is_none());
    }

    #[tokio::test]
    async fn refresh_updates_rank_without_duplicating_coins() {
        use common::store::FindQuery;
        use common::MemoryStore;

        let store = Arc::new(MemoryStore::new());
        let engine = UpsertEngine::new(store.clone());
        let now = OffsetDateTime::from_unix_timestamp(1_770_000_000).unwrap();

        let mut row = MarketRow {
            id: "bitcoin".to_string(),
            market_cap_rank: 2,
            ..Default::default()
        };
        engine
            .refresh(
                COINS_COLLECTION,
                "coin_id",
                &[],
                vec![coin_to_doc(&row, now).unwrap()],
            )
            .await
            .unwrap();

        row.market_cap_rank = 1;
        let outcome = engine
            .refresh(
                COINS_COLLECTION,
                "coin_id",
                &[],
                vec![coin_to_doc(&row, now).unwrap()],
            )
            .await
            .unwrap();
        assert_eq!(outcome.updated, 1);

        let rows = store.find(COINS_COLLECTION, FindQuery::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["market_cap_rank"], json!(1));
    }
}
