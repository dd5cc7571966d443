use std::sync::Arc;

use serde_json::Value;
use time::{Duration, OffsetDateTime};

use crate::error::PipelineResult;
use crate::normalize::to_rfc3339;
use crate::store::{Condition, DocumentStore, FindQuery, Order};

#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionOutcome {
    pub deleted_by_age: u64,
    pub deleted_by_overflow: u64,
}

impl RetentionOutcome {
    pub fn total(&self) -> u64 {
        self.deleted_by_age + self.deleted_by_overflow
    }
}

/// Age ceiling runs first; the count ceiling then trims the remainder
/// oldest-first, ordered by timestamp then store id so ties resolve
/// deterministically.
#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn DocumentStore>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn sweep(
        &self,
        collection: &str,
        timestamp_field: &str,
        max_age_days: i64,
        max_records: u64,
        now: OffsetDateTime,
    ) -> PipelineResult<RetentionOutcome> {
        let cutoff = to_rfc3339(now - Duration::days(max_age_days));
        let deleted_by_age = self
            .store
            .delete_where(collection, &[Condition::lt(timestamp_field, cutoff)])
            .await?;

        let total = self.store.count(collection, &[]).await?;
        let mut deleted_by_overflow = 0;

        if total > max_records {
            let overflow = (total - max_records) as usize;
            let oldest = self
                .store
                .find(
                    collection,
                    FindQuery::new()
                        .sort(timestamp_field, Order::Asc)
                        .sort("id", Order::Asc)
                        .limit(overflow)
                        .select(&["id"]),
                )
                .await?;

            let ids: Vec<Value> = oldest
                .iter()
                .filter_map(|row| row.get("id").cloned())
                .collect();

            if !ids.is_empty() {
                deleted_by_overflow = self
                    .store
                    .delete_where(collection, &[Condition::is_in("id", ids)])
                    .await?;
            }
        }

        Ok(RetentionOutcome {
            deleted_by_age,
            deleted_by_overflow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn age_then_count_ceiling_keeps_the_newest() {
        let store = Arc::new(MemoryStore::new());
        let now = OffsetDateTime::from_unix_timestamp(1_770_000_000).unwrap();

        // 20 items aged 1..=20 days.
        let docs: Vec<Value> = (1..=20)
            .map(|age| {
                json!({
                    "link": format!("https://example.com/{age}"),
                    "published_at": to_rfc3339(now - Duration::days(age)),
                })
            })
            .collect();
        store.insert_many("news", &docs).await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone());
        let outcome = sweeper
            .sweep("news", "published_at", 14, 10, now)
            .await
            .unwrap();

        // Ages 15..=20 fall to the age ceiling, then 4 more of the oldest
        // remainder (ages 11..=14) fall to the count ceiling.
        assert_eq!(outcome.deleted_by_age, 6);
        assert_eq!(outcome.deleted_by_overflow, 4);

        let remaining = store.find("news", FindQuery::new()).await.unwrap();
        assert_eq!(remaining.len(), 10);
        for age in 1..=10 {
            let link = format!("https://example.com/{age}");
            assert!(
                remaining.iter().any(|r| r["link"] == json!(link)),
                "expected {link} to survive"
            );
        }
    }

    #[tokio::test]
    async fn ties_on_timestamp_fall_back_to_insertion_id() {
        let store = Arc::new(MemoryStore::new());
        let now = OffsetDateTime::from_unix_timestamp(1_770_000_000).unwrap();
        let same_ts = to_rfc3339(now - Duration::days(1));

        let docs: Vec<Value> = (0..4)
            .map(|n| json!({"link": format!("https://t/{n}"), "published_at": same_ts}))
            .collect();
        store.insert_many("news", &docs).await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone());
        sweeper.sweep("news", "published_at", 14, 2, now).await.unwrap();

        let remaining = store.find("news", FindQuery::new()).await.unwrap();
        let links: Vec<&str> = remaining.iter().filter_map(|r| r["link"].as_str()).collect();
        // Earliest-inserted rows are deleted first on equal timestamps.
        assert_eq!(links, vec!["https://t/2", "https://t/3"]);
    }
}
