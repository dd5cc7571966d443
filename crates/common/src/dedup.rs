use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::error::PipelineResult;
use crate::store::DocumentStore;

/// In-batch deduplication by natural key(s); first occurrence wins, order
/// is preserved. A document matching any earlier document on any key field
/// is dropped.
pub fn dedup_by_keys(docs: Vec<Value>, key_fields: &[&str]) -> (Vec<Value>, u64) {
    let mut seen: Vec<HashSet<String>> = key_fields.iter().map(|_| HashSet::new()).collect();
    let mut unique = Vec::with_capacity(docs.len());
    let mut dropped = 0u64;

    for doc in docs {
        let duplicate = key_fields.iter().enumerate().any(|(i, field)| {
            doc.get(*field)
                .and_then(Value::as_str)
                .is_some_and(|key| seen[i].contains(key))
        });

        if duplicate {
            dropped += 1;
            continue;
        }

        for (i, field) in key_fields.iter().enumerate() {
            if let Some(key) = doc.get(*field).and_then(Value::as_str) {
                seen[i].insert(key.to_string());
            }
        }
        unique.push(doc);
    }

    (unique, dropped)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InsertOutcome {
    /// Batch size after in-batch dedup.
    pub unique: u64,
    pub inserted: u64,
    pub skipped_existing: u64,
    pub deduped_in_batch: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOutcome {
    pub inserted: u64,
    pub updated: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceOutcome {
    pub deleted: u64,
    pub inserted: u64,
}

/// Write policies for one batch against one collection. All mutation in the
/// pipeline funnels through here (or the retention sweeper).
#[derive(Clone)]
pub struct UpsertEngine {
    store: Arc<dyn DocumentStore>,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Append-only collections: insert documents whose natural key(s) are
    /// unseen, never touch existing documents. With multiple key fields a
    /// document is skipped when any of its keys already exists.
    pub async fn insert_new(
        &self,
        collection: &str,
        key_fields: &[&str],
        docs: Vec<Value>,
    ) -> PipelineResult<InsertOutcome> {
        let (unique, deduped_in_batch) = dedup_by_keys(docs, key_fields);
        if unique.is_empty() {
            return Ok(InsertOutcome {
                deduped_in_batch,
                ..Default::default()
            });
        }

        let mut existing_per_field = Vec::with_capacity(key_fields.len());
        for field in key_fields {
            let keys: Vec<String> = unique
                .iter()
                .filter_map(|doc| doc.get(*field).and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            existing_per_field.push(self.store.existing_values(collection, field, &keys).await?);
        }

        let unique_count = unique.len() as u64;
        let insertable: Vec<Value> = unique
            .into_iter()
            .filter(|doc| {
                !key_fields.iter().enumerate().any(|(i, field)| {
                    doc.get(*field)
                        .and_then(Value::as_str)
                        .is_some_and(|key| existing_per_field[i].contains(key))
                })
            })
            .collect();

        let inserted = self.store.insert_many(collection, &insertable).await?;

        Ok(InsertOutcome {
            unique: unique_count,
            inserted,
            skipped_existing: unique_count - insertable.len() as u64,
            deduped_in_batch,
        })
    }

    /// Refreshable collections: upsert every key. Fields listed in
    /// `protect_on_update` are written on first insert only, so manual
    /// edits survive later refreshes.
    pub async fn refresh(
        &self,
        collection: &str,
        key_field: &str,
        protect_on_update: &[&str],
        docs: Vec<Value>,
    ) -> PipelineResult<RefreshOutcome> {
        let (unique, _) = dedup_by_keys(docs, &[key_field]);
        if unique.is_empty() {
            return Ok(RefreshOutcome::default());
        }

        let keys: Vec<String> = unique
            .iter()
            .filter_map(|doc| doc.get(key_field).and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        let existing = self.store.existing_values(collection, key_field, &keys).await?;

        let mut new_docs = Vec::new();
        let mut update_docs = Vec::new();
        for doc in unique {
            let is_existing = doc
                .get(key_field)
                .and_then(Value::as_str)
                .is_some_and(|key| existing.contains(key));

            if is_existing {
                let mut doc = doc;
                if let Value::Object(map) = &mut doc {
                    for field in protect_on_update {
                        map.remove(*field);
                    }
                }
                update_docs.push(doc);
            } else {
                new_docs.push(doc);
            }
        }

        let inserted = self.store.insert_many(collection, &new_docs).await?;
        let updated = self
            .store
            .upsert_many(collection, &[key_field], &update_docs)
            .await?;

        Ok(RefreshOutcome { inserted, updated })
    }

    /// Composite-key upsert used by snapshot collections; every run is
    /// authoritative for the rows it writes.
    pub async fn upsert_composite(
        &self,
        collection: &str,
        conflict_keys: &[&str],
        docs: Vec<Value>,
    ) -> PipelineResult<u64> {
        self.store.upsert_many(collection, conflict_keys, &docs).await
    }

    /// Replace-all collections: the new batch is the whole truth.
    pub async fn replace_all(
        &self,
        collection: &str,
        docs: Vec<Value>,
    ) -> PipelineResult<ReplaceOutcome> {
        let deleted = self.store.delete_where(collection, &[]).await?;
        let inserted = self.store.insert_many(collection, &docs).await?;
        Ok(ReplaceOutcome { deleted, inserted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FindQuery, MemoryStore};
    use serde_json::json;

    fn engine() -> (Arc<MemoryStore>, UpsertEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = UpsertEngine::new(store.clone());
        (store, engine)
    }

    #[tokio::test]
    async fn insert_new_skips_batch_and_store_duplicates() {
        let (store, engine) = engine();
        store
            .insert_many("news", &[json!({"link": "https://a", "title": "old"})])
            .await
            .unwrap();

        let outcome = engine
            .insert_new(
                "news",
                &["link"],
                vec![
                    json!({"link": "https://a", "title": "dup of stored"}),
                    json!({"link": "https://b", "title": "fresh"}),
                    json!({"link": "https://b", "title": "dup in batch"}),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.unique, 2);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.skipped_existing, 1);
        assert_eq!(outcome.deduped_in_batch, 1);

        // Existing document untouched.
        let rows = store.find("news", FindQuery::new()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r["title"] == json!("old")));
    }

    #[tokio::test]
    async fn insert_new_with_dual_keys_skips_on_either_match() {
        let (store, engine) = engine();
        store
            .insert_many("ph_sources", &[json!({"ph_id": "1", "url": "https://a"})])
            .await
            .unwrap();

        let outcome = engine
            .insert_new(
                "ph_sources",
                &["ph_id", "url"],
                vec![
                    json!({"ph_id": "2", "url": "https://a"}),
                    json!({"ph_id": "1", "url": "https://c"}),
                    json!({"ph_id": "3", "url": "https://d"}),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.skipped_existing, 2);
    }

    #[tokio::test]
    async fn refresh_counts_and_protects_fields() {
        let (store, engine) = engine();
        engine
            .refresh(
                "airdrop_sources",
                "source_url",
                &["ai_summary"],
                vec![json!({"source_url": "https://a", "title": "t1", "ai_summary": "first"})],
            )
            .await
            .unwrap();

        let outcome = engine
            .refresh(
                "airdrop_sources",
                "source_url",
                &["ai_summary"],
                vec![
                    json!({"source_url": "https://a", "title": "t1-updated", "ai_summary": "regenerated"}),
                    json!({"source_url": "https://b", "title": "t2", "ai_summary": "fresh"}),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.updated, 1);

        let rows = store.find("airdrop_sources", FindQuery::new()).await.unwrap();
        let a = rows.iter().find(|r| r["source_url"] == json!("https://a")).unwrap();
        assert_eq!(a["title"], json!("t1-updated"));
        assert_eq!(a["ai_summary"], json!("first"));
    }

    #[tokio::test]
    async fn no_duplicate_natural_keys_after_any_policy() {
        let (store, engine) = engine();
        let batch = vec![
            json!({"link": "https://x", "n": 1}),
            json!({"link": "https://x", "n": 2}),
            json!({"link": "https://y", "n": 3}),
        ];

        engine.insert_new("c1", &["link"], batch.clone()).await.unwrap();
        engine.insert_new("c1", &["link"], batch.clone()).await.unwrap();
        engine.refresh("c2", "link", &[], batch.clone()).await.unwrap();
        engine.refresh("c2", "link", &[], batch).await.unwrap();

        for collection in ["c1", "c2"] {
            let rows = store.find(collection, FindQuery::new()).await.unwrap();
            let mut links: Vec<&str> =
                rows.iter().filter_map(|r| r["link"].as_str()).collect();
            let total = links.len();
            links.sort();
            links.dedup();
            assert_eq!(total, links.len(), "duplicates in {collection}");
        }
    }

    #[tokio::test]
    async fn replace_all_swaps_the_whole_set() {
        let (store, engine) = engine();
        engine
            .replace_all("ph_trending", vec![json!({"name": "old-1"}), json!({"name": "old-2"})])
            .await
            .unwrap();

        let outcome = engine
            .replace_all("ph_trending", vec![json!({"name": "new-1"})])
            .await
            .unwrap();

        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.inserted, 1);

        let rows = store.find("ph_trending", FindQuery::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("new-1"));
    }
}
