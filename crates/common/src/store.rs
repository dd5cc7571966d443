use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::PipelineResult;

/// Comparison operators understood by both store implementations. RFC 3339
/// timestamps compare correctly as strings, which the retention and
/// run-log paths rely on.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Gt(Value),
    Gte(Value),
    In(Vec<Value>),
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub op: Comparison,
}

impl Condition {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: Comparison::Eq(value.into()),
        }
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: Comparison::Ne(value.into()),
        }
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: Comparison::Lt(value.into()),
        }
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: Comparison::Gt(value.into()),
        }
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: Comparison::Gte(value.into()),
        }
    }

    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: Comparison::In(values),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filter: Vec<Condition>,
    pub sort: Vec<(String, Order)>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub select: Option<Vec<String>>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter.push(condition);
        self
    }

    pub fn sort(mut self, field: &str, order: Order) -> Self {
        self.sort.push((field.to_string(), order));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }
}

/// The storage boundary: JSON documents in named collections with
/// upsert-by-key and indexed filter/sort/limit queries. Per-document
/// atomicity is assumed; nothing here spans collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Plain insert. Key uniqueness is the caller's responsibility.
    async fn insert_many(&self, collection: &str, docs: &[Value]) -> PipelineResult<u64>;

    /// Insert-or-update keyed on `conflict_keys` (all of them together for
    /// composite keys). Every provided field is written on conflict.
    async fn upsert_many(
        &self,
        collection: &str,
        conflict_keys: &[&str],
        docs: &[Value],
    ) -> PipelineResult<u64>;

    /// Which of `keys` already occur as the value of `field`.
    async fn existing_values(
        &self,
        collection: &str,
        field: &str,
        keys: &[String],
    ) -> PipelineResult<HashSet<String>>;

    async fn delete_where(&self, collection: &str, filter: &[Condition]) -> PipelineResult<u64>;

    async fn count(&self, collection: &str, filter: &[Condition]) -> PipelineResult<u64>;

    async fn find(&self, collection: &str, query: FindQuery) -> PipelineResult<Vec<Value>>;
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn matches_condition(doc: &Value, condition: &Condition) -> bool {
    let field_value = doc.get(&condition.field).unwrap_or(&Value::Null);
    match &condition.op {
        Comparison::Eq(v) => field_value == v,
        Comparison::Ne(v) => field_value != v,
        Comparison::Lt(v) => {
            !field_value.is_null() && compare_values(field_value, v) == Ordering::Less
        }
        Comparison::Gt(v) => {
            !field_value.is_null() && compare_values(field_value, v) == Ordering::Greater
        }
        Comparison::Gte(v) => !field_value.is_null() && compare_values(field_value, v) != Ordering::Less,
        Comparison::In(values) => values.contains(field_value),
    }
}

fn matches_all(doc: &Value, filter: &[Condition]) -> bool {
    filter.iter().all(|c| matches_condition(doc, c))
}

/// In-memory `DocumentStore` backing tests and dry runs. Assigns an
/// incrementing integer `id` on insert, like the real store does.
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn stamp_id(&self, doc: &mut Value) {
        if let Value::Object(map) = doc {
            if !map.contains_key("id") {
                let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
                map.insert("id".to_string(), Value::from(id));
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_many(&self, collection: &str, docs: &[Value]) -> PipelineResult<u64> {
        let mut collections = self.collections.lock().await;
        let rows = collections.entry(collection.to_string()).or_default();
        for doc in docs {
            let mut doc = doc.clone();
            self.stamp_id(&mut doc);
            rows.push(doc);
        }
        Ok(docs.len() as u64)
    }

    async fn upsert_many(
        &self,
        collection: &str,
        conflict_keys: &[&str],
        docs: &[Value],
    ) -> PipelineResult<u64> {
        let mut collections = self.collections.lock().await;
        let rows = collections.entry(collection.to_string()).or_default();

        for doc in docs {
            let position = rows.iter().position(|row| {
                conflict_keys
                    .iter()
                    .all(|key| row.get(*key) == doc.get(*key) && doc.get(*key).is_some())
            });

            match position {
                Some(index) => {
                    if let (Value::Object(existing), Value::Object(update)) =
                        (&mut rows[index], doc)
                    {
                        for (field, value) in update {
                            existing.insert(field.clone(), value.clone());
                        }
                    }
                }
                None => {
                    let mut doc = doc.clone();
                    self.stamp_id(&mut doc);
                    rows.push(doc);
                }
            }
        }

        Ok(docs.len() as u64)
    }

    async fn existing_values(
        &self,
        collection: &str,
        field: &str,
        keys: &[String],
    ) -> PipelineResult<HashSet<String>> {
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let collections = self.collections.lock().await;
        let mut found = HashSet::new();

        if let Some(rows) = collections.get(collection) {
            for row in rows {
                if let Some(value) = row.get(field).and_then(Value::as_str) {
                    if wanted.contains(value) {
                        found.insert(value.to_string());
                    }
                }
            }
        }

        Ok(found)
    }

    async fn delete_where(&self, collection: &str, filter: &[Condition]) -> PipelineResult<u64> {
        let mut collections = self.collections.lock().await;
        let Some(rows) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let before = rows.len();
        rows.retain(|row| !matches_all(row, filter));
        Ok((before - rows.len()) as u64)
    }

    async fn count(&self, collection: &str, filter: &[Condition]) -> PipelineResult<u64> {
        let collections = self.collections.lock().await;
        Ok(collections
            .get(collection)
            .map(|rows| rows.iter().filter(|row| matches_all(row, filter)).count())
            .unwrap_or(0) as u64)
    }

    async fn find(&self, collection: &str, query: FindQuery) -> PipelineResult<Vec<Value>> {
        let collections = self.collections.lock().await;
        let mut rows: Vec<Value> = collections
            .get(collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, &query.filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if !query.sort.is_empty() {
            rows.sort_by(|a, b| {
                for (field, order) in &query.sort {
                    let left = a.get(field).unwrap_or(&Value::Null);
                    let right = b.get(field).unwrap_or(&Value::Null);
                    let ordering = match order {
                        Order::Asc => compare_values(left, right),
                        Order::Desc => compare_values(right, left),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(offset) = query.offset {
            rows = rows.into_iter().skip(offset).collect();
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        if let Some(select) = &query.select {
            rows = rows
                .into_iter()
                .map(|row| {
                    let mut projected = serde_json::Map::new();
                    for field in select {
                        if let Some(value) = row.get(field) {
                            projected.insert(field.clone(), value.clone());
                        }
                    }
                    Value::Object(projected)
                })
                .collect();
        }

        Ok(rows)
    }
}
