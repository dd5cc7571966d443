use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::store::{Comparison, Condition, DocumentStore, FindQuery, Order};

/// `DocumentStore` over the Supabase PostgREST endpoint. One table per
/// collection; upserts ride on `on_conflict` + `resolution=merge-duplicates`.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    rest_url: String,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(rest_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            rest_url: rest_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn request(&self, method: Method, collection: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.rest_url, collection);
        self.client
            .request(method, &url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn render_scalar(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn render_list_item(value: &Value) -> String {
        match value {
            Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
            other => other.to_string(),
        }
    }

    fn filter_params(filter: &[Condition]) -> Vec<(String, String)> {
        filter
            .iter()
            .map(|condition| {
                let rendered = match &condition.op {
                    Comparison::Eq(v) => format!("eq.{}", Self::render_scalar(v)),
                    Comparison::Ne(v) => format!("neq.{}", Self::render_scalar(v)),
                    Comparison::Lt(v) => format!("lt.{}", Self::render_scalar(v)),
                    Comparison::Gt(v) => format!("gt.{}", Self::render_scalar(v)),
                    Comparison::Gte(v) => format!("gte.{}", Self::render_scalar(v)),
                    Comparison::In(values) => format!(
                        "in.({})",
                        values
                            .iter()
                            .map(Self::render_list_item)
                            .collect::<Vec<_>>()
                            .join(",")
                    ),
                };
                (condition.field.clone(), rendered)
            })
            .collect()
    }

    async fn check(response: reqwest::Response, action: &str) -> PipelineResult<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(PipelineError::Store(format!(
                "{action} failed ({status}): {body}"
            )))
        }
    }

    fn send_error(action: &str) -> impl FnOnce(reqwest::Error) -> PipelineError + '_ {
        move |e| PipelineError::Store(format!("{action} request failed: {e}"))
    }
}

#[async_trait]
impl DocumentStore for SupabaseStore {
    async fn insert_many(&self, collection: &str, docs: &[Value]) -> PipelineResult<u64> {
        if docs.is_empty() {
            return Ok(0);
        }

        debug!("inserting {} rows into {}", docs.len(), collection);
        let response = self
            .request(Method::POST, collection)
            .header("Prefer", "return=minimal")
            .json(&docs)
            .send()
            .await
            .map_err(Self::send_error("insert"))?;

        Self::check(response, "insert").await?;
        Ok(docs.len() as u64)
    }

    async fn upsert_many(
        &self,
        collection: &str,
        conflict_keys: &[&str],
        docs: &[Value],
    ) -> PipelineResult<u64> {
        if docs.is_empty() {
            return Ok(0);
        }

        debug!("upserting {} rows into {}", docs.len(), collection);
        let response = self
            .request(Method::POST, collection)
            .query(&[("on_conflict", conflict_keys.join(","))])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&docs)
            .send()
            .await
            .map_err(Self::send_error("upsert"))?;

        Self::check(response, "upsert").await?;
        Ok(docs.len() as u64)
    }

    async fn existing_values(
        &self,
        collection: &str,
        field: &str,
        keys: &[String],
    ) -> PipelineResult<HashSet<String>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }

        let in_list = keys
            .iter()
            .map(|k| Value::from(k.as_str()))
            .collect::<Vec<_>>();
        let params = Self::filter_params(&[Condition::is_in(field, in_list)]);

        let response = self
            .request(Method::GET, collection)
            .query(&[("select", field)])
            .query(&params)
            .send()
            .await
            .map_err(Self::send_error("select"))?;

        let rows: Vec<Value> = Self::check(response, "select")
            .await?
            .json()
            .await
            .map_err(Self::send_error("select decode"))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get(field).and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn delete_where(&self, collection: &str, filter: &[Condition]) -> PipelineResult<u64> {
        let params = Self::filter_params(filter);
        let mut request = self
            .request(Method::DELETE, collection)
            .header("Prefer", "return=representation")
            .query(&params);
        if filter.is_empty() {
            // PostgREST refuses unfiltered deletes; match every assigned id.
            request = request.query(&[("id", "gte.0")]);
        }

        let response = request.send().await.map_err(Self::send_error("delete"))?;
        let rows: Vec<Value> = Self::check(response, "delete")
            .await?
            .json()
            .await
            .map_err(Self::send_error("delete decode"))?;

        Ok(rows.len() as u64)
    }

    async fn count(&self, collection: &str, filter: &[Condition]) -> PipelineResult<u64> {
        let params = Self::filter_params(filter);
        let response = self
            .request(Method::GET, collection)
            .header("Prefer", "count=exact")
            .header("Range", "0-0")
            .query(&[("select", "id")])
            .query(&params)
            .send()
            .await
            .map_err(Self::send_error("count"))?;

        let response = Self::check(response, "count").await?;
        let total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|range| range.rsplit('/').next())
            .and_then(|total| total.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(total)
    }

    async fn find(&self, collection: &str, query: FindQuery) -> PipelineResult<Vec<Value>> {
        let mut params = Self::filter_params(&query.filter);

        if let Some(select) = &query.select {
            params.push(("select".to_string(), select.join(",")));
        }

        if !query.sort.is_empty() {
            let order = query
                .sort
                .iter()
                .map(|(field, order)| match order {
                    Order::Asc => format!("{field}.asc"),
                    Order::Desc => format!("{field}.desc"),
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }

        if let Some(offset) = query.offset {
            params.push(("offset".to_string(), offset.to_string()));
        }

        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        let response = self
            .request(Method::GET, collection)
            .query(&params)
            .send()
            .await
            .map_err(Self::send_error("find"))?;

        Self::check(response, "find")
            .await?
            .json()
            .await
            .map_err(Self::send_error("find decode"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_params_render_postgrest_operators() {
        let params = SupabaseStore::filter_params(&[
            Condition::eq("status", "pending"),
            Condition::lt("published_at", "2026-01-01T00:00:00Z"),
            Condition::is_in("link", vec![json!("a"), json!("b,c")]),
        ]);

        assert_eq!(params[0], ("status".to_string(), "eq.pending".to_string()));
        assert_eq!(
            params[1],
            (
                "published_at".to_string(),
                "lt.2026-01-01T00:00:00Z".to_string()
            )
        );
        assert_eq!(
            params[2],
            ("link".to_string(), "in.(\"a\",\"b,c\")".to_string())
        );
    }
}
