use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use tracing::error;

use crate::error::{PipelineError, PipelineResult};
use crate::normalize::to_rfc3339;
use crate::store::{Condition, DocumentStore, FindQuery, Order};

pub const RUN_LOG_COLLECTION: &str = "fetch_logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunCounts {
    #[serde(default)]
    pub fetched: u64,
    #[serde(default)]
    pub matched: u64,
    #[serde(default)]
    pub inserted: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub deleted: u64,
}

/// One ingestion run. Created once at run end, append-only, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub job_name: String,
    pub source: String,
    pub status: RunStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub duration_ms: i64,
    #[serde(flatten)]
    pub counts: RunCounts,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub meta: Value,
}

impl RunLog {
    /// Close out a run that started at `started_at`, finishing now.
    pub fn finish(
        job_name: &str,
        source: &str,
        status: RunStatus,
        started_at: OffsetDateTime,
        counts: RunCounts,
    ) -> Self {
        let finished_at = OffsetDateTime::now_utc();
        Self {
            job_name: job_name.to_string(),
            source: source.to_string(),
            status,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).whole_milliseconds() as i64,
            counts,
            error_message: String::new(),
            meta: json!({}),
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    fn to_doc(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusTotals {
    pub total_runs: u64,
    pub success_runs: u64,
    pub partial_runs: u64,
    pub error_runs: u64,
    pub fetched: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub deleted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobTotals {
    pub job_name: String,
    pub runs: u64,
    pub success_runs: u64,
    pub error_runs: u64,
    pub fetched: u64,
    pub inserted: u64,
}

#[derive(Debug, Serialize)]
pub struct RunLogSummary {
    pub window_days: i64,
    pub since: String,
    pub overall: StatusTotals,
    pub by_job: Vec<JobTotals>,
}

/// Append-only run history over the document store.
#[derive(Clone)]
pub struct RunLogger {
    store: Arc<dyn DocumentStore>,
}

impl RunLogger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, log: RunLog) -> PipelineResult<()> {
        self.store
            .insert_many(RUN_LOG_COLLECTION, &[log.to_doc()])
            .await?;
        Ok(())
    }

    /// Run-log persistence must never mask the failure it is reporting.
    pub async fn record_best_effort(&self, log: RunLog) {
        if let Err(e) = self.record(log).await {
            error!("failed to persist run log: {}", e);
        }
    }

    pub async fn latest_for(
        &self,
        job_name: &str,
        source: &str,
    ) -> PipelineResult<Option<RunLog>> {
        let rows = self
            .store
            .find(
                RUN_LOG_COLLECTION,
                FindQuery::new()
                    .filter(Condition::eq("job_name", job_name))
                    .filter(Condition::eq("source", source))
                    .sort("started_at", Order::Desc)
                    .limit(1),
            )
            .await?;

        rows.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|e| PipelineError::Parse(format!("run log decode: {e}")))
            })
            .transpose()
    }

    /// Newest-first page of run history, optionally narrowed by job and
    /// status. `page` is 1-based.
    pub async fn recent(
        &self,
        page: usize,
        limit: usize,
        job_name: Option<&str>,
        status: Option<RunStatus>,
    ) -> PipelineResult<Vec<RunLog>> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let mut query = FindQuery::new()
            .sort("started_at", Order::Desc)
            .offset((page - 1) * limit)
            .limit(limit);
        if let Some(job_name) = job_name {
            query = query.filter(Condition::eq("job_name", job_name));
        }
        if let Some(status) = status {
            query = query.filter(Condition::eq("status", status.as_str()));
        }

        let rows = self.store.find(RUN_LOG_COLLECTION, query).await?;
        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            logs.push(
                serde_json::from_value(row)
                    .map_err(|e| PipelineError::Parse(format!("run log decode: {e}")))?,
            );
        }
        Ok(logs)
    }

    /// Totals over a trailing window, grouped by status and by job. The
    /// store boundary only filters and sorts, so the rollup happens here.
    pub async fn summary(&self, days: i64) -> PipelineResult<RunLogSummary> {
        let since = OffsetDateTime::now_utc() - Duration::days(days.clamp(1, 365));
        let since_str = to_rfc3339(since);

        let rows = self
            .store
            .find(
                RUN_LOG_COLLECTION,
                FindQuery::new()
                    .filter(Condition::gte("started_at", since_str.clone()))
                    .sort("started_at", Order::Desc),
            )
            .await?;

        let mut overall = StatusTotals::default();
        let mut by_job: Vec<JobTotals> = Vec::new();

        for row in rows {
            let log: RunLog = serde_json::from_value(row)
                .map_err(|e| PipelineError::Parse(format!("run log decode: {e}")))?;

            overall.total_runs += 1;
            match log.status {
                RunStatus::Success => overall.success_runs += 1,
                RunStatus::Partial => overall.partial_runs += 1,
                RunStatus::Error => overall.error_runs += 1,
            }
            overall.fetched += log.counts.fetched;
            overall.inserted += log.counts.inserted;
            overall.skipped += log.counts.skipped;
            overall.deleted += log.counts.deleted;

            let index = match by_job.iter().position(|j| j.job_name == log.job_name) {
                Some(index) => index,
                None => {
                    by_job.push(JobTotals {
                        job_name: log.job_name.clone(),
                        runs: 0,
                        success_runs: 0,
                        error_runs: 0,
                        fetched: 0,
                        inserted: 0,
                    });
                    by_job.len() - 1
                }
            };
            let entry = &mut by_job[index];
            entry.runs += 1;
            match log.status {
                RunStatus::Success => entry.success_runs += 1,
                RunStatus::Error => entry.error_runs += 1,
                RunStatus::Partial => {}
            }
            entry.fetched += log.counts.fetched;
            entry.inserted += log.counts.inserted;
        }

        by_job.sort_by(|a, b| b.runs.cmp(&a.runs).then(a.job_name.cmp(&b.job_name)));

        Ok(RunLogSummary {
            window_days: days.clamp(1, 365),
            since: since_str,
            overall,
            by_job,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn log(job: &str, status: RunStatus, fetched: u64, inserted: u64) -> RunLog {
        RunLog::finish(
            job,
            "test",
            status,
            OffsetDateTime::now_utc() - Duration::minutes(5),
            RunCounts {
                fetched,
                inserted,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn latest_for_returns_newest_entry() {
        let store = Arc::new(MemoryStore::new());
        let logger = RunLogger::new(store);

        let mut older = log("news_ingestion", RunStatus::Success, 10, 2);
        older.started_at -= Duration::hours(4);
        logger.record(older).await.unwrap();
        logger
            .record(log("news_ingestion", RunStatus::Partial, 7, 1))
            .await
            .unwrap();

        let latest = logger
            .latest_for("news_ingestion", "test")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.status, RunStatus::Partial);
        assert_eq!(latest.counts.fetched, 7);
    }

    #[tokio::test]
    async fn summary_rolls_up_by_status_and_job() {
        let store = Arc::new(MemoryStore::new());
        let logger = RunLogger::new(store);

        logger.record(log("news_ingestion", RunStatus::Success, 10, 3)).await.unwrap();
        logger.record(log("news_ingestion", RunStatus::Error, 0, 0)).await.unwrap();
        logger.record(log("market_data_sync", RunStatus::Success, 50, 50)).await.unwrap();

        let summary = logger.summary(7).await.unwrap();
        assert_eq!(summary.overall.total_runs, 3);
        assert_eq!(summary.overall.success_runs, 2);
        assert_eq!(summary.overall.error_runs, 1);
        assert_eq!(summary.overall.fetched, 60);

        assert_eq!(summary.by_job.len(), 2);
        assert_eq!(summary.by_job[0].job_name, "news_ingestion");
        assert_eq!(summary.by_job[0].runs, 2);
    }

    #[tokio::test]
    async fn recent_filters_by_status() {
        let store = Arc::new(MemoryStore::new());
        let logger = RunLogger::new(store);

        logger.record(log("a", RunStatus::Success, 1, 1)).await.unwrap();
        logger.record(log("b", RunStatus::Error, 1, 0)).await.unwrap();

        let errors = logger
            .recent(1, 10, None, Some(RunStatus::Error))
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].job_name, "b");

        let second_page = logger.recent(2, 1, None, None).await.unwrap();
        assert_eq!(second_page.len(), 1);
    }
}
