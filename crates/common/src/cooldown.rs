use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::error::PipelineResult;
use crate::run_log::RunLogger;
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Proceed { first_seed: bool },
    Skip { next_allowed_at: OffsetDateTime },
}

/// Minimum inter-run interval per (job, source), derived from the most
/// recent run log rather than a second persisted state. Layered on top of
/// the scheduler so manual triggers respect the same upstream politeness.
#[derive(Clone)]
pub struct CooldownGate {
    store: Arc<dyn DocumentStore>,
    logger: RunLogger,
}

impl CooldownGate {
    pub fn new(store: Arc<dyn DocumentStore>, logger: RunLogger) -> Self {
        Self { store, logger }
    }

    /// `force` bypasses the gate, as does an empty target collection
    /// (first seed: there is nothing to protect yet).
    pub async fn check(
        &self,
        job_name: &str,
        source: &str,
        target_collection: &str,
        min_interval: Duration,
        force: bool,
        now: OffsetDateTime,
    ) -> PipelineResult<CooldownDecision> {
        if force {
            return Ok(CooldownDecision::Proceed { first_seed: false });
        }

        let existing = self.store.count(target_collection, &[]).await?;
        if existing == 0 {
            return Ok(CooldownDecision::Proceed { first_seed: true });
        }

        let Some(latest) = self.logger.latest_for(job_name, source).await? else {
            return Ok(CooldownDecision::Proceed { first_seed: false });
        };

        let elapsed = now - latest.started_at;
        if elapsed < min_interval {
            return Ok(CooldownDecision::Skip {
                next_allowed_at: latest.started_at + min_interval,
            });
        }

        Ok(CooldownDecision::Proceed { first_seed: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_log::{RunCounts, RunLog, RunStatus};
    use crate::store::MemoryStore;
    use serde_json::json;

    const JOB: &str = "airdrops_ingestion";
    const SOURCE: &str = "airdrops.io";

    async fn gate_with_run_at(
        started_at: OffsetDateTime,
    ) -> (Arc<MemoryStore>, CooldownGate) {
        let store = Arc::new(MemoryStore::new());
        let logger = RunLogger::new(store.clone());
        logger
            .record(RunLog::finish(
                JOB,
                SOURCE,
                RunStatus::Success,
                started_at,
                RunCounts::default(),
            ))
            .await
            .unwrap();
        store
            .insert_many("airdrop_sources", &[json!({"source_url": "https://a"})])
            .await
            .unwrap();

        let gate = CooldownGate::new(store.clone(), logger);
        (store, gate)
    }

    #[tokio::test]
    async fn skips_inside_the_window_and_proceeds_after() {
        let now = OffsetDateTime::from_unix_timestamp(1_770_000_000).unwrap();
        let min = Duration::hours(6);

        let t0 = now - Duration::hours(5) - Duration::minutes(59);
        let (_, gate) = gate_with_run_at(t0).await;
        let decision = gate
            .check(JOB, SOURCE, "airdrop_sources", min, false, now)
            .await
            .unwrap();
        assert_eq!(
            decision,
            CooldownDecision::Skip {
                next_allowed_at: t0 + min
            }
        );

        let t0 = now - Duration::hours(6) - Duration::minutes(1);
        let (_, gate) = gate_with_run_at(t0).await;
        let decision = gate
            .check(JOB, SOURCE, "airdrop_sources", min, false, now)
            .await
            .unwrap();
        assert_eq!(decision, CooldownDecision::Proceed { first_seed: false });
    }

    #[tokio::test]
    async fn force_and_first_seed_bypass_the_gate() {
        let now = OffsetDateTime::from_unix_timestamp(1_770_000_000).unwrap();
        let min = Duration::hours(6);

        let (_, gate) = gate_with_run_at(now - Duration::minutes(10)).await;
        let decision = gate
            .check(JOB, SOURCE, "airdrop_sources", min, true, now)
            .await
            .unwrap();
        assert_eq!(decision, CooldownDecision::Proceed { first_seed: false });

        // Same recent run log, but the target collection is empty.
        let store = Arc::new(MemoryStore::new());
        let logger = RunLogger::new(store.clone());
        logger
            .record(RunLog::finish(
                JOB,
                SOURCE,
                RunStatus::Success,
                now - Duration::minutes(10),
                RunCounts::default(),
            ))
            .await
            .unwrap();
        let gate = CooldownGate::new(store, logger);
        let decision = gate
            .check(JOB, SOURCE, "airdrop_sources", min, false, now)
            .await
            .unwrap();
        assert_eq!(decision, CooldownDecision::Proceed { first_seed: true });
    }
}
