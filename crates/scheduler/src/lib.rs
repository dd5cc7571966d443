use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use common::SingleFlight;

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type GuardedRunner = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wrap a job body so that overlapping triggers are logged no-ops: at most
/// one run of a given job is ever in flight, however it was triggered.
pub fn guarded_runner<F, Fut>(name: &str, job_fn: F) -> (GuardedRunner, SingleFlight)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let flight = SingleFlight::new();
    let name: Arc<str> = Arc::from(name);
    let job_fn = Arc::new(job_fn);

    let runner_flight = flight.clone();
    let runner: GuardedRunner = Arc::new(move || {
        let flight = runner_flight.clone();
        let job_fn = job_fn.clone();
        let name = name.clone();
        Box::pin(async move {
            let Some(_guard) = flight.try_begin() else {
                info!("job {} is still running, trigger ignored", name);
                return;
            };

            match job_fn().await {
                Ok(()) => info!("job {} completed", name),
                Err(e) => error!("job {} failed: {}", name, e),
            }
        })
    });

    (runner, flight)
}

/// Owns every recurring timer plus a running flag per job; no ambient
/// globals. Supports fixed intervals (first run at start) and fixed UTC
/// times (daily or weekly).
pub struct PipelineScheduler {
    scheduler: JobScheduler,
    immediate: Vec<GuardedRunner>,
}

impl PipelineScheduler {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            scheduler: JobScheduler::new().await?,
            immediate: Vec::new(),
        })
    }

    /// Every `every`, starting with an immediate run when the scheduler
    /// starts.
    pub async fn add_interval_job<F, Fut>(
        &mut self,
        name: &str,
        every: Duration,
        job_fn: F,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        info!("scheduling {} every {:?}", name, every);
        let (runner, _flight) = guarded_runner(name, job_fn);

        self.immediate.push(runner.clone());
        let job = Job::new_repeated_async(every, move |_uuid, _lock| runner())?;
        self.scheduler.add(job).await?;
        Ok(())
    }

    /// Every day at `hour:minute` UTC.
    pub async fn add_daily_utc_job<F, Fut>(
        &mut self,
        name: &str,
        hour: u32,
        minute: u32,
        job_fn: F,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let cron_expression = format!("0 {} {} * * *", minute, hour);
        self.add_cron_job(name, &cron_expression, job_fn).await
    }

    /// Every week at `weekday` (e.g. "Sun") `hour:minute` UTC.
    pub async fn add_weekly_utc_job<F, Fut>(
        &mut self,
        name: &str,
        weekday: &str,
        hour: u32,
        minute: u32,
        job_fn: F,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let cron_expression = format!("0 {} {} * * {}", minute, hour, weekday);
        self.add_cron_job(name, &cron_expression, job_fn).await
    }

    async fn add_cron_job<F, Fut>(&mut self, name: &str, cron: &str, job_fn: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        info!("scheduling {} with cron: {}", name, cron);
        let (runner, _flight) = guarded_runner(name, job_fn);

        let job = Job::new_async(cron, move |_uuid, _lock| runner())?;
        self.scheduler.add(job).await?;
        Ok(())
    }

    /// Kick off the immediate first runs of interval jobs, then start the
    /// timers.
    pub async fn start(&self) -> Result<()> {
        info!("starting scheduler with {} immediate jobs", self.immediate.len());
        for runner in &self.immediate {
            tokio::spawn(runner());
        }

        self.scheduler.start().await?;
        Ok(())
    }

    /// Cancel pending timers. In-flight runs are not preempted; they hold
    /// their flight guard until they finish on their own.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("shutting down scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }
}
