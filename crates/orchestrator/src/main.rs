use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use orchestrator::Orchestrator;
use scheduler::PipelineScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    let _ = dotenv::dotenv();

    // Configure tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting ingestion pipeline");

    let orchestrator = Orchestrator::from_env()?;

    let mut scheduler = PipelineScheduler::new().await?;
    orchestrator.register_jobs(&mut scheduler).await?;

    scheduler.start().await?;
    info!("Scheduler started; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt signal, shutting down...");
    scheduler.shutdown().await?;

    Ok(())
}
