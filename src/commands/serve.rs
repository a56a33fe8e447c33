use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;

use filebalancer::scheduler::CycleEvent;
use filebalancer::service::BalancerService;

/// Run the timer loop until Ctrl-C
pub async fn serve(service: BalancerService) -> Result<()> {
    let config = service.config();

    println!("Starting File Balancer");
    println!("======================");
    println!("  Nodes: {}", service.nodes().join(", "));
    println!("  Threshold: {}", config.scheduler.threshold);
    println!("  Interval: {}s", config.scheduler.interval_secs);
    println!("  Storage root: {}", config.cluster.storage_root.display());
    println!();

    if !config.scheduler.enabled {
        println!("Scheduler disabled in configuration; waiting for Ctrl-C");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        return Ok(());
    }

    let scheduler = service.scheduler();
    let mut events = scheduler.subscribe();

    let runner = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.start().await }
    });

    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CycleEvent::Migrated {
                    file_id,
                    source,
                    target,
                    ..
                }) => {
                    println!("Migrated file {file_id}: {source} -> {target}");
                }
                Ok(CycleEvent::Failed { code, message, .. }) => {
                    println!("Cycle failed ({code}): {message}");
                }
                Ok(CycleEvent::Idle { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event reporter lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("Scheduler running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("Stopping scheduler (waiting for the current cycle)...");
    scheduler.stop();
    runner.await.context("Scheduler task panicked")?;
    reporter.abort();

    println!();
    print!("{}", scheduler.status().await.display());
    Ok(())
}
