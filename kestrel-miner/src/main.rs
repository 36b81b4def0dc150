use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use kestrel_miner::config::Config;
use kestrel_miner::job_source::{stratum_v1::StratumV1Source, SourceEvent};
use kestrel_miner::tracing::{self, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();

    let config = Config::load()?;
    let running = CancellationToken::new();
    let tracker = TaskTracker::new();

    for pool in &config.pools {
        let (event_tx, event_rx) = mpsc::channel::<SourceEvent>(100);
        let (_command_tx, command_rx) = mpsc::channel(100);
        let source = StratumV1Source::new(
            pool.to_pool_config()?,
            command_rx,
            event_tx,
            running.clone(),
        );
        tracker.spawn(async move {
            if let Err(e) = source.run().await {
                warn!(error = %e, "job source failed");
            }
        });
        // TODO: replace with the hash scheduler once boards are wired in.
        tracker.spawn(log_work(event_rx));
    }
    tracker.close();
    info!("Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }

    trace!("Shutting down.");
    running.cancel();

    tracker.wait().await;
    info!("Exiting.");
    Ok(())
}

// Observe pool work until something real consumes it.
async fn log_work(mut event_rx: mpsc::Receiver<SourceEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            SourceEvent::UpdateJob(job) => info!(job_id = %job.id, "job updated"),
            SourceEvent::ReplaceJob(job) => info!(job_id = %job.id, "jobs replaced"),
            SourceEvent::ClearJobs => info!("jobs cleared"),
        }
    }
}
