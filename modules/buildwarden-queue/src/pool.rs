//! Supervision of the broker task and the puller workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use buildwarden_common::Config;

use crate::broker::QueueServer;
use crate::error::QueueError;
use crate::processor::BuildProcessor;
use crate::worker::PullerWorker;

pub struct WorkerPool {
    config: Config,
    processor: Arc<BuildProcessor>,
}

impl WorkerPool {
    pub fn new(config: Config, processor: Arc<BuildProcessor>) -> Self {
        Self { config, processor }
    }

    /// Spawn one broker task and N-1 workers, then wait for an interrupt.
    /// On ctrl-c the pool stops accepting jobs, lets in-flight jobs finish,
    /// and unbinds the sockets.
    pub async fn run(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll_timeout = Duration::from_millis(self.config.poll_timeout_ms);
        let postmortem_sleep = Duration::from_secs(self.config.postmortem_sleep_secs);

        // The pool always runs the broker plus at least one worker.
        let task_count = self.config.max_workers_per_process.max(2);
        let mut tasks: JoinSet<Result<(), QueueError>> = JoinSet::new();

        let server = QueueServer::new(
            &self.config.queue_rep_address,
            &self.config.queue_pull_address,
            &self.config.queue_push_address,
            shutdown_rx.clone(),
        )
        .with_poll_timeout(poll_timeout)
        .with_postmortem_sleep(postmortem_sleep);
        tasks.spawn(server.run());

        for worker_id in 1..task_count {
            let worker = PullerWorker::new(
                worker_id,
                &self.config.queue_push_address,
                self.processor.clone(),
                shutdown_rx.clone(),
            )
            .with_poll_timeout(poll_timeout)
            .with_postmortem_sleep(postmortem_sleep);
            tasks.spawn(worker.run());
        }
        info!(workers = task_count - 1, "Worker pool started");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, draining worker pool");
            }
            Some(result) = tasks.join_next() => {
                match result {
                    Ok(Ok(())) => error!("Pool task exited unexpectedly"),
                    Ok(Err(e)) => error!(error = %e, "Pool task failed"),
                    Err(e) => error!(error = %e, "Pool task panicked"),
                }
            }
        }

        let _ = shutdown_tx.send(true);
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Pool task failed during drain"),
                Err(e) => error!(error = %e, "Pool task panicked during drain"),
            }
        }
        info!("Worker pool stopped");
        Ok(())
    }
}
