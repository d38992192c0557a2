//! A puller worker: one cooperative task pulling jobs off the broker's PUSH
//! egress and driving the build processor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};
use zeromq::{PullSocket, Socket};

use crate::broker::{poll_recv, DEFAULT_POLL_TIMEOUT, DEFAULT_POSTMORTEM_SLEEP};
use crate::envelope::JobEnvelope;
use crate::error::Result;
use crate::networking::resolve_zmq_address;
use crate::processor::BuildProcessor;

pub struct PullerWorker {
    worker_id: usize,
    pull_connect_address: String,
    processor: Arc<BuildProcessor>,
    poll_timeout: Duration,
    postmortem_sleep: Duration,
    shutdown: watch::Receiver<bool>,
}

impl PullerWorker {
    pub fn new(
        worker_id: usize,
        pull_connect_address: &str,
        processor: Arc<BuildProcessor>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker_id,
            pull_connect_address: resolve_zmq_address(pull_connect_address),
            processor,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            postmortem_sleep: DEFAULT_POSTMORTEM_SLEEP,
            shutdown,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_postmortem_sleep(mut self, sleep: Duration) -> Self {
        self.postmortem_sleep = sleep;
        self
    }

    /// Pull and process jobs until shutdown. The flag is checked between
    /// jobs only; a job in flight is never interrupted.
    pub async fn run(mut self) -> Result<()> {
        let mut queue = PullSocket::new();
        info!(
            worker = self.worker_id,
            address = %self.pull_connect_address,
            "Connecting to pull address"
        );
        queue.connect(&self.pull_connect_address).await?;
        info!(worker = self.worker_id, "Worker is online and ready for jobs");

        while !*self.shutdown.borrow() {
            let text = match poll_recv(&mut queue, self.poll_timeout).await {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(e) => {
                    error!(worker = self.worker_id, error = %e, "Failed to read from queue");
                    info!(
                        worker = self.worker_id,
                        seconds = self.postmortem_sleep.as_secs(),
                        "Restoring worker health after sleep"
                    );
                    tokio::time::sleep(self.postmortem_sleep).await;
                    continue;
                }
            };

            let envelope: JobEnvelope = match serde_json::from_str(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(
                        worker = self.worker_id,
                        error = %e,
                        job = %text,
                        "Discarding undecodable job"
                    );
                    continue;
                }
            };

            debug!(
                worker = self.worker_id,
                build_id = envelope.build_id,
                ignore_filters = envelope.ignore_filters,
                "Processing job"
            );
            if let Err(e) = self
                .processor
                .process(envelope.build_id, envelope.ignore_filters)
                .await
            {
                error!(
                    worker = self.worker_id,
                    build_id = envelope.build_id,
                    error = %e,
                    "Job processing failed"
                );
                info!(
                    worker = self.worker_id,
                    seconds = self.postmortem_sleep.as_secs(),
                    "Restoring worker health after sleep"
                );
                tokio::time::sleep(self.postmortem_sleep).await;
            }
        }

        info!(worker = self.worker_id, "Worker stopped");
        Ok(())
    }
}
