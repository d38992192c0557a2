//! The queue broker: one reply ingress, one fire-and-forget ingress, one
//! load-balanced egress to the worker pool.
//!
//! The broker forwards a single envelope at a time and awaits the PUSH send
//! before polling the ingresses again, which bounds in-flight work the same
//! way a high-water mark of one would. An unexpected error tears the sockets
//! down, sleeps, and rebinds so one bad payload cannot take the broker out.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};
use zeromq::{PullSocket, PushSocket, RepSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::envelope::JobEnvelope;
use crate::error::{QueueError, Result};
use crate::networking::resolve_zmq_address;

pub(crate) const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
pub(crate) const DEFAULT_POSTMORTEM_SLEEP: Duration = Duration::from_secs(10);

/// Receive with a bounded poll. `None` means the poll timed out.
pub async fn poll_recv<S: SocketRecv>(
    socket: &mut S,
    timeout: Duration,
) -> Result<Option<String>> {
    match tokio::time::timeout(timeout, socket.recv()).await {
        Ok(Ok(message)) => {
            let text: String = message.try_into()?;
            Ok(Some(text))
        }
        Ok(Err(e)) => Err(QueueError::Transport(e)),
        Err(_) => Ok(None),
    }
}

struct BrokerSockets {
    rep: RepSocket,
    pull: PullSocket,
    push: PushSocket,
}

pub struct QueueServer {
    rep_bind_address: String,
    pull_bind_address: String,
    push_bind_address: String,
    poll_timeout: Duration,
    postmortem_sleep: Duration,
    shutdown: watch::Receiver<bool>,
}

impl QueueServer {
    pub fn new(
        rep_bind_address: &str,
        pull_bind_address: &str,
        push_bind_address: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            rep_bind_address: resolve_zmq_address(rep_bind_address),
            pull_bind_address: resolve_zmq_address(pull_bind_address),
            push_bind_address: resolve_zmq_address(push_bind_address),
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

    pub async fn run(mut self) -> Result<()> {
        let mut sockets = self.listen().await?;
        info!("Queue broker started");

        while !*self.shutdown.borrow() {
            match self.loop_once(&mut sockets).await {
                Ok(()) => tokio::task::yield_now().await,
                Err(e) => {
                    error!(error = %e, "Queue broker interrupted by error");
                    drop(sockets);
                    info!(
                        seconds = self.postmortem_sleep.as_secs(),
                        "Restoring broker health after sleep"
                    );
                    tokio::time::sleep(self.postmortem_sleep).await;
                    sockets = self.listen().await?;
                }
            }
        }

        drop(sockets);
        info!("Queue broker unbound");
        Ok(())
    }

    async fn listen(&mut self) -> Result<BrokerSockets> {
        let mut rep = RepSocket::new();
        rep.bind(&self.rep_bind_address).await?;
        info!(address = %self.rep_bind_address, "Listening on REP address");

        let mut pull = PullSocket::new();
        pull.bind(&self.pull_bind_address).await?;
        info!(address = %self.pull_bind_address, "Listening on PULL address");

        let mut push = PushSocket::new();
        push.bind(&self.push_bind_address).await?;
        info!(address = %self.push_bind_address, "Listening on PUSH address");

        Ok(BrokerSockets { rep, pull, push })
    }

    /// One poll over the socket triad. Within an ingress, jobs stay FIFO;
    /// across ingresses the order is whatever the poll interleaves.
    async fn loop_once(&mut self, sockets: &mut BrokerSockets) -> Result<()> {
        if let Some(text) = poll_recv(&mut sockets.pull, self.poll_timeout).await? {
            let envelope: JobEnvelope = serde_json::from_str(&text)?;
            debug!(build_id = envelope.build_id, "Forwarding pull-side job");
            forward(&mut sockets.push, &envelope).await?;
        }

        if let Some(text) = poll_recv(&mut sockets.rep, self.poll_timeout).await? {
            let envelope: JobEnvelope = serde_json::from_str(&text)?;
            debug!(build_id = envelope.build_id, "Forwarding rep-side job");
            forward(&mut sockets.push, &envelope).await?;
            // Ack by echoing the envelope back to the producer.
            sockets
                .rep
                .send(ZmqMessage::from(serde_json::to_string(&envelope)?))
                .await?;
        }

        Ok(())
    }
}

/// Hand one envelope to the worker side. The send suspends until a worker
/// can take the message; that suspension is the broker's back-pressure.
async fn forward(push: &mut PushSocket, envelope: &JobEnvelope) -> Result<()> {
    push.send(ZmqMessage::from(serde_json::to_string(envelope)?))
        .await?;
    Ok(())
}
