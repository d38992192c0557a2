//! Producer-side queue clients.

use tracing::debug;
use zeromq::{PushSocket, ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::envelope::JobEnvelope;
use crate::error::{QueueError, Result};
use crate::networking::resolve_zmq_address;

/// Which ingress a producer talks to: REQ waits for an ack per job, PUSH is
/// fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSocketType {
    Req,
    Push,
}

enum ClientSocket {
    Req(ReqSocket),
    Push(PushSocket),
}

pub struct QueueClient {
    connect_address: String,
    socket_type: ClientSocketType,
    socket: Option<ClientSocket>,
}

impl QueueClient {
    pub fn new(connect_address: &str, socket_type: ClientSocketType) -> Self {
        Self {
            connect_address: resolve_zmq_address(connect_address),
            socket_type,
            socket: None,
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        debug!(address = %self.connect_address, socket = ?self.socket_type, "Connecting queue client");
        let socket = match self.socket_type {
            ClientSocketType::Req => {
                let mut socket = ReqSocket::new();
                socket.connect(&self.connect_address).await?;
                ClientSocket::Req(socket)
            }
            ClientSocketType::Push => {
                let mut socket = PushSocket::new();
                socket.connect(&self.connect_address).await?;
                ClientSocket::Push(socket)
            }
        };
        self.socket = Some(socket);
        Ok(())
    }

    /// Enqueue one job. On a REQ socket this waits for the broker's echo and
    /// returns it; on a PUSH socket it returns immediately with `None`.
    pub async fn send(&mut self, job: &JobEnvelope) -> Result<Option<JobEnvelope>> {
        let payload = serde_json::to_string(job)?;
        match self.socket.as_mut().ok_or(QueueError::NotConnected)? {
            ClientSocket::Req(socket) => {
                socket.send(ZmqMessage::from(payload)).await?;
                let reply: String = socket.recv().await?.try_into()?;
                let echoed: JobEnvelope = serde_json::from_str(&reply)?;
                debug!(build_id = echoed.build_id, "Job acknowledged");
                Ok(Some(echoed))
            }
            ClientSocket::Push(socket) => {
                socket.send(ZmqMessage::from(payload)).await?;
                Ok(None)
            }
        }
    }

    pub fn close(&mut self) {
        self.socket = None;
    }
}
