use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error(transparent)]
    Transport(#[from] zeromq::ZmqError),

    #[error("invalid job envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("queue client is not connected")]
    NotConnected,

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
}

impl From<&'static str> for QueueError {
    fn from(value: &'static str) -> Self {
        QueueError::InvalidMessage(value)
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
