use thiserror::Error;

#[derive(Error, Debug)]
pub enum DroneError {
    /// Upstream returned 404. Recoverable; callers decide what "absent" means.
    #[error("not found: {url}")]
    NotFound { url: String },

    /// Upstream returned a non-200, non-404 status.
    #[error("upstream returned {status} for {url}: {message}")]
    Upstream {
        status: u16,
        url: String,
        message: String,
    },

    /// A step-log payload that is neither an object nor an array.
    #[error("unexpected step log payload shape: {detail}")]
    UnexpectedShape { detail: String },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("could not decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DroneError>;
