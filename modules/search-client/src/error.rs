use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search index returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, SearchError>;
