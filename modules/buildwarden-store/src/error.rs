use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Step output was attached before the parent build was stored.
    #[error("build not found for owner={owner}, repo={repo}, build_number={number}")]
    BuildNotFound {
        owner: String,
        repo: String,
        number: i64,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("could not encode stored payload: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
