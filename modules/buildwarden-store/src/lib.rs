//! Postgres persistence for the build-analysis pipeline: the HTTP
//! interaction cache, observed builds and step outputs, and opted-in users.

pub mod builds;
pub mod error;
pub mod http_cache;
pub mod steps;
pub mod users;

pub use builds::{BuildStore, StoredBuild};
pub use error::{Result, StoreError};
pub use http_cache::{HttpInteraction, HttpInteractionStore};
pub use steps::{StepStore, StoredStep};
pub use users::{User, UserStore};

use sqlx::PgPool;

/// Run the embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
