//! Opted-in users: the presence of a row gates notifications.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use buildwarden_common::{Event, EventBus};

use crate::error::Result;

/// A row from the auth_user table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub github_username: Option<String>,
    pub slack_username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct UserStore {
    pool: PgPool,
    bus: Arc<EventBus>,
}

impl UserStore {
    pub fn new(pool: PgPool, bus: Arc<EventBus>) -> Self {
        Self { pool, bus }
    }

    pub async fn find_by_github_username(&self, login: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            "SELECT * FROM auth_user WHERE github_username = $1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn create(
        &self,
        email: &str,
        github_username: Option<&str>,
        slack_username: Option<&str>,
    ) -> Result<User> {
        let row = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO auth_user (email, github_username, slack_username)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(email.to_lowercase())
        .bind(github_username)
        .bind(slack_username)
        .fetch_one(&self.pool)
        .await?;

        self.bus.publish(&Event::UserCreated {
            github_username: row.github_username.clone().unwrap_or_default(),
        });
        Ok(row)
    }

    pub async fn update_slack_username(
        &self,
        github_username: &str,
        slack_username: &str,
    ) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            r#"
            UPDATE auth_user
            SET slack_username = $2, updated_at = now()
            WHERE github_username = $1
            RETURNING *
            "#,
        )
        .bind(github_username)
        .bind(slack_username)
        .fetch_optional(&self.pool)
        .await?;

        if row.is_some() {
            self.bus.publish(&Event::UserUpdated {
                github_username: github_username.to_string(),
            });
        }
        Ok(row)
    }
}
