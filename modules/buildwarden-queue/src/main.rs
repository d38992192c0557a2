use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use buildwarden_common::{events, Config, EventBus};
use buildwarden_queue::{BuildProcessor, Notifier, NoopNotifier, SlackNotifier, WorkerPool};
use buildwarden_rules::pull_request_rules;
use buildwarden_store::{BuildStore, HttpInteractionStore, StepStore, UserStore};
use drone_client::DroneClient;
use search_client::SearchClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Config first: the log level comes from it, and a missing required key
    // is the one error allowed to abort the process.
    let config = Config::load()?;

    let mut filter = EnvFilter::from_default_env();
    for target in [
        "buildwarden_queue",
        "buildwarden_store",
        "buildwarden_rules",
        "buildwarden_common",
        "drone_client",
        "search_client",
    ] {
        filter = filter.add_directive(format!("{target}={}", config.log_level).parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Buildwarden worker pool starting...");
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_workers_per_process.max(2) as u32)
        .connect(&config.database_url)
        .await?;
    buildwarden_store::migrate(&pool).await?;

    let bus = Arc::new(EventBus::new());
    events::register_default_subscribers(&bus);

    let cache = Arc::new(HttpInteractionStore::new(pool.clone(), bus.clone()));
    let client = Arc::new(
        DroneClient::new(
            &config.drone_server_url,
            &config.drone_access_token,
            cache,
            bus.clone(),
        )?
        .with_limits(config.max_pages, config.max_builds)
        .with_timeout(Duration::from_secs(config.http_timeout_secs)),
    );

    let search = Arc::new(SearchClient::new(&config.search_host, config.search_port));
    let builds = BuildStore::new(pool.clone()).with_search(search.clone());
    let steps = StepStore::new(pool.clone());
    let users = UserStore::new(pool.clone(), bus.clone());

    let ruleset = pull_request_rules(&config.repo_slug())?;
    let notifier: Arc<dyn Notifier> = if config.slack_webhook_url.is_empty() {
        Arc::new(NoopNotifier)
    } else {
        Arc::new(SlackNotifier::new(config.slack_webhook_url.clone()))
    };

    let processor = Arc::new(BuildProcessor::new(
        client,
        builds,
        steps,
        users,
        notifier,
        Some(search),
        ruleset,
        &config.drone_owner,
        &config.drone_repo,
    ));

    WorkerPool::new(config, processor).run().await
}
