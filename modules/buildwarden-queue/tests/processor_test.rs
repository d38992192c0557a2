//! Processor flow against a mock Drone server.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use std::time::Duration;

use tokio::sync::watch;

use buildwarden_common::EventBus;
use buildwarden_queue::{
    BuildProcessor, ClientSocketType, JobEnvelope, Notifier, PullerWorker, QueueClient,
    QueueServer,
};
use buildwarden_rules::{pull_request_rules, MatchedRule};
use buildwarden_store::{BuildStore, HttpInteractionStore, StepStore, User, UserStore};
use drone_client::{AnalysisContext, DroneClient};

struct CountingNotifier {
    calls: AtomicUsize,
}

impl CountingNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(
        &self,
        _user: &User,
        _context: &AnalysisContext<'_>,
        _matches: &[MatchedRule],
    ) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// The tests truncate shared tables, so they take turns on the database.
static DB_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    buildwarden_store::migrate(&pool).await.ok()?;
    sqlx::query("TRUNCATE http_interaction, drone_build, drone_step, auth_user RESTART IDENTITY")
        .execute(&pool)
        .await
        .ok()?;
    Some(pool)
}

fn processor(
    pool: &PgPool,
    server: &MockServer,
    notifier: Arc<dyn Notifier>,
) -> BuildProcessor {
    let bus = Arc::new(EventBus::new());
    let cache = Arc::new(HttpInteractionStore::new(pool.clone(), bus.clone()));
    let client = Arc::new(
        DroneClient::new(&server.uri(), "token", cache, bus.clone()).expect("client"),
    );
    BuildProcessor::new(
        client,
        BuildStore::new(pool.clone()),
        StepStore::new(pool.clone()),
        UserStore::new(pool.clone(), bus),
        notifier,
        None,
        pull_request_rules("acme/widgets").expect("default rules"),
        "acme",
        "widgets",
    )
}

fn pr_build_json(number: i64) -> serde_json::Value {
    json!({
        "number": number,
        "status": "failure",
        "link": format!("https://github.com/acme/widgets/pull/{number}"),
        "author_login": "jdoe",
        "finished": 1_600_000_100,
        "updated": 1_600_000_200,
        "stages": [{
            "number": 1,
            "name": "build",
            "status": "failure",
            "exit_code": 1,
            "steps": [{
                "number": 2,
                "name": "node_modules",
                "status": "failure",
                "exit_code": 1,
            }],
        }],
    })
}

#[tokio::test]
async fn non_pr_build_is_dropped_after_one_fetch() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/repos/acme/widgets/builds/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "number": 42,
            "status": "failure",
            "link": "https://drone.example.com/acme/widgets/42",
            "author_login": "jdoe",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = CountingNotifier::new();
    let processor = processor(&pool, &server, notifier.clone());

    processor.process(42, false).await.unwrap();

    assert_eq!(notifier.calls(), 0);
    let builds = BuildStore::new(pool);
    assert!(builds
        .find_by_link("acme", "widgets", "https://drone.example.com/acme/widgets/42")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn unopted_author_is_dropped_unless_filters_ignored() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/repos/acme/widgets/builds/43"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pr_build_json(43)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/repos/acme/widgets/builds/43/logs/1/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"time": 0, "pos": 0, "out": "Couldn't find any versions for \"react\" that matches \"2021\""},
        ])))
        .mount(&server)
        .await;

    let notifier = CountingNotifier::new();
    let processor = processor(&pool, &server, notifier.clone());

    // No auth_user row: the filter gate drops the job before any log fetch.
    processor.process(43, false).await.unwrap();
    assert_eq!(notifier.calls(), 0);

    // Ignoring filters processes and persists, but still has nobody to notify.
    processor.process(43, true).await.unwrap();
    assert_eq!(notifier.calls(), 0);

    let builds = BuildStore::new(pool);
    let stored = builds
        .find_by_number("acme", "widgets", 43)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.last_ruleset_processed_at.is_some());
    assert_eq!(stored.matches().len(), 1);
}

#[tokio::test]
async fn processed_build_is_not_reprocessed() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };
    let server = MockServer::start().await;
    // The build info endpoint is cache-enabled, so the network sees exactly
    // one request across both runs; the log endpoint likewise.
    Mock::given(method("GET"))
        .and(path("/api/repos/acme/widgets/builds/44"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pr_build_json(44)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/repos/acme/widgets/builds/44/logs/1/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"time": 0, "pos": 0, "out": "Couldn't find any versions for \"react\" that matches \"2021\""},
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let bus = Arc::new(EventBus::new());
    let users = UserStore::new(pool.clone(), bus);
    users
        .create("jdoe@example.com", Some("jdoe"), Some("jdoe.slack"))
        .await
        .unwrap();

    let notifier = CountingNotifier::new();
    let processor = processor(&pool, &server, notifier.clone());

    processor.process(44, false).await.unwrap();
    assert_eq!(notifier.calls(), 1);

    // Second run: the dedup gate stops before logs, notifications stay at 1.
    processor.process(44, false).await.unwrap();
    assert_eq!(notifier.calls(), 1);

    let steps = StepStore::new(pool);
    let stored = steps.require_build("acme", "widgets", 44).await.unwrap();
    assert!(stored.last_ruleset_processed_at.is_some());
    assert!(stored.output_retrieved_at.is_some());
}

#[tokio::test]
async fn worker_drives_an_enqueued_job_end_to_end() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/repos/acme/widgets/builds/45"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pr_build_json(45)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/repos/acme/widgets/builds/45/logs/1/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"time": 0, "pos": 0, "out": "Couldn't find any versions for \"react\" that matches \"2021\""},
        ])))
        .mount(&server)
        .await;

    let bus = Arc::new(EventBus::new());
    let users = UserStore::new(pool.clone(), bus);
    users
        .create("jdoe@example.com", Some("jdoe"), Some("jdoe.slack"))
        .await
        .unwrap();

    let notifier = CountingNotifier::new();
    let build_processor = Arc::new(processor(&pool, &server, notifier.clone()));

    let rep = "tcp://127.0.0.1:28591";
    let pull = "tcp://127.0.0.1:28592";
    let push = "tcp://127.0.0.1:28593";
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let broker = QueueServer::new(rep, pull, push, shutdown_rx.clone())
        .with_poll_timeout(Duration::from_millis(50));
    let broker_task = tokio::spawn(broker.run());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let worker = PullerWorker::new(1, push, build_processor, shutdown_rx)
        .with_poll_timeout(Duration::from_millis(50));
    let worker_task = tokio::spawn(worker.run());

    let mut producer = QueueClient::new(rep, ClientSocketType::Req);
    producer.connect().await.unwrap();
    producer.send(&JobEnvelope::new(45)).await.unwrap();

    // Wait for the worker to finish the job.
    let builds = BuildStore::new(pool);
    let mut processed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(stored) = builds.find_by_number("acme", "widgets", 45).await.unwrap() {
            if stored.last_ruleset_processed_at.is_some() {
                processed = true;
                break;
            }
        }
    }
    assert!(processed, "worker never finished the job");
    assert_eq!(notifier.calls(), 1);

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), broker_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), worker_task).await;
}
