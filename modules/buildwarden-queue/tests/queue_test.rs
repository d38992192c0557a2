//! Broker round-trip over loopback sockets.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zeromq::{PullSocket, Socket};

use buildwarden_common::EventBus;
use buildwarden_queue::broker::poll_recv;
use buildwarden_queue::{
    enqueue_recent_failures, ClientSocketType, JobEnvelope, QueueClient, QueueServer,
};
use drone_client::{DroneClient, NoopCache};

async fn recv_job(worker: &mut PullSocket) -> Option<JobEnvelope> {
    for _ in 0..50 {
        match poll_recv(worker, Duration::from_millis(100)).await {
            Ok(Some(text)) => return serde_json::from_str(&text).ok(),
            Ok(None) => continue,
            Err(_) => return None,
        }
    }
    None
}

#[tokio::test]
async fn rep_ingress_echoes_and_forwards() {
    let rep = "tcp://127.0.0.1:28551";
    let pull = "tcp://127.0.0.1:28552";
    let push = "tcp://127.0.0.1:28553";

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = QueueServer::new(rep, pull, push, shutdown_rx)
        .with_poll_timeout(Duration::from_millis(50));
    let broker = tokio::spawn(server.run());

    // Give the broker a moment to bind.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut worker = PullSocket::new();
    worker.connect(push).await.unwrap();

    let mut producer = QueueClient::new(rep, ClientSocketType::Req);
    producer.connect().await.unwrap();

    let job = JobEnvelope::new(42);
    let ack = producer.send(&job).await.unwrap();
    assert_eq!(ack, Some(job));

    let delivered = recv_job(&mut worker).await;
    assert_eq!(delivered, Some(job));

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), broker).await;
}

#[tokio::test]
async fn pull_ingress_forwards_fire_and_forget() {
    let rep = "tcp://127.0.0.1:28561";
    let pull = "tcp://127.0.0.1:28562";
    let push = "tcp://127.0.0.1:28563";

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = QueueServer::new(rep, pull, push, shutdown_rx)
        .with_poll_timeout(Duration::from_millis(50));
    let broker = tokio::spawn(server.run());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut worker = PullSocket::new();
    worker.connect(push).await.unwrap();

    let mut producer = QueueClient::new(pull, ClientSocketType::Push);
    producer.connect().await.unwrap();

    let job = JobEnvelope {
        build_id: 7,
        ignore_filters: true,
    };
    let ack = producer.send(&job).await.unwrap();
    assert_eq!(ack, None);

    let delivered = recv_job(&mut worker).await;
    assert_eq!(delivered, Some(job));

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), broker).await;
}

#[tokio::test]
async fn producer_sweep_enqueues_recent_failures() {
    let rep = "tcp://127.0.0.1:28581";
    let pull = "tcp://127.0.0.1:28582";
    let push = "tcp://127.0.0.1:28583";

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = QueueServer::new(rep, pull, push, shutdown_rx)
        .with_poll_timeout(Duration::from_millis(50));
    let broker = tokio::spawn(server.run());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut worker = PullSocket::new();
    worker.connect(push).await.unwrap();

    let now = chrono::Utc::now().timestamp();
    let old = now - 60 * 60 * 24 * 30;
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/repos/acme/widgets/builds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"number": 1, "status": "failure", "finished": now, "updated": now},
            {"number": 2, "status": "success", "finished": now, "updated": now},
            {"number": 3, "status": "failure", "finished": old, "updated": old},
            {"number": 4, "status": "failure", "finished": now - 60, "updated": now - 60},
        ])))
        .mount(&upstream)
        .await;

    let client = DroneClient::new(
        &upstream.uri(),
        "token",
        Arc::new(NoopCache),
        Arc::new(EventBus::new()),
    )
    .unwrap()
    .with_limits(1, 100);

    let mut producer = QueueClient::new(rep, ClientSocketType::Req);
    producer.connect().await.unwrap();

    let stats = enqueue_recent_failures(&client, &mut producer, "acme", "widgets", 25, 5)
        .await
        .unwrap();
    assert_eq!(stats.scanned, 4);
    assert_eq!(stats.enqueued, 2);

    let mut delivered = Vec::new();
    for _ in 0..2 {
        delivered.push(recv_job(&mut worker).await.unwrap().build_id);
    }
    delivered.sort_unstable();
    assert_eq!(delivered, vec![1, 4]);

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), broker).await;
}

#[tokio::test]
async fn jobs_from_one_ingress_stay_fifo() {
    let rep = "tcp://127.0.0.1:28571";
    let pull = "tcp://127.0.0.1:28572";
    let push = "tcp://127.0.0.1:28573";

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = QueueServer::new(rep, pull, push, shutdown_rx)
        .with_poll_timeout(Duration::from_millis(50));
    let broker = tokio::spawn(server.run());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut worker = PullSocket::new();
    worker.connect(push).await.unwrap();

    let mut producer = QueueClient::new(rep, ClientSocketType::Req);
    producer.connect().await.unwrap();

    for build_id in [1, 2, 3] {
        producer.send(&JobEnvelope::new(build_id)).await.unwrap();
    }

    let mut delivered = Vec::new();
    for _ in 0..3 {
        delivered.push(recv_job(&mut worker).await.unwrap().build_id);
    }
    assert_eq!(delivered, vec![1, 2, 3]);

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), broker).await;
}
