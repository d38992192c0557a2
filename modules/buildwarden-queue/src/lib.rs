//! Job queue fabric and the worker pool that drives build analysis.
//!
//! The broker ([`QueueServer`]) bridges two ingresses (REP for acked
//! enqueues, PULL for fire-and-forget) to one PUSH egress feeding the
//! workers. Each [`PullerWorker`] decodes [`JobEnvelope`]s and hands them to
//! the [`BuildProcessor`].

pub mod broker;
pub mod client;
pub mod envelope;
pub mod error;
pub mod networking;
pub mod notify;
pub mod pool;
pub mod processor;
pub mod producer;
pub mod worker;

pub use broker::QueueServer;
pub use client::{ClientSocketType, QueueClient};
pub use envelope::JobEnvelope;
pub use error::QueueError;
pub use notify::{Notifier, NoopNotifier, SlackNotifier};
pub use pool::WorkerPool;
pub use processor::BuildProcessor;
pub use producer::enqueue_recent_failures;
pub use worker::PullerWorker;
