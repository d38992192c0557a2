//! Process-local named-signal publish/subscribe.
//!
//! Subscribers run synchronously on the publisher's task. A panicking
//! subscriber is caught and logged so the remaining subscribers still see
//! the signal. Payloads are small owned values, which keeps subscribers
//! re-entrant and the bus shareable across workers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

/// Everything the system announces on the bus.
#[derive(Debug, Clone)]
pub enum Event {
    HttpCacheHit {
        method: String,
        url: String,
        status: u16,
    },
    HttpCacheMiss {
        method: String,
        url: String,
        status: u16,
    },
    GetBuilds {
        owner: String,
        repo: String,
        limit: u32,
        page: u32,
        builds: usize,
        max_builds: usize,
        max_pages: u32,
    },
    IterBuildsByPage {
        owner: String,
        repo: String,
        page: u32,
        builds: usize,
        max_pages: u32,
    },
    GetBuildInfo {
        owner: String,
        repo: String,
        build_number: i64,
    },
    GetBuildStepOutput {
        owner: String,
        repo: String,
        build_number: i64,
        stage_number: i64,
        step_number: i64,
        lines: usize,
    },
    UserCreated {
        github_username: String,
    },
    UserUpdated {
        github_username: String,
    },
    TokenCreated {
        user_id: i64,
    },
    TokenUpdated {
        user_id: i64,
    },
    GithubEvent {
        event: String,
    },
}

impl Event {
    /// The signal name the event is published under.
    pub fn signal(&self) -> &'static str {
        match self {
            Event::HttpCacheHit { .. } => "http-cache-hit",
            Event::HttpCacheMiss { .. } => "http-cache-miss",
            Event::GetBuilds { .. } => "get-builds",
            Event::IterBuildsByPage { .. } => "iter-builds-by-page",
            Event::GetBuildInfo { .. } => "get-build-info",
            Event::GetBuildStepOutput { .. } => "get-build-step-output",
            Event::UserCreated { .. } => "user-created",
            Event::UserUpdated { .. } => "user-updated",
            Event::TokenCreated { .. } => "token-created",
            Event::TokenUpdated { .. } => "token-updated",
            Event::GithubEvent { .. } => "github-event",
        }
    }
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Named-signal bus. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<(Option<&'static str>, Subscriber)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every signal.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .expect("event bus lock poisoned")
            .push((None, Box::new(subscriber)));
    }

    /// Subscribe to a single named signal.
    pub fn subscribe_to<F>(&self, signal: &'static str, subscriber: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .expect("event bus lock poisoned")
            .push((Some(signal), Box::new(subscriber)));
    }

    /// Deliver an event to all matching subscribers, in subscription order.
    pub fn publish(&self, event: &Event) {
        let subscribers = self.subscribers.read().expect("event bus lock poisoned");
        for (filter, subscriber) in subscribers.iter() {
            if let Some(signal) = filter {
                if *signal != event.signal() {
                    continue;
                }
            }
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                tracing::error!(signal = event.signal(), "Event subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("event bus lock poisoned").len()
    }
}

/// Install the debug-logging subscribers the worker binary registers at
/// startup, one per signal family.
pub fn register_default_subscribers(bus: &EventBus) {
    bus.subscribe_to("http-cache-hit", |event| {
        if let Event::HttpCacheHit { method, url, .. } = event {
            tracing::debug!(%method, %url, "cache hit");
        }
    });
    bus.subscribe_to("http-cache-miss", |event| {
        if let Event::HttpCacheMiss { method, url, .. } = event {
            tracing::debug!(%method, %url, "cache miss");
        }
    });
    bus.subscribe_to("get-builds", |event| {
        if let Event::GetBuilds {
            owner,
            repo,
            page,
            builds,
            ..
        } = event
        {
            tracing::debug!(%owner, %repo, page, builds, "fetched builds page");
        }
    });
    bus.subscribe_to("get-build-info", |event| {
        if let Event::GetBuildInfo {
            owner,
            repo,
            build_number,
        } = event
        {
            tracing::debug!(%owner, %repo, build_number, "fetched build info");
        }
    });
    bus.subscribe_to("get-build-step-output", |event| {
        if let Event::GetBuildStepOutput {
            build_number,
            stage_number,
            step_number,
            lines,
            ..
        } = event
        {
            tracing::debug!(build_number, stage_number, step_number, lines, "fetched step output");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn cache_hit() -> Event {
        Event::HttpCacheHit {
            method: "GET".to_string(),
            url: "https://x/api/y".to_string(),
            status: 200,
        }
    }

    #[test]
    fn delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let seen = seen.clone();
            bus.subscribe(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(bus.subscriber_count(), 3);
        bus.publish(&cache_hit());
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn filters_by_signal_name() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            bus.subscribe_to("http-cache-miss", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish(&cache_hit());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        bus.subscribe(|_| panic!("boom"));
        {
            let seen = seen.clone();
            bus.subscribe(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish(&cache_hit());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
