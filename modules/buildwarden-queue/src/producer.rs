//! Producer-side helper: list recent builds and enqueue the failures for
//! analysis.

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use buildwarden_common::utc_from_epoch;
use drone_client::{Build, DroneClient};

use crate::client::QueueClient;
use crate::envelope::JobEnvelope;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueStats {
    pub scanned: usize,
    pub enqueued: usize,
}

/// Whether a listed build is worth analyzing: a failure that finished after
/// the cutoff.
fn should_enqueue(build: &Build, cutoff: DateTime<Utc>) -> bool {
    if build.status != "failure" {
        return false;
    }
    match utc_from_epoch(build.finished) {
        Some(finished) => finished >= cutoff,
        None => false,
    }
}

/// Fetch the repository's recent builds and enqueue every failure from the
/// last `days` days. The queue client must already be connected.
pub async fn enqueue_recent_failures(
    client: &DroneClient,
    queue: &mut QueueClient,
    owner: &str,
    repo: &str,
    limit: u32,
    days: i64,
) -> anyhow::Result<EnqueueStats> {
    let builds = client.get_builds(owner, repo, limit, 1).await?;
    let cutoff = Utc::now() - Duration::days(days);

    let mut stats = EnqueueStats {
        scanned: builds.len(),
        enqueued: 0,
    };
    for build in &builds {
        if !should_enqueue(build, cutoff) {
            continue;
        }
        info!(
            build = build.number,
            author = %build.author_login,
            "Enqueueing build for output analysis"
        );
        queue.send(&JobEnvelope::new(build.number)).await?;
        stats.enqueued += 1;
    }

    info!(
        scanned = stats.scanned,
        enqueued = stats.enqueued,
        days,
        "Enqueue sweep complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(status: &str, finished: i64) -> Build {
        Build {
            number: 1,
            status: status.to_string(),
            finished,
            ..Default::default()
        }
    }

    #[test]
    fn only_recent_failures_qualify() {
        let now = Utc::now().timestamp();
        let cutoff = Utc::now() - Duration::days(5);

        assert!(should_enqueue(&build("failure", now), cutoff));
        assert!(!should_enqueue(&build("success", now), cutoff));
        assert!(!should_enqueue(&build("running", now), cutoff));

        let old = now - 60 * 60 * 24 * 30;
        assert!(!should_enqueue(&build("failure", old), cutoff));

        // Never finished means nothing to analyze yet.
        assert!(!should_enqueue(&build("failure", 0), cutoff));
    }
}
