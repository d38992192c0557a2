use async_trait::async_trait;

use buildwarden_rules::MatchedRule;
use buildwarden_store::User;
use drone_client::AnalysisContext;

/// Pluggable sink for matched-rule notifications. A failing notifier
/// surfaces its error to the processor, which logs and continues.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user: &User,
        context: &AnalysisContext<'_>,
        matches: &[MatchedRule],
    ) -> anyhow::Result<()>;
}
