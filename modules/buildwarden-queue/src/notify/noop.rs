use async_trait::async_trait;
use tracing::debug;

use buildwarden_rules::MatchedRule;
use buildwarden_store::User;
use drone_client::AnalysisContext;

use super::backend::Notifier;

/// Notifier that only logs. Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(
        &self,
        user: &User,
        context: &AnalysisContext<'_>,
        matches: &[MatchedRule],
    ) -> anyhow::Result<()> {
        debug!(
            user = %user.email,
            build = context.build.number,
            matches = matches.len(),
            "Dropping notification (no backend configured)"
        );
        Ok(())
    }
}
