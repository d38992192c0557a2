use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use buildwarden_rules::MatchedRule;
use buildwarden_store::User;
use drone_client::AnalysisContext;

use super::backend::Notifier;

/// Slack incoming-webhook notification backend.
pub struct SlackNotifier {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack webhook returned non-success");
            anyhow::bail!("Slack webhook returned {status}");
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(
        &self,
        user: &User,
        context: &AnalysisContext<'_>,
        matches: &[MatchedRule],
    ) -> anyhow::Result<()> {
        let recipient = user
            .slack_username
            .as_deref()
            .unwrap_or(user.email.as_str());

        let mut body = vec![
            format!("*For:* @{recipient}"),
            format!("*Build:* <{}>", context.build.link),
            format!(
                "*Stage/Step:* {} ({}) / {} ({})",
                context.stage.name, context.stage.number, context.step.name, context.step.number
            ),
            String::new(),
        ];
        for matched in matches {
            body.push(matched.describe());
        }

        let summary = format!(
            ":rotating_light: Build {} needs your attention",
            context.build.number
        );
        let payload = json!({
            // Fallback text for surfaces that do not render blocks.
            "text": summary,
            "blocks": [
                {
                    "type": "header",
                    "text": {
                        "type": "plain_text",
                        "text": summary,
                        "emoji": true,
                    },
                },
                {"type": "divider"},
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": body.join("\n"),
                    },
                },
            ],
            "unfurl_links": false,
        });

        self.post(payload).await
    }
}
