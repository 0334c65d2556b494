use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;

use crate::client::{ErrorSummary, RestClient};
use crate::error::Result;
use crate::ingest::{decode_list, lenient, url_host, Ingestor, Target, UnitContext};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Webhook {
    url: String,
    name: String,
    #[serde(deserialize_with = "lenient::vec")]
    events: Vec<String>,
    config: WebhookConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WebhookConfig {
    url: String,
}

/// Webhooks configured on a repository and the host they deliver to.
pub struct RepoWebhooks {
    rest: RestClient,
    organization: String,
    repo_name: String,
    repo_url: String,
    data: Vec<Webhook>,
}

impl RepoWebhooks {
    pub fn new(ctx: &UnitContext, target: &Target) -> Result<Self> {
        let Target::Repository { name, url, .. } = target else {
            return Err(target.mismatch("repowebhooks"));
        };
        Ok(Self {
            rest: ctx.rest.clone(),
            organization: ctx.organization.clone(),
            repo_name: name.clone(),
            repo_url: url.clone(),
            data: Vec::new(),
        })
    }
}

#[async_trait]
impl Ingestor for RepoWebhooks {
    fn name(&self) -> &'static str {
        "repowebhooks"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let path = format!("repos/{}/{}/hooks", self.organization, self.repo_name);
        let fetched = self.rest.fetch(&path).await?;
        self.data = decode_list(fetched.data, "webhooks");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        for webhook in &self.data {
            statements.push(
                NodeUpsert::new(NodeLabel::Webhook, webhook.url.as_str())
                    .set("name", webhook.name.as_str())
                    .set("url", webhook.url.as_str())
                    .set("target", webhook.config.url.as_str())
                    .set("host", url_host(&webhook.config.url))
                    .set("events", webhook.events.clone())
                    .into(),
            );
            statements.push(
                EdgeUpsert::new(
                    NodeMatch::by_id(NodeLabel::Repository, self.repo_url.as_str()),
                    EdgeType::HasWebhook,
                    NodeMatch::by_id(NodeLabel::Webhook, webhook.url.as_str()),
                )
                .into(),
            );
        }
        statements
    }
}
