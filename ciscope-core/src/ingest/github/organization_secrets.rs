use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;
use std::collections::HashMap;

use super::repo_secrets::{Secret, SecretsData};
use crate::client::{ErrorSummary, RestClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, md5_hex, Ingestor, UnitContext};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SelectedRepositories {
    #[serde(deserialize_with = "lenient::vec")]
    repositories: Vec<SelectedRepository>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SelectedRepository {
    html_url: String,
}

/// Organization-level Actions secrets and the repositories they are exposed to.
///
/// Visibility decides the exposure: `all` reaches every repository, `private` every
/// private repository and `selected` the repositories listed for the secret.
pub struct OrganizationSecrets {
    rest: RestClient,
    organization: String,
    data: SecretsData,
    /// Repository URLs per `selected` secret name
    selected: HashMap<String, Vec<String>>,
}

impl OrganizationSecrets {
    pub fn new(ctx: &UnitContext) -> Self {
        Self {
            rest: ctx.rest.clone(),
            organization: ctx.organization.clone(),
            data: SecretsData::default(),
            selected: HashMap::new(),
        }
    }

    /// Resource path of an absolute API URL, relative to the client's base URL.
    fn relative_path(&self, api_url: &str) -> String {
        let path = url::Url::parse(api_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| api_url.to_string());
        let base_path = url::Url::parse(self.rest.base_url())
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        path.strip_prefix(&base_path)
            .unwrap_or(&path)
            .trim_start_matches('/')
            .to_string()
    }

    fn targets(&self, secret: &Secret) -> Vec<NodeMatch> {
        match secret.visibility.as_str() {
            "all" => vec![NodeMatch::all(NodeLabel::Repository)],
            "private" => vec![NodeMatch::by(NodeLabel::Repository, "isPrivate", true)],
            "selected" => self
                .selected
                .get(&secret.name)
                .into_iter()
                .flatten()
                .map(|url| NodeMatch::by_id(NodeLabel::Repository, url.as_str()))
                .collect(),
            other => {
                tracing::warn!("Unknown visibility {:?} for secret {}", other, secret.name);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Ingestor for OrganizationSecrets {
    fn name(&self) -> &'static str {
        "organizationsecrets"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let path = format!("orgs/{}/actions/secrets", self.organization);
        let fetched = self.rest.fetch(&path).await?;
        let mut errors = fetched.errors;
        self.data = decode(fetched.data, "organization secrets");

        for secret in &self.data.secrets {
            if secret.visibility != "selected" {
                continue;
            }
            let Some(url) = secret.selected_repositories_url.as_deref() else {
                continue;
            };
            let fetched = self.rest.fetch(&self.relative_path(url)).await?;
            errors.merge(fetched.errors);
            let repositories: SelectedRepositories =
                decode(fetched.data, "selected repositories");
            self.selected.insert(
                secret.name.clone(),
                repositories
                    .repositories
                    .into_iter()
                    .map(|r| r.html_url)
                    .collect(),
            );
        }
        Ok(errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        for secret in &self.data.secrets {
            let id = md5_hex(&[&secret.created_at, &secret.name]);
            statements.push(
                NodeUpsert::new(NodeLabel::EnvironmentVariable, id.as_str())
                    .set("name", secret.name.as_str())
                    .set("visibility", secret.visibility.as_str())
                    .into(),
            );
            for target in self.targets(secret) {
                statements.push(
                    EdgeUpsert::new(
                        target,
                        EdgeType::ExposesEnvironmentVariable,
                        NodeMatch::by_id(NodeLabel::EnvironmentVariable, id.as_str()),
                    )
                    .into(),
                );
            }
        }
        statements
    }
}
