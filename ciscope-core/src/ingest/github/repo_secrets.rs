use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;

use crate::client::{ErrorSummary, RestClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, md5_hex, Ingestor, Target, UnitContext};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SecretsData {
    #[serde(deserialize_with = "lenient::vec")]
    pub secrets: Vec<Secret>,
}

/// Actions secret. The API only ever returns names.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Secret {
    pub name: String,
    pub created_at: String,
    pub visibility: String,
    pub selected_repositories_url: Option<String>,
}

/// Actions secrets of a repository.
pub struct RepoSecrets {
    rest: RestClient,
    organization: String,
    repo_name: String,
    repo_url: String,
    repo_database_id: Option<i64>,
    data: SecretsData,
}

impl RepoSecrets {
    pub fn new(ctx: &UnitContext, target: &Target) -> Result<Self> {
        let Target::Repository {
            name,
            url,
            database_id,
        } = target
        else {
            return Err(target.mismatch("reposecrets"));
        };
        Ok(Self {
            rest: ctx.rest.clone(),
            organization: ctx.organization.clone(),
            repo_name: name.clone(),
            repo_url: url.clone(),
            repo_database_id: *database_id,
            data: SecretsData::default(),
        })
    }

    fn secret_id(&self, secret: &Secret) -> String {
        match self.repo_database_id {
            Some(id) => md5_hex(&[&id.to_string(), &secret.name]),
            None => md5_hex(&[&self.repo_url, &secret.name]),
        }
    }
}

#[async_trait]
impl Ingestor for RepoSecrets {
    fn name(&self) -> &'static str {
        "reposecrets"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let path = format!("repos/{}/{}/actions/secrets", self.organization, self.repo_name);
        let fetched = self.rest.fetch(&path).await?;
        self.data = decode(fetched.data, "repository secrets");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        for secret in &self.data.secrets {
            let id = self.secret_id(secret);
            statements.push(
                NodeUpsert::new(NodeLabel::EnvironmentVariable, id.as_str())
                    .set("name", secret.name.as_str())
                    .into(),
            );
            statements.push(
                EdgeUpsert::new(
                    NodeMatch::by_id(NodeLabel::Repository, self.repo_url.as_str()),
                    EdgeType::ExposesEnvironmentVariable,
                    NodeMatch::by_id(NodeLabel::EnvironmentVariable, id),
                )
                .into(),
            );
        }
        statements
    }
}
