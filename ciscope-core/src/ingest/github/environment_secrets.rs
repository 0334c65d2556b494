use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};

use super::repo_secrets::SecretsData;
use crate::client::{ErrorSummary, RestClient};
use crate::error::Result;
use crate::ingest::{decode, md5_hex, Ingestor, Target, UnitContext};

/// Secrets of one deployment environment.
///
/// The endpoint is keyed by the numeric repository id, so environments whose repository
/// has no known `databaseId` are skipped.
pub struct EnvironmentSecrets {
    rest: RestClient,
    environment_id: String,
    environment_name: String,
    repo_name: String,
    repo_database_id: Option<i64>,
    data: SecretsData,
}

impl EnvironmentSecrets {
    pub fn new(ctx: &UnitContext, target: &Target) -> Result<Self> {
        let Target::Environment {
            id,
            name,
            repo_name,
            repo_database_id,
        } = target
        else {
            return Err(target.mismatch("environmentsecrets"));
        };
        Ok(Self {
            rest: ctx.rest.clone(),
            environment_id: id.clone(),
            environment_name: name.clone(),
            repo_name: repo_name.clone(),
            repo_database_id: *repo_database_id,
            data: SecretsData::default(),
        })
    }
}

#[async_trait]
impl Ingestor for EnvironmentSecrets {
    fn name(&self) -> &'static str {
        "environmentsecrets"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let Some(repo_id) = self.repo_database_id else {
            tracing::debug!(
                "Skipping secrets of environment {}: repo {} has no databaseId",
                self.environment_name,
                self.repo_name
            );
            return Ok(ErrorSummary::new());
        };
        let path = format!(
            "repositories/{}/environments/{}/secrets",
            repo_id,
            urlencoding::encode(&self.environment_name)
        );
        let fetched = self.rest.fetch(&path).await?;
        self.data = decode(fetched.data, "environment secrets");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let Some(repo_id) = self.repo_database_id else {
            return Vec::new();
        };
        let repo_id = repo_id.to_string();

        let mut statements = Vec::new();
        for secret in &self.data.secrets {
            let id = md5_hex(&[&repo_id, &self.environment_name, &secret.name]);
            statements.push(
                NodeUpsert::new(NodeLabel::EnvironmentVariable, id.as_str())
                    .set("name", secret.name.as_str())
                    .into(),
            );
            statements.push(
                EdgeUpsert::new(
                    NodeMatch::by_id(NodeLabel::Environment, self.environment_id.as_str()),
                    EdgeType::ExposesEnvironmentVariable,
                    NodeMatch::by_id(NodeLabel::EnvironmentVariable, id),
                )
                .into(),
            );
        }
        statements
    }
}
