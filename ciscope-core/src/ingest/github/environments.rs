use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;

use crate::client::{ErrorSummary, RestClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, Ingestor, Target, UnitContext};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvironmentsData {
    #[serde(deserialize_with = "lenient::vec")]
    environments: Vec<EnvironmentRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvironmentRecord {
    name: String,
    html_url: String,
    deployment_branch_policy: Option<BranchPolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BranchPolicy {
    protected_branches: bool,
    custom_branch_policies: bool,
}

/// Deployment environments of a repository and their branch policy.
pub struct Environments {
    rest: RestClient,
    organization: String,
    repo_name: String,
    repo_url: String,
    data: EnvironmentsData,
}

impl Environments {
    pub fn new(ctx: &UnitContext, target: &Target) -> Result<Self> {
        let Target::Repository { name, url, .. } = target else {
            return Err(target.mismatch("environments"));
        };
        Ok(Self {
            rest: ctx.rest.clone(),
            organization: ctx.organization.clone(),
            repo_name: name.clone(),
            repo_url: url.clone(),
            data: EnvironmentsData::default(),
        })
    }
}

#[async_trait]
impl Ingestor for Environments {
    fn name(&self) -> &'static str {
        "environments"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let path = format!("repos/{}/{}/environments", self.organization, self.repo_name);
        let fetched = self.rest.fetch(&path).await?;
        self.data = decode(fetched.data, "environments");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        for environment in &self.data.environments {
            // no policy means deployments from any branch
            let (protected_branches, custom_branch_policy) = environment
                .deployment_branch_policy
                .as_ref()
                .map(|p| (p.protected_branches, p.custom_branch_policies))
                .unwrap_or_default();
            statements.push(
                NodeUpsert::new(NodeLabel::Environment, environment.html_url.as_str())
                    .set("name", environment.name.as_str())
                    .set("url", environment.html_url.as_str())
                    .set("protectedBranches", protected_branches)
                    .set("customBranchPolicy", custom_branch_policy)
                    .into(),
            );
            statements.push(
                EdgeUpsert::new(
                    NodeMatch::by_id(NodeLabel::Repository, self.repo_url.as_str()),
                    EdgeType::HasEnvironment,
                    NodeMatch::by_id(NodeLabel::Environment, environment.html_url.as_str()),
                )
                .into(),
            );
        }
        statements
    }
}
