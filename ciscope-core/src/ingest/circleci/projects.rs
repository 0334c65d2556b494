use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;
use serde_json::Value;

use crate::client::{ErrorSummary, RestClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, Ingestor, Target, UnitContext};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PipelinesData {
    #[serde(deserialize_with = "lenient::vec")]
    items: Vec<Value>,
}

/// Marks a repository as built on CircleCI when its project has any pipeline.
pub struct Projects {
    rest: RestClient,
    organization: String,
    repo_name: String,
    repo_url: String,
    data: PipelinesData,
}

impl Projects {
    pub fn new(ctx: &UnitContext, target: &Target) -> Result<Self> {
        let Target::Repository { name, url, .. } = target else {
            return Err(target.mismatch("projects"));
        };
        Ok(Self {
            rest: ctx.rest.clone(),
            organization: ctx.organization.clone(),
            repo_name: name.clone(),
            repo_url: url.clone(),
            data: PipelinesData::default(),
        })
    }
}

#[async_trait]
impl Ingestor for Projects {
    fn name(&self) -> &'static str {
        "projects"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        // the first page is enough to tell whether pipelines exist
        let path = format!("project/gh/{}/{}/pipeline", self.organization, self.repo_name);
        let fetched = self.rest.fetch_token_paged(&path, false).await?;
        self.data = decode(fetched.data, "pipelines");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        if self.data.items.is_empty() {
            return Vec::new();
        }
        vec![
            NodeUpsert::new(NodeLabel::CircleCIProject, self.repo_name.as_str())
                .set("repository", self.repo_name.as_str())
                .into(),
            EdgeUpsert::new(
                NodeMatch::by_id(NodeLabel::Repository, self.repo_url.as_str()),
                EdgeType::HasCi,
                NodeMatch::by_id(NodeLabel::CircleCIProject, self.repo_name.as_str()),
            )
            .into(),
        ]
    }
}
