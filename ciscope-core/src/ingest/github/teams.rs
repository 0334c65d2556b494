use async_trait::async_trait;
use ciscope_store::{NodeLabel, NodeUpsert, Statement};
use serde::Deserialize;
use serde_json::Map;

use crate::client::{ErrorSummary, GraphQlClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, Ingestor, UnitContext};

const QUERY: &str = r#"
query($login: String!, $cursor: String) {
    organization(login: $login) {
        teams(first: 100, after: $cursor) {
            pageInfo {
                endCursor
                hasNextPage
            }
            edges {
                node {
                    name
                    url
                    slug
                }
            }
        }
    }
}
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TeamsData {
    #[serde(deserialize_with = "lenient::vec")]
    edges: Vec<TeamEdge>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TeamEdge {
    node: Option<TeamNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TeamNode {
    name: String,
    url: String,
    slug: String,
}

/// Teams of the organization.
pub struct Teams {
    graphql: GraphQlClient,
    data: TeamsData,
}

impl Teams {
    pub fn new(ctx: &UnitContext) -> Self {
        Self {
            graphql: ctx.graphql.clone(),
            data: TeamsData::default(),
        }
    }
}

#[async_trait]
impl Ingestor for Teams {
    fn name(&self) -> &'static str {
        "teams"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let fetched = self
            .graphql
            .fetch(QUERY, "organization.teams", Map::new())
            .await?;
        self.data = decode(fetched.data, "teams");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        self.data
            .edges
            .iter()
            .filter_map(|edge| edge.node.as_ref())
            .map(|team| {
                NodeUpsert::new(NodeLabel::Team, team.url.as_str())
                    .set("name", team.name.as_str())
                    .set("url", team.url.as_str())
                    .set("slug", team.slug.as_str())
                    .into()
            })
            .collect()
    }
}
