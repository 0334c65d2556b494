use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::client::{ErrorSummary, GraphQlClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, Ingestor, UnitContext};

/// Group granting a context to every member of the organization.
const ALL_MEMBERS: &str = "All members";

const ORGANIZATION_QUERY: &str = r#"
query Organization($vcsType: VCSType!, $orgName: String!) {
    organization(vcsType: $vcsType, name: $orgName) {
        id
    }
}
"#;

const CONTEXTS_QUERY: &str = r#"
query Contexts($orgId: ID!) {
    organization(id: $orgId) {
        contexts {
            edges {
                node {
                    id
                    name
                    groups {
                        edges {
                            node {
                                id
                                name
                            }
                        }
                    }
                }
            }
        }
    }
}
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OrganizationData {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContextsData {
    #[serde(deserialize_with = "lenient::vec")]
    edges: Vec<Edge<ContextNode>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Edge<T> {
    node: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContextNode {
    id: String,
    name: String,
    groups: Groups,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Groups {
    #[serde(deserialize_with = "lenient::vec")]
    edges: Vec<Edge<GroupNode>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GroupNode {
    name: String,
}

/// CircleCI contexts of the organization and who can use them.
///
/// Groups map to GitHub teams by name; the "All members" group grants every user.
pub struct Contexts {
    graphql: GraphQlClient,
    organization: String,
    data: ContextsData,
}

impl Contexts {
    pub fn new(ctx: &UnitContext) -> Self {
        Self {
            graphql: ctx.graphql.clone(),
            organization: ctx.organization.clone(),
            data: ContextsData::default(),
        }
    }

    async fn organization_id(&self) -> Result<(Option<String>, ErrorSummary)> {
        let mut variables = Map::new();
        variables.insert("orgName".into(), Value::String(self.organization.clone()));
        let fetched = self
            .graphql
            .fetch_single(ORGANIZATION_QUERY, "organization", variables)
            .await?;
        let organization: OrganizationData = decode(fetched.data, "CircleCI organization");
        let id = Some(organization.id).filter(|id| !id.is_empty());
        Ok((id, fetched.errors))
    }
}

#[async_trait]
impl Ingestor for Contexts {
    fn name(&self) -> &'static str {
        "contexts"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let (org_id, mut errors) = self.organization_id().await?;
        let Some(org_id) = org_id else {
            tracing::warn!(
                "No CircleCI organization found for {}, skipping contexts",
                self.organization
            );
            return Ok(errors);
        };

        let mut variables = Map::new();
        variables.insert("orgId".into(), Value::String(org_id));
        let fetched = self
            .graphql
            .fetch_single(CONTEXTS_QUERY, "organization.contexts", variables)
            .await?;
        errors.merge(fetched.errors);
        self.data = decode(fetched.data, "contexts");
        Ok(errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        for context in self.data.edges.iter().filter_map(|e| e.node.as_ref()) {
            let groups: Vec<&str> = context
                .groups
                .edges
                .iter()
                .filter_map(|g| g.node.as_ref())
                .map(|group| group.name.as_str())
                .collect();
            let all_members = groups.contains(&ALL_MEMBERS);

            statements.push(
                NodeUpsert::new(NodeLabel::CircleCIContext, context.id.as_str())
                    .set("name", context.name.as_str())
                    .set("all_members", all_members)
                    .into(),
            );
            for group in groups {
                let source = if group == ALL_MEMBERS {
                    NodeMatch::all(NodeLabel::User)
                } else {
                    NodeMatch::by(NodeLabel::Team, "name", group)
                };
                statements.push(
                    EdgeUpsert::new(
                        source,
                        EdgeType::HasAccessToCircleciContext,
                        NodeMatch::by_id(NodeLabel::CircleCIContext, context.id.as_str()),
                    )
                    .into(),
                );
            }
        }
        statements
    }
}
