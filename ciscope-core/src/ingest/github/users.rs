use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;
use serde_json::Map;

use crate::client::{ErrorSummary, GraphQlClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, Ingestor, UnitContext};

const QUERY: &str = r#"
query($login: String!, $cursor: String) {
    organization(login: $login) {
        membersWithRole(first: 100, after: $cursor) {
            pageInfo {
                endCursor
                hasNextPage
            }
            edges {
                role
            }
            nodes {
                login
                url
            }
        }
    }
}
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsersData {
    #[serde(deserialize_with = "lenient::slots")]
    edges: Vec<Option<RoleEdge>>,
    #[serde(deserialize_with = "lenient::slots")]
    nodes: Vec<Option<UserNode>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RoleEdge {
    pub role: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UserNode {
    pub login: String,
    pub url: String,
}

/// Pairs `nodes[i]` with `edges[i]`, dropping positions where either side is missing.
pub(crate) fn paired<'a, N, E>(
    nodes: &'a [Option<N>],
    edges: &'a [Option<E>],
) -> impl Iterator<Item = (&'a N, &'a E)> {
    nodes
        .iter()
        .zip(edges)
        .filter_map(|(node, edge)| node.as_ref().zip(edge.as_ref()))
}

/// Organization members and their organization role.
pub struct Users {
    graphql: GraphQlClient,
    organization: String,
    data: UsersData,
}

impl Users {
    pub fn new(ctx: &UnitContext) -> Self {
        Self {
            graphql: ctx.graphql.clone(),
            organization: ctx.organization.clone(),
            data: UsersData::default(),
        }
    }
}

#[async_trait]
impl Ingestor for Users {
    fn name(&self) -> &'static str {
        "users"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let fetched = self
            .graphql
            .fetch(QUERY, "organization.membersWithRole", Map::new())
            .await?;
        self.data = decode(fetched.data, "organization members");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        // edges[i] carries the role of nodes[i]
        for (user, edge) in paired(&self.data.nodes, &self.data.edges) {
            statements.push(
                NodeUpsert::new(NodeLabel::User, user.url.as_str())
                    .set("login", user.login.as_str())
                    .set("url", user.url.as_str())
                    .into(),
            );
            statements.push(
                EdgeUpsert::new(
                    NodeMatch::by_id(NodeLabel::User, user.url.as_str()),
                    EdgeType::IsMemberOf,
                    NodeMatch::by(NodeLabel::Organization, "login", self.organization.as_str()),
                )
                .keyed("role", edge.role.as_str())
                .into(),
            );
        }
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use serde_json::json;

    #[test]
    fn test_null_member_keeps_roles_aligned() {
        let mut config = CrawlConfig::new("acme", "s1");
        config.github.token = Some("t".into());
        let mut unit = Users::new(&UnitContext::github(&config).unwrap());
        unit.data = decode(
            json!({
                "edges": [{"role": "ADMIN"}, {"role": "MEMBER"}, {"role": "MEMBER"}],
                "nodes": [
                    {"login": "alice", "url": "https://github.com/alice"},
                    null,
                    {"login": "carol", "url": "https://github.com/carol"}
                ]
            }),
            "organization members",
        );

        let roles: Vec<_> = unit
            .statements()
            .into_iter()
            .filter_map(|s| match s {
                Statement::MergeEdge(e) => Some((e.source, e.key["role"].clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            roles,
            vec![
                (NodeMatch::by_id(NodeLabel::User, "https://github.com/alice"), json!("ADMIN")),
                (NodeMatch::by_id(NodeLabel::User, "https://github.com/carol"), json!("MEMBER")),
            ]
        );
    }
}
