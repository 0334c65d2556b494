use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::users::{paired, RoleEdge, UserNode};
use crate::client::{ErrorSummary, GraphQlClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, Ingestor, Target, UnitContext};

// Members are paged separately from teams: a team may have more than one page of them.
const QUERY: &str = r#"
query($login: String!, $teamSlug: String!, $cursor: String) {
    organization(login: $login) {
        team(slug: $teamSlug) {
            members(first: 100, after: $cursor) {
                pageInfo {
                    endCursor
                    hasNextPage
                }
                edges {
                    role
                }
                nodes {
                    url
                    login
                }
            }
        }
    }
}
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TeamMembersData {
    #[serde(deserialize_with = "lenient::slots")]
    edges: Vec<Option<RoleEdge>>,
    #[serde(deserialize_with = "lenient::slots")]
    nodes: Vec<Option<UserNode>>,
}

/// Members of a team and their role in it.
pub struct TeamMembers {
    graphql: GraphQlClient,
    team_slug: String,
    data: TeamMembersData,
}

impl TeamMembers {
    pub fn new(ctx: &UnitContext, target: &Target) -> Result<Self> {
        let Target::Team { slug } = target else {
            return Err(target.mismatch("teammembers"));
        };
        Ok(Self {
            graphql: ctx.graphql.clone(),
            team_slug: slug.clone(),
            data: TeamMembersData::default(),
        })
    }
}

#[async_trait]
impl Ingestor for TeamMembers {
    fn name(&self) -> &'static str {
        "teammembers"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let mut variables = Map::new();
        variables.insert("teamSlug".into(), Value::String(self.team_slug.clone()));
        let fetched = self
            .graphql
            .fetch(QUERY, "organization.team.members", variables)
            .await?;
        self.data = decode(fetched.data, "team members");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
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
                    NodeMatch::by(NodeLabel::Team, "slug", self.team_slug.as_str()),
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
    fn test_undecodable_role_drops_only_that_member() {
        let mut config = CrawlConfig::new("acme", "s1");
        config.github.token = Some("t".into());
        let mut unit = TeamMembers::new(
            &UnitContext::github(&config).unwrap(),
            &Target::Team {
                slug: "core".into(),
            },
        )
        .unwrap();
        unit.data = decode(
            json!({
                "edges": [{"role": ["MAINTAINER"]}, {"role": "MEMBER"}],
                "nodes": [
                    {"login": "alice", "url": "https://github.com/alice"},
                    {"login": "bob", "url": "https://github.com/bob"}
                ]
            }),
            "team members",
        );

        let statements = unit.statements();
        assert_eq!(statements.len(), 2);
        let Statement::MergeEdge(edge) = &statements[1] else {
            panic!("expected an edge");
        };
        assert_eq!(edge.source, NodeMatch::by_id(NodeLabel::User, "https://github.com/bob"));
        assert_eq!(edge.target, NodeMatch::by(NodeLabel::Team, "slug", "core"));
        assert_eq!(edge.key["role"], "MEMBER");
    }
}
