use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::client::{ErrorSummary, GraphQlClient};
use crate::error::Result;
use super::users::paired;
use crate::ingest::{decode, lenient, Ingestor, Target, UnitContext};

const QUERY: &str = r#"
query($login: String!, $teamSlug: String!, $cursor: String) {
    organization(login: $login) {
        team(slug: $teamSlug) {
            repositories(first: 100, after: $cursor) {
                pageInfo {
                    endCursor
                    hasNextPage
                }
                edges {
                    permission
                }
                nodes {
                    url
                    name
                }
            }
        }
    }
}
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TeamReposData {
    #[serde(deserialize_with = "lenient::slots")]
    edges: Vec<Option<PermissionEdge>>,
    #[serde(deserialize_with = "lenient::slots")]
    nodes: Vec<Option<RepoNode>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PermissionEdge {
    permission: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RepoNode {
    url: String,
    name: String,
}

/// Repositories a team has access to, with the team's permission on each.
pub struct TeamRepos {
    graphql: GraphQlClient,
    team_slug: String,
    data: TeamReposData,
}

impl TeamRepos {
    pub fn new(ctx: &UnitContext, target: &Target) -> Result<Self> {
        let Target::Team { slug } = target else {
            return Err(target.mismatch("teamrepos"));
        };
        Ok(Self {
            graphql: ctx.graphql.clone(),
            team_slug: slug.clone(),
            data: TeamReposData::default(),
        })
    }
}

#[async_trait]
impl Ingestor for TeamRepos {
    fn name(&self) -> &'static str {
        "teamrepos"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let mut variables = Map::new();
        variables.insert("teamSlug".into(), Value::String(self.team_slug.clone()));
        let fetched = self
            .graphql
            .fetch(QUERY, "organization.team.repositories", variables)
            .await?;
        self.data = decode(fetched.data, "team repositories");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        for (repo, edge) in paired(&self.data.nodes, &self.data.edges) {
            statements.push(
                NodeUpsert::new(NodeLabel::Repository, repo.url.as_str())
                    .set("url", repo.url.as_str())
                    .set("name", repo.name.as_str())
                    .into(),
            );
            statements.push(
                EdgeUpsert::new(
                    NodeMatch::by(NodeLabel::Team, "slug", self.team_slug.as_str()),
                    EdgeType::HasPermissionOn,
                    NodeMatch::by_id(NodeLabel::Repository, repo.url.as_str()),
                )
                .keyed("permission", edge.permission.as_str())
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

    fn context() -> UnitContext {
        let mut config = CrawlConfig::new("acme", "s1");
        config.github.token = Some("t".into());
        UnitContext::github(&config).unwrap()
    }

    #[test]
    fn test_rejects_non_team_target() {
        let result = TeamRepos::new(&context(), &Target::Organization);
        assert!(matches!(
            result,
            Err(crate::error::IngestError::InvalidIngestor(_))
        ));
    }

    #[test]
    fn test_edges_anchor_on_team_slug() {
        let mut unit = TeamRepos::new(
            &context(),
            &Target::Team {
                slug: "core".into(),
            },
        )
        .unwrap();
        unit.data = decode(
            serde_json::json!({
                "edges": [{"permission": "WRITE"}],
                "nodes": [{"url": "https://github.com/acme/api", "name": "api"}]
            }),
            "team repositories",
        );

        let statements = unit.statements();
        assert_eq!(statements.len(), 2);
        let Statement::MergeEdge(edge) = &statements[1] else {
            panic!("expected an edge");
        };
        assert_eq!(
            edge.source,
            NodeMatch::by(NodeLabel::Team, "slug", "core")
        );
        assert_eq!(edge.key["permission"], "WRITE");
    }

    #[test]
    fn test_null_repository_drops_its_permission() {
        let mut unit = TeamRepos::new(
            &context(),
            &Target::Team {
                slug: "core".into(),
            },
        )
        .unwrap();
        unit.data = decode(
            serde_json::json!({
                "edges": [{"permission": "ADMIN"}, {"permission": "READ"}],
                "nodes": [null, {"url": "https://github.com/acme/web", "name": "web"}]
            }),
            "team repositories",
        );

        let statements = unit.statements();
        assert_eq!(statements.len(), 2);
        let Statement::MergeEdge(edge) = &statements[1] else {
            panic!("expected an edge");
        };
        assert_eq!(
            edge.target,
            NodeMatch::by_id(NodeLabel::Repository, "https://github.com/acme/web")
        );
        assert_eq!(edge.key["permission"], "READ");
    }
}
