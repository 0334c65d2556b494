use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;

use crate::client::{ErrorSummary, RestClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, md5_hex, Ingestor, Target, UnitContext};

/// Characters of a value kept when it is stored.
const VISIBLE_SUFFIX: usize = 4;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvVarsData {
    #[serde(deserialize_with = "lenient::vec")]
    items: Vec<EnvVar>,
}

/// Project variable. The API already masks the value except for its tail.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvVar {
    name: String,
    value: String,
}

/// Environment variables of one CircleCI project.
pub struct ProjectEnvVars {
    rest: RestClient,
    organization: String,
    project_name: String,
    data: EnvVarsData,
}

impl ProjectEnvVars {
    pub fn new(ctx: &UnitContext, target: &Target) -> Result<Self> {
        let Target::Project { name } = target else {
            return Err(target.mismatch("projectenvvars"));
        };
        Ok(Self {
            rest: ctx.rest.clone(),
            organization: ctx.organization.clone(),
            project_name: name.clone(),
            data: EnvVarsData::default(),
        })
    }
}

/// Last `VISIBLE_SUFFIX` characters of `value`.
fn truncate_value(value: &str) -> String {
    let skip = value.chars().count().saturating_sub(VISIBLE_SUFFIX);
    value.chars().skip(skip).collect()
}

#[async_trait]
impl Ingestor for ProjectEnvVars {
    fn name(&self) -> &'static str {
        "projectenvvars"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let path = format!("project/gh/{}/{}/envvar", self.organization, self.project_name);
        let fetched = self.rest.fetch_token_paged(&path, false).await?;
        self.data = decode(fetched.data, "project variables");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        for var in &self.data.items {
            let id = md5_hex(&[&self.project_name, &var.name]);
            statements.push(
                NodeUpsert::new(NodeLabel::EnvironmentVariable, id.as_str())
                    .set("name", var.name.as_str())
                    .set("truncatedValue", truncate_value(&var.value))
                    .into(),
            );
            statements.push(
                EdgeUpsert::new(
                    NodeMatch::by_id(NodeLabel::CircleCIProject, self.project_name.as_str()),
                    EdgeType::ExposesEnvironmentVariable,
                    NodeMatch::by_id(NodeLabel::EnvironmentVariable, id),
                )
                .into(),
            );
        }
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_value() {
        assert_eq!(truncate_value("xxxxabcd"), "abcd");
        assert_eq!(truncate_value("ab"), "ab");
        assert_eq!(truncate_value(""), "");
        assert_eq!(truncate_value("xxxxé123"), "é123");
    }

    #[test]
    fn test_variables_survive_bad_items() {
        let mut config = crate::config::CrawlConfig::new("acme", "s1");
        config.circleci.cookie = Some("abc".into());
        let mut unit = ProjectEnvVars::new(
            &UnitContext::circleci(&config).unwrap(),
            &Target::Project { name: "api".into() },
        )
        .unwrap();
        unit.data = decode(
            serde_json::json!({"items": [
                {"name": "NPM_TOKEN", "value": "xxxx1234"},
                null,
                {"name": ["oops"]}
            ], "next_page_token": null}),
            "project variables",
        );

        let statements = unit.statements();
        assert_eq!(statements.len(), 2);
        let Statement::MergeNode(node) = &statements[0] else {
            panic!("expected a node");
        };
        assert_eq!(node.properties["truncatedValue"], "1234");
    }
}
