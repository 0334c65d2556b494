use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::client::{ErrorSummary, GraphQlClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, md5_hex, Ingestor, Target, UnitContext};

const QUERY: &str = r#"
query Context($contextId: ID!) {
    context(id: $contextId) {
        id
        resources {
            variable
            truncatedValue
        }
    }
}
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContextData {
    #[serde(deserialize_with = "lenient::vec")]
    resources: Vec<Resource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Resource {
    variable: String,
    truncated_value: String,
}

/// Environment variables stored in one CircleCI context.
pub struct ContextEnvVars {
    graphql: GraphQlClient,
    context_id: String,
    data: ContextData,
}

impl ContextEnvVars {
    pub fn new(ctx: &UnitContext, target: &Target) -> Result<Self> {
        let Target::Context { id, .. } = target else {
            return Err(target.mismatch("contextenvvars"));
        };
        Ok(Self {
            graphql: ctx.graphql.clone(),
            context_id: id.clone(),
            data: ContextData::default(),
        })
    }
}

#[async_trait]
impl Ingestor for ContextEnvVars {
    fn name(&self) -> &'static str {
        "contextenvvars"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let mut variables = Map::new();
        variables.insert("contextId".into(), Value::String(self.context_id.clone()));
        let fetched = self
            .graphql
            .fetch_single(QUERY, "context", variables)
            .await?;
        self.data = decode(fetched.data, "context variables");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        for resource in &self.data.resources {
            let id = md5_hex(&[&self.context_id, &resource.variable]);
            statements.push(
                NodeUpsert::new(NodeLabel::EnvironmentVariable, id.as_str())
                    .set("name", resource.variable.as_str())
                    .set("variable", resource.variable.as_str())
                    .set("truncatedValue", resource.truncated_value.as_str())
                    .into(),
            );
            statements.push(
                EdgeUpsert::new(
                    NodeMatch::by_id(NodeLabel::CircleCIContext, self.context_id.as_str()),
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
    use crate::config::CrawlConfig;
    use serde_json::json;

    #[test]
    fn test_variables_survive_null_resources() {
        let mut config = CrawlConfig::new("acme", "s1");
        config.circleci.cookie = Some("abc".into());
        let mut unit = ContextEnvVars::new(
            &UnitContext::circleci(&config).unwrap(),
            &Target::Context {
                id: "ctx-1".into(),
                name: "deploy".into(),
            },
        )
        .unwrap();
        unit.data = decode(
            json!({"id": "ctx-1", "resources": [
                null,
                {"variable": "AWS_SECRET_ACCESS_KEY", "truncatedValue": null}
            ]}),
            "context variables",
        );

        let statements = unit.statements();
        assert_eq!(statements.len(), 2);
        let Statement::MergeNode(node) = &statements[0] else {
            panic!("expected a node");
        };
        assert_eq!(node.id, md5_hex(&["ctx-1", "AWS_SECRET_ACCESS_KEY"]));
        assert_eq!(node.properties["truncatedValue"], "");
    }
}
