//! Post-crawl enrichment of CI configuration files.
//!
//! Works purely on the store: every `File` node gets an `env` list of environment
//! variable names referenced in its text and a `tags` list of the third-party services
//! it mentions.

use ciscope_store::{GraphDb, NodeLabel};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::Result;

static ENV_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z_]{2,}").unwrap());

/// A service tag and the lowercase terms that reveal it.
pub struct ServiceTag {
    pub tag: &'static str,
    pub terms: &'static [&'static str],
}

pub static SERVICE_TAGS: &[ServiceTag] = &[
    ServiceTag {
        tag: "aws",
        terms: &["aws", "ecr"],
    },
    ServiceTag {
        tag: "gcp",
        terms: &["gcp", "gcr", "gcloud"],
    },
    ServiceTag {
        tag: "dockerhub",
        terms: &["dockerhub"],
    },
    ServiceTag {
        tag: "artifactory",
        terms: &["artifactory"],
    },
    ServiceTag {
        tag: "terraform",
        terms: &["tf", "terraform"],
    },
    ServiceTag {
        tag: "bintray",
        terms: &["bintray"],
    },
    ServiceTag {
        tag: "kafka",
        terms: &["kafka", "aiven"],
    },
];

/// Distinct env-var-looking tokens of `text`, in order of first appearance.
pub fn extract_env_vars(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in ENV_VAR.find_iter(text) {
        if !found.iter().any(|f| f == m.as_str()) {
            found.push(m.as_str().to_string());
        }
    }
    found
}

/// Service tags whose terms occur anywhere in `text`, case-insensitively.
pub fn service_tags(text: &str) -> Vec<&'static str> {
    let lower = text.to_lowercase();
    SERVICE_TAGS
        .iter()
        .filter(|service| service.terms.iter().any(|term| lower.contains(term)))
        .map(|service| service.tag)
        .collect()
}

/// Patches `env` and `tags` onto stored `File` nodes.
pub struct Enricher {
    store: GraphDb,
}

impl Enricher {
    pub fn new(store: GraphDb) -> Self {
        Self { store }
    }

    /// Enrich every `File` node. Returns how many were updated.
    pub fn enrich(&self) -> Result<usize> {
        let files = self.store.get_nodes_by_label(NodeLabel::File)?;
        let mut updated = 0;
        for file in &files {
            let text = file.str_prop("text").unwrap_or_default();

            let mut properties = Map::new();
            properties.insert("env".into(), Value::from(extract_env_vars(text)));
            properties.insert("tags".into(), Value::from(service_tags(text)));

            if self.store.set_properties(NodeLabel::File, &file.id, &properties)? {
                updated += 1;
            }
        }
        tracing::info!("Enriched {} CI file(s)", updated);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciscope_store::NodeUpsert;
    use serde_json::json;

    #[test]
    fn test_extract_env_vars_dedupes_in_order() {
        let text = "run: echo $AWS_KEY && deploy $TOKEN $AWS_KEY\nA";
        assert_eq!(extract_env_vars(text), vec!["AWS_KEY", "TOKEN"]);
    }

    #[test]
    fn test_service_tags_are_case_insensitive() {
        assert_eq!(
            service_tags("docker push 123.dkr.ECR.eu-west-1 && terraform apply"),
            vec!["aws", "terraform"]
        );
        assert!(service_tags("make test").is_empty());
    }

    #[test]
    fn test_enrich_patches_files_and_keeps_session() {
        let store = GraphDb::open_in_memory().unwrap();
        store
            .upsert(
                &NodeUpsert::new(NodeLabel::File, "f1")
                    .set("path", ".circleci/config.yml")
                    .set("text", "steps:\n  - run: gcloud auth $GCLOUD_KEY")
                    .into(),
                "s1",
            )
            .unwrap();

        let updated = Enricher::new(store.clone()).enrich().unwrap();
        assert_eq!(updated, 1);

        let file = store.get_node(NodeLabel::File, "f1").unwrap().unwrap();
        assert_eq!(file.properties["env"], json!(["GCLOUD_KEY"]));
        assert_eq!(file.properties["tags"], json!(["gcp"]));
        assert_eq!(file.properties["path"], ".circleci/config.yml");
        assert_eq!(file.session.as_deref(), Some("s1"));
    }
}
