use async_trait::async_trait;
use ciscope_store::{EdgeType, EdgeUpsert, NodeLabel, NodeMatch, NodeUpsert, Statement};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::users::paired;
use crate::client::{ErrorSummary, GraphQlClient};
use crate::error::Result;
use crate::ingest::{decode, lenient, md5_hex, url_host, Ingestor, UnitContext};

/// CI configuration files looked up at HEAD of every repository: (query alias, path).
const CI_FILES: &[(&str, &str)] = &[
    ("circleci", ".circleci/config.yml"),
    ("travis", ".travis.yml"),
    ("jenkins", "Jenkinsfile"),
    ("codebuild", "buildspec.yml"),
    ("cloudbuild", "cloudbuild.yaml"),
    ("buildsbt", "build.sbt"),
    ("codeowners", ".github/CODEOWNERS"),
];

const WORKFLOWS_DIR: &str = ".github/workflows";

// Keep `first` low: repositories are expensive and GitHub answers 502 when a page is too big.
const QUERY: &str = r#"
query($login: String!, $cursor: String) {
    organization(login: $login) {
        repositories(first: 10, after: $cursor) {
            pageInfo {
                endCursor
                hasNextPage
            }
            nodes {
                databaseId
                url
                name
                isPrivate
                isArchived
                collaborators(affiliation: DIRECT, first: 100) {
                    edges {
                        permission
                    }
                    nodes {
                        url
                        login
                    }
                }
                circleci: object(expression: "HEAD:.circleci/config.yml") {
                    ... on Blob { text }
                }
                travis: object(expression: "HEAD:.travis.yml") {
                    ... on Blob { text }
                }
                jenkins: object(expression: "HEAD:Jenkinsfile") {
                    ... on Blob { text }
                }
                codebuild: object(expression: "HEAD:buildspec.yml") {
                    ... on Blob { text }
                }
                cloudbuild: object(expression: "HEAD:cloudbuild.yaml") {
                    ... on Blob { text }
                }
                buildsbt: object(expression: "HEAD:build.sbt") {
                    ... on Blob { text }
                }
                codeowners: object(expression: "HEAD:.github/CODEOWNERS") {
                    ... on Blob { text }
                }
                actions: object(expression: "HEAD:.github/workflows") {
                    ... on Tree {
                        entries {
                            name
                            object {
                                ... on Blob { text }
                            }
                        }
                    }
                }
                branchProtectionRules(first: 5) {
                    nodes {
                        pattern
                        requiresApprovingReviews
                    }
                }
                pullRequests(last: 10) {
                    nodes {
                        commits(last: 1) {
                            nodes {
                                commit {
                                    status {
                                        contexts {
                                            targetUrl
                                            description
                                            context
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                defaultBranchRef {
                    target {
                        ... on Commit {
                            history(first: 10) {
                                edges {
                                    node {
                                        status {
                                            contexts {
                                                context
                                                targetUrl
                                                description
                                            }
                                        }
                                    }
                                }
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
struct ReposData {
    #[serde(deserialize_with = "lenient::vec")]
    nodes: Vec<RepoNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RepoNode {
    database_id: Option<i64>,
    url: String,
    name: String,
    is_private: bool,
    is_archived: bool,
    collaborators: Option<Collaborators>,
    actions: Option<Tree>,
    branch_protection_rules: Option<Nodes<BranchProtectionRule>>,
    pull_requests: Option<Nodes<PullRequest>>,
    default_branch_ref: Option<DefaultBranchRef>,
    /// Aliased blob lookups (`circleci`, `travis`, ...)
    #[serde(flatten)]
    blobs: HashMap<String, Value>,
}

impl RepoNode {
    fn blob_text(&self, alias: &str) -> Option<&str> {
        self.blobs
            .get(alias)
            .and_then(|blob| blob.get("text"))
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Nodes<T> {
    #[serde(
        deserialize_with = "lenient::vec",
        bound(deserialize = "T: serde::de::DeserializeOwned")
    )]
    nodes: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Collaborators {
    #[serde(deserialize_with = "lenient::slots")]
    edges: Vec<Option<PermissionEdge>>,
    #[serde(deserialize_with = "lenient::slots")]
    nodes: Vec<Option<Collaborator>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PermissionEdge {
    permission: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Collaborator {
    url: String,
    login: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Tree {
    #[serde(deserialize_with = "lenient::vec")]
    entries: Vec<TreeEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TreeEntry {
    name: String,
    object: Option<Blob>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Blob {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BranchProtectionRule {
    pattern: String,
    requires_approving_reviews: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PullRequest {
    commits: Option<Nodes<CommitNode>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommitNode {
    commit: Option<StatusHolder>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusHolder {
    status: Option<Status>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Status {
    #[serde(deserialize_with = "lenient::vec")]
    contexts: Vec<StatusContext>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StatusContext {
    context: String,
    target_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DefaultBranchRef {
    target: Option<CommitTarget>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommitTarget {
    history: Option<History>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct History {
    #[serde(deserialize_with = "lenient::vec")]
    edges: Vec<HistoryEdge>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistoryEdge {
    node: Option<StatusHolder>,
}

/// Repositories of the organization with their CI files, direct collaborators, status
/// checks and branch protection rules.
pub struct Repos {
    graphql: GraphQlClient,
    organization: String,
    data: ReposData,
}

impl Repos {
    pub fn new(ctx: &UnitContext) -> Self {
        Self {
            graphql: ctx.graphql.clone(),
            organization: ctx.organization.clone(),
            data: ReposData::default(),
        }
    }

    fn repositories(&self, out: &mut Vec<Statement>) {
        for repo in &self.data.nodes {
            out.push(
                NodeUpsert::new(NodeLabel::Repository, repo.url.as_str())
                    .set("url", repo.url.as_str())
                    .set("databaseId", repo.database_id)
                    .set("name", repo.name.as_str())
                    .set("isPrivate", repo.is_private)
                    .set("isArchived", repo.is_archived)
                    .into(),
            );
            out.push(
                EdgeUpsert::new(
                    NodeMatch::by_id(NodeLabel::Repository, repo.url.as_str()),
                    EdgeType::OwnedBy,
                    NodeMatch::by(NodeLabel::Organization, "login", self.organization.as_str()),
                )
                .into(),
            );
        }
    }

    fn files(&self, out: &mut Vec<Statement>) {
        for repo in &self.data.nodes {
            let mut files: Vec<(String, String, &str)> = Vec::new();
            for (alias, path) in CI_FILES {
                if let Some(text) = repo.blob_text(alias) {
                    files.push((md5_hex(&[alias, repo.url.as_str()]), path.to_string(), text));
                }
            }
            for entry in repo.actions.iter().flat_map(|tree| &tree.entries) {
                let text = entry
                    .object
                    .as_ref()
                    .and_then(|blob| blob.text.as_deref())
                    .unwrap_or_default();
                files.push((
                    md5_hex(&["actions", &entry.name, &repo.url]),
                    format!("{}/{}", WORKFLOWS_DIR, entry.name),
                    text,
                ));
            }

            for (id, path, text) in files {
                out.push(
                    NodeUpsert::new(NodeLabel::File, id.as_str())
                        .set("path", path)
                        .set("text", text)
                        .into(),
                );
                out.push(
                    EdgeUpsert::new(
                        NodeMatch::by_id(NodeLabel::Repository, repo.url.as_str()),
                        EdgeType::HasCiConfigurationFile,
                        NodeMatch::by_id(NodeLabel::File, id),
                    )
                    .into(),
                );
            }
        }
    }

    fn collaborators(&self, out: &mut Vec<Statement>) {
        for repo in &self.data.nodes {
            let Some(collaborators) = &repo.collaborators else {
                continue;
            };
            // edges[i] carries the permission of nodes[i]
            for (user, edge) in paired(&collaborators.nodes, &collaborators.edges) {
                out.push(
                    NodeUpsert::new(NodeLabel::User, user.url.as_str())
                        .set("login", user.login.as_str())
                        .into(),
                );
                out.push(
                    EdgeUpsert::new(
                        NodeMatch::by_id(NodeLabel::User, user.url.as_str()),
                        EdgeType::HasPermissionOn,
                        NodeMatch::by_id(NodeLabel::Repository, repo.url.as_str()),
                    )
                    .keyed("permission", edge.permission.as_str())
                    .into(),
                );
            }
        }
    }

    /// Status checks seen on the latest commit of recent pull requests and on recent
    /// default-branch commits. A check node is unique per (context, repository).
    fn status_checks(&self, out: &mut Vec<Statement>) {
        for repo in &self.data.nodes {
            let pull_request_contexts = repo
                .pull_requests
                .iter()
                .flat_map(|prs| &prs.nodes)
                .filter_map(|pr| pr.commits.as_ref())
                .filter_map(|commits| commits.nodes.first())
                .filter_map(|commit| commit.commit.as_ref())
                .filter_map(|holder| holder.status.as_ref())
                .flat_map(|status| &status.contexts);
            for context in pull_request_contexts {
                self.status_check(out, repo, context, "pullRequest");
            }

            let default_branch_contexts = repo
                .default_branch_ref
                .iter()
                .filter_map(|branch| branch.target.as_ref())
                .filter_map(|target| target.history.as_ref())
                .flat_map(|history| &history.edges)
                .filter_map(|edge| edge.node.as_ref())
                .filter_map(|holder| holder.status.as_ref())
                .flat_map(|status| &status.contexts);
            for context in default_branch_contexts {
                self.status_check(out, repo, context, "defaultBranch");
            }
        }
    }

    fn status_check(
        &self,
        out: &mut Vec<Statement>,
        repo: &RepoNode,
        context: &StatusContext,
        origin: &str,
    ) {
        let id = md5_hex(&[&context.context, &repo.url]);
        let host = context.target_url.as_deref().map(url_host).unwrap_or_default();
        out.push(
            NodeUpsert::new(NodeLabel::StatusCheck, id.as_str())
                .set("context", context.context.as_str())
                .set("host", host)
                .into(),
        );
        out.push(
            EdgeUpsert::new(
                NodeMatch::by_id(NodeLabel::Repository, repo.url.as_str()),
                EdgeType::HasStatusCheck,
                NodeMatch::by_id(NodeLabel::StatusCheck, id),
            )
            .keyed(origin, true)
            .into(),
        );
    }

    fn branch_protection_rules(&self, out: &mut Vec<Statement>) {
        for repo in &self.data.nodes {
            for rule in repo.branch_protection_rules.iter().flat_map(|r| &r.nodes) {
                // patterns are unique per repository
                let id = md5_hex(&[&rule.pattern, &repo.url]);
                out.push(
                    NodeUpsert::new(NodeLabel::BranchProtectionRule, id.as_str())
                        .set("pattern", rule.pattern.as_str())
                        .set("requiresReviews", rule.requires_approving_reviews)
                        .into(),
                );
                out.push(
                    EdgeUpsert::new(
                        NodeMatch::by_id(NodeLabel::Repository, repo.url.as_str()),
                        EdgeType::HasBranchProtectionRule,
                        NodeMatch::by_id(NodeLabel::BranchProtectionRule, id),
                    )
                    .into(),
                );
            }
        }
    }
}

#[async_trait]
impl Ingestor for Repos {
    fn name(&self) -> &'static str {
        "repos"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        let fetched = self
            .graphql
            .fetch(QUERY, "organization.repositories", Map::new())
            .await?;
        self.data = decode(fetched.data, "repositories");
        Ok(fetched.errors)
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        self.repositories(&mut statements);
        self.files(&mut statements);
        self.collaborators(&mut statements);
        self.status_checks(&mut statements);
        self.branch_protection_rules(&mut statements);
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repos_with(data: Value) -> Repos {
        let mut config = crate::config::CrawlConfig::new("acme", "s1");
        config.github.token = Some("t".into());
        let ctx = UnitContext::github(&config).unwrap();
        let mut repos = Repos::new(&ctx);
        repos.data = decode(data, "repositories");
        repos
    }

    fn count(statements: &[Statement], label: NodeLabel) -> usize {
        statements
            .iter()
            .filter(|s| matches!(s, Statement::MergeNode(n) if n.label == label))
            .count()
    }

    #[test]
    fn test_maps_files_and_status_checks() {
        let repos = repos_with(json!({
            "pageInfo": {"hasNextPage": false, "endCursor": null},
            "nodes": [{
                "databaseId": 7,
                "url": "https://github.com/acme/api",
                "name": "api",
                "isPrivate": true,
                "isArchived": false,
                "collaborators": null,
                "circleci": {"text": "version: 2.1"},
                "travis": null,
                "jenkins": null,
                "codebuild": null,
                "cloudbuild": null,
                "buildsbt": null,
                "codeowners": {"text": "* @acme/core"},
                "actions": {"entries": [{"name": "ci.yml", "object": {"text": "on: push"}}]},
                "branchProtectionRules": {"nodes": [{"pattern": "main", "requiresApprovingReviews": true}]},
                "pullRequests": {"nodes": [{"commits": {"nodes": [{"commit": {"status": {"contexts": [
                    {"context": "ci/circleci: build", "targetUrl": "https://circleci.com/gh/acme/api/1", "description": ""}
                ]}}}]}}]},
                "defaultBranchRef": {"target": {"history": {"edges": [{"node": {"status": null}}]}}}
            }]
        }));

        let statements = repos.statements();
        assert_eq!(count(&statements, NodeLabel::Repository), 1);
        assert_eq!(count(&statements, NodeLabel::File), 3);
        assert_eq!(count(&statements, NodeLabel::StatusCheck), 1);
        assert_eq!(count(&statements, NodeLabel::BranchProtectionRule), 1);
        assert_eq!(count(&statements, NodeLabel::User), 0);

        let circleci_id = md5_hex(&["circleci", "https://github.com/acme/api"]);
        assert!(statements.iter().any(|s| matches!(
            s,
            Statement::MergeNode(n) if n.id == circleci_id && n.properties["path"] == ".circleci/config.yml"
        )));
        assert!(statements.iter().any(|s| matches!(
            s,
            Statement::MergeNode(n) if n.label == NodeLabel::StatusCheck && n.properties["host"] == "circleci.com"
        )));
    }

    #[test]
    fn test_collaborators_pair_edges_with_nodes() {
        let repos = repos_with(json!({
            "nodes": [{
                "url": "https://github.com/acme/api",
                "name": "api",
                "collaborators": {
                    "edges": [{"permission": "ADMIN"}, {"permission": "WRITE"}],
                    "nodes": [
                        {"url": "https://github.com/alice", "login": "alice"},
                        {"url": "https://github.com/bob", "login": "bob"}
                    ]
                }
            }]
        }));

        let permissions: Vec<_> = repos
            .statements()
            .into_iter()
            .filter_map(|s| match s {
                Statement::MergeEdge(e) if e.edge_type == EdgeType::HasPermissionOn => {
                    Some(e.key["permission"].clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(permissions, vec![json!("ADMIN"), json!("WRITE")]);
    }

    #[test]
    fn test_null_repository_keeps_the_others() {
        let repos = repos_with(json!({
            "nodes": [
                {"url": "https://github.com/acme/api", "name": "api"},
                null,
                {"url": "https://github.com/acme/web", "name": "web", "isPrivate": null}
            ]
        }));

        let statements = repos.statements();
        assert_eq!(count(&statements, NodeLabel::Repository), 2);
        assert!(statements.iter().any(|s| matches!(
            s,
            Statement::MergeNode(n) if n.id == "https://github.com/acme/web" && n.properties["isPrivate"] == false
        )));
    }

    #[test]
    fn test_null_nested_items_are_skipped() {
        let repos = repos_with(json!({
            "nodes": [{
                "url": "https://github.com/acme/api",
                "name": "api",
                "collaborators": {
                    "edges": [{"permission": "ADMIN"}, null, {"permission": "READ"}],
                    "nodes": [
                        {"url": "https://github.com/alice", "login": "alice"},
                        {"url": "https://github.com/bob", "login": "bob"},
                        {"url": "https://github.com/carol", "login": "carol"}
                    ]
                },
                "actions": {"entries": [null, {"name": "ci.yml", "object": null}]},
                "branchProtectionRules": {"nodes": [null, {"pattern": "main"}]},
                "pullRequests": {"nodes": [null, {"commits": null}, {"commits": {"nodes": [{"commit": {"status": {"contexts": [
                    null, {"context": "ci/jenkins", "targetUrl": null}
                ]}}}]}}]}
            }]
        }));

        let statements = repos.statements();
        assert_eq!(count(&statements, NodeLabel::File), 1);
        assert_eq!(count(&statements, NodeLabel::BranchProtectionRule), 1);
        assert_eq!(count(&statements, NodeLabel::StatusCheck), 1);

        // bob's permission was lost, so bob is skipped rather than given carol's
        let permissions: Vec<_> = statements
            .iter()
            .filter_map(|s| match s {
                Statement::MergeEdge(e) if e.edge_type == EdgeType::HasPermissionOn => {
                    Some((e.source.clone(), e.key["permission"].clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            permissions,
            vec![
                (NodeMatch::by_id(NodeLabel::User, "https://github.com/alice"), json!("ADMIN")),
                (NodeMatch::by_id(NodeLabel::User, "https://github.com/carol"), json!("READ")),
            ]
        );
    }
}
