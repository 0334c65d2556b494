//! Database schema definitions for ciscope.
//!
//! Defines node labels, edge types, and the DuckDB schema.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Labels of nodes in the attack-surface graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Organization,
    Team,
    User,
    Repository,
    /// CI configuration file fetched from a repository
    File,
    StatusCheck,
    BranchProtectionRule,
    Webhook,
    /// Deployment environment of a repository
    Environment,
    /// Secret or CI environment variable (names only, never values)
    EnvironmentVariable,
    CircleCIContext,
    CircleCIProject,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 12] = [
        NodeLabel::Organization,
        NodeLabel::Team,
        NodeLabel::User,
        NodeLabel::Repository,
        NodeLabel::File,
        NodeLabel::StatusCheck,
        NodeLabel::BranchProtectionRule,
        NodeLabel::Webhook,
        NodeLabel::Environment,
        NodeLabel::EnvironmentVariable,
        NodeLabel::CircleCIContext,
        NodeLabel::CircleCIProject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Organization => "Organization",
            NodeLabel::Team => "Team",
            NodeLabel::User => "User",
            NodeLabel::Repository => "Repository",
            NodeLabel::File => "File",
            NodeLabel::StatusCheck => "StatusCheck",
            NodeLabel::BranchProtectionRule => "BranchProtectionRule",
            NodeLabel::Webhook => "Webhook",
            NodeLabel::Environment => "Environment",
            NodeLabel::EnvironmentVariable => "EnvironmentVariable",
            NodeLabel::CircleCIContext => "CircleCIContext",
            NodeLabel::CircleCIProject => "CircleCIProject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Types of relationships between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// User→Organization, User→Team
    IsMemberOf,
    /// User→Repository, Team→Repository
    HasPermissionOn,
    /// Repository→Organization
    OwnedBy,
    /// Repository→File
    HasCiConfigurationFile,
    /// Repository→StatusCheck
    HasStatusCheck,
    /// Repository→BranchProtectionRule
    HasBranchProtectionRule,
    /// Repository→Webhook
    HasWebhook,
    /// Repository→Environment
    HasEnvironment,
    /// Repository/Environment/CircleCIContext/CircleCIProject→EnvironmentVariable
    ExposesEnvironmentVariable,
    /// Team/User→CircleCIContext
    HasAccessToCircleciContext,
    /// Repository→CircleCIProject
    HasCi,
}

impl EdgeType {
    pub const ALL: [EdgeType; 11] = [
        EdgeType::IsMemberOf,
        EdgeType::HasPermissionOn,
        EdgeType::OwnedBy,
        EdgeType::HasCiConfigurationFile,
        EdgeType::HasStatusCheck,
        EdgeType::HasBranchProtectionRule,
        EdgeType::HasWebhook,
        EdgeType::HasEnvironment,
        EdgeType::ExposesEnvironmentVariable,
        EdgeType::HasAccessToCircleciContext,
        EdgeType::HasCi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::IsMemberOf => "IS_MEMBER_OF",
            EdgeType::HasPermissionOn => "HAS_PERMISSION_ON",
            EdgeType::OwnedBy => "OWNED_BY",
            EdgeType::HasCiConfigurationFile => "HAS_CI_CONFIGURATION_FILE",
            EdgeType::HasStatusCheck => "HAS_STATUS_CHECK",
            EdgeType::HasBranchProtectionRule => "HAS_BRANCH_PROTECTION_RULE",
            EdgeType::HasWebhook => "HAS_WEBHOOK",
            EdgeType::HasEnvironment => "HAS_ENVIRONMENT",
            EdgeType::ExposesEnvironmentVariable => "EXPOSES_ENVIRONMENT_VARIABLE",
            EdgeType::HasAccessToCircleciContext => "HAS_ACCESS_TO_CIRCLECI_CONTEXT",
            EdgeType::HasCi => "HAS_CI",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|edge_type| edge_type.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SQL schema for creating the graph tables.
///
/// Nodes are keyed by `(label, id)`. Edges are keyed by their type, both endpoint keys
/// and `edge_key`, the canonical JSON of the properties the edge is merged on.
/// No secondary indexes: DuckDB refuses `ON CONFLICT DO UPDATE` on indexed columns.
pub const SCHEMA_SQL: &str = r#"
-- Nodes table: every entity observed by a crawl
CREATE TABLE IF NOT EXISTS nodes (
    label VARCHAR NOT NULL,
    id VARCHAR NOT NULL,
    properties JSON,
    session VARCHAR,
    PRIMARY KEY (label, id)
);

-- Edges table: relationships between nodes
CREATE TABLE IF NOT EXISTS edges (
    edge_type VARCHAR NOT NULL,
    source_label VARCHAR NOT NULL,
    source_id VARCHAR NOT NULL,
    target_label VARCHAR NOT NULL,
    target_id VARCHAR NOT NULL,
    edge_key VARCHAR NOT NULL,
    properties JSON,
    session VARCHAR,
    PRIMARY KEY (edge_type, source_label, source_id, target_label, target_id, edge_key)
);

-- Metadata table: schema version, last crawl session
CREATE TABLE IF NOT EXISTS metadata (
    key VARCHAR PRIMARY KEY,
    value VARCHAR
);
"#;

/// Schema version for migrations
pub const SCHEMA_VERSION: &str = "1.0.0";
