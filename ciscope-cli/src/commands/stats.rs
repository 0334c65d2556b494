//! Stats command - show what the graph store holds
//!
//! Prints node and edge totals, a breakdown per label and edge type, and the sessions
//! that wrote the nodes, marking the latest GitHub and CircleCI sessions. Labels and edge
//! types this version does not model (left by an older or newer build) are called out.

use crate::output::{counts_table, render, OutputFormat, TableDisplay};
use anyhow::Result;
use ciscope_store::{EdgeType, GraphDb, GraphStats, NodeLabel};
use colored::Colorize;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub database: String,
    pub last_github_session: Option<String>,
    pub last_circleci_session: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unrecognized: Vec<String>,
    #[serde(flatten)]
    pub stats: GraphStats,
}

impl TableDisplay for StatsReport {
    fn to_table(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("{}", "ciscope graph".green().bold()));
        lines.push(format!("  {}: {}", "Database".cyan(), self.database));
        lines.push(format!("  {}: {}", "Nodes".cyan(), self.stats.node_count));
        lines.push(format!("  {}: {}", "Edges".cyan(), self.stats.edge_count));
        for (platform, session) in [
            ("GitHub", &self.last_github_session),
            ("CircleCI", &self.last_circleci_session),
        ] {
            lines.push(format!(
                "  {}: {}",
                format!("Last {} session", platform).cyan(),
                session.as_deref().unwrap_or("never")
            ));
        }

        if !self.unrecognized.is_empty() {
            lines.push(format!(
                "  {}: {}",
                "Unrecognized".yellow(),
                self.unrecognized.join(", ")
            ));
        }

        lines.push(String::new());
        lines.push(counts_table("Label", &self.stats.label_counts));
        lines.push(counts_table("Edge type", &self.stats.edge_type_counts));
        lines.push(counts_table("Session", &self.stats.session_counts));

        lines.join("\n")
    }
}

/// Stored labels and edge types with no schema counterpart, sorted.
fn unrecognized(stats: &GraphStats) -> Vec<String> {
    let labels = stats
        .label_counts
        .keys()
        .filter(|label| NodeLabel::parse(label).is_none());
    let edge_types = stats
        .edge_type_counts
        .keys()
        .filter(|edge_type| EdgeType::parse(edge_type).is_none());
    let mut names: Vec<String> = labels.chain(edge_types).cloned().collect();
    names.sort();
    names
}

pub fn collect(store: &GraphDb) -> Result<StatsReport> {
    let stats = store.stats()?;
    Ok(StatsReport {
        database: store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string()),
        last_github_session: store.metadata("last_session.github")?,
        last_circleci_session: store.metadata("last_session.circleci")?,
        unrecognized: unrecognized(&stats),
        stats,
    })
}

pub fn run(store: &GraphDb, format: OutputFormat) -> Result<()> {
    render(&collect(store)?, format)
}
