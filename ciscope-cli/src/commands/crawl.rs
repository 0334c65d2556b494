//! Crawl commands - run the GitHub or CircleCI units against one organization
//!
//! Both commands open the graph store, build the platform clients, run the
//! orchestrator and print a summary of what ran and which errors were tolerated.

use crate::output::{render, OutputFormat, TableDisplay};
use anyhow::{Context, Result};
use ciscope_core::ingest::{circleci, github};
use ciscope_core::{CrawlConfig, Orchestrator, Registry, RunSummary, UnitContext};
use ciscope_store::GraphDb;
use colored::Colorize;
use serde::Serialize;
use std::fmt;

/// Which API a crawl talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    GitHub,
    CircleCi,
}

impl Platform {
    fn registry(self) -> Registry {
        match self {
            Platform::GitHub => github::registry(),
            Platform::CircleCi => circleci::registry(),
        }
    }

    fn context(self, config: &CrawlConfig) -> ciscope_core::Result<UnitContext> {
        match self {
            Platform::GitHub => UnitContext::github(config),
            Platform::CircleCi => UnitContext::circleci(config),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::GitHub => write!(f, "GitHub"),
            Platform::CircleCi => write!(f, "CircleCI"),
        }
    }
}

/// Pick the session for a crawl.
///
/// An explicit session always wins. CircleCI otherwise continues the most recent
/// GitHub session, since its units attach to the repositories that crawl wrote. In
/// every other case a fresh UUID v4 is generated.
pub fn resolve_session(explicit: Option<String>, platform: Platform, store: &GraphDb) -> Result<String> {
    if let Some(session) = explicit.filter(|s| !s.is_empty()) {
        return Ok(session);
    }
    if platform == Platform::CircleCi {
        if let Some(session) = store.metadata("last_session.github")? {
            tracing::info!("Continuing GitHub session {}", session);
            return Ok(session);
        }
        tracing::warn!(
            "No GitHub crawl found in the store; CircleCI projects will not be linked to repositories"
        );
    }
    Ok(uuid::Uuid::new_v4().to_string())
}

/// Run a crawl and print its summary.
pub async fn run(
    platform: Platform,
    config: CrawlConfig,
    store: GraphDb,
    selected: &[String],
    format: OutputFormat,
) -> Result<()> {
    let database = store
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ":memory:".to_string());
    let context = platform
        .context(&config)
        .with_context(|| format!("Failed to set up {} clients", platform))?;

    let orchestrator = Orchestrator::new(
        platform.registry(),
        context,
        store,
        config.session.clone(),
        config.concurrency,
    );
    let summary = orchestrator
        .run(selected)
        .await
        .with_context(|| format!("{} crawl of {} failed", platform, config.organization))?;

    render(
        &CrawlReport::new(platform, &config.organization, &database, &summary),
        format,
    )
}

/// Printable summary of one crawl.
#[derive(Debug, Serialize)]
pub struct CrawlReport {
    pub platform: String,
    pub organization: String,
    pub session: String,
    pub database: String,
    pub phases: Vec<PhaseRow>,
    pub units_run: usize,
    pub tolerated_errors: Vec<ErrorRow>,
    pub tolerated_error_total: usize,
    pub duration_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct PhaseRow {
    pub level: String,
    pub units: Vec<String>,
    pub targets: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorRow {
    pub error_type: String,
    pub message: String,
    pub count: usize,
}

impl CrawlReport {
    pub fn new(platform: Platform, organization: &str, database: &str, summary: &RunSummary) -> Self {
        Self {
            platform: platform.to_string(),
            organization: organization.to_string(),
            session: summary.session.clone(),
            database: database.to_string(),
            phases: summary
                .phases
                .iter()
                .map(|phase| PhaseRow {
                    level: phase.level.to_string(),
                    units: phase.units.iter().map(|u| u.to_string()).collect(),
                    targets: phase.targets,
                })
                .collect(),
            units_run: summary.units_run(),
            tolerated_errors: summary
                .errors
                .iter()
                .map(|(_, tracked)| ErrorRow {
                    error_type: tracked.error_type.clone(),
                    message: tracked.message.clone(),
                    count: tracked.count,
                })
                .collect(),
            tolerated_error_total: summary.errors.total(),
            duration_secs: (summary.finished_at - summary.started_at).num_seconds(),
        }
    }
}

impl TableDisplay for CrawlReport {
    fn to_table(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!(
            "{}",
            format!("{} crawl of {} complete", self.platform, self.organization)
                .green()
                .bold()
        ));
        lines.push(format!("  {}: {}", "Session".cyan(), self.session));
        lines.push(format!("  {}: {}", "Database".cyan(), self.database));
        lines.push(format!("  {}: {}s", "Duration".cyan(), self.duration_secs));

        if self.phases.is_empty() {
            lines.push(format!("  {}: none", "Phases".cyan()));
        } else {
            lines.push(format!("  {}:", "Phases".cyan()));
            for phase in &self.phases {
                lines.push(format!(
                    "    {} ({} target(s)): {}",
                    phase.level,
                    phase.targets,
                    phase.units.join(", ")
                ));
            }
        }

        if self.tolerated_error_total > 0 {
            lines.push(String::new());
            lines.push(format!(
                "{}",
                format!("{} tolerated error(s):", self.tolerated_error_total).yellow()
            ));
            for error in &self.tolerated_errors {
                let label = if error.error_type.is_empty() {
                    error.message.clone()
                } else {
                    format!("{} {}", error.error_type, error.message)
                };
                lines.push(format!("  {} {}x {}", "warning:".yellow(), error.count, label));
            }
        }

        lines.join("\n")
    }
}
