//! Phase-ordered crawl execution.
//!
//! The store doubles as the work queue: every entity phase re-reads the parents the
//! current session wrote, so units only ever see entities of this run.

use chrono::{DateTime, Utc};
use ciscope_store::GraphDb;
use serde_json::Value;
use std::collections::HashMap;
use tokio::task::JoinSet;

use crate::client::ErrorSummary;
use crate::error::{IngestError, Result};
use crate::ingest::{PhaseLevel, RegisteredUnit, Registry, Target, UnitContext};

const TEAMS_SQL: &str = "
SELECT json_extract_string(properties, '$.slug') AS slug
FROM nodes
WHERE label = 'Team' AND session = ?
ORDER BY id";

const REPOSITORIES_SQL: &str = "
SELECT json_extract_string(properties, '$.name') AS name,
       id AS url,
       json_extract_string(properties, '$.databaseId') AS database_id
FROM nodes
WHERE label = 'Repository' AND session = ?
ORDER BY id";

const ENVIRONMENTS_SQL: &str = "
SELECT e.id AS id,
       json_extract_string(e.properties, '$.name') AS name,
       json_extract_string(r.properties, '$.name') AS repo_name,
       json_extract_string(r.properties, '$.databaseId') AS repo_database_id
FROM nodes e
JOIN edges h ON h.edge_type = 'HAS_ENVIRONMENT'
    AND h.target_label = 'Environment' AND h.target_id = e.id
JOIN nodes r ON r.label = 'Repository' AND r.id = h.source_id
WHERE e.label = 'Environment' AND e.session = ?
ORDER BY e.id";

const CONTEXTS_SQL: &str = "
SELECT id, json_extract_string(properties, '$.name') AS name
FROM nodes
WHERE label = 'CircleCIContext' AND session = ?
ORDER BY id";

const PROJECTS_SQL: &str = "
SELECT json_extract_string(properties, '$.repository') AS name
FROM nodes
WHERE label = 'CircleCIProject' AND session = ?
ORDER BY id";

/// What one phase did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSummary {
    pub level: PhaseLevel,
    /// Units that ran, in order
    pub units: Vec<&'static str>,
    pub targets: usize,
}

/// Outcome of a crawl that did not hit a fatal error.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub session: String,
    pub phases: Vec<PhaseSummary>,
    /// Tolerated errors across every unit
    pub errors: ErrorSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn units_run(&self) -> usize {
        self.phases.iter().map(|p| p.units.len() * p.targets).sum()
    }
}

/// Runs the selected units of a registry, phase by phase.
pub struct Orchestrator {
    registry: Registry,
    context: UnitContext,
    store: GraphDb,
    session: String,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        registry: Registry,
        context: UnitContext,
        store: GraphDb,
        session: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            context,
            store,
            session: session.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Crawl with the units named in `selected`.
    ///
    /// Names must already be resolved; a name the registry does not know is an error.
    /// The first fatal error stops the run and cancels in-flight targets.
    pub async fn run(&self, selected: &[String]) -> Result<RunSummary> {
        let known = self.registry.names();
        if let Some(unknown) = selected.iter().find(|name| !known.contains(&name.as_str())) {
            return Err(IngestError::InvalidIngestor(format!(
                "{} is not a {} ingestor",
                unknown,
                self.registry.platform()
            )));
        }

        let started_at = Utc::now();
        tracing::info!(
            "Starting {} crawl of {} (session {})",
            self.registry.platform(),
            self.context.organization,
            self.session
        );

        let mut phases = Vec::new();
        let mut errors = ErrorSummary::new();

        for phase in self.registry.phases() {
            let units = phase.select(selected);
            if units.is_empty() {
                tracing::debug!("No units selected for {} phase, skipping", phase.level);
                continue;
            }

            let targets = match phase.level {
                PhaseLevel::Organization => vec![Target::Organization],
                level => self.discover(level)?,
            };
            tracing::info!(
                "Running {} phase: {} unit(s) over {} target(s)",
                phase.level,
                units.len(),
                targets.len()
            );

            let target_count = targets.len();
            let phase_errors = if phase.level == PhaseLevel::Organization {
                self.run_sequentially(&units, targets).await?
            } else {
                self.run_concurrently(&units, targets).await?
            };
            errors.merge(phase_errors);

            phases.push(PhaseSummary {
                level: phase.level,
                units: units.iter().map(|u| u.name).collect(),
                targets: target_count,
            });
        }

        self.store
            .record_session(self.registry.platform(), &self.session)?;

        let finished_at = Utc::now();
        tracing::info!(
            "Finished {} crawl in {}s with {} tolerated error(s)",
            self.registry.platform(),
            (finished_at - started_at).num_seconds(),
            errors.total()
        );

        Ok(RunSummary {
            session: self.session.clone(),
            phases,
            errors,
            started_at,
            finished_at,
        })
    }

    async fn run_sequentially(
        &self,
        units: &[RegisteredUnit],
        targets: Vec<Target>,
    ) -> Result<ErrorSummary> {
        let mut errors = ErrorSummary::new();
        for target in targets {
            errors.merge(
                run_target(
                    units.to_vec(),
                    self.context.clone(),
                    self.store.clone(),
                    self.session.clone(),
                    target,
                )
                .await?,
            );
        }
        Ok(errors)
    }

    /// Run every target on its own task, at most `concurrency` at a time.
    ///
    /// Returning early drops the `JoinSet`, which aborts the remaining tasks.
    async fn run_concurrently(
        &self,
        units: &[RegisteredUnit],
        targets: Vec<Target>,
    ) -> Result<ErrorSummary> {
        let mut errors = ErrorSummary::new();
        let mut pending = targets.into_iter();
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < self.concurrency {
                let Some(target) = pending.next() else {
                    break;
                };
                tasks.spawn(run_target(
                    units.to_vec(),
                    self.context.clone(),
                    self.store.clone(),
                    self.session.clone(),
                    target,
                ));
            }

            match tasks.join_next().await {
                Some(joined) => errors.merge(joined??),
                None => break,
            }
        }

        Ok(errors)
    }

    /// Entities of `level` written during this session.
    fn discover(&self, level: PhaseLevel) -> Result<Vec<Target>> {
        let session = [Value::String(self.session.clone())];
        let targets = match level {
            PhaseLevel::Organization => vec![Target::Organization],
            PhaseLevel::Team => self
                .store
                .query(TEAMS_SQL, &session)?
                .first_column_strings()
                .into_iter()
                .map(|slug| Target::Team { slug })
                .collect(),
            PhaseLevel::Repository => self
                .store
                .query(REPOSITORIES_SQL, &session)?
                .as_dicts()
                .iter()
                .filter_map(|row| {
                    Some(Target::Repository {
                        name: text(row, "name")?,
                        url: text(row, "url")?,
                        database_id: integer(row, "database_id"),
                    })
                })
                .collect(),
            PhaseLevel::Environment => self
                .store
                .query(ENVIRONMENTS_SQL, &session)?
                .as_dicts()
                .iter()
                .filter_map(|row| {
                    Some(Target::Environment {
                        id: text(row, "id")?,
                        name: text(row, "name")?,
                        repo_name: text(row, "repo_name")?,
                        repo_database_id: integer(row, "repo_database_id"),
                    })
                })
                .collect(),
            PhaseLevel::Context => self
                .store
                .query(CONTEXTS_SQL, &session)?
                .as_dicts()
                .iter()
                .filter_map(|row| {
                    Some(Target::Context {
                        id: text(row, "id")?,
                        name: text(row, "name").unwrap_or_default(),
                    })
                })
                .collect(),
            PhaseLevel::Project => self
                .store
                .query(PROJECTS_SQL, &session)?
                .first_column_strings()
                .into_iter()
                .map(|name| Target::Project { name })
                .collect(),
        };
        Ok(targets)
    }
}

/// Run `units` in order against one target.
async fn run_target(
    units: Vec<RegisteredUnit>,
    context: UnitContext,
    store: GraphDb,
    session: String,
    target: Target,
) -> Result<ErrorSummary> {
    let mut errors = ErrorSummary::new();
    for unit in &units {
        tracing::info!("Running {} on {}", unit.name, target);
        let mut ingestor = (unit.factory)(&context, &target)?;
        errors.merge(ingestor.sync(&store, &session).await?);
    }
    Ok(errors)
}

fn text(row: &HashMap<String, Value>, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Integer column that may come back as text from `json_extract_string`.
fn integer(row: &HashMap<String, Value>, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
