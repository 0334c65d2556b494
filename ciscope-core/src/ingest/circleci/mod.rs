//! CircleCI ingestor units.
//!
//! CircleCI runs reuse the GitHub session: repositories are discovered from the nodes a
//! GitHub crawl with the same session id wrote.

mod context_env_vars;
mod contexts;
mod project_env_vars;
mod projects;

pub use context_env_vars::ContextEnvVars;
pub use contexts::Contexts;
pub use project_env_vars::ProjectEnvVars;
pub use projects::Projects;

use super::{Ingestor, PhaseLevel, Registry};

/// Names of every CircleCI unit, in run order.
pub const UNIT_NAMES: &[&str] = &["contexts", "contextenvvars", "projects", "projectenvvars"];

/// CircleCI phases: organization, context, repository, project.
pub fn registry() -> Registry {
    let mut registry = Registry::new("circleci");
    registry
        .register(PhaseLevel::Organization, "contexts", |ctx, _| {
            Ok(Box::new(Contexts::new(ctx)) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Context, "contextenvvars", |ctx, target| {
            Ok(Box::new(ContextEnvVars::new(ctx, target)?) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Repository, "projects", |ctx, target| {
            Ok(Box::new(Projects::new(ctx, target)?) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Project, "projectenvvars", |ctx, target| {
            Ok(Box::new(ProjectEnvVars::new(ctx, target)?) as Box<dyn Ingestor>)
        });
    registry
}
