//! GitHub ingestor units.

mod environment_secrets;
mod environments;
mod organization_secrets;
mod organizations;
mod repo_secrets;
mod repo_webhooks;
mod repos;
mod team_members;
mod team_repos;
mod teams;
mod users;

pub use environment_secrets::EnvironmentSecrets;
pub use environments::Environments;
pub use organization_secrets::OrganizationSecrets;
pub use organizations::Organizations;
pub use repo_secrets::RepoSecrets;
pub use repo_webhooks::RepoWebhooks;
pub use repos::Repos;
pub use team_members::TeamMembers;
pub use team_repos::TeamRepos;
pub use teams::Teams;
pub use users::Users;

use super::{Ingestor, PhaseLevel, Registry};

/// GitHub phases: organization, team, repository, environment.
///
/// Within the organization phase the order matters: users and repositories anchor edges
/// on the organization node, and organization secrets anchor on repositories.
pub fn registry() -> Registry {
    let mut registry = Registry::new("github");
    registry
        .register(PhaseLevel::Organization, "organizations", |ctx, _| {
            Ok(Box::new(Organizations::new(ctx)) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Organization, "teams", |ctx, _| {
            Ok(Box::new(Teams::new(ctx)) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Organization, "users", |ctx, _| {
            Ok(Box::new(Users::new(ctx)) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Organization, "repos", |ctx, _| {
            Ok(Box::new(Repos::new(ctx)) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Organization, "organizationsecrets", |ctx, _| {
            Ok(Box::new(OrganizationSecrets::new(ctx)) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Team, "teamrepos", |ctx, target| {
            Ok(Box::new(TeamRepos::new(ctx, target)?) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Team, "teammembers", |ctx, target| {
            Ok(Box::new(TeamMembers::new(ctx, target)?) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Repository, "repowebhooks", |ctx, target| {
            Ok(Box::new(RepoWebhooks::new(ctx, target)?) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Repository, "environments", |ctx, target| {
            Ok(Box::new(Environments::new(ctx, target)?) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Repository, "reposecrets", |ctx, target| {
            Ok(Box::new(RepoSecrets::new(ctx, target)?) as Box<dyn Ingestor>)
        })
        .register(PhaseLevel::Environment, "environmentsecrets", |ctx, target| {
            Ok(Box::new(EnvironmentSecrets::new(ctx, target)?) as Box<dyn Ingestor>)
        });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::VALID_NAMES;

    #[test]
    fn test_registry_covers_every_valid_name() {
        let mut names = registry().names();
        names.sort_unstable();
        let mut valid = VALID_NAMES.to_vec();
        valid.sort_unstable();
        assert_eq!(names, valid);
    }

    #[test]
    fn test_org_phase_order() {
        let registry = registry();
        let org: Vec<_> = registry.phases()[0].units().iter().map(|u| u.name).collect();
        assert_eq!(
            org,
            vec!["organizations", "teams", "users", "repos", "organizationsecrets"]
        );
    }
}
