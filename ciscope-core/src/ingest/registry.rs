//! Ordered phases of named unit factories.

use std::fmt;
use std::sync::Arc;

use super::{Ingestor, Target, UnitContext};
use crate::error::Result;

/// Builds a unit for one target.
pub type UnitFactory =
    Arc<dyn Fn(&UnitContext, &Target) -> Result<Box<dyn Ingestor>> + Send + Sync>;

/// Kind of entity a phase iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseLevel {
    /// One fixed target, the organization itself
    Organization,
    Team,
    Repository,
    Environment,
    /// CircleCI contexts
    Context,
    /// CircleCI projects
    Project,
}

impl PhaseLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseLevel::Organization => "org",
            PhaseLevel::Team => "team",
            PhaseLevel::Repository => "repo",
            PhaseLevel::Environment => "environment",
            PhaseLevel::Context => "context",
            PhaseLevel::Project => "project",
        }
    }
}

impl fmt::Display for PhaseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named unit factory.
#[derive(Clone)]
pub struct RegisteredUnit {
    pub name: &'static str,
    pub factory: UnitFactory,
}

impl fmt::Debug for RegisteredUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredUnit")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Units that run over the same entity set, in registration order.
#[derive(Debug, Clone)]
pub struct Phase {
    pub level: PhaseLevel,
    units: Vec<RegisteredUnit>,
}

impl Phase {
    pub fn units(&self) -> &[RegisteredUnit] {
        &self.units
    }

    /// Registered units whose name is in `selected`, in registration order.
    pub fn select(&self, selected: &[String]) -> Vec<RegisteredUnit> {
        self.units
            .iter()
            .filter(|unit| selected.iter().any(|name| name == unit.name))
            .cloned()
            .collect()
    }
}

/// Ordered list of phases for one platform.
///
/// Phases run in the order their level was first registered.
#[derive(Debug, Clone)]
pub struct Registry {
    platform: &'static str,
    phases: Vec<Phase>,
}

impl Registry {
    pub fn new(platform: &'static str) -> Self {
        Self {
            platform,
            phases: Vec::new(),
        }
    }

    /// Register a unit at the end of its phase.
    pub fn register<F>(&mut self, level: PhaseLevel, name: &'static str, factory: F) -> &mut Self
    where
        F: Fn(&UnitContext, &Target) -> Result<Box<dyn Ingestor>> + Send + Sync + 'static,
    {
        let unit = RegisteredUnit {
            name,
            factory: Arc::new(factory),
        };
        match self.phases.iter_mut().find(|phase| phase.level == level) {
            Some(phase) => phase.units.push(unit),
            None => self.phases.push(Phase {
                level,
                units: vec![unit],
            }),
        }
        self
    }

    pub fn platform(&self) -> &'static str {
        self.platform
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Every registered unit name, in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.phases
            .iter()
            .flat_map(|phase| phase.units.iter().map(|unit| unit.name))
            .collect()
    }
}
