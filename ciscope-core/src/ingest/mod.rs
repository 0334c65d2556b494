//! Ingestor units and their registry.
//!
//! A unit fetches one slice of a platform's data for one [`Target`] and maps it to graph
//! statements. Units never talk to each other; ordering between them is expressed by the
//! phases of a [`Registry`].

pub mod circleci;
pub mod github;
mod registry;

pub use registry::{Phase, PhaseLevel, RegisteredUnit, Registry, UnitFactory};

use async_trait::async_trait;
use ciscope_store::{GraphDb, Statement};
use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

use crate::client::{Auth, ErrorSummary, GraphQlClient, HttpClient, RestClient};
use crate::config::CrawlConfig;
use crate::error::{IngestError, Result};

/// A unit of ingestion: fetch everything first, then write it.
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Selection name of the unit (e.g. `teamrepos`).
    fn name(&self) -> &'static str;

    /// Pull all pages this unit needs and keep them locally.
    async fn fetch(&mut self) -> Result<ErrorSummary>;

    /// Graph writes for the fetched data, nodes before the edges that anchor on them.
    fn statements(&self) -> Vec<Statement>;

    /// Write the fetched data, tagging it with `session`.
    ///
    /// DuckDB calls block, so the writes run on tokio's blocking pool rather than on the
    /// worker driving the crawl.
    async fn persist(&self, store: &GraphDb, session: &str) -> Result<usize> {
        let statements = self.statements();
        let store = store.clone();
        let session = session.to_string();
        let written =
            tokio::task::spawn_blocking(move || store.upsert_all(&statements, &session)).await??;
        Ok(written)
    }

    /// `fetch` then `persist`.
    async fn sync(&mut self, store: &GraphDb, session: &str) -> Result<ErrorSummary> {
        let errors = self.fetch().await?;
        let written = self.persist(store, session).await?;
        tracing::debug!("{} wrote {} rows", self.name(), written);
        Ok(errors)
    }
}

/// Entity a unit instance is scoped to, discovered from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Organization,
    Team {
        slug: String,
    },
    Repository {
        name: String,
        url: String,
        database_id: Option<i64>,
    },
    Environment {
        id: String,
        name: String,
        repo_name: String,
        repo_database_id: Option<i64>,
    },
    Context {
        id: String,
        name: String,
    },
    Project {
        name: String,
    },
}

impl Target {
    /// Error for a unit handed a target of the wrong kind.
    pub fn mismatch(&self, unit: &str) -> IngestError {
        IngestError::InvalidIngestor(format!("{} cannot run on {}", unit, self))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Organization => write!(f, "organization"),
            Target::Team { slug } => write!(f, "team {}", slug),
            Target::Repository { name, .. } => write!(f, "repo {}", name),
            Target::Environment {
                name, repo_name, ..
            } => write!(f, "environment {} of repo {}", name, repo_name),
            Target::Context { id, name } => write!(f, "context {} ({})", name, id),
            Target::Project { name } => write!(f, "project {}", name),
        }
    }
}

/// Clients and identity shared by every unit of one platform.
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub organization: String,
    pub graphql: GraphQlClient,
    pub rest: RestClient,
}

impl UnitContext {
    /// GitHub clients, authenticated with the configured token.
    pub fn github(config: &CrawlConfig) -> Result<Self> {
        let token = config
            .github
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IngestError::Config("A GitHub token is required".into()))?;
        let http = HttpClient::new(Auth::Token(token.to_string()), &config.http)?;
        Ok(Self {
            organization: config.organization.clone(),
            graphql: GraphQlClient::github(
                http.clone(),
                &config.github.graphql_url,
                &config.organization,
            )?,
            rest: RestClient::new(http, config.github.rest_url.clone()),
        })
    }

    /// CircleCI clients, authenticated with the configured `ring-session` cookie.
    pub fn circleci(config: &CrawlConfig) -> Result<Self> {
        let cookie = config
            .circleci
            .cookie
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| IngestError::Config("A CircleCI cookie is required".into()))?;
        let http = HttpClient::new(Auth::circleci_cookie(cookie), &config.http)?;
        Ok(Self {
            organization: config.organization.clone(),
            graphql: GraphQlClient::circleci(http.clone(), &config.circleci.graphql_url)?,
            rest: RestClient::new(http, config.circleci.rest_url.clone()),
        })
    }
}

/// Decode fetched JSON leniently: `null` and undecodable data become the empty value.
///
/// Object members set to `null` read as absent, so they fall back to their defaults. List
/// fields decoded through [`lenient`] keep every element that decodes on its own.
pub(crate) fn decode<T: DeserializeOwned + Default>(mut data: Value, what: &str) -> T {
    if data.is_null() {
        return T::default();
    }
    strip_null_members(&mut data);
    match serde_json::from_value(data) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!("Could not decode {}: {}", what, e);
            T::default()
        }
    }
}

/// Decode a top-level JSON list element by element.
pub(crate) fn decode_list<T: DeserializeOwned>(mut data: Value, what: &str) -> Vec<T> {
    strip_null_members(&mut data);
    lenient::vec(data).unwrap_or_else(|e| {
        tracing::warn!("Could not decode {}: {}", what, e);
        Vec::new()
    })
}

fn strip_null_members(value: &mut Value) {
    match value {
        Value::Object(members) => {
            members.retain(|_, member| !member.is_null());
            members.values_mut().for_each(strip_null_members);
        }
        // elements stay in place; positions pair edges with nodes
        Value::Array(items) => items.iter_mut().for_each(strip_null_members),
        _ => {}
    }
}

/// `deserialize_with` helpers for lists where one bad element must not cost the others.
///
/// GitHub answers `null` in place of an item that hit a partial error.
pub(crate) mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Every element in its position; `null` and undecodable ones become `None`.
    pub fn slots<'de, D, T>(deserializer: D) -> Result<Vec<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let items = match Value::deserialize(deserializer)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                tracing::warn!("Expected a list, got {}", other);
                Vec::new()
            }
        };
        Ok(items
            .into_iter()
            .map(|item| {
                if item.is_null() {
                    return None;
                }
                match serde_json::from_value(item) {
                    Ok(decoded) => Some(decoded),
                    Err(e) => {
                        tracing::warn!("Skipping undecodable list element: {}", e);
                        None
                    }
                }
            })
            .collect())
    }

    /// The elements that decode, in order.
    pub fn vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(slots(deserializer)?.into_iter().flatten().collect())
    }
}

/// Hex MD5 of the concatenated parts, used as id for entities without a natural key.
pub(crate) fn md5_hex(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Host of a URL, empty when it does not parse.
pub(crate) fn url_host(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}
