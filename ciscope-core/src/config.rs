//! Crawl configuration.
//!
//! Everything a crawl needs is passed explicitly through [`CrawlConfig`]; the core keeps
//! no global state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
pub const DEFAULT_GITHUB_REST_URL: &str = "https://api.github.com/";
pub const DEFAULT_CIRCLECI_GRAPHQL_URL: &str = "https://circleci.com/graphql-unstable";
pub const DEFAULT_CIRCLECI_REST_URL: &str = "https://circleci.com/api/v2/";

/// Configuration for one crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Target organization login
    pub organization: String,
    /// Run identifier written to every node and edge
    pub session: String,
    /// Maximum number of targets processed at once in entity phases
    pub concurrency: usize,
    pub http: HttpConfig,
    pub github: GitHubConfig,
    pub circleci: CircleCiConfig,
}

impl CrawlConfig {
    pub fn new(organization: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            session: session.into(),
            concurrency: 4,
            http: HttpConfig::default(),
            github: GitHubConfig::default(),
            circleci: CircleCiConfig::default(),
        }
    }
}

/// HTTP behaviour shared by all clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Exponential backoff applied to transport failures and 5xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Total time budget for one request including retries
    pub max_elapsed_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_interval_ms: 500,
            max_interval_ms: 10_000,
            max_elapsed_secs: 60,
        }
    }
}

impl RetryConfig {
    /// No retries: every request is attempted exactly once.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// GitHub endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub graphql_url: String,
    pub rest_url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            graphql_url: DEFAULT_GITHUB_GRAPHQL_URL.to_string(),
            rest_url: DEFAULT_GITHUB_REST_URL.to_string(),
            token: None,
        }
    }
}

/// CircleCI endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleCiConfig {
    pub graphql_url: String,
    pub rest_url: String,
    /// `ring-session` cookie from an authenticated browser session
    #[serde(skip_serializing)]
    pub cookie: Option<String>,
}

impl Default for CircleCiConfig {
    fn default() -> Self {
        Self {
            graphql_url: DEFAULT_CIRCLECI_GRAPHQL_URL.to_string(),
            rest_url: DEFAULT_CIRCLECI_REST_URL.to_string(),
            cookie: None,
        }
    }
}
