//! ciscope configuration loading from `.ciscope.toml`.
//!
//! The file is optional. Every setting has a default, and command-line flags and
//! environment variables (`GITHUB_TOKEN`, `CIRCLECI_COOKIE`, `CISCOPE_ORGANIZATION`)
//! take precedence over whatever the file says.
//!
//! # Example Configuration
//!
//! ```toml
//! [github]
//! ingestors = ["default", "secrets"]
//!
//! [circleci]
//! rest_url = "https://circleci.com/api/v2/"
//!
//! [store]
//! path = ".ciscope/graph.duckdb"
//!
//! [crawl]
//! organization = "acme"
//! concurrency = 8
//! timeout_secs = 30
//! ```

use ciscope_core::config::{
    CrawlConfig, RetryConfig, DEFAULT_CIRCLECI_GRAPHQL_URL, DEFAULT_CIRCLECI_REST_URL,
    DEFAULT_GITHUB_GRAPHQL_URL, DEFAULT_GITHUB_REST_URL,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = ".ciscope.toml";
pub const DEFAULT_DB_PATH: &str = ".ciscope/graph.duckdb";

/// Root configuration loaded from `.ciscope.toml`.
#[derive(Debug, Deserialize, Default)]
pub struct CiscopeConfig {
    #[serde(default)]
    pub github: GitHubSection,

    #[serde(default)]
    pub circleci: CircleCiSection,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub crawl: CrawlSection,
}

/// `[github]` section.
#[derive(Debug, Deserialize, Default)]
pub struct GitHubSection {
    pub graphql_url: Option<String>,
    pub rest_url: Option<String>,
    /// Prefer `GITHUB_TOKEN`; a token in the file is only used when the env var is unset.
    pub token: Option<String>,
    /// Units to run when no `--ingestor` flag is given.
    #[serde(default)]
    pub ingestors: Vec<String>,
}

/// `[circleci]` section.
#[derive(Debug, Deserialize, Default)]
pub struct CircleCiSection {
    pub graphql_url: Option<String>,
    pub rest_url: Option<String>,
    pub cookie: Option<String>,
}

/// `[store]` section.
#[derive(Debug, Deserialize, Default)]
pub struct StoreSection {
    pub path: Option<PathBuf>,
}

/// `[crawl]` section.
#[derive(Debug, Deserialize, Default)]
pub struct CrawlSection {
    pub organization: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    /// Set to `false` to attempt every request exactly once.
    pub retry: Option<bool>,
}

/// Values given on the command line; `Some` wins over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub organization: Option<String>,
    pub concurrency: Option<usize>,
    pub github_token: Option<String>,
    pub circleci_cookie: Option<String>,
}

impl CiscopeConfig {
    /// Load configuration from `.ciscope.toml` in `root`.
    ///
    /// A missing file yields defaults. An unreadable or invalid file is reported with a
    /// warning and also yields defaults.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse {}: {}", CONFIG_FILE, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", CONFIG_FILE, e);
                }
            }
        }
        Self::default()
    }

    /// Database path: the flag, then `[store].path`, then the default.
    pub fn db_path(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.store.path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
    }

    /// Build the crawl configuration for one run.
    ///
    /// Fails when no organization is known from either the flags or the file.
    pub fn crawl_config(&self, session: &str, overrides: Overrides) -> anyhow::Result<CrawlConfig> {
        let organization = overrides
            .organization
            .or_else(|| self.crawl.organization.clone())
            .filter(|o| !o.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No organization given: pass --organization, set CISCOPE_ORGANIZATION or add [crawl].organization to {}",
                    CONFIG_FILE
                )
            })?;

        let mut config = CrawlConfig::new(organization, session);
        if let Some(concurrency) = overrides.concurrency.or(self.crawl.concurrency) {
            config.concurrency = concurrency.max(1);
        }
        if let Some(timeout_secs) = self.crawl.timeout_secs {
            config.http.timeout_secs = timeout_secs;
        }
        if self.crawl.retry == Some(false) {
            config.http.retry = RetryConfig::disabled();
        }

        config.github.graphql_url = self
            .github
            .graphql_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GITHUB_GRAPHQL_URL.to_string());
        config.github.rest_url = self
            .github
            .rest_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GITHUB_REST_URL.to_string());
        config.github.token = overrides.github_token.or_else(|| self.github.token.clone());

        config.circleci.graphql_url = self
            .circleci
            .graphql_url
            .clone()
            .unwrap_or_else(|| DEFAULT_CIRCLECI_GRAPHQL_URL.to_string());
        config.circleci.rest_url = self
            .circleci
            .rest_url
            .clone()
            .unwrap_or_else(|| DEFAULT_CIRCLECI_REST_URL.to_string());
        config.circleci.cookie = overrides
            .circleci_cookie
            .or_else(|| self.circleci.cookie.clone());

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = CiscopeConfig::default();
        assert!(config.github.ingestors.is_empty());
        assert!(config.crawl.organization.is_none());
        assert_eq!(config.db_path(None), PathBuf::from(DEFAULT_DB_PATH));
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[github]
graphql_url = "https://ghe.example.com/api/graphql"
rest_url = "https://ghe.example.com/api/v3/"
ingestors = ["default", "secrets"]

[circleci]
cookie = "from-file"

[store]
path = "/tmp/crawl.duckdb"

[crawl]
organization = "acme"
concurrency = 8
timeout_secs = 30
retry = false
"#;
        let config: CiscopeConfig = toml::from_str(toml_content).unwrap();

        assert_eq!(config.github.ingestors, vec!["default", "secrets"]);
        assert_eq!(config.db_path(None), PathBuf::from("/tmp/crawl.duckdb"));

        let crawl = config.crawl_config("s1", Overrides::default()).unwrap();
        assert_eq!(crawl.organization, "acme");
        assert_eq!(crawl.session, "s1");
        assert_eq!(crawl.concurrency, 8);
        assert_eq!(crawl.http.timeout_secs, 30);
        assert!(!crawl.http.retry.enabled);
        assert_eq!(crawl.github.graphql_url, "https://ghe.example.com/api/graphql");
        assert_eq!(crawl.circleci.rest_url, DEFAULT_CIRCLECI_REST_URL);
        assert_eq!(crawl.circleci.cookie.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_flags_override_file() {
        let toml_content = r#"
[github]
token = "file-token"

[crawl]
organization = "acme"
concurrency = 8
"#;
        let config: CiscopeConfig = toml::from_str(toml_content).unwrap();
        let crawl = config
            .crawl_config(
                "s1",
                Overrides {
                    organization: Some("globex".into()),
                    concurrency: Some(2),
                    github_token: Some("env-token".into()),
                    circleci_cookie: None,
                },
            )
            .unwrap();

        assert_eq!(crawl.organization, "globex");
        assert_eq!(crawl.concurrency, 2);
        assert_eq!(crawl.github.token.as_deref(), Some("env-token"));
        assert_eq!(
            config.db_path(Some(Path::new("other.duckdb"))),
            PathBuf::from("other.duckdb")
        );
    }

    #[test]
    fn test_missing_organization_is_an_error() {
        let err = CiscopeConfig::default()
            .crawl_config("s1", Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("--organization"));
    }

    #[test]
    fn test_load_missing_and_invalid_files() {
        let dir = tempdir().unwrap();
        let config = CiscopeConfig::load(dir.path());
        assert!(config.crawl.organization.is_none());

        std::fs::write(dir.path().join(CONFIG_FILE), "[crawl\norganization = ").unwrap();
        let config = CiscopeConfig::load(dir.path());
        assert!(config.crawl.organization.is_none());

        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[crawl]\norganization = \"acme\"\n",
        )
        .unwrap();
        let config = CiscopeConfig::load(dir.path());
        assert_eq!(config.crawl.organization.as_deref(), Some("acme"));
    }
}
