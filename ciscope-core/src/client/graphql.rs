//! Cursor-paginated GraphQL fetcher.

use reqwest::Method;
use serde_json::{json, Map, Value};
use url::Url;

use super::{lookup, merge_json, ErrorSummary, Fetched, HttpClient};
use crate::error::{IngestError, Result};

/// GraphQL errors from GitHub that mean the crawl cannot produce a useful graph.
pub const GITHUB_FATAL_ERRORS: &[&str] = &[
    "Resource protected by organization SAML enforcement",
    "Your token has not been granted the required scopes to execute this",
];

/// GraphQL errors from CircleCI that mean the crawl cannot produce a useful graph.
pub const CIRCLECI_FATAL_ERRORS: &[&str] = &[
    "Something unexpected happened.",
    "No value was provided for variable `vcsType', which is non-nullable.",
    "Non-nullable field was null.",
];

const BAD_GATEWAY_HINT: &str = "Received a 502 from GraphQL API. Sometimes this happens when we \
     query too many resources at once (try lowering the 'first' in GraphQL query)";

/// GraphQL client for one platform.
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    http: HttpClient,
    endpoint: Url,
    platform: &'static str,
    /// Variables injected into every call, overriding caller values
    defaults: Map<String, Value>,
    fatal_errors: &'static [&'static str],
}

impl GraphQlClient {
    /// GitHub client; every query receives `$login = organization`.
    pub fn github(http: HttpClient, endpoint: &str, organization: &str) -> Result<Self> {
        let mut defaults = Map::new();
        defaults.insert("login".into(), Value::String(organization.to_string()));
        Self::build(http, endpoint, "GitHub", defaults, GITHUB_FATAL_ERRORS)
    }

    /// CircleCI client; every query receives `$vcsType = "GITHUB"`.
    pub fn circleci(http: HttpClient, endpoint: &str) -> Result<Self> {
        let mut defaults = Map::new();
        defaults.insert("vcsType".into(), Value::String("GITHUB".into()));
        Self::build(http, endpoint, "CircleCI", defaults, CIRCLECI_FATAL_ERRORS)
    }

    fn build(
        http: HttpClient,
        endpoint: &str,
        platform: &'static str,
        defaults: Map<String, Value>,
        fatal_errors: &'static [&'static str],
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| IngestError::Config(format!("Invalid GraphQL URL {}: {}", endpoint, e)))?;
        Ok(Self {
            http,
            endpoint,
            platform,
            defaults,
            fatal_errors,
        })
    }

    /// Retrieve every page of `query`, merging `data.<result_path>` across pages.
    ///
    /// Pagination follows `data.<result_path>.pageInfo`; the `cursor` variable carries
    /// `endCursor` into the next call.
    pub async fn fetch(
        &self,
        query: &str,
        result_path: &str,
        variables: Map<String, Value>,
    ) -> Result<Fetched> {
        let has_next_page_path = format!("data.{}.pageInfo.hasNextPage", result_path);
        let cursor_path = format!("data.{}.pageInfo.endCursor", result_path);
        let data_path = format!("data.{}", result_path);

        let mut variables = self.with_defaults(variables);
        let mut data = Value::Null;
        let mut errors = ErrorSummary::new();

        loop {
            let page = self.call(query, &variables).await?;

            if let Some(page_errors) = page.get("errors") {
                classify_graphql_errors(page_errors, self.platform, self.fatal_errors, &mut errors)?;
            }

            if let Some(page_data) = lookup(&page, &data_path) {
                merge_json(&mut data, page_data.clone());
            }

            match lookup(&page, &has_next_page_path).and_then(Value::as_bool) {
                None => {
                    tracing::warn!(
                        "No hasNextPage in pageInfo for {}, something is wrong",
                        result_path
                    );
                    break;
                }
                Some(false) => break,
                Some(true) => match lookup(&page, &cursor_path).and_then(Value::as_str) {
                    Some(cursor) => {
                        variables.insert("cursor".into(), Value::String(cursor.to_string()));
                    }
                    None => {
                        tracing::warn!(
                            "hasNextPage is set but endCursor is missing for {}, stopping",
                            result_path
                        );
                        break;
                    }
                },
            }
        }

        errors.log(result_path);
        Ok(Fetched { data, errors })
    }

    /// Issue `query` once and return `data.<result_path>`.
    pub async fn fetch_single(
        &self,
        query: &str,
        result_path: &str,
        variables: Map<String, Value>,
    ) -> Result<Fetched> {
        let variables = self.with_defaults(variables);
        let page = self.call(query, &variables).await?;

        let mut errors = ErrorSummary::new();
        if let Some(page_errors) = page.get("errors") {
            classify_graphql_errors(page_errors, self.platform, self.fatal_errors, &mut errors)?;
        }
        errors.log(result_path);

        let data = lookup(&page, &format!("data.{}", result_path))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(Fetched { data, errors })
    }

    fn with_defaults(&self, mut variables: Map<String, Value>) -> Map<String, Value> {
        for (key, value) in &self.defaults {
            variables.insert(key.clone(), value.clone());
        }
        variables
    }

    /// Retrieve a single page.
    async fn call(&self, query: &str, variables: &Map<String, Value>) -> Result<Value> {
        let body = json!({ "query": query, "variables": variables });
        tracing::debug!("Issuing GraphQL query: {}", body);

        let response = self
            .http
            .send(Method::POST, &self.endpoint, Some(&body))
            .await?;

        match response.status {
            200 => {}
            502 => {
                return Err(IngestError::HttpStatus {
                    url: self.endpoint.to_string(),
                    status: 502,
                    message: BAD_GATEWAY_HINT.to_string(),
                })
            }
            status => {
                return Err(IngestError::HttpStatus {
                    url: self.endpoint.to_string(),
                    status,
                    message: format!("Received HTTP status code {} from GraphQL API.", status),
                })
            }
        }

        serde_json::from_str(&response.body).map_err(|source| IngestError::Parse {
            context: self.endpoint.to_string(),
            source,
        })
    }
}

/// Triage the `errors` array of a GraphQL response.
///
/// Any message containing one of `fatal_errors` aborts with [`IngestError::FatalGraphQl`];
/// otherwise every error is counted into `summary`.
pub fn classify_graphql_errors(
    errors: &Value,
    platform: &str,
    fatal_errors: &[&str],
    summary: &mut ErrorSummary,
) -> Result<()> {
    let Some(errors) = errors.as_array() else {
        return Ok(());
    };

    for error in errors {
        let message = error.get("message").and_then(Value::as_str).unwrap_or_default();
        if fatal_errors.iter().any(|fatal| message.contains(fatal)) {
            return Err(IngestError::FatalGraphQl {
                platform: platform.to_string(),
                error_type: error_type(error).unwrap_or_default().to_string(),
                message: message.to_string(),
            });
        }
    }

    for error in errors {
        let message = error.get("message").and_then(Value::as_str).unwrap_or_default();
        summary.record_graphql(error_type(error), message);
    }

    Ok(())
}

fn error_type(error: &Value) -> Option<&str> {
    error.get("type").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_substring_aborts() {
        let errors = json!([
            {"type": "FORBIDDEN", "message": "Must have push access to view repository collaborators."},
            {"type": "FORBIDDEN", "message": "Resource protected by organization SAML enforcement. You must grant your token access."}
        ]);
        let mut summary = ErrorSummary::new();
        let err = classify_graphql_errors(&errors, "GitHub", GITHUB_FATAL_ERRORS, &mut summary)
            .unwrap_err();
        assert!(matches!(err, IngestError::FatalGraphQl { ref error_type, .. } if error_type == "FORBIDDEN"));
        assert!(summary.is_empty());
    }

    #[test]
    fn test_non_fatal_errors_are_counted() {
        let errors = json!([
            {"type": "FORBIDDEN", "message": "Must have push access to view repository collaborators."},
            {"type": "FORBIDDEN", "message": "Must have push access to view repository collaborators."},
            {"message": "Field 'x' doesn't exist"}
        ]);
        let mut summary = ErrorSummary::new();
        classify_graphql_errors(&errors, "GitHub", GITHUB_FATAL_ERRORS, &mut summary).unwrap();
        assert_eq!(
            summary.count_for_message("Must have push access to view repository collaborators."),
            2
        );
        assert_eq!(summary.count_for_message("Field 'x' doesn't exist"), 1);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_circleci_fatal_list() {
        let errors = json!([{"message": "Non-nullable field was null."}]);
        let mut summary = ErrorSummary::new();
        assert!(
            classify_graphql_errors(&errors, "CircleCI", CIRCLECI_FATAL_ERRORS, &mut summary)
                .is_err()
        );
        // the GitHub list does not apply to CircleCI messages
        assert!(
            classify_graphql_errors(&errors, "GitHub", GITHUB_FATAL_ERRORS, &mut summary).is_ok()
        );
    }

    #[test]
    fn test_null_errors_are_ignored() {
        let mut summary = ErrorSummary::new();
        classify_graphql_errors(&Value::Null, "GitHub", GITHUB_FATAL_ERRORS, &mut summary)
            .unwrap();
        assert!(summary.is_empty());
    }
}
