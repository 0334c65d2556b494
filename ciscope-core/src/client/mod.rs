//! HTTP clients for the crawled platforms.
//!
//! Two paged fetchers share one [`HttpClient`]:
//! - [`GraphQlClient`] follows `pageInfo` cursors and triages GraphQL errors
//! - [`RestClient`] follows page numbers (GitHub) or page tokens (CircleCI)
//!
//! Both return a [`Fetched`] value: the merged data plus an [`ErrorSummary`] of the
//! tolerated errors seen along the way.

mod graphql;
mod rest;
mod summary;

pub use graphql::{classify_graphql_errors, GraphQlClient, CIRCLECI_FATAL_ERRORS, GITHUB_FATAL_ERRORS};
pub use rest::{RestClient, PER_PAGE};
pub use summary::{ErrorKey, ErrorSummary, TrackedError};

use backoff::{future::retry, ExponentialBackoffBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, COOKIE};
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::config::{HttpConfig, RetryConfig};
use crate::error::{IngestError, Result};

static NEEDS_ENCODING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\+|/|-|=| )").unwrap());

/// Result of a paged fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fetched {
    /// Merged data at the requested path, `Null` when nothing was returned
    pub data: Value,
    /// Tolerated errors seen while fetching
    pub errors: ErrorSummary,
}

/// Credentials attached to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// `Authorization: token <token>` (GitHub)
    Token(String),
    /// `ring-session` cookie (CircleCI)
    Cookie(String),
    None,
}

impl Auth {
    /// CircleCI session cookie, URL-encoded unless it already looks encoded.
    pub fn circleci_cookie(cookie: &str) -> Self {
        if NEEDS_ENCODING.is_match(cookie) {
            tracing::debug!("Cookie doesn't appear to be URL encoded, encoding it");
            Auth::Cookie(urlencoding::encode(cookie).into_owned())
        } else {
            Auth::Cookie(cookie.to_string())
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::Token(token) => request.header(AUTHORIZATION, format!("token {}", token)),
            Auth::Cookie(cookie) => request.header(COOKIE, format!("ring-session={}", cookie)),
            Auth::None => request,
        }
    }
}

/// Status and body of a completed request.
#[derive(Debug, Clone)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Why a single attempt did not produce a usable response.
enum AttemptError {
    Transport(reqwest::Error),
    ServerError(RawResponse),
}

/// reqwest client with credentials, timeout and retry policy.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    auth: Auth,
    retry: RetryConfig,
}

impl HttpClient {
    pub fn new(auth: Auth, config: &HttpConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("ciscope/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            inner,
            auth,
            retry: config.retry.clone(),
        })
    }

    /// Send a request, retrying transport failures and 5xx responses with backoff.
    ///
    /// Once retries are exhausted a 5xx response is returned like any other so the caller
    /// can classify it; a transport failure becomes [`IngestError::Transport`].
    pub(crate) async fn send(
        &self,
        method: Method,
        url: &Url,
        json_body: Option<&Value>,
    ) -> Result<RawResponse> {
        tracing::debug!("{} {}", method, url);

        let attempt = retry(self.backoff_policy(), || {
            let mut request = self
                .auth
                .apply(self.inner.request(method.clone(), url.clone()))
                .header(ACCEPT, "application/json");
            if let Some(body) = json_body {
                request = request.json(body);
            }

            async move {
                let response = request.send().await.map_err(transport_error)?;
                let status = response.status().as_u16();
                let body = response.text().await.map_err(transport_error)?;
                let raw = RawResponse { status, body };
                if status >= 500 {
                    tracing::debug!("Received {}, will retry if budget allows", status);
                    return Err(backoff::Error::transient(AttemptError::ServerError(raw)));
                }
                Ok(raw)
            }
        })
        .await;

        match attempt {
            Ok(raw) => Ok(raw),
            Err(AttemptError::ServerError(raw)) => Ok(raw),
            Err(AttemptError::Transport(source)) => Err(IngestError::Transport {
                url: url.to_string(),
                source,
            }),
        }
    }

    fn backoff_policy(&self) -> backoff::ExponentialBackoff {
        let max_elapsed = if self.retry.enabled {
            Duration::from_secs(self.retry.max_elapsed_secs)
        } else {
            Duration::ZERO
        };
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.retry.initial_interval_ms))
            .with_max_interval(Duration::from_millis(self.retry.max_interval_ms))
            .with_max_elapsed_time(Some(max_elapsed))
            .build()
    }
}

fn transport_error(err: reqwest::Error) -> backoff::Error<AttemptError> {
    if err.is_timeout() || err.is_connect() {
        backoff::Error::transient(AttemptError::Transport(err))
    } else {
        backoff::Error::permanent(AttemptError::Transport(err))
    }
}

/// Deep-merge `page` into `acc`: objects merge key-wise, arrays concatenate, anything else
/// takes the newer value. A `null` page leaves the accumulator untouched.
pub fn merge_json(acc: &mut Value, page: Value) {
    match (acc, page) {
        (_, Value::Null) => {}
        (Value::Object(acc), Value::Object(page)) => {
            for (key, value) in page {
                match acc.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        acc.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(acc), Value::Array(page)) => acc.extend(page),
        (acc, page) => *acc = page,
    }
}

/// Look up a dotted path such as `data.organization.teams`.
pub(crate) fn lookup<'a>(value: &'a Value, dotted_path: &str) -> Option<&'a Value> {
    dotted_path
        .split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

/// Join a resource path onto a base URL, keeping the base's own path.
pub(crate) fn resource_url(base: &str, resource_path: &str) -> Result<Url> {
    let base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };
    Url::parse(&base)
        .and_then(|b| b.join(resource_path.trim_start_matches('/')))
        .map_err(|e| IngestError::Config(format!("Invalid URL {}{}: {}", base, resource_path, e)))
}
