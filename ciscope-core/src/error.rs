//! Error types for ciscope-core.

use thiserror::Error;

/// Result type alias for ciscope-core operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that abort a crawl.
///
/// Tolerated problems (non-fatal GraphQL errors, non-200 REST pages) never surface here;
/// they are counted in an [`ErrorSummary`](crate::client::ErrorSummary) instead.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Request could not be sent or its body not read, after retries.
    #[error("Request to {url} failed: {source}")]
    Transport {
        /// URL that was requested.
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// GraphQL endpoint answered with a non-200 status.
    #[error("Received HTTP status code {status} from {url}: {message}")]
    HttpStatus {
        /// URL that was requested.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Explanation, including remediation hints where known.
        message: String,
    },

    /// Response body was not the JSON we expected.
    #[error("Failed to parse response from {context}: {source}")]
    Parse {
        /// Resource being parsed.
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// GraphQL error whose message is on the platform's fatal list.
    #[error("Fatal GraphQL error received from {platform}: {error_type} {message}")]
    FatalGraphQl {
        /// Platform name (GitHub, CircleCI).
        platform: String,
        /// GraphQL error `type`, empty when the API does not send one.
        error_type: String,
        /// GraphQL error message.
        message: String,
    },

    /// Unknown ingestor name, or a unit built for the wrong kind of target.
    #[error("Invalid ingestor: {0}")]
    InvalidIngestor(String),

    /// Missing or invalid crawl configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graph store failure.
    #[error(transparent)]
    Store(#[from] anyhow::Error),

    /// A concurrently running target panicked or was cancelled.
    #[error("Ingestor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
