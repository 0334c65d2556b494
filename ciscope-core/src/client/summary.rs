//! Tolerated-error bookkeeping.

use std::collections::BTreeMap;
use std::fmt;

/// What a tolerated error is grouped by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKey {
    /// GraphQL error, grouped by message
    GraphQl(String),
    /// Non-200 REST response, grouped by status code
    Status(u16),
}

/// One group of identical tolerated errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedError {
    /// GraphQL `type` or HTTP status code, empty when unknown
    pub error_type: String,
    pub message: String,
    pub count: usize,
}

impl fmt::Display for TrackedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error_type.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} {}", self.error_type, self.message)
        }
    }
}

/// Counts of tolerated errors seen by one or more fetches.
///
/// Returned by value from every fetch and merged by callers; there is no shared tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorSummary {
    errors: BTreeMap<ErrorKey, TrackedError>,
}

impl ErrorSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a GraphQL error. The first `type` seen for a message is kept.
    pub fn record_graphql(&mut self, error_type: Option<&str>, message: &str) {
        self.errors
            .entry(ErrorKey::GraphQl(message.to_string()))
            .and_modify(|e| e.count += 1)
            .or_insert_with(|| TrackedError {
                error_type: error_type.unwrap_or_default().to_string(),
                message: message.to_string(),
                count: 1,
            });
    }

    /// Count a non-200 REST response. The first message seen for a status is kept.
    pub fn record_status(&mut self, status: u16, message: &str) {
        self.errors
            .entry(ErrorKey::Status(status))
            .and_modify(|e| e.count += 1)
            .or_insert_with(|| TrackedError {
                error_type: status.to_string(),
                message: message.to_string(),
                count: 1,
            });
    }

    /// Fold another summary into this one.
    pub fn merge(&mut self, other: ErrorSummary) {
        for (key, tracked) in other.errors {
            match self.errors.get_mut(&key) {
                Some(existing) => existing.count += tracked.count,
                None => {
                    self.errors.insert(key, tracked);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of errors across all groups.
    pub fn total(&self) -> usize {
        self.errors.values().map(|e| e.count).sum()
    }

    /// Number of distinct error groups.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn count_for_message(&self, message: &str) -> usize {
        self.errors
            .get(&ErrorKey::GraphQl(message.to_string()))
            .map_or(0, |e| e.count)
    }

    pub fn count_for_status(&self, status: u16) -> usize {
        self.errors
            .get(&ErrorKey::Status(status))
            .map_or(0, |e| e.count)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ErrorKey, &TrackedError)> {
        self.errors.iter()
    }

    /// Emit one warning per error group.
    pub fn log(&self, resource_path: &str) {
        for tracked in self.errors.values() {
            tracing::warn!("{} errors on {}: {}", tracked.count, resource_path, tracked);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_message() {
        let mut summary = ErrorSummary::new();
        summary.record_graphql(Some("FORBIDDEN"), "Must have push access");
        summary.record_graphql(Some("FORBIDDEN"), "Must have push access");
        summary.record_graphql(None, "Something else");

        assert_eq!(summary.len(), 2);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.count_for_message("Must have push access"), 2);
    }

    #[test]
    fn test_merge_adds_counts() {
        let mut a = ErrorSummary::new();
        a.record_status(404, "Not Found");
        let mut b = ErrorSummary::new();
        b.record_status(404, "Not Found");
        b.record_status(403, "Resource not accessible by integration");

        a.merge(b);
        assert_eq!(a.count_for_status(404), 2);
        assert_eq!(a.count_for_status(403), 1);
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn test_display_omits_empty_type() {
        let mut summary = ErrorSummary::new();
        summary.record_graphql(None, "boom");
        let (_, tracked) = summary.iter().next().unwrap();
        assert_eq!(tracked.to_string(), "boom");
    }
}
