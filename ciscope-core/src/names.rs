//! GitHub unit selection.

use crate::error::{IngestError, Result};

/// Every selectable GitHub unit.
pub const VALID_NAMES: &[&str] = &[
    "organizations",
    "teams",
    "users",
    "repos",
    "teamrepos",
    "teammembers",
    "repowebhooks",
    "organizationsecrets",
    "environments",
    "environmentsecrets",
    "reposecrets",
];

/// Units run when nothing is requested, and what `default` expands to.
pub const DEFAULT_NAMES: &[&str] = &[
    "organizations",
    "teams",
    "users",
    "repos",
    "teamrepos",
    "teammembers",
];

/// What `secrets` expands to.
pub const SECRETS_NAMES: &[&str] = &[
    "organizationsecrets",
    "environments",
    "environmentsecrets",
    "reposecrets",
];

/// Resolve requested unit names into a validated, lowercase, duplicate-free list.
///
/// An empty request selects [`DEFAULT_NAMES`]. The `default` and `secrets` aliases expand
/// in place. Matching is case-insensitive and the first occurrence of a name wins.
pub fn resolve_ingestor_names<S: AsRef<str>>(requested: &[S]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(DEFAULT_NAMES.iter().map(|n| n.to_string()).collect());
    }

    let mut resolved: Vec<String> = Vec::new();
    for name in requested {
        let name = name.as_ref().trim().to_lowercase();
        let expanded: Vec<&str> = match name.as_str() {
            "default" => DEFAULT_NAMES.to_vec(),
            "secrets" => SECRETS_NAMES.to_vec(),
            other if VALID_NAMES.contains(&other) => vec![other],
            _ => return Err(IngestError::InvalidIngestor(name)),
        };
        for unit in expanded {
            if !resolved.iter().any(|r| r == unit) {
                resolved.push(unit.to_string());
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selects_defaults() {
        let names = resolve_ingestor_names::<&str>(&[]).unwrap();
        assert_eq!(names, DEFAULT_NAMES);
    }

    #[test]
    fn test_default_alias_with_duplicate() {
        let names = resolve_ingestor_names(&["default", "repos"]).unwrap();
        assert_eq!(names, DEFAULT_NAMES);
    }

    #[test]
    fn test_secrets_alias_expands_in_place() {
        let names = resolve_ingestor_names(&["repos", "secrets", "teams"]).unwrap();
        assert_eq!(
            names,
            vec![
                "repos",
                "organizationsecrets",
                "environments",
                "environmentsecrets",
                "reposecrets",
                "teams"
            ]
        );
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let err = resolve_ingestor_names(&["bogus"]).unwrap_err();
        assert!(matches!(err, IngestError::InvalidIngestor(ref n) if n == "bogus"));
    }

    #[test]
    fn test_case_insensitive_and_deduplicated() {
        let names = resolve_ingestor_names(&["Repos", "REPOS"]).unwrap();
        assert_eq!(names, vec!["repos"]);
    }
}
