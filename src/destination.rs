//! Parsing for the custom destination grammar
//! (spec.md §6 "Custom destination syntax"):
//!
//! `<provider>:<endpoint-uuid>:<credential-name>[/optional-path]`

use crate::model::{CustomDestination, Destination};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DestinationParseError {
    #[error("malformed custom destination spec: {0}")]
    Malformed(String),
}

/// `raw` is either a bare database name or the custom provider grammar.
/// `known_databases` decides which: if `raw` names a registered database it
/// wins, otherwise it must parse as `provider:endpoint-uuid:credential-name`.
pub fn resolve_destination(
    raw: &str,
    known_databases: &[String],
) -> Result<Destination, DestinationParseError> {
    if known_databases.iter().any(|d| d == raw) {
        return Ok(Destination::Database(raw.to_string()));
    }
    parse_custom(raw).map(Destination::Custom)
}

fn parse_custom(raw: &str) -> Result<CustomDestination, DestinationParseError> {
    let mut parts = raw.splitn(3, ':');
    let provider = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DestinationParseError::Malformed(raw.to_string()))?;
    let endpoint_uuid = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DestinationParseError::Malformed(raw.to_string()))?;
    let rest = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DestinationParseError::Malformed(raw.to_string()))?;

    let (credential_name, path) = match rest.split_once('/') {
        Some((cred, path)) => (cred, Some(path.to_string())),
        None => (rest, None),
    };
    if credential_name.is_empty() {
        return Err(DestinationParseError::Malformed(raw.to_string()));
    }

    Ok(CustomDestination {
        provider: provider.to_string(),
        endpoint_uuid: endpoint_uuid.to_string(),
        credential_name: credential_name.to_string(),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_database_wins_over_custom_grammar() {
        let dbs = vec!["jdp".to_string()];
        let dest = resolve_destination("jdp", &dbs).unwrap();
        assert_eq!(dest, Destination::Database("jdp".to_string()));
    }

    #[test]
    fn parses_custom_spec_without_path() {
        let dest = resolve_destination("globus:1111-2222:my-cred", &[]).unwrap();
        match dest {
            Destination::Custom(c) => {
                assert_eq!(c.provider, "globus");
                assert_eq!(c.endpoint_uuid, "1111-2222");
                assert_eq!(c.credential_name, "my-cred");
                assert_eq!(c.path, None);
            }
            _ => panic!("expected custom destination"),
        }
    }

    #[test]
    fn parses_custom_spec_with_optional_path() {
        let dest = resolve_destination("globus:1111-2222:my-cred/some/sub/path", &[]).unwrap();
        match dest {
            Destination::Custom(c) => {
                assert_eq!(c.path.as_deref(), Some("some/sub/path"));
            }
            _ => panic!("expected custom destination"),
        }
    }

    #[test]
    fn rejects_malformed_spec() {
        assert!(resolve_destination("not-a-valid-spec", &[]).is_err());
        assert!(resolve_destination("globus::cred", &[]).is_err());
        assert!(resolve_destination("globus:uuid:", &[]).is_err());
    }
}
