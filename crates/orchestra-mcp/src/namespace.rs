//! Composite identifier codec
//!
//! Every tool, prompt, and resource the gateway advertises carries its
//! backend id as a prefix, `<backend>___<local-name>`, so calls can be
//! routed back to the session that owns the capability.

use orchestra_types::errors::{GatewayError, GatewayResult};
use orchestra_types::NAMESPACE_SEPARATOR;

/// Prefix a backend-local name with its backend id
pub fn apply_namespace(backend_id: &str, local_name: &str) -> String {
    format!("{}{}{}", backend_id, NAMESPACE_SEPARATOR, local_name)
}

/// Split a composite identifier into (backend id, local name)
///
/// Splits on the first separator occurrence, so local names containing the
/// separator survive a round trip.
pub fn parse_namespace(composite: &str) -> GatewayResult<(String, String)> {
    let Some((backend_id, local_name)) = composite.split_once(NAMESPACE_SEPARATOR) else {
        return Err(GatewayError::MalformedIdentifier(format!(
            "missing '{}' separator in '{}'",
            NAMESPACE_SEPARATOR, composite
        )));
    };

    if backend_id.is_empty() || local_name.is_empty() {
        return Err(GatewayError::MalformedIdentifier(format!(
            "empty backend id or local name in '{}'",
            composite
        )));
    }

    Ok((backend_id.to_string(), local_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_namespace() {
        assert_eq!(apply_namespace("github", "create_issue"), "github___create_issue");
    }

    #[test]
    fn test_parse_namespace() {
        let (backend, local) = parse_namespace("github___create_issue").unwrap();
        assert_eq!(backend, "github");
        assert_eq!(local, "create_issue");
    }

    #[test]
    fn test_parse_splits_on_first_separator() {
        let (backend, local) = parse_namespace("a___tool___variant").unwrap();
        assert_eq!(backend, "a");
        assert_eq!(local, "tool___variant");
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        let result = parse_namespace("plain_name");
        assert!(matches!(result, Err(GatewayError::MalformedIdentifier(_))));
    }

    #[test]
    fn test_parse_rejects_empty_sides() {
        assert!(parse_namespace("___tool").is_err());
        assert!(parse_namespace("backend___").is_err());
    }

    #[test]
    fn test_roundtrip_preserves_local_separator() {
        let composite = apply_namespace("b", "x___y");
        let (backend, local) = parse_namespace(&composite).unwrap();
        assert_eq!(backend, "b");
        assert_eq!(local, "x___y");
    }
}
