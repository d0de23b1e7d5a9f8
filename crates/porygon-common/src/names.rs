//! Kubernetes object name validation
//!
//! Namespaces and object names end up in REST paths and CLI arguments, so
//! anything that is not a well-formed name is rejected before it reaches the
//! cluster.

use crate::Error;

/// Longest RFC 1123 label
const MAX_LABEL_LEN: usize = 63;

/// Longest RFC 1123 subdomain
const MAX_SUBDOMAIN_LEN: usize = 253;

fn is_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= MAX_LABEL_LEN
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        }
        _ => false,
    }
}

/// Check that `value` is an RFC 1123 label, as namespaces must be
pub fn validate_namespace(field: &str, value: &str) -> Result<(), Error> {
    if is_label(value) {
        Ok(())
    } else {
        Err(Error::invalid_field(
            field,
            format!(
                "'{}' must be a lowercase RFC 1123 label of at most {} characters",
                value, MAX_LABEL_LEN
            ),
        ))
    }
}

/// Check that `value` is an RFC 1123 subdomain, as object names must be
pub fn validate_name(field: &str, value: &str) -> Result<(), Error> {
    if value.len() <= MAX_SUBDOMAIN_LEN && value.split('.').all(is_label) {
        Ok(())
    } else {
        Err(Error::invalid_field(
            field,
            format!(
                "'{}' must be a lowercase RFC 1123 name of at most {} characters",
                value, MAX_SUBDOMAIN_LEN
            ),
        ))
    }
}
