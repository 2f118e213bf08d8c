//! Composite keys
//!
//! Some resources are only unique within a parent (a node pool within a
//! cluster, a crypto key within a key ring). Their unique attribute value is
//! the parts joined with [`SEPARATOR`]. Names containing the separator cannot
//! be round-tripped; GCP resource names never contain it.

use crate::error::{ErrorKind, QueryError};

/// Reserved separator between key parts
pub const SEPARATOR: &str = "|";

/// Join key parts in order
pub fn encode<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// Split a key without checking how many parts it has
pub fn split(key: &str) -> Vec<String> {
    key.split(SEPARATOR).map(|s| s.to_string()).collect()
}

/// Split a key, failing with `MalformedKey` unless it has exactly `expected` parts.
///
/// Mapping code decodes the keys it builds so that a name containing the
/// separator fails loudly instead of producing a key that splits differently.
/// The error carries no scope or item type; callers fill them in.
pub fn decode(key: &str, expected: usize) -> Result<Vec<String>, QueryError> {
    let parts = split(key);
    if parts.len() != expected {
        return Err(QueryError::new(
            ErrorKind::MalformedKey,
            format!(
                "key {:?} has {} parts, expected {}",
                key,
                parts.len(),
                expected
            ),
            "",
            "",
        ));
    }
    Ok(parts)
}
