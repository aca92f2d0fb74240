//! Plan checksum calculation

use crate::operation::DiffOperation;
use sha2::{Digest, Sha256};

/// Version of the diff algorithm, hashed ahead of the operations
///
/// Bump it whenever the diff or planner would produce a different sequence
/// for the same pair of snapshots, so old ledger entries are not matched.
pub const DIFF_ALGORITHM_VERSION: &str = "driftguard-diff-v1";

/// Calculate the SHA-256 checksum of an ordered operation sequence
///
/// Each operation is serialized to canonical JSON (all descriptor maps and
/// sets are ordered) and separated by a newline.
///
/// # Returns
///
/// Returns the lowercase hexadecimal SHA-256 hash
///
/// # Errors
///
/// Returns `serde_json::Error` if an operation cannot be serialized
pub fn calculate_checksum<'a>(
    operations: impl IntoIterator<Item = &'a DiffOperation>,
) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    hasher.update(DIFF_ALGORITHM_VERSION.as_bytes());
    hasher.update(b"\n");
    for op in operations {
        hasher.update(serde_json::to_vec(op)?);
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Chain a plan's content checksum to the last applied plan's checksum
///
/// The first plan in a ledger keeps its content checksum. Later plans hash
/// their parent in, so the same operations applied again after the schema
/// moved on (a table declared, retired, then declared again) get a new id.
#[must_use]
pub fn chain_checksum(parent: Option<&str>, content: &str) -> String {
    let Some(parent) = parent else {
        return content.to_string();
    };
    let mut hasher = Sha256::new();
    hasher.update(DIFF_ALGORITHM_VERSION.as_bytes());
    hasher.update(b"\nparent ");
    hasher.update(parent.as_bytes());
    hasher.update(b"\n");
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether `checksum` looks like a value produced by [`calculate_checksum`]
#[must_use]
pub fn is_valid_checksum(checksum: &str) -> bool {
    checksum.len() == 64
        && checksum
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, LogicalType};

    fn op(name: &str) -> DiffOperation {
        DiffOperation::AddColumn {
            table: "characters".into(),
            column: ColumnDescriptor::new(name, LogicalType::Text),
        }
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let ops = vec![op("a"), op("b")];
        let first = calculate_checksum(&ops).unwrap();
        let second = calculate_checksum(&ops.clone()).unwrap();
        assert_eq!(first, second);
        assert!(is_valid_checksum(&first));
    }

    #[test]
    fn test_checksum_depends_on_order() {
        let forward = calculate_checksum(&[op("a"), op("b")]).unwrap();
        let backward = calculate_checksum(&[op("b"), op("a")]).unwrap();
        assert_ne!(forward, backward);
    }

    #[test]
    fn test_empty_plan_has_a_checksum() {
        let empty: Vec<DiffOperation> = Vec::new();
        assert!(is_valid_checksum(&calculate_checksum(&empty).unwrap()));
    }

    #[test]
    fn test_chain_checksum_depends_on_parent() {
        let content = calculate_checksum(&[op("a")]).unwrap();
        assert_eq!(chain_checksum(None, &content), content);

        let after_x = chain_checksum(Some(&"1".repeat(64)), &content);
        let after_y = chain_checksum(Some(&"2".repeat(64)), &content);
        assert_ne!(after_x, content);
        assert_ne!(after_x, after_y);
        assert_eq!(after_x, chain_checksum(Some(&"1".repeat(64)), &content));
        assert!(is_valid_checksum(&after_x));
    }

    #[test]
    fn test_is_valid_checksum() {
        assert!(!is_valid_checksum("abc"));
        assert!(!is_valid_checksum(&"G".repeat(64)));
        assert!(!is_valid_checksum(&"A".repeat(64)));
        assert!(is_valid_checksum(&"0f".repeat(32)));
    }
}
