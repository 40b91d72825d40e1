//! Fixed-size chunking of snapshots into delivery batches.

use crate::error::AgentError;

/// Split `records` into consecutive groups of at most `size` elements.
///
/// Order is preserved and every record lands in exactly one batch; only the
/// last batch may be shorter than `size`.
pub fn chunk<T: Clone>(records: &[T], size: usize) -> Result<Vec<Vec<T>>, AgentError> {
    if size == 0 {
        return Err(AgentError::Config("chunk size must be at least 1".to_string()));
    }
    Ok(records.chunks(size).map(<[T]>::to_vec).collect())
}
