//! Ready-made change detectors for row-shaped results.
//!
//! Each returns an activity score suitable for
//! [`PollingConfigBuilder::detect_changes`](crate::config::PollingConfigBuilder::detect_changes).
//! On the first tick (`previous == None`) every row counts as changed.

use std::collections::HashMap;
use std::hash::Hash;

/// Count rows added, removed or modified between two row sets, matching rows
/// by `key`.
///
/// Rows sharing a key within one set are compared by their last occurrence.
pub fn changed_rows<R, K, F>(previous: Option<&[R]>, next: &[R], key: F) -> usize
where
    R: PartialEq,
    K: Eq + Hash,
    F: Fn(&R) -> K,
{
    let Some(previous) = previous else {
        return next.len();
    };

    let before: HashMap<K, &R> = previous.iter().map(|r| (key(r), r)).collect();
    let after: HashMap<K, &R> = next.iter().map(|r| (key(r), r)).collect();

    let added_or_modified = after
        .iter()
        .filter(|(k, row)| before.get(*k).map_or(true, |old| old != *row))
        .count();
    let removed = before.keys().filter(|k| !after.contains_key(*k)).count();
    added_or_modified + removed
}

/// Position-wise comparison plus the length difference.
///
/// Cheaper than [`changed_rows`] when rows have no stable key.
pub fn changed_count<R: PartialEq>(previous: Option<&[R]>, next: &[R]) -> usize {
    let Some(previous) = previous else {
        return next.len();
    };
    let differing = previous.iter().zip(next).filter(|(a, b)| a != b).count();
    differing + previous.len().abs_diff(next.len())
}
