//! Label set merging
//!
//! Every builder combines the fixed operator labels, the instance's own
//! labels, and (for ServiceMonitors) labels propagated from Prometheus.
//! Merging is last-writer-wins in argument order.

use std::collections::BTreeMap;

/// An unordered key/value label mapping
pub type LabelSet = BTreeMap<String, String>;

/// Merge label sets; on key collision the set that comes later wins.
pub fn merge_labels<'a, I>(sets: I) -> LabelSet
where
    I: IntoIterator<Item = &'a LabelSet>,
{
    let mut merged = LabelSet::new();
    for set in sets {
        merged.extend(set.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Merge an optional label map (as found on `ObjectMeta`) under `base`
///
/// Keys in `base` win. Returns `None` when both sides are empty so that
/// metadata serializes without an empty `labels: {}` block.
pub fn merge_under(
    base: Option<LabelSet>,
    fallback: Option<&LabelSet>,
) -> Option<LabelSet> {
    let empty = LabelSet::new();
    let merged = merge_labels([fallback.unwrap_or(&empty), base.as_ref().unwrap_or(&empty)]);
    if merged.is_empty() {
        None
    } else {
        Some(merged)
    }
}
