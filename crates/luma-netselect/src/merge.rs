use crate::values::ValueWithHits;
use std::collections::HashMap;

/// Merges per-node value lists into one.
///
/// Duplicate values are collapsed with their hits summed. The result is
/// ordered by descending hits, then by value. When `limit` is non-zero and
/// the merged list is longer, it is cut to `limit` entries; if
/// `reset_hits_on_limit_exceeded` is set, the hits of a cut list are zeroed
/// since they no longer reflect global counts.
pub fn merge_values_with_hits(
    lists: Vec<Vec<ValueWithHits>>,
    limit: u64,
    reset_hits_on_limit_exceeded: bool,
) -> Vec<ValueWithHits> {
    let mut hits: HashMap<String, u64> = HashMap::new();
    for list in lists {
        for v in list {
            let entry = hits.entry(v.value).or_insert(0);
            *entry = entry.saturating_add(v.hits);
        }
    }

    let mut merged: Vec<ValueWithHits> = hits
        .into_iter()
        .map(|(value, hits)| ValueWithHits { value, hits })
        .collect();
    merged.sort_by(|a, b| b.hits.cmp(&a.hits).then_with(|| a.value.cmp(&b.value)));

    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    if limit > 0 && merged.len() > limit {
        merged.truncate(limit);
        if reset_hits_on_limit_exceeded {
            for v in &mut merged {
                v.hits = 0;
            }
        }
    }
    merged
}
