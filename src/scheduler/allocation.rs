//! Budget allocation and condition ordering.
//!
//! Pure functions over per-condition counts, kept apart from the locking code
//! so the arithmetic can be tested directly.
//!
//! # Rounding policy
//!
//! Each share is `count / total * budget` rounded to the nearest integer, with
//! halves rounded away from zero (`f64::round`). Shares are rounded
//! independently, so two conditions with identical counts always receive
//! identical budgets, and the allocated total may differ from the budget by at
//! most half a scan per condition.

/// Survey scans allotted to each condition for the coming allocation phase.
///
/// `truncated` holds the counts rounded down to a multiple of top-N. When their
/// sum already covers the budget they are used instead of the raw counts, so
/// candidates that the top-N cutoff would discard anyway do not attract scans.
/// Returns all zeros when no condition reported any candidate.
pub fn allocate_budget(counts: &[usize], truncated: &[usize], budget: u32) -> Vec<u32> {
    debug_assert_eq!(counts.len(), truncated.len());

    let truncated_total: usize = truncated.iter().sum();
    let basis = if truncated_total >= budget as usize {
        truncated
    } else {
        counts
    };

    let total: usize = basis.iter().sum();
    if total == 0 {
        return vec![0; basis.len()];
    }

    basis
        .iter()
        .map(|&count| (count as f64 / total as f64 * f64::from(budget)).round() as u32)
        .collect()
}

/// `count - (count mod top_n)`.
pub fn truncate_to_top_n(count: usize, top_n: usize) -> usize {
    if top_n == 0 {
        return count;
    }
    count - count % top_n
}

/// Index permutation ordering conditions by descending count.
///
/// Stable: equal counts keep their current relative order. Position 0 of the
/// result is the condition with the most candidates, which the allocator
/// visits last.
pub fn descending_order(counts: &[usize]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| counts[b].cmp(&counts[a]));
    order
}

/// Reorder `items` so that `result[i] = items[order[i]]`.
///
/// Apply the same `order` to every per-condition array to keep them aligned.
pub fn apply_permutation<T>(items: Vec<T>, order: &[usize]) -> Vec<T> {
    debug_assert_eq!(items.len(), order.len());
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    order
        .iter()
        .filter_map(|&i| slots.get_mut(i).and_then(Option::take))
        .collect()
}
