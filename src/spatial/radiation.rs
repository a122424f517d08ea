//! Radiation model.

use crate::models::PairRow;
use std::ops::Range;

/// Radiation estimates `Ti · m·n / ((m + s)(m + n + s))`.
///
/// `m` is the source population, `n` the target population and `s` the
/// population of the source's candidate targets strictly closer than the
/// target. With `normalize` each source's estimates are rescaled to sum to
/// `Ti`.
pub fn estimate(pairs: &[PairRow], ranges: &[Range<usize>], normalize: bool) -> Vec<f64> {
    let mut out = vec![0.0; pairs.len()];
    for range in ranges {
        let mut order: Vec<usize> = range.clone().collect();
        order.sort_by(|&a, &b| pairs[a].dist.total_cmp(&pairs[b].dist));

        let ti = pairs[range.start].ti;
        let m = pairs[range.start].srcpop as f64;

        // Ties at the same distance are not "strictly closer" to each other.
        let mut closer = 0.0;
        let mut k = 0;
        while k < order.len() {
            let d = pairs[order[k]].dist;
            let mut end = k;
            let mut group_pop = 0.0;
            while end < order.len() && pairs[order[end]].dist == d {
                let i = order[end];
                let n = pairs[i].tgtpop as f64;
                let denom = (m + closer) * (m + n + closer);
                out[i] = if denom > 0.0 { ti * m * n / denom } else { 0.0 };
                group_pop += n;
                end += 1;
            }
            closer += group_pop;
            k = end;
        }

        if normalize {
            let sum: f64 = out[range.clone()].iter().sum();
            for v in &mut out[range.clone()] {
                *v = if sum > 0.0 { *v * ti / sum } else { 0.0 };
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::gravity::source_ranges;
    use crate::spatial::gravity::tests::{create_test_pair, create_test_pairs};

    #[test]
    fn test_intervening_opportunities() {
        let pairs = vec![
            create_test_pair(1, 2, 10.0, 500, 0.0, 100.0),
            create_test_pair(1, 3, 20.0, 2000, 0.0, 100.0),
            create_test_pair(1, 4, 40.0, 800, 0.0, 100.0),
        ];
        let est = estimate(&pairs, &source_ranges(&pairs), false);
        let m = 1000.0;
        assert!((est[0] - 100.0 * m * 500.0 / (m * (m + 500.0))).abs() < 1e-9);
        let s = 500.0;
        assert!((est[1] - 100.0 * m * 2000.0 / ((m + s) * (m + 2000.0 + s))).abs() < 1e-9);
        let s = 2500.0;
        assert!((est[2] - 100.0 * m * 800.0 / ((m + s) * (m + 800.0 + s))).abs() < 1e-9);
    }

    #[test]
    fn test_equal_distances_do_not_count_each_other() {
        let pairs = vec![
            create_test_pair(1, 2, 10.0, 500, 0.0, 10.0),
            create_test_pair(1, 3, 10.0, 500, 0.0, 10.0),
        ];
        let est = estimate(&pairs, &source_ranges(&pairs), false);
        assert_eq!(est[0], est[1]);
    }

    #[test]
    fn test_normalized_rows_sum_to_ti() {
        let pairs = create_test_pairs();
        let ranges = source_ranges(&pairs);
        let est = estimate(&pairs, &ranges, true);
        assert!((est[0..3].iter().sum::<f64>() - 100.0).abs() < 1e-9);
        assert!((est[3..5].iter().sum::<f64>() - 25.0).abs() < 1e-9);

        let raw = estimate(&pairs, &ranges, false);
        assert!(raw[0..3].iter().sum::<f64>() < 100.0);
    }
}
