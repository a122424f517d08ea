//! Production-constrained gravity model.

use crate::models::PairRow;
use std::ops::Range;

/// Contiguous row ranges sharing a source. Rows must be sorted by source.
pub fn source_ranges(pairs: &[PairRow]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..=pairs.len() {
        if i == pairs.len() || pairs[i].src != pairs[start].src {
            if start < i {
                ranges.push(start..i);
            }
            start = i;
        }
    }
    ranges
}

/// Gravity estimates `Ti · m_j^β / r^γ`, normalized per source so each
/// source's estimates sum to `Ti`.
///
/// Pairs at zero distance get no weight.
pub fn estimate(pairs: &[PairRow], ranges: &[Range<usize>], beta: f64, gamma: f64) -> Vec<f64> {
    let mut out = vec![0.0; pairs.len()];
    for range in ranges {
        let mut weight_sum = 0.0;
        for i in range.clone() {
            let p = &pairs[i];
            let w = if p.dist > 0.0 {
                (p.tgtpop as f64).powf(beta) / p.dist.powf(gamma)
            } else {
                0.0
            };
            out[i] = w;
            weight_sum += w;
        }
        let ti = pairs[range.start].ti;
        for v in &mut out[range.clone()] {
            *v = if weight_sum > 0.0 { *v * ti / weight_sum } else { 0.0 };
        }
    }
    out
}

/// Goodness of fit for one (β, γ).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GravityFit {
    pub beta: f64,
    pub gamma: f64,
    pub rss: f64,
    pub n: usize,
}

impl GravityFit {
    pub fn rss_per_n(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.rss / self.n as f64
        }
    }

    /// Akaike information criterion with two free parameters.
    ///
    /// A perfect fit is floored at the smallest positive RSS.
    pub fn aic(&self) -> f64 {
        4.0 + self.n as f64 * self.rss.max(f64::MIN_POSITIVE).ln()
    }
}

/// Residual sum of squares between observed flows and estimates.
pub fn rss(pairs: &[PairRow], estimates: &[f64]) -> f64 {
    pairs
        .iter()
        .zip(estimates)
        .map(|(p, e)| (e - p.flow).powi(2))
        .sum()
}

pub fn fit(pairs: &[PairRow], ranges: &[Range<usize>], beta: f64, gamma: f64) -> GravityFit {
    let estimates = estimate(pairs, ranges, beta, gamma);
    GravityFit {
        beta,
        gamma,
        rss: rss(pairs, &estimates),
        n: pairs.len(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn create_test_pair(src: u32, tgt: u32, dist: f64, tgtpop: u64, flow: f64, ti: f64) -> PairRow {
        PairRow {
            src,
            srcname: format!("M{}", src),
            srcfu: "RJ".to_string(),
            tgt,
            tgtname: format!("M{}", tgt),
            tgtfu: "RJ".to_string(),
            dist,
            srcpop: 1000,
            tgtpop,
            flow,
            error: 0.0,
            ti,
        }
    }

    pub(crate) fn create_test_pairs() -> Vec<PairRow> {
        vec![
            create_test_pair(1, 2, 10.0, 500, 60.0, 100.0),
            create_test_pair(1, 3, 20.0, 2000, 30.0, 100.0),
            create_test_pair(1, 4, 40.0, 800, 10.0, 100.0),
            create_test_pair(2, 1, 10.0, 1000, 20.0, 25.0),
            create_test_pair(2, 3, 15.0, 2000, 5.0, 25.0),
        ]
    }

    #[test]
    fn test_source_ranges() {
        let pairs = create_test_pairs();
        assert_eq!(source_ranges(&pairs), vec![0..3, 3..5]);
        assert!(source_ranges(&[]).is_empty());
    }

    #[test]
    fn test_estimates_sum_to_ti() {
        let pairs = create_test_pairs();
        let ranges = source_ranges(&pairs);
        let est = estimate(&pairs, &ranges, 1.0, 0.7);
        assert!((est[0..3].iter().sum::<f64>() - 100.0).abs() < 1e-9);
        assert!((est[3..5].iter().sum::<f64>() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_follow_mass_over_distance() {
        let pairs = create_test_pairs();
        let ranges = source_ranges(&pairs);
        let est = estimate(&pairs, &ranges, 1.0, 1.0);
        // 500/10 : 2000/20 : 800/40 = 50 : 100 : 20
        assert!((est[0] - 100.0 * 50.0 / 170.0).abs() < 1e-9);
        assert!((est[1] - 100.0 * 100.0 / 170.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_distance_gets_no_weight() {
        let pairs = vec![
            create_test_pair(1, 2, 0.0, 500, 0.0, 10.0),
            create_test_pair(1, 3, 5.0, 500, 10.0, 10.0),
        ];
        let est = estimate(&pairs, &source_ranges(&pairs), 1.0, 1.0);
        assert_eq!(est, vec![0.0, 10.0]);
    }

    #[test]
    fn test_fit_statistics() {
        let pairs = vec![
            create_test_pair(1, 2, 1.0, 100, 5.0, 10.0),
            create_test_pair(1, 3, 1.0, 100, 5.0, 10.0),
            create_test_pair(2, 1, 1.0, 100, 2.0, 4.0),
        ];
        let result = fit(&pairs, &source_ranges(&pairs), 1.0, 1.0);
        // Estimates 5, 5, 4 against 5, 5, 2.
        assert!((result.rss - 4.0).abs() < 1e-9);
        assert!((result.rss_per_n() - 4.0 / 3.0).abs() < 1e-9);
        assert!((result.aic() - (4.0 + 3.0 * 4.0f64.ln())).abs() < 1e-9);
    }
}
