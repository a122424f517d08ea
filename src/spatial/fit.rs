//! Parallel (β, γ) grid search for the gravity model and model comparison.

use crate::error::MatrixError;
use crate::models::{ModelRow, PairRow};
use crate::progress;
use crate::spatial::gravity::{self, source_ranges};
use crate::spatial::pairs::selection_label;
use crate::spatial::radiation;
use crate::tabular::write_rows;
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const RESULTS_FILE: &str = "grav_model_rss_aic.csv";

/// Evenly spaced values over `[start, end]`, endpoints included.
pub fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (steps - 1) as f64;
            (0..steps).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Parameter grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub beta: Vec<f64>,
    pub gamma: Vec<f64>,
}

impl Grid {
    pub fn new(beta: (f64, f64, usize), gamma: (f64, f64, usize)) -> Self {
        Self {
            beta: linspace(beta.0, beta.1, beta.2),
            gamma: linspace(gamma.0, gamma.1, gamma.2),
        }
    }

    /// Combinations, γ outermost.
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.gamma
            .iter()
            .flat_map(|&g| self.beta.iter().map(move |&b| (b, g)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.beta.len() * self.gamma.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new((0.5, 1.5, 101), (0.01, 1.5, 150))
    }
}

/// One evaluated grid point with its AIC ranking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub beta: f64,
    pub gamma: f64,
    #[serde(rename = "rss/n")]
    pub rss_per_n: f64,
    #[serde(rename = "AIC")]
    pub aic: f64,
    #[serde(rename = "Delta AIC")]
    pub delta_aic: f64,
    #[serde(rename = "AIC weight")]
    pub aic_weight: f64,
    #[serde(rename = "Evidence ratio")]
    pub evidence_ratio: f64,
    #[serde(rename = "Log_10(ER)")]
    pub log10_er: f64,
}

/// Sort by AIC and fill the relative-evidence columns.
pub fn rank(results: &mut [FitResult]) {
    results.sort_by(|a, b| a.aic.total_cmp(&b.aic));
    let Some(best) = results.first().map(|r| r.aic) else {
        return;
    };

    let mut total = 0.0;
    for r in results.iter_mut() {
        r.delta_aic = r.aic - best;
        r.aic_weight = (-r.delta_aic / 2.0).exp();
        total += r.aic_weight;
    }
    for r in results.iter_mut() {
        r.aic_weight /= total;
    }

    let max_weight = results.iter().map(|r| r.aic_weight).fold(0.0, f64::max);
    for r in results.iter_mut() {
        r.evidence_ratio = max_weight / r.aic_weight;
        r.log10_er = r.evidence_ratio.log10();
    }
}

/// Evaluate every grid point in parallel and rank the results.
pub fn grid_search(pairs: &[PairRow], grid: &Grid, show_progress: bool) -> Vec<FitResult> {
    let ranges = source_ranges(pairs);
    let points = grid.points();
    info!(
        "Evaluating {} parameter combinations over {} pairs",
        points.len(),
        pairs.len()
    );

    let pb = progress::bar(points.len() as u64, show_progress, "combinations");
    let mut results: Vec<FitResult> = points
        .par_iter()
        .progress_with(pb.clone())
        .map(|&(beta, gamma)| {
            let fit = gravity::fit(pairs, &ranges, beta, gamma);
            FitResult {
                beta,
                gamma,
                rss_per_n: fit.rss_per_n(),
                aic: fit.aic(),
                delta_aic: 0.0,
                aic_weight: 0.0,
                evidence_ratio: 0.0,
                log10_er: 0.0,
            }
        })
        .collect();
    pb.finish_and_clear();

    rank(&mut results);
    results
}

/// Pearson correlation; `None` when either series is constant or empty.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n == 0 {
        return None;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x[..n].iter().zip(&y[..n]) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

/// Outcome of a model comparison run.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub pairs: usize,
    pub evaluated: usize,
    pub best: FitResult,
    pub gravity_correlation: Option<f64>,
    pub radiation_correlation: Option<f64>,
    pub results_path: PathBuf,
    pub matrix_path: PathBuf,
}

/// `src_{S}-tgt_{T}-mobility_grav_rad_matrix.csv`
pub fn model_matrix_name(src: &[String], tgt: &[String]) -> String {
    format!(
        "src_{}-tgt_{}-mobility_grav_rad_matrix.csv",
        selection_label(src),
        selection_label(tgt)
    )
}

/// Fit the gravity grid, estimate radiation flows and write both tables.
pub fn compare_models(
    pairs: &[PairRow],
    grid: &Grid,
    normalize_radiation: bool,
    out_dir: &Path,
    src: &[String],
    tgt: &[String],
    show_progress: bool,
) -> Result<Comparison, MatrixError> {
    if pairs.is_empty() || grid.is_empty() {
        return Err(MatrixError::Empty);
    }

    let results = grid_search(pairs, grid, show_progress);
    let results_path = out_dir.join(RESULTS_FILE);
    write_rows(&results_path, &results)?;

    let best = results.first().cloned().ok_or(MatrixError::Empty)?;
    info!(
        "Best gravity fit: beta={:.4} gamma={:.4} AIC={:.2}",
        best.beta, best.gamma, best.aic
    );

    let ranges = source_ranges(pairs);
    let grav = gravity::estimate(pairs, &ranges, best.beta, best.gamma);
    let rad = radiation::estimate(pairs, &ranges, normalize_radiation);

    let flows: Vec<f64> = pairs.iter().map(|p| p.flow).collect();
    let gravity_correlation = pearson(&flows, &grav);
    let radiation_correlation = pearson(&flows, &rad);
    debug!(
        "Correlations: gravity={:?} radiation={:?}",
        gravity_correlation, radiation_correlation
    );

    let rows: Vec<ModelRow> = pairs
        .iter()
        .zip(grav.iter().zip(&rad))
        .map(|(p, (&g, &r))| ModelRow::from_pair(p, g, r))
        .collect();
    let matrix_path = out_dir.join(model_matrix_name(src, tgt));
    write_rows(&matrix_path, &rows)?;
    info!("Wrote model estimates to {}", matrix_path.display());

    Ok(Comparison {
        pairs: pairs.len(),
        evaluated: results.len(),
        best,
        gravity_correlation,
        radiation_correlation,
        results_path,
        matrix_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::gravity::tests::{create_test_pair, create_test_pairs};
    use crate::tabular::read_rows;
    use tempfile::TempDir;

    fn create_test_result(aic: f64) -> FitResult {
        FitResult {
            beta: 1.0,
            gamma: aic,
            rss_per_n: 0.0,
            aic,
            delta_aic: 0.0,
            aic_weight: 0.0,
            evidence_ratio: 0.0,
            log10_er: 0.0,
        }
    }

    #[test]
    fn test_linspace() {
        let v = linspace(0.5, 1.5, 101);
        assert_eq!(v.len(), 101);
        assert_eq!(v[0], 0.5);
        assert!((v[100] - 1.5).abs() < 1e-12);
        assert!((v[50] - 1.0).abs() < 1e-12);
        assert_eq!(linspace(2.0, 3.0, 1), vec![2.0]);
        assert!(linspace(2.0, 3.0, 0).is_empty());
    }

    #[test]
    fn test_default_grid_order() {
        let grid = Grid::default();
        assert_eq!(grid.len(), 101 * 150);
        let points = grid.points();
        assert_eq!(points[0], (0.5, 0.01));
        // Beta varies fastest.
        assert_eq!(points[1].1, 0.01);
        assert!((points[101].1 - (0.01 + 1.49 / 149.0)).abs() < 1e-12);
    }

    #[test]
    fn test_rank_weights_sum_to_one() {
        let mut results = vec![
            create_test_result(12.0),
            create_test_result(10.0),
            create_test_result(14.0),
        ];
        rank(&mut results);

        assert_eq!(results[0].aic, 10.0);
        assert_eq!(results[0].delta_aic, 0.0);
        assert_eq!(results[0].evidence_ratio, 1.0);
        assert_eq!(results[0].log10_er, 0.0);
        let total: f64 = results.iter().map(|r| r.aic_weight).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!((results[1].evidence_ratio - 1f64.exp()).abs() < 1e-9);
    }

    #[test]
    fn test_pearson() {
        let r = pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        let r = pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&[1.0, 1.0], &[1.0, 2.0]), None);
        assert_eq!(pearson(&[], &[]), None);
    }

    #[test]
    fn test_grid_search_finds_generating_parameters() {
        // Flows generated by the gravity model itself with beta=1, gamma=1.
        let mut pairs = vec![
            create_test_pair(1, 2, 10.0, 500, 0.0, 170.0),
            create_test_pair(1, 3, 20.0, 2000, 0.0, 170.0),
            create_test_pair(1, 4, 40.0, 800, 0.0, 170.0),
        ];
        for (p, f) in pairs.iter_mut().zip([50.0, 100.0, 20.0]) {
            p.flow = f;
        }
        let grid = Grid::new((0.5, 1.5, 11), (0.5, 1.5, 11));
        let results = grid_search(&pairs, &grid, false);

        assert_eq!(results.len(), 121);
        assert!((results[0].beta - 1.0).abs() < 1e-9);
        assert!((results[0].gamma - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_compare_models_writes_tables() {
        let tmp = TempDir::new().unwrap();
        let pairs = create_test_pairs();
        let grid = Grid::new((0.5, 1.5, 3), (0.5, 1.5, 3));
        let src = vec!["RJ".to_string()];
        let tgt = vec!["all".to_string()];

        let comparison = compare_models(&pairs, &grid, true, tmp.path(), &src, &tgt, false).unwrap();
        assert_eq!(comparison.evaluated, 9);
        assert_eq!(comparison.pairs, 5);
        assert!(comparison
            .matrix_path
            .ends_with("src_RJ-tgt_all-mobility_grav_rad_matrix.csv"));

        let results: Vec<FitResult> = read_rows(&comparison.results_path).unwrap();
        assert_eq!(results.len(), 9);
        assert_eq!(results[0].evidence_ratio, 1.0);

        let rows: Vec<ModelRow> = read_rows(&comparison.matrix_path).unwrap();
        assert_eq!(rows.len(), 5);
        let grav_sum: f64 = rows[0..3].iter().map(|r| r.grav).sum();
        let rad_sum: f64 = rows[0..3].iter().map(|r| r.rad).sum();
        assert!((grav_sum - 100.0).abs() < 1e-6);
        assert!((rad_sum - 100.0).abs() < 1e-6);
    }
}
