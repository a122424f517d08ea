//! Distance within which each source FU reaches a given share of its flow.

use crate::error::MatrixError;
use crate::models::PairRow;
use crate::tabular::write_rows;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const THRESHOLD_FILE: &str = "distance_threshold.csv";
pub const SUMMARY_FILE: &str = "distance_threshold_summary.csv";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    pub src: u32,
    pub srcname: String,
    pub srcfu: String,
    pub tgt: u32,
    pub tgtname: String,
    pub tgtfu: String,
    pub dist: f64,
    pub flow: f64,
    #[serde(rename = "Ti")]
    pub ti: f64,
    #[serde(rename = "uf percentage")]
    pub uf_share: f64,
    #[serde(rename = "cumulative by distance")]
    pub cumulative: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSummary {
    #[serde(rename = "FU")]
    pub fu: String,
    #[serde(rename = "Total flow")]
    pub total_flow: f64,
    #[serde(rename = "Level")]
    pub level: f64,
    /// Empty when the FU has no flow.
    #[serde(rename = "Distance threshold (km)")]
    pub distance: Option<f64>,
}

/// Cumulative flow share by distance, per source FU.
///
/// Rows come back sorted by (FU, distance). Pairs at the same distance share
/// the same cumulative value.
pub fn cumulative_by_distance(pairs: &[PairRow]) -> Vec<ThresholdRow> {
    let mut by_fu: BTreeMap<&str, Vec<&PairRow>> = BTreeMap::new();
    for p in pairs {
        by_fu.entry(p.srcfu.as_str()).or_default().push(p);
    }

    let mut rows = Vec::with_capacity(pairs.len());
    for (_, mut group) in by_fu {
        group.sort_by(|a, b| a.dist.total_cmp(&b.dist));
        let fu_flow: f64 = group.iter().map(|p| p.flow).sum();
        let share = |p: &PairRow| if fu_flow > 0.0 { p.flow / fu_flow } else { 0.0 };

        let mut running = 0.0;
        let mut k = 0;
        while k < group.len() {
            let d = group[k].dist;
            let end = k + group[k..].iter().take_while(|p| p.dist == d).count();
            running += group[k..end].iter().map(|p| share(p)).sum::<f64>();
            for p in &group[k..end] {
                rows.push(ThresholdRow {
                    src: p.src,
                    srcname: p.srcname.clone(),
                    srcfu: p.srcfu.clone(),
                    tgt: p.tgt,
                    tgtname: p.tgtname.clone(),
                    tgtfu: p.tgtfu.clone(),
                    dist: p.dist,
                    flow: p.flow,
                    ti: p.ti,
                    uf_share: share(p),
                    cumulative: running,
                });
            }
            k = end;
        }
    }
    rows
}

/// Smallest distance at which each FU's cumulative share reaches `level`.
pub fn summarize(rows: &[ThresholdRow], level: f64) -> Vec<ThresholdSummary> {
    let mut out: BTreeMap<&str, ThresholdSummary> = BTreeMap::new();
    for r in rows {
        let entry = out.entry(r.srcfu.as_str()).or_insert_with(|| ThresholdSummary {
            fu: r.srcfu.clone(),
            total_flow: 0.0,
            level,
            distance: None,
        });
        entry.total_flow += r.flow;
        // Rows are sorted by distance within the FU.
        if entry.distance.is_none() && r.cumulative >= level - 1e-12 && r.cumulative > 0.0 {
            entry.distance = Some(r.dist);
        }
    }
    out.into_values().collect()
}

/// Write both threshold tables into `dir`.
pub fn run(pairs: &[PairRow], level: f64, dir: &Path) -> Result<(PathBuf, PathBuf, Vec<ThresholdSummary>), MatrixError> {
    if pairs.is_empty() {
        return Err(MatrixError::Empty);
    }
    let rows = cumulative_by_distance(pairs);
    let summary = summarize(&rows, level);

    let rows_path = dir.join(THRESHOLD_FILE);
    let summary_path = dir.join(SUMMARY_FILE);
    write_rows(&rows_path, &rows)?;
    write_rows(&summary_path, &summary)?;
    for s in &summary {
        match s.distance {
            Some(d) => info!("{}: {:.0}% of flow within {:.1} km", s.fu, level * 100.0, d),
            None => info!("{}: no flow", s.fu),
        }
    }
    Ok((rows_path, summary_path, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::read_rows;
    use tempfile::TempDir;

    fn create_test_pair(src: u32, srcfu: &str, tgt: u32, dist: f64, flow: f64) -> PairRow {
        PairRow {
            src,
            srcname: format!("M{}", src),
            srcfu: srcfu.to_string(),
            tgt,
            tgtname: format!("M{}", tgt),
            tgtfu: srcfu.to_string(),
            dist,
            srcpop: 1000,
            tgtpop: 1000,
            flow,
            error: 0.0,
            ti: 0.0,
        }
    }

    fn create_test_pairs() -> Vec<PairRow> {
        vec![
            create_test_pair(1, "RJ", 2, 50.0, 10.0),
            create_test_pair(1, "RJ", 3, 10.0, 60.0),
            create_test_pair(2, "RJ", 3, 30.0, 25.0),
            create_test_pair(3, "RJ", 1, 10.0, 5.0),
            create_test_pair(9, "AC", 8, 100.0, 0.0),
        ]
    }

    #[test]
    fn test_cumulative_share_per_fu() {
        let rows = cumulative_by_distance(&create_test_pairs());
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].srcfu, "AC");
        assert_eq!(rows[0].uf_share, 0.0);

        let rj: Vec<&ThresholdRow> = rows.iter().filter(|r| r.srcfu == "RJ").collect();
        let dists: Vec<f64> = rj.iter().map(|r| r.dist).collect();
        assert_eq!(dists, vec![10.0, 10.0, 30.0, 50.0]);
        // Both 10 km pairs include each other.
        assert!((rj[0].cumulative - 0.65).abs() < 1e-12);
        assert!((rj[1].cumulative - 0.65).abs() < 1e-12);
        assert!((rj[2].cumulative - 0.90).abs() < 1e-12);
        assert!((rj[3].cumulative - 1.0).abs() < 1e-12);
        assert!((rj[3].uf_share - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_summary_threshold() {
        let rows = cumulative_by_distance(&create_test_pairs());
        let summary = summarize(&rows, 0.9);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].fu, "AC");
        assert_eq!(summary[0].distance, None);
        assert_eq!(summary[1].distance, Some(30.0));
        assert_eq!(summary[1].total_flow, 100.0);

        let summary = summarize(&rows, 0.5);
        assert_eq!(summary[1].distance, Some(10.0));
    }

    #[test]
    fn test_run_writes_tables() {
        let tmp = TempDir::new().unwrap();
        let (rows_path, summary_path, _) = run(&create_test_pairs(), 0.9, tmp.path()).unwrap();
        let rows: Vec<ThresholdRow> = read_rows(&rows_path).unwrap();
        assert_eq!(rows.len(), 5);
        let summary: Vec<ThresholdSummary> = read_rows(&summary_path).unwrap();
        assert_eq!(summary[1].distance, Some(30.0));
        assert!(run(&[], 0.9, tmp.path()).is_err());
    }
}
