//! Flow distribution diagnostics over an extended or model matrix.

use crate::error::MatrixError;
use crate::models::PairRow;
use crate::tabular::write_rows;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One point of a complementary cumulative distribution.
#[derive(Debug, Clone, Default, Copy, PartialEq, Serialize, Deserialize)]
pub struct CcdfPoint {
    pub value: f64,
    #[serde(rename = "P(X > value)")]
    pub probability: f64,
}

/// Log-spaced bin edges over `[min, max]`.
pub fn log_edges(min: f64, max: f64, edges: usize) -> Vec<f64> {
    let (lo, hi) = (min.log10(), max.log10());
    match edges {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let step = (hi - lo) / (edges - 1) as f64;
            (0..edges)
                .map(|i| {
                    if i == edges - 1 {
                        max
                    } else {
                        10f64.powf(lo + step * i as f64)
                    }
                })
                .collect()
        }
    }
}

/// Normalized histogram density. Bins are half-open except the last,
/// which includes its right edge.
pub fn density_histogram(values: &[f64], edges: &[f64]) -> Vec<f64> {
    if edges.len() < 2 {
        return Vec::new();
    }
    let bins = edges.len() - 1;
    let (first, last) = (edges[0], edges[bins]);
    let mut counts = vec![0usize; bins];
    for &v in values {
        if v < first || v > last {
            continue;
        }
        let bin = if v == last {
            bins - 1
        } else {
            edges.partition_point(|&e| e <= v).saturating_sub(1).min(bins - 1)
        };
        counts[bin] += 1;
    }
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0.0; bins];
    }
    counts
        .iter()
        .zip(edges.windows(2))
        .map(|(&c, w)| {
            let width = w[1] - w[0];
            if width > 0.0 {
                c as f64 / (total as f64 * width)
            } else {
                0.0
            }
        })
        .collect()
}

/// Complementary cumulative distribution over `bins` log-spaced edges.
///
/// Only positive values take part. The curve starts at (min, 1) and steps
/// down at the right edge of every populated bin; the final point, where
/// the curve reaches zero, is dropped.
pub fn ccdf(values: &[f64], bins: usize) -> Vec<CcdfPoint> {
    let positive: Vec<f64> = values.iter().copied().filter(|v| *v > 0.0).collect();
    let Some(min) = positive.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = positive.iter().copied().fold(min, f64::max);
    if min == max {
        return vec![CcdfPoint {
            value: min,
            probability: 1.0,
        }];
    }

    let edges = log_edges(min, max, bins);
    let hist = density_histogram(&positive, &edges);

    let mut points = vec![CcdfPoint {
        value: min,
        probability: 1.0,
    }];
    let mut held = 1.0;
    for (i, &v) in hist.iter().enumerate() {
        if v > 0.0 {
            held -= v * (edges[i + 1] - edges[i]);
            points.push(CcdfPoint {
                value: edges[i + 1],
                probability: held,
            });
        }
    }
    points.pop();
    points
}

/// Network size and density.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NetworkSummary {
    pub nodes: usize,
    pub edges: usize,
    pub density: f64,
    pub total_flow: f64,
}

pub fn network_summary(pairs: &[PairRow]) -> NetworkSummary {
    let mut sources: Vec<u32> = pairs.iter().map(|p| p.src).collect();
    sources.sort_unstable();
    sources.dedup();
    let nodes = sources.len();
    let edges = pairs.len();
    let density = if nodes > 1 {
        edges as f64 / (nodes * (nodes - 1)) as f64
    } else {
        0.0
    };
    NetworkSummary {
        nodes,
        edges,
        density,
        total_flow: pairs.iter().map(|p| p.flow).sum(),
    }
}

/// A ranked municipality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedMunicipality {
    pub ranking: String,
    pub rank: usize,
    pub geocode: u32,
    pub name: String,
    pub population: u64,
    pub value: f64,
    pub density: f64,
}

struct Node {
    geocode: u32,
    name: String,
    population: u64,
    value: f64,
}

fn top(nodes: &[Node], ranking: &str, by_density: bool, n: usize) -> Vec<RankedMunicipality> {
    let density = |node: &Node| {
        if node.population == 0 {
            0.0
        } else {
            node.value / node.population as f64
        }
    };
    let mut order: Vec<&Node> = nodes.iter().collect();
    order.sort_by(|a, b| {
        let (x, y) = if by_density {
            (density(a), density(b))
        } else {
            (a.value, b.value)
        };
        y.total_cmp(&x).then(a.geocode.cmp(&b.geocode))
    });
    order
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, node)| RankedMunicipality {
            ranking: ranking.to_string(),
            rank: i + 1,
            geocode: node.geocode,
            name: node.name.clone(),
            population: node.population,
            value: node.value,
            density: density(node),
        })
        .collect()
}

/// Sources ranked by `Ti` and by `Ti` over population.
pub fn top_sources(pairs: &[PairRow], n: usize) -> Vec<RankedMunicipality> {
    let mut seen: BTreeMap<u32, Node> = BTreeMap::new();
    for p in pairs {
        seen.entry(p.src).or_insert_with(|| Node {
            geocode: p.src,
            name: p.srcname.clone(),
            population: p.srcpop,
            value: p.ti,
        });
    }
    let nodes: Vec<Node> = seen.into_values().collect();
    let mut out = top(&nodes, "Ti", false, n);
    out.extend(top(&nodes, "Ti density", true, n));
    out
}

/// Targets ranked by inflow and by inflow over population.
pub fn top_targets(pairs: &[PairRow], n: usize) -> Vec<RankedMunicipality> {
    let mut seen: BTreeMap<u32, Node> = BTreeMap::new();
    for p in pairs {
        seen.entry(p.tgt)
            .or_insert_with(|| Node {
                geocode: p.tgt,
                name: p.tgtname.clone(),
                population: p.tgtpop,
                value: 0.0,
            })
            .value += p.flow;
    }
    let nodes: Vec<Node> = seen.into_values().collect();
    let mut out = top(&nodes, "flow", false, n);
    out.extend(top(&nodes, "flow density", true, n));
    out
}

/// Everything computed for one matrix.
#[derive(Debug, Clone)]
pub struct MatrixStats {
    pub network: NetworkSummary,
    pub flow_ccdf: Vec<CcdfPoint>,
    pub ti_ccdf: Vec<CcdfPoint>,
    pub top_sources: Vec<RankedMunicipality>,
    pub top_targets: Vec<RankedMunicipality>,
}

pub fn compute(pairs: &[PairRow], bins: usize, top_n: usize) -> MatrixStats {
    let flows: Vec<f64> = pairs.iter().map(|p| p.flow).collect();
    let mut per_source: BTreeMap<u32, f64> = BTreeMap::new();
    for p in pairs {
        per_source.entry(p.src).or_insert(p.ti);
    }
    let ti: Vec<f64> = per_source.into_values().collect();

    MatrixStats {
        network: network_summary(pairs),
        flow_ccdf: ccdf(&flows, bins),
        ti_ccdf: ccdf(&ti, bins),
        top_sources: top_sources(pairs, top_n),
        top_targets: top_targets(pairs, top_n),
    }
}

/// Write the diagnostics next to the matrix as `{stem}-*.csv`.
pub fn write_stats(matrix: &Path, stats: &MatrixStats) -> Result<Vec<PathBuf>, MatrixError> {
    let stem = matrix
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "matrix".to_string());
    let path = |suffix: &str| matrix.with_file_name(format!("{}-{}.csv", stem, suffix));

    let outputs = vec![
        path("ccdf_flow"),
        path("ccdf_Ti"),
        path("top_sources"),
        path("top_targets"),
    ];
    write_rows(&outputs[0], &stats.flow_ccdf)?;
    write_rows(&outputs[1], &stats.ti_ccdf)?;
    write_rows(&outputs[2], &stats.top_sources)?;
    write_rows(&outputs[3], &stats.top_targets)?;

    info!(
        "{}: {} nodes, {} edges, density {:.4}",
        stem, stats.network.nodes, stats.network.edges, stats.network.density
    );
    debug!("Wrote {} diagnostic tables for {}", outputs.len(), stem);
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::read_rows;
    use tempfile::TempDir;

    fn create_test_pair(src: u32, tgt: u32, flow: f64, ti: f64, tgtpop: u64) -> PairRow {
        PairRow {
            src,
            srcname: format!("M{}", src),
            srcfu: "RJ".to_string(),
            tgt,
            tgtname: format!("M{}", tgt),
            tgtfu: "RJ".to_string(),
            dist: 10.0,
            srcpop: src as u64 * 100,
            tgtpop,
            flow,
            error: 0.0,
            ti,
        }
    }

    fn create_test_pairs() -> Vec<PairRow> {
        vec![
            create_test_pair(1, 2, 10.0, 15.0, 200),
            create_test_pair(1, 3, 5.0, 15.0, 300),
            create_test_pair(2, 1, 40.0, 40.0, 100),
            create_test_pair(2, 3, 0.0, 40.0, 300),
            create_test_pair(3, 1, 1.0, 1.0, 100),
        ]
    }

    #[test]
    fn test_log_edges() {
        let edges = log_edges(1.0, 1000.0, 4);
        assert_eq!(edges.len(), 4);
        assert!((edges[1] - 10.0).abs() < 1e-9);
        assert!((edges[2] - 100.0).abs() < 1e-9);
        assert_eq!(edges[3], 1000.0);
    }

    #[test]
    fn test_density_integrates_to_one() {
        let values = [1.0, 2.0, 5.0, 50.0, 1000.0];
        let edges = log_edges(1.0, 1000.0, 4);
        let hist = density_histogram(&values, &edges);
        let area: f64 = hist.iter().zip(edges.windows(2)).map(|(h, w)| h * (w[1] - w[0])).sum();
        assert!((area - 1.0).abs() < 1e-12);
        // The maximum falls in the closed last bin.
        assert!(hist[2] > 0.0);
    }

    #[test]
    fn test_ccdf_steps() {
        let values = [1.0, 2.0, 5.0, 50.0, 1000.0];
        let points = ccdf(&values, 4);
        // Bins [1,10) 3 values, [10,100) 1, [100,1000] 1; the last step is dropped.
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], CcdfPoint { value: 1.0, probability: 1.0 });
        assert!((points[1].value - 10.0).abs() < 1e-9);
        assert!((points[1].probability - 0.4).abs() < 1e-9);
        assert!((points[2].probability - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_ccdf_degenerate_inputs() {
        assert!(ccdf(&[0.0, -1.0], 500).is_empty());
        assert_eq!(ccdf(&[3.0, 3.0], 500).len(), 1);
    }

    #[test]
    fn test_network_summary() {
        let summary = network_summary(&create_test_pairs());
        assert_eq!(summary.nodes, 3);
        assert_eq!(summary.edges, 5);
        assert!((summary.density - 5.0 / 6.0).abs() < 1e-12);
        assert_eq!(summary.total_flow, 56.0);
    }

    #[test]
    fn test_top_rankings() {
        let pairs = create_test_pairs();
        let sources = top_sources(&pairs, 2);
        assert_eq!(sources.len(), 4);
        assert_eq!((sources[0].ranking.as_str(), sources[0].geocode), ("Ti", 2));
        assert_eq!(sources[1].geocode, 1);
        // Ti density: 15/100, 40/200, 1/300.
        assert_eq!((sources[2].ranking.as_str(), sources[2].geocode), ("Ti density", 2));

        let targets = top_targets(&pairs, 1);
        assert_eq!(targets[0].geocode, 1);
        assert_eq!(targets[0].value, 41.0);
        assert_eq!(targets[1].ranking, "flow density");
        assert_eq!(targets[1].geocode, 1);
    }

    #[test]
    fn test_write_stats_files() {
        let tmp = TempDir::new().unwrap();
        let matrix = tmp.path().join("src_RJ-tgt_RJ-extended-mobility_matrix.csv");
        let stats = compute(&create_test_pairs(), 500, 10);
        assert_eq!(stats.ti_ccdf[0].value, 1.0);

        let outputs = write_stats(&matrix, &stats).unwrap();
        assert_eq!(outputs.len(), 4);
        assert!(outputs[0].ends_with("src_RJ-tgt_RJ-extended-mobility_matrix-ccdf_flow.csv"));
        let top: Vec<RankedMunicipality> = read_rows(&outputs[2]).unwrap();
        assert_eq!(top.len(), 6);
    }
}
