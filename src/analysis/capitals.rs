//! Flow summaries for state capitals.

use crate::analysis::filter::Matrix;
use crate::error::MatrixError;
use crate::models::{InOutTotal, Municipality};
use crate::tabular::{read_rows, write_rows};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Geocodes of the 27 state capitals.
pub const CAPITALS: [u32; 27] = [
    1200401, 2704302, 1302603, 1600303, 2927408, 2304400, 5300108, 3205309, 5208707, 2111300,
    3106200, 5103403, 5002704, 1501402, 2507507, 2611606, 2211001, 4106902, 3304557, 2408102,
    1100205, 1400100, 4314902, 4205407, 2800308, 3550308, 1721000,
];

/// Natal, Recife, Belo Horizonte, Campo Grande.
pub const DEFAULT_TARGETS: [u32; 4] = [2408102, 2611606, 3106200, 5002704];

/// One target's row of `{label}_workstudy_flow_summary.csv`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapitalSummary {
    pub geocode: u32,
    #[serde(rename = "Population")]
    pub population: u64,
    #[serde(rename = "FU")]
    pub fu: String,
    #[serde(rename = "Municipality")]
    pub municipality: String,
    #[serde(rename = "Total in")]
    pub total_in: i64,
    #[serde(rename = "Total out")]
    pub total_out: i64,
    #[serde(rename = "Total")]
    pub total: i64,
    #[serde(rename = "Total_density")]
    pub total_density: f64,
    #[serde(rename = "Density rank")]
    pub density_rank: usize,
    #[serde(rename = "Absolute rank")]
    pub absolute_rank: usize,
    #[serde(rename = "Total interstate")]
    pub total_interstate: i64,
    #[serde(rename = "Total interstate density")]
    pub interstate_density: f64,
    #[serde(rename = "Interstate absolute flow rank")]
    pub interstate_absolute_rank: Option<usize>,
    #[serde(rename = "Interstate density flow rank")]
    pub interstate_density_rank: Option<usize>,
    #[serde(rename = "Interstate over total flow")]
    pub interstate_share: Option<f64>,
}

/// Interstate flow between a target and one connecting FU.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterstateFlow {
    pub geocode: u32,
    #[serde(rename = "Municipality")]
    pub municipality: String,
    #[serde(rename = "Population")]
    pub population: u64,
    #[serde(rename = "Connecting FU")]
    pub connecting_fu: String,
    #[serde(rename = "Total interstate in")]
    pub total_in: i64,
    #[serde(rename = "Total interstate out")]
    pub total_out: i64,
    #[serde(rename = "Total interstate")]
    pub total: i64,
    #[serde(rename = "Total interstate density")]
    pub density: f64,
}

/// Both output tables.
#[derive(Debug, Clone)]
pub struct CapitalReport {
    pub summary: Vec<CapitalSummary>,
    pub interstate: Vec<InterstateFlow>,
}

fn geocode(text: &str) -> Option<u32> {
    let text = text.trim();
    text.parse::<u32>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().filter(|v| v.fract() == 0.0 && *v >= 0.0).map(|v| v as u32))
}

/// 1-based rank of each key when sorted by `value` descending. Ties keep
/// key order.
fn ranks(values: &BTreeMap<u32, f64>) -> BTreeMap<u32, usize> {
    let mut order: Vec<(u32, f64)> = values.iter().map(|(&k, &v)| (k, v)).collect();
    order.sort_by(|a, b| b.1.total_cmp(&a.1));
    order
        .into_iter()
        .enumerate()
        .map(|(i, (k, _))| (k, i + 1))
        .collect()
}

fn density(total: f64, population: u64) -> f64 {
    if population == 0 {
        0.0
    } else {
        total / population as f64
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct InOut {
    inflow: f64,
    outflow: f64,
}

/// Interstate in/out flow per (capital, connecting FU).
fn interstate_flows(flows: &Matrix, capitals: &BTreeSet<u32>) -> Result<BTreeMap<(u32, String), InOut>, MatrixError> {
    let c_ogeo = flows.column("Origin geocode")?;
    let c_ofu = flows.column("Origin FU")?;
    let c_dgeo = flows.column("Destination geocode")?;
    let c_dfu = flows.column("Destination FU")?;
    let c_total = flows.column("Total")?;

    let mut out: BTreeMap<(u32, String), InOut> = BTreeMap::new();
    for (i, row) in flows.rows.iter().enumerate() {
        let get = |pos: usize| row.get(pos).map(str::trim).unwrap_or("");
        let (origin_fu, destination_fu) = (get(c_ofu), get(c_dfu));
        if origin_fu == destination_fu {
            continue;
        }
        let origin = geocode(get(c_ogeo)).filter(|g| capitals.contains(g));
        let destination = geocode(get(c_dgeo)).filter(|g| capitals.contains(g));
        if origin.is_none() && destination.is_none() {
            continue;
        }
        let total: f64 = get(c_total).parse().map_err(|_| MatrixError::InvalidValue {
            path: flows.path.clone(),
            row: i + 2,
            column: "Total".to_string(),
            value: get(c_total).to_string(),
        })?;

        if let Some(g) = origin {
            out.entry((g, destination_fu.to_string())).or_default().outflow += total;
        }
        if let Some(g) = destination {
            out.entry((g, origin_fu.to_string())).or_default().inflow += total;
        }
    }
    Ok(out)
}

/// Build both tables for `targets`.
pub fn summarize(
    totals: &[InOutTotal],
    flows: &Matrix,
    municipalities: &BTreeMap<String, Municipality>,
    targets: &[u32],
) -> Result<CapitalReport, MatrixError> {
    let capitals: BTreeSet<u32> = CAPITALS.iter().copied().collect();
    let mut population: BTreeMap<u32, &Municipality> = BTreeMap::new();
    for m in municipalities.values() {
        if let Some(g) = geocode(&m.geocode).filter(|g| capitals.contains(g)) {
            population.insert(g, m);
        }
    }
    if population.len() < capitals.len() {
        warn!(
            "{} capitals are missing from the municipality table",
            capitals.len() - population.len()
        );
    }
    for t in targets.iter().filter(|t| !capitals.contains(t)) {
        warn!("Target {} is not a state capital and will be skipped", t);
    }

    // Totals per capital.
    let mut by_capital: BTreeMap<u32, (&InOutTotal, InOut)> = BTreeMap::new();
    for t in totals {
        let Some(g) = geocode(&t.geocode).filter(|g| population.contains_key(g)) else {
            continue;
        };
        let entry = by_capital.entry(g).or_insert((t, InOut::default()));
        entry.1.inflow += t.total_in;
        entry.1.outflow += t.total_out;
    }
    let total_of = |g: u32| {
        by_capital
            .get(&g)
            .map(|(_, io)| io.inflow + io.outflow)
            .unwrap_or(0.0)
    };
    let density_rank = ranks(
        &population
            .iter()
            .map(|(&g, m)| (g, density(total_of(g), m.population)))
            .collect(),
    );
    let absolute_rank = ranks(&population.keys().map(|&g| (g, total_of(g))).collect());

    // Interstate flows.
    let interstate = interstate_flows(flows, &capitals)?;
    let mut interstate_total: BTreeMap<u32, f64> = BTreeMap::new();
    for (&(g, _), io) in &interstate {
        *interstate_total.entry(g).or_default() += io.inflow + io.outflow;
    }
    let interstate_density: BTreeMap<u32, f64> = interstate_total
        .iter()
        .map(|(&g, &t)| {
            let pop = population.get(&g).map(|m| m.population).unwrap_or(0);
            (g, density(t, pop))
        })
        .collect();
    let interstate_absolute_rank = ranks(&interstate_total);
    let interstate_density_rank = ranks(&interstate_density);

    let mut summary = Vec::new();
    for &g in targets {
        let Some(m) = population.get(&g) else {
            continue;
        };
        let io = by_capital.get(&g).map(|(_, io)| *io).unwrap_or_default();
        let (fu, municipality) = match by_capital.get(&g) {
            Some((t, _)) => (t.fu.clone(), t.municipality.clone()),
            None => (m.fu.clone(), m.name.clone()),
        };
        let total = io.inflow + io.outflow;
        let inter = interstate_total.get(&g).copied().unwrap_or(0.0);
        summary.push(CapitalSummary {
            geocode: g,
            population: m.population,
            fu,
            municipality,
            total_in: io.inflow.round() as i64,
            total_out: io.outflow.round() as i64,
            total: total.round() as i64,
            total_density: density(total, m.population),
            density_rank: density_rank.get(&g).copied().unwrap_or(0),
            absolute_rank: absolute_rank.get(&g).copied().unwrap_or(0),
            total_interstate: inter.round() as i64,
            interstate_density: interstate_density.get(&g).copied().unwrap_or(0.0),
            interstate_absolute_rank: interstate_absolute_rank.get(&g).copied(),
            interstate_density_rank: interstate_density_rank.get(&g).copied(),
            interstate_share: (total > 0.0).then(|| inter / total),
        });
    }

    let names: BTreeMap<u32, String> = summary.iter().map(|s| (s.geocode, s.municipality.clone())).collect();
    let mut out_of_state: Vec<InterstateFlow> = interstate
        .into_iter()
        .filter(|((g, _), _)| names.contains_key(g))
        .map(|((g, fu), io)| {
            let pop = population.get(&g).map(|m| m.population).unwrap_or(0);
            let total = io.inflow + io.outflow;
            InterstateFlow {
                geocode: g,
                municipality: names.get(&g).cloned().unwrap_or_default(),
                population: pop,
                connecting_fu: fu,
                total_in: io.inflow.round() as i64,
                total_out: io.outflow.round() as i64,
                total: total.round() as i64,
                density: density(total, pop),
            }
        })
        .collect();
    out_of_state.sort_by(|a, b| b.geocode.cmp(&a.geocode).then(b.total.cmp(&a.total)));

    Ok(CapitalReport {
        summary,
        interstate: out_of_state,
    })
}

/// Output paths for a label.
pub fn output_paths(dir: &Path, label: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{}_workstudy_flow_summary.csv", label)),
        dir.join(format!("{}_workstudy_outofstateflow.csv", label)),
    )
}

/// Read the filter outputs, summarize and write both tables.
pub fn run(
    totals_path: &Path,
    flows_path: &Path,
    municipalities: &BTreeMap<String, Municipality>,
    targets: &[u32],
    out_dir: &Path,
    label: &str,
) -> Result<(CapitalReport, PathBuf, PathBuf), MatrixError> {
    let totals: Vec<InOutTotal> = read_rows(totals_path)?;
    let flows = Matrix::read(flows_path, b',')?;
    let report = summarize(&totals, &flows, municipalities, targets)?;

    let (summary_path, interstate_path) = output_paths(out_dir, label);
    write_rows(&summary_path, &report.summary)?;
    write_rows(&interstate_path, &report.interstate)?;
    info!(
        "Wrote {} capital summaries and {} interstate rows",
        report.summary.len(),
        report.interstate.len()
    );
    Ok((report, summary_path, interstate_path))
}
