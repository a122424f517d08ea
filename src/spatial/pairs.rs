//! Extended mobility matrix: distances joined with flows and populations.

use crate::error::MatrixError;
use crate::models::{is_all_request, Municipality, PairRow, RedistributedRow};
use crate::spatial::distance::DistanceRow;
use crate::tabular::{read_rows, write_rows};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Flow and standard error of one observed pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Flow {
    pub total: f64,
    pub error: f64,
}

/// Label of an FU selection in file names (`all` or `RJ-SP`).
pub fn selection_label(fus: &[String]) -> String {
    if fus.is_empty() || is_all_request(fus) {
        "all".to_string()
    } else {
        fus.join("-")
    }
}

/// `src_{S}-tgt_{T}-extended-mobility_matrix.csv`
pub fn extended_name(src: &[String], tgt: &[String]) -> String {
    format!(
        "src_{}-tgt_{}-extended-mobility_matrix.csv",
        selection_label(src),
        selection_label(tgt)
    )
}

/// Municipalities belonging to the requested FUs, keyed by numeric geocode.
pub fn select_municipalities<'a>(
    municipalities: &'a BTreeMap<String, Municipality>,
    fus: &[String],
) -> BTreeMap<u32, &'a Municipality> {
    let all = fus.is_empty() || is_all_request(fus);
    municipalities
        .values()
        .filter(|m| all || fus.iter().any(|fu| fu.eq_ignore_ascii_case(&m.fu)))
        .filter_map(|m| match m.geocode.parse::<u32>() {
            Ok(code) => Some((code, m)),
            Err(_) => {
                debug!("Skipping municipality with non-numeric geocode '{}'", m.geocode);
                None
            }
        })
        .collect()
}

/// Observed flows towards Brazilian municipalities, keyed by (src, tgt).
///
/// Destinations without a numeric geocode (unknowns, several municipalities)
/// are left out.
pub fn observed_flows(rows: &[RedistributedRow]) -> HashMap<(u32, u32), Flow> {
    let mut flows: HashMap<(u32, u32), Flow> = HashMap::new();
    for row in rows.iter().filter(|r| r.is_brazilian_destination()) {
        let (Ok(src), Ok(tgt)) = (
            row.origin_geocode.trim().parse::<u32>(),
            row.destination_geocode.trim().parse::<u32>(),
        ) else {
            continue;
        };
        let entry = flows.entry((src, tgt)).or_default();
        entry.total += row.total;
        entry.error = (entry.error.powi(2) + row.std_error.powi(2)).sqrt();
    }
    flows
}

/// Join distances, flows and populations into the extended matrix.
///
/// Distances are read once per unordered pair and used in both directions.
/// Pairs without an observed flow get zero flow and error. `Ti` is the total
/// observed flow from each source towards the selected targets.
pub fn assemble(
    distances: &[DistanceRow],
    sources: &BTreeMap<u32, &Municipality>,
    targets: &BTreeMap<u32, &Municipality>,
    flows: &HashMap<(u32, u32), Flow>,
) -> Vec<PairRow> {
    let mut ti: HashMap<u32, f64> = HashMap::new();
    for (&(src, tgt), flow) in flows {
        if sources.contains_key(&src) && targets.contains_key(&tgt) && src != tgt {
            *ti.entry(src).or_default() += flow.total;
        }
    }

    let mut pairs = Vec::new();
    let mut push = |src: u32, tgt: u32, dist: f64| {
        let (Some(s), Some(t)) = (sources.get(&src), targets.get(&tgt)) else {
            return;
        };
        let flow = flows.get(&(src, tgt)).copied().unwrap_or_default();
        pairs.push(PairRow {
            src,
            srcname: s.name.clone(),
            srcfu: s.fu.clone(),
            tgt,
            tgtname: t.name.clone(),
            tgtfu: t.fu.clone(),
            dist,
            srcpop: s.population,
            tgtpop: t.population,
            flow: flow.total,
            error: flow.error,
            ti: ti.get(&src).copied().unwrap_or(0.0),
        });
    };

    for d in distances {
        if d.source_geocode == d.target_geocode {
            continue;
        }
        push(d.source_geocode, d.target_geocode, d.distance_km);
        push(d.target_geocode, d.source_geocode, d.distance_km);
    }

    pairs.sort_by(|a, b| (a.src, a.tgt).cmp(&(b.src, b.tgt)));
    pairs.dedup_by(|a, b| a.src == b.src && a.tgt == b.tgt);
    pairs
}

/// Build and write the extended matrix. Returns its path and rows.
pub fn build_extended_matrix(
    distances_path: &Path,
    flows_path: &Path,
    municipalities: &BTreeMap<String, Municipality>,
    src_fus: &[String],
    tgt_fus: &[String],
    out_dir: &Path,
) -> Result<(PathBuf, Vec<PairRow>), MatrixError> {
    let distances: Vec<DistanceRow> = read_rows(distances_path)?;
    let redistributed: Vec<RedistributedRow> = read_rows(flows_path)?;
    info!(
        "Read {} distances and {} flow rows",
        distances.len(),
        redistributed.len()
    );

    let sources = select_municipalities(municipalities, src_fus);
    let targets = select_municipalities(municipalities, tgt_fus);
    let flows = observed_flows(&redistributed);

    let pairs = assemble(&distances, &sources, &targets, &flows);
    if pairs.is_empty() {
        return Err(MatrixError::Empty);
    }

    let missing = flows
        .keys()
        .filter(|(s, t)| s != t && sources.contains_key(s) && targets.contains_key(t))
        .filter(|&&key| pairs.binary_search_by(|p| (p.src, p.tgt).cmp(&key)).is_err())
        .count();
    if missing > 0 {
        warn!("{} observed flows have no distance and were dropped", missing);
    }

    let out = out_dir.join(extended_name(src_fus, tgt_fus));
    write_rows(&out, &pairs)?;
    info!("Wrote {} pairs to {}", pairs.len(), out.display());
    Ok((out, pairs))
}

/// Read an extended matrix back.
pub fn read_extended_matrix(path: &Path) -> Result<Vec<PairRow>, MatrixError> {
    let pairs: Vec<PairRow> = read_rows(path)?;
    if pairs.is_empty() {
        return Err(MatrixError::Empty);
    }
    Ok(pairs)
}
