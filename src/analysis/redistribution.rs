//! Proportional redistribution of flows with unknown destinations.
//!
//! Flows whose destination municipality was not identified are spread over
//! the known destinations of the same origin, in proportion to the known
//! totals, respecting the destination FU or country when it is known. Errors
//! are propagated as variances and square-rooted at the end.

use crate::error::MatrixError;
use crate::models::{
    is_all_request, FederationUnit, MobilityRow, RedistributedRow, BRAZIL, FEDERATION_UNITS,
    IGNORED, MULTIPLE_DESTINATIONS, UNKNOWN_IN_BRAZIL,
};
use crate::tabular::{is_null, read_rows};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

const UNKNOWN_MUNICIPALITY_SUFFIX: &str = " NÃO SABE MUNICÍPIO";

/// Kinds of unknown destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unknown {
    /// FU known, municipality not (`RJ NÃO SABE MUNICÍPIO`).
    MunicipalityInFu(String),
    /// Somewhere in Brazil (geocode 9999999).
    InBrazil,
    /// `IGNORADO`.
    Ignored,
    /// No municipality descriptor at all.
    Null,
    /// Work in several municipalities. Never redistributed.
    Multiple,
}

/// Classify a row's destination. `None` means the destination is known.
pub fn classify(row: &RedistributedRow) -> Option<Unknown> {
    let name = row.destination_municipality.trim();
    if name == MULTIPLE_DESTINATIONS {
        Some(Unknown::Multiple)
    } else if row.destination_geocode.trim() == UNKNOWN_IN_BRAZIL {
        Some(Unknown::InBrazil)
    } else if let Some(fu) = name.strip_suffix(UNKNOWN_MUNICIPALITY_SUFFIX) {
        Some(Unknown::MunicipalityInFu(fu.to_string()))
    } else if name == IGNORED {
        Some(Unknown::Ignored)
    } else if is_null(name) {
        Some(Unknown::Null)
    } else {
        None
    }
}

/// Outcome counters of one redistribution run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedistributionSummary {
    pub origins: usize,
    /// Unknown rows spread over known destinations.
    pub redistributed: usize,
    /// Unknown rows left in place because no known destination qualified.
    pub unresolved: usize,
    /// Flow moved from unknown to known destinations.
    pub moved: f64,
}

/// Matrix file name for a requested FU list.
pub fn output_name(requested: &[String], expanded: &[String]) -> String {
    if is_all_request(requested) {
        "all_FUs-redistributed_mobility_matrix.csv".to_string()
    } else {
        format!("{}-redistributed_mobility_matrix.csv", expanded.join("-"))
    }
}

/// Read one extracted mobility matrix.
pub fn read_mobility_matrix(path: &Path) -> Result<Vec<MobilityRow>, MatrixError> {
    let rows: Vec<MobilityRow> = read_rows(path)?;
    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Prepare extracted rows for redistribution.
///
/// Destination FU names become acronyms; foreign destinations take the
/// country name as FU and municipality. Totals are copied into the
/// redistributed columns.
pub fn prepare(rows: Vec<MobilityRow>) -> Vec<RedistributedRow> {
    rows.into_iter()
        .map(|r| {
            let mut fu = FederationUnit::by_name(&r.destination_fu)
                .map(|f| f.acronym.to_string())
                .unwrap_or(r.destination_fu);
            let mut municipality = r.destination_municipality;

            let country = r.destination_country.trim();
            if country != BRAZIL && !is_null(country) {
                fu = country.to_string();
                municipality = country.to_string();
            }

            RedistributedRow {
                origin_geocode: r.origin_geocode,
                origin_municipality: r.origin_municipality,
                origin_fu: r.origin_fu,
                population: r.population,
                destination_geocode: r.destination_geocode,
                destination_country: r.destination_country,
                destination_fu: fu,
                destination_municipality: municipality,
                total_orig: r.total,
                std_error_orig: r.std_error,
                error_factor: r.error_factor,
                density_orig: r.density,
                total: r.total,
                std_error: r.std_error,
                std_error_conserv: r.std_error,
                density: r.density,
            }
        })
        .collect()
}

/// Working state of one origin: row indices plus variances.
struct Origin<'a> {
    rows: &'a mut [RedistributedRow],
    idx: Vec<usize>,
    var: Vec<f64>,
    var_conserv: Vec<f64>,
    unknown: Vec<Option<Unknown>>,
}

impl Origin<'_> {
    /// Spread row `u` over the known rows accepted by `accept`.
    /// Returns false when the known total is zero.
    fn spread<F>(&mut self, u: usize, accept: F) -> bool
    where
        F: Fn(&RedistributedRow) -> bool,
    {
        let targets: Vec<usize> = (0..self.idx.len())
            .filter(|&k| self.unknown[k].is_none() && accept(&self.rows[self.idx[k]]))
            .collect();
        let known: f64 = targets.iter().map(|&k| self.rows[self.idx[k]].total).sum();
        if known <= 0.0 {
            return false;
        }

        let unknown_row = &self.rows[self.idx[u]];
        let u_total = unknown_row.total;
        let ef2 = unknown_row.error_factor * unknown_row.error_factor;
        let u_var = self.var[u];

        for &k in &targets {
            let row = &mut self.rows[self.idx[k]];
            row.total += row.total * u_total / known;
            let share2 = row.total * row.total / (known * known);
            self.var[k] += ef2 * share2;
            self.var_conserv[k] += u_var * share2;
        }

        self.rows[self.idx[u]].total = 0.0;
        self.var[u] = 0.0;
        self.var_conserv[u] = 0.0;
        true
    }

    fn spread_matching<P, F>(&mut self, is_kind: P, accept: F, summary: &mut RedistributionSummary)
    where
        P: Fn(&Unknown) -> bool,
        F: Fn(&RedistributedRow) -> bool,
    {
        for u in 0..self.idx.len() {
            if !self.unknown[u].as_ref().map(&is_kind).unwrap_or(false) {
                continue;
            }
            let amount = self.rows[self.idx[u]].total;
            if self.spread(u, &accept) {
                summary.redistributed += 1;
                summary.moved += amount;
            } else {
                let row = &self.rows[self.idx[u]];
                warn!(
                    "No known destination for '{}' from {} ({}); flow {:.0} left in place",
                    row.destination_municipality, row.origin_municipality, row.origin_geocode, amount
                );
                summary.unresolved += 1;
            }
        }
    }
}

/// Redistribute unknown destinations in place.
pub fn redistribute(rows: &mut [RedistributedRow]) -> RedistributionSummary {
    let mut by_origin: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        by_origin.entry(row.origin_geocode.clone()).or_default().push(i);
    }

    let mut summary = RedistributionSummary {
        origins: by_origin.len(),
        ..Default::default()
    };

    for idx in by_origin.into_values() {
        let var: Vec<f64> = idx.iter().map(|&i| rows[i].std_error.powi(2)).collect();
        let unknown = idx.iter().map(|&i| classify(&rows[i])).collect();
        let mut origin = Origin {
            rows: &mut *rows,
            var_conserv: var.clone(),
            var,
            idx,
            unknown,
        };

        for fu in FEDERATION_UNITS.iter() {
            origin.spread_matching(
                |k| matches!(k, Unknown::MunicipalityInFu(uf) if uf == fu.acronym),
                |r| r.destination_fu == fu.acronym,
                &mut summary,
            );
        }
        origin.spread_matching(
            |k| *k == Unknown::InBrazil,
            |r| r.is_brazilian_destination(),
            &mut summary,
        );
        origin.spread_matching(|k| *k == Unknown::Ignored, |_| true, &mut summary);
        origin.spread_matching(|k| *k == Unknown::Null, |_| true, &mut summary);

        for (k, &i) in origin.idx.iter().enumerate() {
            let row = &mut origin.rows[i];
            row.std_error = origin.var[k].sqrt();
            row.std_error_conserv = origin.var_conserv[k].sqrt();
        }
    }

    for row in rows.iter_mut() {
        row.density = row.total / row.population as f64;
    }

    info!(
        "Redistributed {} unknown destinations over {} origins ({} unresolved)",
        summary.redistributed, summary.origins, summary.unresolved
    );
    summary
}
