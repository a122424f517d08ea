//! CSV outputs of the extraction pass.

use crate::analysis::aggregator::{AgeGroup, Extraction, SchoolCounts, WorkStatus};
use crate::census::record::SchoolColumn;
use crate::census::{DestinationKey, Lookups};
use crate::error::LookupError;
use crate::models::{
    MobilityRow, Municipality, BRAZIL, MULTIPLE_DESTINATIONS, SEVERAL_GEOCODE, UNKNOWN_IN_BRAZIL,
};
use crate::tabular::write_rows;
use anyhow::{Context, Result};
use csv::Writer;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const NOT_AVAILABLE: &str = "NA";

/// Files written by one extraction.
#[derive(Debug, Clone)]
pub struct ExtractionOutputs {
    pub tab3605: PathBuf,
    pub tab3599: PathBuf,
    pub matrix: PathBuf,
}

impl ExtractionOutputs {
    pub fn in_dir(dir: &Path, prefix: &str) -> Self {
        Self {
            tab3605: dir.join(format!("{}-tab3605-microdata.csv", prefix)),
            tab3599: dir.join(format!("{}-tab3599-microdata.csv", prefix)),
            matrix: dir.join(format!("{}-mobility-matrix-microdata.csv", prefix)),
        }
    }
}

fn municipality<'a>(lookups: &'a Lookups, geocode: &str) -> Result<&'a Municipality, LookupError> {
    lookups
        .municipalities
        .get(geocode)
        .ok_or_else(|| LookupError::UnknownMunicipality {
            geocode: geocode.to_string(),
        })
}

fn school_header(first: &str, second: &str) -> Vec<String> {
    let mut header = vec![first.to_string(), second.to_string()];
    header.extend(SchoolColumn::ALL.iter().map(|c| c.header().to_string()));
    header
}

fn rounded_cells(counts: &SchoolCounts) -> Vec<String> {
    SchoolColumn::ALL
        .iter()
        .map(|c| (counts.get(*c).round() as i64).to_string())
        .collect()
}

/// Write the employment-status by school-attendance table (10 years or older).
pub fn write_tab3605(path: &Path, extraction: &Extraction, lookups: &Lookups) -> Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(school_header("Municipality", "Employment status"))?;

    for (geocode, tables) in &extraction.municipalities {
        let name = &municipality(lookups, geocode)?.name;
        for status in WorkStatus::ALL {
            let mut record = vec![name.clone(), status.label().to_string()];
            record.extend(rounded_cells(tables.employment(status)));
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Write the age-group by school-attendance table (under 10).
pub fn write_tab3599(path: &Path, extraction: &Extraction, lookups: &Lookups) -> Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(school_header("Municipality", "Age"))?;

    for (geocode, tables) in &extraction.municipalities {
        let name = &municipality(lookups, geocode)?.name;
        for group in AgeGroup::ALL {
            let mut record = vec![name.clone(), group.label().to_string()];
            record.extend(rounded_cells(tables.age_group(group)));
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Describe one destination key with the lookup tables.
///
/// Returns (geocode, country, FU, municipality).
pub fn describe_destination(
    key: &DestinationKey,
    lookups: &Lookups,
) -> (String, String, String, String) {
    let mut country = lookups
        .countries
        .get(&key.country)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let fu = lookups
        .federation_units
        .get(&key.fu)
        .cloned()
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    if key.several {
        return (
            SEVERAL_GEOCODE.to_string(),
            country,
            fu,
            MULTIPLE_DESTINATIONS.to_string(),
        );
    }

    let (geocode, name) = match lookups.municipalities.get(&key.municipality) {
        Some(m) => {
            country = BRAZIL.to_string();
            (m.geocode.clone(), m.name.clone())
        }
        None => {
            let name = lookups
                .movement_municipalities
                .get(&key.municipality)
                .cloned()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            let geocode = if key.municipality == UNKNOWN_IN_BRAZIL {
                UNKNOWN_IN_BRAZIL.to_string()
            } else {
                String::new()
            };
            (geocode, name)
        }
    };
    (geocode, country, fu, name)
}

/// Sampling error of a weighted flow `w` out of population `pop` with
/// sampling fraction `f`.
pub fn standard_error(fraction: f64, pop: f64, w: f64) -> f64 {
    ((1.0 - fraction) * w * (pop - w) / (pop * fraction - 1.0)).sqrt()
}

/// Error factor of a flow: the standard error without the finite
/// population term.
pub fn error_factor(fraction: f64, w: f64) -> f64 {
    ((1.0 - fraction) * w / fraction).sqrt()
}

/// Rows of the mobility matrix, sorted by origin geocode then destination.
pub fn mobility_rows(extraction: &Extraction, lookups: &Lookups) -> Result<Vec<MobilityRow>, LookupError> {
    let mut rows = Vec::with_capacity(extraction.pair_count());

    for (geocode, tables) in &extraction.municipalities {
        if tables.flows.is_empty() {
            continue;
        }
        let origin = municipality(lookups, geocode)?;
        let fraction = origin.fraction.ok_or_else(|| LookupError::MissingFraction {
            geocode: geocode.clone(),
        })?;
        let pop = origin.population as f64;

        for (key, &w) in &tables.flows {
            let (dest_geocode, country, fu, name) = describe_destination(key, lookups);
            let std_error = standard_error(fraction, pop, w);
            if !std_error.is_finite() {
                warn!(
                    "{} -> {}: standard error undefined (population {}, fraction {}, flow {:.1})",
                    geocode, name, origin.population, fraction, w
                );
            }
            rows.push(MobilityRow {
                origin_geocode: geocode.clone(),
                origin_municipality: origin.name.clone(),
                origin_fu: origin.fu.clone(),
                population: origin.population,
                destination_geocode: dest_geocode,
                destination_country: country,
                destination_fu: fu,
                destination_municipality: name,
                total: w,
                std_error,
                error_factor: error_factor(fraction, w),
                density: w / pop,
            });
        }
    }
    Ok(rows)
}

/// Write the three extraction tables under `dir`.
pub fn write_extraction(
    dir: &Path,
    extraction: &Extraction,
    lookups: &Lookups,
) -> Result<ExtractionOutputs> {
    let outputs = ExtractionOutputs::in_dir(dir, &extraction.prefix);

    write_tab3605(&outputs.tab3605, extraction, lookups)?;
    write_tab3599(&outputs.tab3599, extraction, lookups)?;

    let rows = mobility_rows(extraction, lookups)?;
    write_rows(&outputs.matrix, &rows)
        .with_context(|| format!("Failed to write {}", outputs.matrix.display()))?;

    info!(
        "Wrote {}, {} and {} ({} pairs)",
        outputs.tab3605.display(),
        outputs.tab3599.display(),
        outputs.matrix.display(),
        rows.len()
    );
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::census::lookups::tests::load_test_lookups;
    use crate::census::record::tests::{make_line, test_layout};
    use tempfile::TempDir;

    fn create_test_extraction() -> Extraction {
        let layout = test_layout();
        let mut ex = Extraction::new("33", vec!["3303302".to_string(), "3304557".to_string()]);
        let lines = [
            make_line("3304557", "20", 30, "4", "", ("", "", ""), "1", ("", "", ""), true),
            make_line(
                "3304557",
                "100",
                30,
                "4",
                "",
                ("", "", ""),
                "3",
                ("0000033", "3303302", "0000076"),
                true,
            ),
            make_line(
                "3304557",
                "8",
                40,
                "4",
                "",
                ("", "", ""),
                "3",
                ("0000033", "3399999", "0000076"),
                true,
            ),
            make_line(
                "3304557",
                "4",
                40,
                "4",
                "",
                ("", "", ""),
                "4",
                ("", "", "0000586"),
                true,
            ),
            make_line("3304557", "2", 3, "1", "1", ("", "", ""), "", ("", "", ""), false),
        ];
        for (i, line) in lines.iter().enumerate() {
            let rec = layout.decode(line.as_bytes(), i as u64 + 1).unwrap();
            ex.add(&rec, i as u64 + 1).unwrap();
        }
        ex
    }

    #[test]
    fn test_describe_known_municipality_forces_brazil() {
        let tmp = TempDir::new().unwrap();
        let lookups = load_test_lookups(tmp.path());
        let key = DestinationKey {
            country: "0000000".to_string(),
            fu: "0000033".to_string(),
            municipality: "3303302".to_string(),
            several: false,
        };
        let (geocode, country, fu, name) = describe_destination(&key, &lookups);
        assert_eq!(geocode, "3303302");
        assert_eq!(country, BRAZIL);
        assert_eq!(fu, "RIO DE JANEIRO");
        assert_eq!(name, "Niterói");
    }

    #[test]
    fn test_describe_unknown_destinations() {
        let tmp = TempDir::new().unwrap();
        let lookups = load_test_lookups(tmp.path());

        let fu_only = DestinationKey {
            country: "0000076".to_string(),
            fu: "0000033".to_string(),
            municipality: "3399999".to_string(),
            several: false,
        };
        let (geocode, _, _, name) = describe_destination(&fu_only, &lookups);
        assert_eq!(geocode, "");
        assert_eq!(name, "RJ NÃO SABE MUNICÍPIO");

        let somewhere = DestinationKey {
            municipality: UNKNOWN_IN_BRAZIL.to_string(),
            ..fu_only.clone()
        };
        let (geocode, _, _, name) = describe_destination(&somewhere, &lookups);
        assert_eq!(geocode, UNKNOWN_IN_BRAZIL);
        assert_eq!(name, "IGNORADO");

        let several = DestinationKey {
            country: String::new(),
            fu: String::new(),
            municipality: String::new(),
            several: true,
        };
        let (geocode, country, fu, name) = describe_destination(&several, &lookups);
        assert_eq!(geocode, SEVERAL_GEOCODE);
        assert_eq!(country, "NA");
        assert_eq!(fu, "NA");
        assert_eq!(name, MULTIPLE_DESTINATIONS);
    }

    #[test]
    fn test_standard_error_formula() {
        let se = standard_error(0.05, 1000.0, 100.0);
        let expected = ((0.95 * 100.0 * 900.0) / 49.0_f64).sqrt();
        assert!((se - expected).abs() < 1e-12);
        assert!((error_factor(0.05, 100.0) - (0.95 * 100.0 / 0.05_f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_standard_error_undefined_cases() {
        // pop * f <= 1
        assert!(!standard_error(0.1, 5.0, 1.0).is_finite());
        // flow above population
        assert!(!standard_error(0.05, 1000.0, 1200.0).is_finite());
    }

    #[test]
    fn test_mobility_rows_sorted_and_described() {
        let tmp = TempDir::new().unwrap();
        let lookups = load_test_lookups(tmp.path());
        let ex = create_test_extraction();

        let rows = mobility_rows(&ex, &lookups).unwrap();
        assert_eq!(rows.len(), 3);
        // Sorted by (country, FU, municipality) code: the foreign key has
        // blank FU and municipality codes but country 0000586.
        assert_eq!(rows[0].destination_country, BRAZIL);
        assert_eq!(rows[0].destination_municipality, "Niterói");
        assert_eq!(rows[1].destination_municipality, "RJ NÃO SABE MUNICÍPIO");
        assert_eq!(rows[2].destination_country, "PARAGUAI");
        assert!(rows.iter().all(|r| r.origin_municipality == "Rio de Janeiro"));
        assert!((rows[0].density - 100.0 / 6320446.0).abs() < 1e-15);
        let total: f64 = rows.iter().map(|r| r.total).sum();
        assert!((total - ex.municipalities["3304557"].population.mobile).abs() < 1e-9);
    }

    #[test]
    fn test_missing_fraction_is_error() {
        let tmp = TempDir::new().unwrap();
        let mut lookups = load_test_lookups(tmp.path());
        if let Some(m) = lookups.municipalities.get_mut("3304557") {
            m.fraction = None;
        }
        let err = mobility_rows(&create_test_extraction(), &lookups).unwrap_err();
        assert!(matches!(err, LookupError::MissingFraction { .. }));
    }

    #[test]
    fn test_write_extraction_files() {
        let tmp = TempDir::new().unwrap();
        let lookups = load_test_lookups(tmp.path());
        let ex = create_test_extraction();

        let outputs = write_extraction(tmp.path(), &ex, &lookups).unwrap();

        let tab3605 = std::fs::read_to_string(&outputs.tab3605).unwrap();
        let lines: Vec<&str> = tab3605.lines().collect();
        assert_eq!(
            lines[0],
            "Municipality,Employment status,Total,School attendance,School at same municipality,\
             School at another municipality,School at another country,Not attending school"
        );
        // Two municipalities, seven rows each. Niteroi comes first by geocode.
        assert_eq!(lines.len(), 1 + 2 * 7);
        assert!(lines[1].starts_with("Niterói,Total,0"));
        assert!(lines[8].starts_with("Rio de Janeiro,Total,132,0,0,0,0,132"));

        let tab3599 = std::fs::read_to_string(&outputs.tab3599).unwrap();
        assert!(tab3599.contains("Rio de Janeiro,0-4,2,2,2,0,0,0"));
        assert!(tab3599.contains("Rio de Janeiro,Total,2,2,2,0,0,0"));

        let matrix = std::fs::read_to_string(&outputs.matrix).unwrap();
        assert!(matrix.starts_with("Origin geocode,Origin Municipality,Origin FU,Population"));
        assert_eq!(matrix.lines().count(), 4);
    }
}
