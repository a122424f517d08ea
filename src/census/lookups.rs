//! Lookup tables for municipalities, federation units and countries.

use crate::error::LookupError;
use crate::models::Municipality;
use crate::tabular::{cell, parse_records, read_text, Columns};
use csv::StringRecord;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// Preamble lines above the header in the IBGE movement-code tables.
const MOVEMENT_TABLE_PREAMBLE: usize = 2;

/// A foreign country from the movement-code table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Country {
    pub name: String,
    pub continent: String,
}

/// Every lookup table needed by the extraction pass.
#[derive(Debug, Clone, Default)]
pub struct Lookups {
    /// Movement code -> municipality descriptor (includes "unknown" labels).
    pub movement_municipalities: HashMap<String, String>,
    /// Geocode -> municipality.
    pub municipalities: BTreeMap<String, Municipality>,
    /// Movement code -> FU name.
    pub federation_units: HashMap<String, String>,
    /// Movement code -> country.
    pub countries: HashMap<String, Country>,
}

fn column(cols: &Columns, path: &Path, folded: &str) -> Result<usize, LookupError> {
    cols.position(folded)
        .or_else(|| cols.position_prefix(folded))
        .ok_or_else(|| LookupError::MissingColumn {
            path: path.to_path_buf(),
            column: folded.to_string(),
        })
}

fn load(path: &Path, skip: usize) -> Result<(Columns, Vec<StringRecord>), LookupError> {
    let text = read_text(path)?;
    let (header, rows) = parse_records(&text, skip)?;
    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok((Columns::from_record(&header), rows))
}

/// Read the municipality movement-code table (`Código`, `Municípios`).
pub fn read_movement_municipalities(path: &Path) -> Result<HashMap<String, String>, LookupError> {
    let (cols, rows) = load(path, MOVEMENT_TABLE_PREAMBLE)?;
    let c_code = column(&cols, path, "CDIGO")?;
    let c_name = column(&cols, path, "MUNICPIOS")?;

    Ok(rows
        .iter()
        .filter(|r| !cell(r, c_code).is_empty())
        .map(|r| (cell(r, c_code).to_string(), cell(r, c_name).to_string()))
        .collect())
}

/// Read the municipality table (`CD_GEOCODM`, `NM_MUNICIP`, `SIGLA_ESTADO`, `POPULATION`).
pub fn read_municipalities(path: &Path) -> Result<BTreeMap<String, Municipality>, LookupError> {
    let (cols, rows) = load(path, 0)?;
    let c_geo = column(&cols, path, "CDGEOCODM")?;
    let c_name = column(&cols, path, "NMMUNICIP")?;
    let c_fu = column(&cols, path, "SIGLAESTADO")?;
    let c_pop = column(&cols, path, "POPULATION")?;

    let mut out = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let pop_text = cell(row, c_pop);
        let population = pop_text
            .parse::<u64>()
            .map_err(|_| LookupError::InvalidValue {
                path: path.to_path_buf(),
                row: i + 2,
                column: "POPULATION".to_string(),
                value: pop_text.to_string(),
            })?;
        let geocode = cell(row, c_geo).to_string();
        out.insert(
            geocode.clone(),
            Municipality {
                geocode,
                name: cell(row, c_name).to_string(),
                fu: cell(row, c_fu).to_string(),
                population,
                fraction: None,
            },
        );
    }
    Ok(out)
}

/// Attach effective sampling fractions (`Código`, `Fração_efetiva`, in percent).
///
/// Returns the number of municipalities that received a fraction.
pub fn attach_fractions(
    path: &Path,
    municipalities: &mut BTreeMap<String, Municipality>,
) -> Result<usize, LookupError> {
    let (cols, rows) = load(path, 0)?;
    let c_code = column(&cols, path, "CDIGO")?;
    let c_frac = column(&cols, path, "FRAOEFETIVA")?;

    let mut attached = 0;
    for (i, row) in rows.iter().enumerate() {
        let Some(m) = municipalities.get_mut(cell(row, c_code)) else {
            continue;
        };
        let text = cell(row, c_frac);
        let percent = text
            .replace(',', ".")
            .parse::<f64>()
            .map_err(|_| LookupError::InvalidValue {
                path: path.to_path_buf(),
                row: i + 2,
                column: "Fração_efetiva".to_string(),
                value: text.to_string(),
            })?;
        m.fraction = Some(0.01 * percent);
        attached += 1;
    }
    Ok(attached)
}

/// Read the FU movement-code table (`CÓDIGOS`, `UNIDADES DA FEDERAÇÃO`).
pub fn read_federation_units(path: &Path) -> Result<HashMap<String, String>, LookupError> {
    let (cols, rows) = load(path, MOVEMENT_TABLE_PREAMBLE)?;
    let c_code = column(&cols, path, "CDIGOS")?;
    let c_name = column(&cols, path, "UNIDADESDAFEDERAO")?;

    Ok(rows
        .iter()
        .map(|r| (cell(r, c_code).to_string(), cell(r, c_name).to_string()))
        .collect())
}

/// Read the country movement-code table (`CÓDIGOS`, `PAÍSES ESTRANGEIROS`, `CONTINENTES`).
pub fn read_countries(path: &Path) -> Result<HashMap<String, Country>, LookupError> {
    let (cols, rows) = load(path, MOVEMENT_TABLE_PREAMBLE)?;
    let c_code = column(&cols, path, "CDIGOS")?;
    let c_name = column(&cols, path, "PASESESTRANGEIROS")?;
    let c_cont = column(&cols, path, "CONTINENTES")?;

    Ok(rows
        .iter()
        .map(|r| {
            (
                cell(r, c_code).to_string(),
                Country {
                    name: cell(r, c_name).to_string(),
                    continent: cell(r, c_cont).to_string(),
                },
            )
        })
        .collect())
}

/// Paths of the lookup tables.
#[derive(Debug, Clone)]
pub struct LookupPaths<'a> {
    pub movement_municipalities: &'a Path,
    pub municipalities: &'a Path,
    pub fractions: &'a Path,
    pub federation_units: &'a Path,
    pub countries: &'a Path,
}

impl Lookups {
    /// Load every table.
    pub fn load(paths: &LookupPaths<'_>) -> Result<Self, LookupError> {
        let movement_municipalities = read_movement_municipalities(paths.movement_municipalities)?;
        let mut municipalities = read_municipalities(paths.municipalities)?;
        let attached = attach_fractions(paths.fractions, &mut municipalities)?;
        if attached < municipalities.len() {
            warn!(
                "{} of {} municipalities have no sampling fraction",
                municipalities.len() - attached,
                municipalities.len()
            );
        }
        let federation_units = read_federation_units(paths.federation_units)?;
        let countries = read_countries(paths.countries)?;

        Ok(Self {
            movement_municipalities,
            municipalities,
            federation_units,
            countries,
        })
    }

    /// Municipalities that belong to an extraction prefix.
    ///
    /// A prefix matches when its first two characters are the FU acronym
    /// (`RJ`, `SP1`, `SP2-RM`) or when the geocode starts with it (`33`).
    pub fn in_scope(&self, prefix: &str) -> Vec<&Municipality> {
        let acronym: String = prefix.chars().take(2).collect();
        self.municipalities
            .values()
            .filter(|m| m.fu == acronym || m.geocode.starts_with(prefix))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) fn write_lookup_tables(dir: &Path) {
        fs::write(
            dir.join("mun_codes.csv"),
            "Tabela de códigos\n\nCódigo,Municípios\n3304557,Rio de Janeiro\n3399999,RJ NÃO SABE MUNICÍPIO\n9999999,IGNORADO\n,\n",
        )
        .unwrap();
        fs::write(
            dir.join("municipalities.csv"),
            "CD_GEOCODM,NM_MUNICIP,SIGLA_ESTADO,POPULATION\n\
             3304557,Rio de Janeiro,RJ,6320446\n\
             3303302,Niterói,RJ,487562\n\
             3550308,São Paulo,SP,11253503\n\
             ,,,\n",
        )
        .unwrap();
        fs::write(
            dir.join("fractions.csv"),
            "Código,Fração_efetiva\n3304557,5.0\n3303302,10.0\n3550308,5.0\n",
        )
        .unwrap();
        fs::write(
            dir.join("fu_codes.csv"),
            "Tabela UF\n\nCÓDIGOS,UNIDADES DA FEDERAÇÃO\n0000033,RIO DE JANEIRO\n0000035,SÃO PAULO\n",
        )
        .unwrap();
        fs::write(
            dir.join("countries.csv"),
            "Tabela países\n\nCÓDIGOS,PAÍSES ESTRANGEIROS,CONTINENTES\n0000586,PARAGUAI,AMÉRICA\n",
        )
        .unwrap();
    }

    pub(crate) fn load_test_lookups(dir: &Path) -> Lookups {
        write_lookup_tables(dir);
        Lookups::load(&LookupPaths {
            movement_municipalities: &dir.join("mun_codes.csv"),
            municipalities: &dir.join("municipalities.csv"),
            fractions: &dir.join("fractions.csv"),
            federation_units: &dir.join("fu_codes.csv"),
            countries: &dir.join("countries.csv"),
        })
        .unwrap()
    }

    #[test]
    fn test_load_all_tables() {
        let tmp = TempDir::new().unwrap();
        let lookups = load_test_lookups(tmp.path());

        assert_eq!(lookups.movement_municipalities.len(), 3);
        assert_eq!(
            lookups.movement_municipalities.get("3399999").map(String::as_str),
            Some("RJ NÃO SABE MUNICÍPIO")
        );
        assert_eq!(lookups.municipalities.len(), 3);

        let rio = &lookups.municipalities["3304557"];
        assert_eq!(rio.population, 6320446);
        assert_eq!(rio.fu, "RJ");
        assert!((rio.fraction.unwrap() - 0.05).abs() < 1e-12);

        assert_eq!(
            lookups.federation_units.get("0000033").map(String::as_str),
            Some("RIO DE JANEIRO")
        );
        assert_eq!(lookups.countries["0000586"].name, "PARAGUAI");
        assert_eq!(lookups.countries["0000586"].continent, "AMÉRICA");
    }

    #[test]
    fn test_in_scope_by_acronym_and_code() {
        let tmp = TempDir::new().unwrap();
        let lookups = load_test_lookups(tmp.path());

        assert_eq!(lookups.in_scope("RJ").len(), 2);
        assert_eq!(lookups.in_scope("33").len(), 2);
        assert_eq!(lookups.in_scope("SP2-RM").len(), 1);
        assert!(lookups.in_scope("AC").is_empty());
    }

    #[test]
    fn test_invalid_population_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.csv");
        fs::write(
            &path,
            "CD_GEOCODM,NM_MUNICIP,SIGLA_ESTADO,POPULATION\n1,A,RJ,many\n",
        )
        .unwrap();
        let err = read_municipalities(&path).unwrap_err();
        assert!(matches!(err, LookupError::InvalidValue { row: 2, .. }));
    }
}
