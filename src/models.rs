//! Data models shared across the pipeline.
//!
//! This module contains the federation-unit table, municipality records
//! and the row types of every CSV table the tool reads or writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Country name used for Brazilian destinations.
pub const BRAZIL: &str = "BRASIL";

/// Destination geocode for "somewhere in Brazil, municipality unknown".
pub const UNKNOWN_IN_BRAZIL: &str = "9999999";

/// Destination geocode for work spread over several municipalities.
pub const SEVERAL_GEOCODE: &str = "SEVERAL";

/// Destination municipality label for work spread over several municipalities.
pub const MULTIPLE_DESTINATIONS: &str = "MULTIPLE DESTINATIONS";

/// Destination municipality label for an ignored destination.
pub const IGNORED: &str = "IGNORADO";

/// Label used when the destination FU is known but the municipality is not.
pub fn unknown_municipality_label(fu_acronym: &str) -> String {
    format!("{} NÃO SABE MUNICÍPIO", fu_acronym)
}

/// A Brazilian federation unit (state or federal district).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FederationUnit {
    /// Two-letter acronym, e.g. `RJ`.
    pub acronym: &'static str,
    /// Upper-case name as used in the IBGE movement tables.
    pub name: &'static str,
    /// Two-digit IBGE code, the first two digits of every geocode.
    pub code: &'static str,
}

impl fmt::Display for FederationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.acronym)
    }
}

macro_rules! fu {
    ($acr:literal, $name:literal, $code:literal) => {
        FederationUnit {
            acronym: $acr,
            name: $name,
            code: $code,
        }
    };
}

/// All 27 federation units.
pub const FEDERATION_UNITS: [FederationUnit; 27] = [
    fu!("RO", "RONDÔNIA", "11"),
    fu!("AC", "ACRE", "12"),
    fu!("AM", "AMAZONAS", "13"),
    fu!("RR", "RORAIMA", "14"),
    fu!("PA", "PARÁ", "15"),
    fu!("AP", "AMAPÁ", "16"),
    fu!("TO", "TOCANTINS", "17"),
    fu!("MA", "MARANHÃO", "21"),
    fu!("PI", "PIAUÍ", "22"),
    fu!("CE", "CEARÁ", "23"),
    fu!("RN", "RIO GRANDE DO NORTE", "24"),
    fu!("PB", "PARAÍBA", "25"),
    fu!("PE", "PERNAMBUCO", "26"),
    fu!("AL", "ALAGOAS", "27"),
    fu!("SE", "SERGIPE", "28"),
    fu!("BA", "BAHIA", "29"),
    fu!("MG", "MINAS GERAIS", "31"),
    fu!("ES", "ESPÍRITO SANTO", "32"),
    fu!("RJ", "RIO DE JANEIRO", "33"),
    fu!("SP", "SÃO PAULO", "35"),
    fu!("PR", "PARANÁ", "41"),
    fu!("SC", "SANTA CATARINA", "42"),
    fu!("RS", "RIO GRANDE DO SUL", "43"),
    fu!("MS", "MATO GROSSO DO SUL", "50"),
    fu!("MT", "MATO GROSSO", "51"),
    fu!("GO", "GOIÁS", "52"),
    fu!("DF", "DISTRITO FEDERAL", "53"),
];

impl FederationUnit {
    pub fn by_acronym(acronym: &str) -> Option<&'static FederationUnit> {
        FEDERATION_UNITS
            .iter()
            .find(|fu| fu.acronym.eq_ignore_ascii_case(acronym.trim()))
    }

    pub fn by_name(name: &str) -> Option<&'static FederationUnit> {
        let name = name.trim();
        FEDERATION_UNITS.iter().find(|fu| fu.name == name)
    }

    pub fn by_code(code: &str) -> Option<&'static FederationUnit> {
        FEDERATION_UNITS.iter().find(|fu| fu.code == code.trim())
    }
}

/// Expand a federation-unit request into matrix file prefixes.
///
/// `all` selects every FU. São Paulo's microdata ships in two parts, so
/// `SP` becomes `SP1` and `SP2-RM`.
pub fn expand_fu_request(requested: &[String]) -> Vec<String> {
    let mut out: Vec<String> = if requested.is_empty()
        || requested.iter().any(|r| r.eq_ignore_ascii_case("all"))
    {
        FEDERATION_UNITS
            .iter()
            .map(|fu| fu.acronym.to_string())
            .collect()
    } else {
        requested.to_vec()
    };

    if let Some(pos) = out.iter().position(|r| r == "SP") {
        out.remove(pos);
        out.push("SP1".to_string());
        out.push("SP2-RM".to_string());
    }
    out
}

/// True when a request list means "every federation unit".
pub fn is_all_request(requested: &[String]) -> bool {
    requested.is_empty() || requested.iter().any(|r| r.eq_ignore_ascii_case("all"))
}

/// A municipality from the 2010 municipality table.
#[derive(Debug, Clone, PartialEq)]
pub struct Municipality {
    pub geocode: String,
    pub name: String,
    /// FU acronym.
    pub fu: String,
    pub population: u64,
    /// Effective sampling fraction (0..1), when known.
    pub fraction: Option<f64>,
}

fn serialize_rounded<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(value.round() as i64)
}

/// One origin-destination row of the extracted mobility matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MobilityRow {
    #[serde(rename = "Origin geocode")]
    pub origin_geocode: String,
    #[serde(rename = "Origin Municipality")]
    pub origin_municipality: String,
    #[serde(rename = "Origin FU")]
    pub origin_fu: String,
    #[serde(rename = "Population")]
    pub population: u64,
    #[serde(rename = "Destination geocode")]
    pub destination_geocode: String,
    #[serde(rename = "Destination Country")]
    pub destination_country: String,
    #[serde(rename = "Destination FU")]
    pub destination_fu: String,
    #[serde(rename = "Destination Municipality")]
    pub destination_municipality: String,
    #[serde(rename = "Total", serialize_with = "serialize_rounded")]
    pub total: f64,
    #[serde(rename = "Std error", serialize_with = "serialize_rounded")]
    pub std_error: f64,
    #[serde(rename = "Error factor")]
    pub error_factor: f64,
    #[serde(rename = "Density")]
    pub density: f64,
}

/// One row of the redistributed mobility matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedistributedRow {
    #[serde(rename = "Origin geocode")]
    pub origin_geocode: String,
    #[serde(rename = "Origin Municipality")]
    pub origin_municipality: String,
    #[serde(rename = "Origin FU")]
    pub origin_fu: String,
    #[serde(rename = "Population")]
    pub population: u64,
    #[serde(rename = "Destination geocode")]
    pub destination_geocode: String,
    #[serde(rename = "Destination Country")]
    pub destination_country: String,
    #[serde(rename = "Destination FU")]
    pub destination_fu: String,
    #[serde(rename = "Destination Municipality")]
    pub destination_municipality: String,
    #[serde(rename = "Total orig")]
    pub total_orig: f64,
    #[serde(rename = "Std error orig")]
    pub std_error_orig: f64,
    #[serde(rename = "Error factor")]
    pub error_factor: f64,
    #[serde(rename = "Density orig")]
    pub density_orig: f64,
    #[serde(rename = "Total")]
    pub total: f64,
    #[serde(rename = "Std error")]
    pub std_error: f64,
    #[serde(rename = "Std error conserv")]
    pub std_error_conserv: f64,
    #[serde(rename = "Density")]
    pub density: f64,
}

impl RedistributedRow {
    /// Whether the destination is a Brazilian municipality.
    pub fn is_brazilian_destination(&self) -> bool {
        self.destination_country == BRAZIL
    }
}

/// One source-target pair of the extended mobility matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairRow {
    pub src: u32,
    pub srcname: String,
    pub srcfu: String,
    pub tgt: u32,
    pub tgtname: String,
    pub tgtfu: String,
    pub dist: f64,
    pub srcpop: u64,
    pub tgtpop: u64,
    pub flow: f64,
    pub error: f64,
    #[serde(rename = "Ti")]
    pub ti: f64,
}

/// A pair row with the fitted model estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRow {
    pub src: u32,
    pub srcname: String,
    pub srcfu: String,
    pub tgt: u32,
    pub tgtname: String,
    pub tgtfu: String,
    pub dist: f64,
    pub srcpop: u64,
    pub tgtpop: u64,
    pub flow: f64,
    pub error: f64,
    #[serde(rename = "Ti")]
    pub ti: f64,
    pub grav: f64,
    pub rad: f64,
}

impl ModelRow {
    pub fn from_pair(pair: &PairRow, grav: f64, rad: f64) -> Self {
        Self {
            src: pair.src,
            srcname: pair.srcname.clone(),
            srcfu: pair.srcfu.clone(),
            tgt: pair.tgt,
            tgtname: pair.tgtname.clone(),
            tgtfu: pair.tgtfu.clone(),
            dist: pair.dist,
            srcpop: pair.srcpop,
            tgtpop: pair.tgtpop,
            flow: pair.flow,
            error: pair.error,
            ti: pair.ti,
            grav,
            rad,
        }
    }
}

/// Aggregate inflow and outflow of one municipality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InOutTotal {
    #[serde(rename = "FU")]
    pub fu: String,
    #[serde(rename = "Municipality")]
    pub municipality: String,
    pub geocode: String,
    #[serde(rename = "Total in")]
    pub total_in: f64,
    #[serde(rename = "Total out")]
    pub total_out: f64,
    #[serde(rename = "Total")]
    pub total: f64,
}

/// Metadata of one command run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub command: String,
    pub started: DateTime<Utc>,
    pub duration_seconds: f64,
    pub data_dir: String,
    pub version: String,
}

/// What one pipeline step read, wrote and measured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    pub notes: Vec<String>,
}

impl StepOutcome {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn input(mut self, path: impl fmt::Display) -> Self {
        self.inputs.push(path.to_string());
        self
    }

    pub fn output(mut self, path: impl fmt::Display) -> Self {
        self.outputs.push(path.to_string());
        self
    }

    pub fn metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn note(mut self, text: impl Into<String>) -> Self {
        self.notes.push(text.into());
        self
    }
}

/// Report of a complete command run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub steps: Vec<StepOutcome>,
}
