//! Origin/destination filtering of a mobility matrix and in/out totals.

use crate::error::MatrixError;
use crate::models::{InOutTotal, SEVERAL_GEOCODE};
use crate::tabular::{is_null, read_text, write_rows};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const FLOW_MATRIX_FILE: &str = "flowmatrix.csv";
pub const TOTALS_FILE: &str = "totalinoutflow.csv";

const ORIGIN_KEY: [&str; 3] = ["Origin FU", "Origin Municipality", "Origin geocode"];
const DESTINATION_KEY: [&str; 3] = [
    "Destination FU",
    "Destination Municipality",
    "Destination geocode",
];
const TOTAL: &str = "Total";

/// Filter columns and accepted values. An empty value list leaves that side
/// unfiltered.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRequest {
    pub colsrc: String,
    pub valsrc: Vec<String>,
    pub coltgt: String,
    pub valtgt: Vec<String>,
}

impl Default for FilterRequest {
    fn default() -> Self {
        Self {
            colsrc: "Origin FU".to_string(),
            valsrc: Vec::new(),
            coltgt: "Destination FU".to_string(),
            valtgt: Vec::new(),
        }
    }
}

/// A matrix read as raw records, whatever its column set.
#[derive(Debug, Clone)]
pub struct Matrix {
    pub path: PathBuf,
    pub header: StringRecord,
    pub rows: Vec<StringRecord>,
}

impl Matrix {
    pub fn read(path: &Path, sep: u8) -> Result<Self, MatrixError> {
        let text = read_text(path)?;
        let mut reader = ReaderBuilder::new()
            .delimiter(sep)
            .flexible(true)
            .from_reader(text.as_bytes());
        let header = reader.headers()?.clone();
        let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
        debug!("Read {} rows from {}", rows.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            header,
            rows,
        })
    }

    pub fn column(&self, name: &str) -> Result<usize, MatrixError> {
        self.header
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| MatrixError::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })
    }
}

/// Rows kept by a filter and the aggregate totals.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub flows: Vec<StringRecord>,
    pub totals: Vec<InOutTotal>,
}

fn value(row: &StringRecord, pos: usize) -> &str {
    row.get(pos).map(str::trim).unwrap_or("")
}

/// Numeric geocodes lose their float formatting (`3304557.0`).
fn normalize_geocode(code: &str) -> String {
    match code.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && v >= 0.0 => format!("{}", v as u64),
        _ => code.to_string(),
    }
}

fn parse_total(matrix: &Matrix, row: &StringRecord, pos: usize, line: usize) -> Result<f64, MatrixError> {
    let text = value(row, pos);
    if is_null(text) {
        return Ok(0.0);
    }
    text.parse::<f64>().map_err(|_| MatrixError::InvalidValue {
        path: matrix.path.clone(),
        row: line,
        column: TOTAL.to_string(),
        value: text.to_string(),
    })
}

type Key = (String, String, String);

fn group(
    matrix: &Matrix,
    rows: &[(usize, &StringRecord)],
    columns: [usize; 3],
    total: usize,
    keep: impl Fn(&str) -> bool,
) -> Result<BTreeMap<Key, f64>, MatrixError> {
    let mut sums = BTreeMap::new();
    for &(line, row) in rows {
        let geocode = value(row, columns[2]);
        if !keep(geocode) {
            continue;
        }
        let key = (
            value(row, columns[0]).to_string(),
            value(row, columns[1]).to_string(),
            normalize_geocode(geocode),
        );
        *sums.entry(key).or_insert(0.0) += parse_total(matrix, row, total, line)?;
    }
    Ok(sums)
}

/// Apply the filter.
///
/// Totals use rows matching the source OR the target values; the flow
/// matrix keeps rows matching both when both sides are given.
pub fn apply(matrix: &Matrix, request: &FilterRequest) -> Result<FilterOutcome, MatrixError> {
    let c_src = matrix.column(&request.colsrc)?;
    let c_tgt = matrix.column(&request.coltgt)?;
    let origin = key_columns(matrix, ORIGIN_KEY)?;
    let destination = key_columns(matrix, DESTINATION_KEY)?;
    let c_total = matrix.column(TOTAL)?;

    let src_match = |row: &StringRecord| request.valsrc.iter().any(|v| v == value(row, c_src));
    let tgt_match = |row: &StringRecord| request.valtgt.iter().any(|v| v == value(row, c_tgt));
    let has_src = !request.valsrc.is_empty();
    let has_tgt = !request.valtgt.is_empty();

    // Data rows start on line 2.
    let selected: Vec<(usize, &StringRecord)> = matrix
        .rows
        .iter()
        .enumerate()
        .map(|(i, r)| (i + 2, r))
        .filter(|(_, r)| match (has_src, has_tgt) {
            (true, true) => src_match(r) || tgt_match(r),
            (true, false) => src_match(r),
            (false, true) => tgt_match(r),
            (false, false) => true,
        })
        .collect();

    let outgoing: Vec<_> = selected
        .iter()
        .copied()
        .filter(|(_, r)| !has_src || src_match(r))
        .collect();
    let incoming: Vec<_> = selected
        .iter()
        .copied()
        .filter(|(_, r)| !has_tgt || tgt_match(r))
        .collect();

    let out = group(matrix, &outgoing, origin, c_total, |g| !is_null(g))?;
    let inflow = group(matrix, &incoming, destination, c_total, |g| {
        !is_null(g) && g != SEVERAL_GEOCODE
    })?;

    let mut joined: BTreeMap<Key, (f64, f64)> = BTreeMap::new();
    for (key, v) in inflow {
        joined.entry(key).or_default().0 += v;
    }
    for (key, v) in out {
        joined.entry(key).or_default().1 += v;
    }
    let totals = joined
        .into_iter()
        .map(|((fu, municipality, geocode), (total_in, total_out))| InOutTotal {
            fu,
            municipality,
            geocode,
            total_in,
            total_out,
            total: total_in + total_out,
        })
        .collect();

    let flows = selected
        .into_iter()
        .filter(|(_, r)| !(has_src && has_tgt) || (src_match(r) && tgt_match(r)))
        .map(|(_, r)| r.clone())
        .collect();

    Ok(FilterOutcome { flows, totals })
}

fn key_columns(matrix: &Matrix, names: [&str; 3]) -> Result<[usize; 3], MatrixError> {
    Ok([
        matrix.column(names[0])?,
        matrix.column(names[1])?,
        matrix.column(names[2])?,
    ])
}

/// Paths written by [`write_outputs`].
#[derive(Debug, Clone)]
pub struct FilterOutputs {
    pub flow_matrix: PathBuf,
    pub totals: PathBuf,
}

/// Write `flowmatrix.csv` and `totalinoutflow.csv` into `dir`.
pub fn write_outputs(dir: &Path, matrix: &Matrix, outcome: &FilterOutcome) -> Result<FilterOutputs, MatrixError> {
    let flow_matrix = dir.join(FLOW_MATRIX_FILE);
    let mut writer = WriterBuilder::new().flexible(true).from_path(&flow_matrix)?;
    writer.write_record(&matrix.header)?;
    for row in &outcome.flows {
        writer.write_record(row)?;
    }
    writer.flush()?;

    let totals = dir.join(TOTALS_FILE);
    write_rows(&totals, &outcome.totals)?;

    info!(
        "Wrote {} flows to {} and {} totals to {}",
        outcome.flows.len(),
        flow_matrix.display(),
        outcome.totals.len(),
        totals.display()
    );
    Ok(FilterOutputs { flow_matrix, totals })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::read_rows;
    use tempfile::TempDir;

    const MATRIX: &str = "\
Origin geocode,Origin Municipality,Origin FU,Destination geocode,Destination FU,Destination Municipality,Total
3304557,Rio de Janeiro,RJ,3303302,RJ,Niterói,100
3304557,Rio de Janeiro,RJ,3550308,SP,São Paulo,40
3303302,Niterói,RJ,3304557,RJ,Rio de Janeiro,300
3550308,São Paulo,SP,3304557,RJ,Rio de Janeiro,50
3550308,São Paulo,SP,SEVERAL,SP,MULTIPLE DESTINATIONS,7
3106200,Belo Horizonte,MG,3550308,SP,São Paulo,20
";

    fn create_test_matrix(dir: &Path) -> Matrix {
        let path = dir.join("matrix.csv");
        std::fs::write(&path, MATRIX).unwrap();
        Matrix::read(&path, b',').unwrap()
    }

    fn request(valsrc: &[&str], valtgt: &[&str]) -> FilterRequest {
        FilterRequest {
            valsrc: valsrc.iter().map(|s| s.to_string()).collect(),
            valtgt: valtgt.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn find<'a>(totals: &'a [InOutTotal], geocode: &str) -> &'a InOutTotal {
        totals.iter().find(|t| t.geocode == geocode).unwrap()
    }

    #[test]
    fn test_source_only() {
        let tmp = TempDir::new().unwrap();
        let matrix = create_test_matrix(tmp.path());
        let outcome = apply(&matrix, &request(&["SP"], &[])).unwrap();

        assert_eq!(outcome.flows.len(), 2);
        let sp = find(&outcome.totals, "3550308");
        assert_eq!(sp.total_out, 57.0);
        // Inflow over all selected rows; SEVERAL is dropped.
        let rio = find(&outcome.totals, "3304557");
        assert_eq!(rio.total_in, 50.0);
        assert_eq!(rio.total_out, 0.0);
        assert!(outcome.totals.iter().all(|t| t.geocode != "SEVERAL"));
    }

    #[test]
    fn test_both_sides_or_for_totals_and_for_flows() {
        let tmp = TempDir::new().unwrap();
        let matrix = create_test_matrix(tmp.path());
        let outcome = apply(&matrix, &request(&["RJ"], &["SP"])).unwrap();

        // Flow matrix: origin RJ and destination SP.
        assert_eq!(outcome.flows.len(), 1);
        assert_eq!(&outcome.flows[0][1], "Rio de Janeiro");

        let rio = find(&outcome.totals, "3304557");
        assert_eq!(rio.total_out, 140.0);
        assert_eq!(rio.total_in, 0.0);
        let sp = find(&outcome.totals, "3550308");
        assert_eq!(sp.total_in, 60.0);
        assert_eq!(sp.total, 60.0);
        let niteroi = find(&outcome.totals, "3303302");
        assert_eq!(niteroi.total_out, 300.0);
    }

    #[test]
    fn test_no_filter_keeps_everything() {
        let tmp = TempDir::new().unwrap();
        let matrix = create_test_matrix(tmp.path());
        let outcome = apply(&matrix, &FilterRequest::default()).unwrap();
        assert_eq!(outcome.flows.len(), 6);
        let rio = find(&outcome.totals, "3304557");
        assert_eq!(rio.total_in, 350.0);
        assert_eq!(rio.total_out, 140.0);
        assert_eq!(rio.total, 490.0);
    }

    #[test]
    fn test_unknown_column_is_error() {
        let tmp = TempDir::new().unwrap();
        let matrix = create_test_matrix(tmp.path());
        let req = FilterRequest {
            colsrc: "Origin Region".to_string(),
            ..request(&["SE"], &[])
        };
        let err = apply(&matrix, &req).unwrap_err();
        assert!(matches!(err, MatrixError::MissingColumn { ref column, .. } if column == "Origin Region"));
    }

    #[test]
    fn test_semicolon_separator_and_outputs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("matrix.csv");
        std::fs::write(&path, MATRIX.replace(',', ";")).unwrap();
        let matrix = Matrix::read(&path, b';').unwrap();
        let outcome = apply(&matrix, &request(&["MG"], &[])).unwrap();

        let outputs = write_outputs(tmp.path(), &matrix, &outcome).unwrap();
        let flows = std::fs::read_to_string(&outputs.flow_matrix).unwrap();
        assert!(flows.starts_with("Origin geocode,"));
        assert_eq!(flows.lines().count(), 2);

        let totals: Vec<InOutTotal> = read_rows(&outputs.totals).unwrap();
        assert_eq!(find(&totals, "3106200").total_out, 20.0);
    }
}
