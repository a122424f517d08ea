//! Shared helpers for the census CSV tables.
//!
//! IBGE tables come in a mix of UTF-8 and ISO-8859-1, often with a
//! title preamble above the header row. Headers are matched by their
//! folded form (ASCII alphanumerics, upper-cased) so that `Código`,
//! `CÓDIGOS` and a Latin-1 `C\xd3DIGOS` all resolve to the same key.

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Read a whole text file, decoding as UTF-8 and falling back to ISO-8859-1.
pub fn read_text(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(decode_text(bytes))
}

/// Decode bytes as UTF-8, or as ISO-8859-1 when they are not valid UTF-8.
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    }
}

/// Fold a header cell to its lookup key.
pub fn fold_header(cell: &str) -> String {
    cell.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// True for the values pandas would read back as missing.
pub fn is_null(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v == "NA" || v == "NaN" || v == "nan"
}

/// Column positions keyed by folded header name.
#[derive(Debug, Clone, Default)]
pub struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    pub fn from_record(header: &StringRecord) -> Self {
        let index = header
            .iter()
            .enumerate()
            .map(|(i, cell)| (fold_header(cell), i))
            .collect();
        Self { index }
    }

    /// Position of the column whose folded name equals `folded`.
    pub fn position(&self, folded: &str) -> Option<usize> {
        self.index.get(folded).copied()
    }

    /// Position of the first column whose folded name starts with `prefix`.
    pub fn position_prefix(&self, prefix: &str) -> Option<usize> {
        let mut hits: Vec<(&String, &usize)> = self
            .index
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .collect();
        hits.sort_by_key(|(_, pos)| **pos);
        hits.first().map(|(_, pos)| **pos)
    }
}

/// Parse CSV text into records after skipping `skip_lines` preamble lines.
///
/// The first remaining record is returned as the header.
pub fn parse_records(
    text: &str,
    skip_lines: usize,
) -> Result<(StringRecord, Vec<StringRecord>), csv::Error> {
    let body: String = text
        .lines()
        .skip(skip_lines)
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut records = reader.records();
    let header = match records.next() {
        Some(h) => h?,
        None => StringRecord::new(),
    };
    let rows = records.collect::<Result<Vec<_>, _>>()?;
    Ok((header, rows))
}

/// Cell `pos` of a record, trimmed; empty when the record is short.
pub fn cell(record: &StringRecord, pos: usize) -> &str {
    record.get(pos).map(str::trim).unwrap_or("")
}

/// Deserialize every row of a headed CSV file.
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, csv::Error> {
    let text = read_text(path)?;
    let mut reader = ReaderBuilder::new().from_reader(text.as_bytes());
    reader.deserialize().collect()
}

/// Column names of a row type, taken from serializing its default value.
fn header_of<T: Serialize + Default>() -> Result<StringRecord, csv::Error> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.serialize(T::default())?;
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    let mut reader = ReaderBuilder::new().from_reader(bytes.as_slice());
    Ok(reader.headers()?.clone())
}

/// Serialize rows to a CSV file with a header line. An empty table still
/// gets its header.
pub fn write_rows<T: Serialize + Default>(path: &Path, rows: &[T]) -> Result<(), csv::Error> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    if rows.is_empty() {
        writer.write_record(&header_of::<T>()?)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_header_ignores_accents_and_encoding() {
        assert_eq!(fold_header("Código"), "CDIGO");
        assert_eq!(fold_header("CÓDIGOS"), "CDIGOS");
        assert_eq!(fold_header("POSIÇÃO INICIAL"), "POSIOINICIAL");
        assert_eq!(fold_header("Fração_efetiva"), "FRAOEFETIVA");
    }

    #[test]
    fn test_decode_latin1_fallback() {
        let bytes = vec![b'C', 0xD3, b'D'];
        assert_eq!(decode_text(bytes), "CÓD");
        assert_eq!(decode_text("São".as_bytes().to_vec()), "São");
    }

    #[test]
    fn test_parse_records_skips_preamble() {
        let text = "Title line\nAnother\nA,B\n1,2\n3,4\n";
        let (header, rows) = parse_records(text, 2).unwrap();
        assert_eq!(header.get(0), Some("A"));
        assert_eq!(rows.len(), 2);
        assert_eq!(cell(&rows[1], 1), "4");
        assert_eq!(cell(&rows[1], 5), "");
    }

    #[test]
    fn test_columns_lookup() {
        let header = StringRecord::from(vec!["VAR", "POSIÇÃO INICIAL", "POSIÇÃO FINAL"]);
        let cols = Columns::from_record(&header);
        assert_eq!(cols.position("VAR"), Some(0));
        assert_eq!(cols.position("POSIOFINAL"), Some(2));
        assert_eq!(cols.position_prefix("POSIO"), Some(1));
        assert_eq!(cols.position("NOME"), None);
    }

    #[test]
    fn test_rows_round_trip_through_file() {
        #[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Row {
            #[serde(rename = "Name")]
            name: String,
            value: f64,
        }

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("rows.csv");
        let rows = vec![
            Row { name: "Niterói".to_string(), value: 1.5 },
            Row { name: "Rio".to_string(), value: 2.0 },
        ];
        write_rows(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Name,value\n"));
        assert_eq!(read_rows::<Row>(&path).unwrap(), rows);
    }

    #[test]
    fn test_is_null() {
        assert!(is_null(""));
        assert!(is_null("NA"));
        assert!(is_null("  "));
        assert!(!is_null("IGNORADO"));
    }

    #[test]
    fn test_empty_table_keeps_header() {
        #[derive(Debug, Default, serde::Serialize)]
        struct Total {
            #[serde(rename = "FU")]
            fu: String,
            #[serde(rename = "Total in")]
            total_in: f64,
            rank: Option<usize>,
        }

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("empty.csv");
        write_rows::<Total>(&path, &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "FU,Total in,rank\n");
    }
}
