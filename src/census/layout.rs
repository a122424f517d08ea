//! Positional layout dictionary for the person microdata.
//!
//! IBGE ships `Layout_microdados_Amostra-pessoa.csv` describing every
//! variable by its 1-based start/end position and the number of integer
//! and decimal digits. Only the variables the extraction needs are kept.

use crate::error::{LayoutError, RecordError};
use crate::tabular::{cell, fold_header, parse_records, read_text, Columns};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use tracing::debug;

/// Position of one variable inside a fixed-width record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Variable code, e.g. `V0010`.
    pub var: String,
    /// Descriptive name from the dictionary.
    pub name: String,
    /// 0-based byte range of the integer part.
    pub integer: Range<usize>,
    /// 0-based byte range of the decimal part, when the variable has one.
    pub decimal: Option<Range<usize>>,
}

impl Field {
    fn slice<'a>(
        &self,
        line: &'a [u8],
        range: &Range<usize>,
        line_no: u64,
    ) -> Result<&'a str, RecordError> {
        let bytes = line.get(range.clone()).ok_or_else(|| RecordError::Truncated {
            line: line_no,
            field: self.var.clone(),
            start: range.start,
            end: range.end,
            len: line.len(),
        })?;
        std::str::from_utf8(bytes).map_err(|_| RecordError::Encoding {
            line: line_no,
            field: self.var.clone(),
        })
    }

    /// Raw integer-part text of this field.
    pub fn integer<'a>(&self, line: &'a [u8], line_no: u64) -> Result<&'a str, RecordError> {
        self.slice(line, &self.integer, line_no)
    }

    /// Raw decimal-part text of this field, empty when it has none.
    pub fn decimal<'a>(&self, line: &'a [u8], line_no: u64) -> Result<&'a str, RecordError> {
        match &self.decimal {
            Some(range) => self.slice(line, range, line_no),
            None => Ok(""),
        }
    }
}

/// Layout of the variables selected from the dictionary.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    fields: HashMap<String, Field>,
}

impl Layout {
    /// Read the layout file and keep the `wanted` variables.
    pub fn from_path(path: &Path, wanted: &[&str]) -> Result<Self, LayoutError> {
        let text = read_text(path)?;
        Self::parse(&text, path, wanted)
    }

    /// Parse layout CSV text. `path` is only used in error messages.
    pub fn parse(text: &str, path: &Path, wanted: &[&str]) -> Result<Self, LayoutError> {
        let (first, rows) = parse_records(text, 0)?;

        // The header is the first row whose first cell is VAR; anything
        // above it is a title preamble.
        let mut all = std::iter::once(first).chain(rows);
        let header = all
            .by_ref()
            .find(|r| r.get(0).map(fold_header).as_deref() == Some("VAR"))
            .ok_or_else(|| LayoutError::MissingHeader {
                path: path.to_path_buf(),
            })?;

        let cols = Columns::from_record(&header);
        let col = |folded: &str| {
            cols.position(folded).ok_or_else(|| LayoutError::MissingColumn {
                path: path.to_path_buf(),
                column: folded.to_string(),
            })
        };
        let c_var = col("VAR")?;
        let c_name = col("NOME")?;
        let c_start = col("POSIOINICIAL")?;
        let c_end = col("POSIOFINAL")?;
        let c_int = col("INT")?;
        let c_dec = col("DEC")?;

        let mut fields = HashMap::new();
        for row in all {
            let var = cell(&row, c_var);
            if !wanted.contains(&var) {
                continue;
            }

            let number = |pos: usize, column: &str| -> Result<usize, LayoutError> {
                let value = cell(&row, pos);
                value.parse::<usize>().map_err(|_| LayoutError::InvalidPosition {
                    var: var.to_string(),
                    column: column.to_string(),
                    value: value.to_string(),
                })
            };

            let start = number(c_start, "POSIÇÃO INICIAL")?;
            if start == 0 {
                return Err(LayoutError::InvalidPosition {
                    var: var.to_string(),
                    column: "POSIÇÃO INICIAL".to_string(),
                    value: "0".to_string(),
                });
            }
            let int_len = number(c_int, "INT")?;
            let begin = start - 1;

            let decimal = if cell(&row, c_dec).is_empty() {
                None
            } else {
                let end = number(c_end, "POSIÇÃO FINAL")?;
                let dec_len = number(c_dec, "DEC")?;
                let from = end.checked_sub(dec_len).ok_or_else(|| {
                    LayoutError::InvalidPosition {
                        var: var.to_string(),
                        column: "DEC".to_string(),
                        value: dec_len.to_string(),
                    }
                })?;
                Some(from..end)
            };

            debug!("Layout {}: {}..{} dec {:?}", var, begin, begin + int_len, decimal);
            fields.insert(
                var.to_string(),
                Field {
                    var: var.to_string(),
                    name: cell(&row, c_name).to_string(),
                    integer: begin..begin + int_len,
                    decimal,
                },
            );
        }

        for var in wanted {
            if !fields.contains_key(*var) {
                return Err(LayoutError::MissingVariable {
                    path: path.to_path_buf(),
                    var: var.to_string(),
                });
            }
        }

        Ok(Self { fields })
    }

    /// Field for a variable code.
    pub fn get(&self, var: &str) -> Option<&Field> {
        self.fields.get(var)
    }

    /// Number of variables in this layout.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[allow(dead_code)] // Pairs with len()
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
