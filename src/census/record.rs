//! Decoding of one person record from a fixed-width microdata line.

use super::layout::{Field, Layout};
use crate::error::{LayoutError, RecordError};
use std::path::Path;

/// Layout variables read by the extraction, with their short names.
pub const VARIABLES: [(&str, &str); 16] = [
    ("V0001", "res.fu"),
    ("V0002", "res.mun"),
    ("V0010", "weight"),
    ("V6036", "age"),
    ("V0628", "school"),
    ("V0636", "school.loc"),
    ("V6362", "school.fu"),
    ("V6364", "school.mun"),
    ("V6366", "school.cntry"),
    ("V0660", "work.loc"),
    ("V6602", "work.fu"),
    ("V6604", "work.mun"),
    ("V6606", "work.cntry"),
    ("V0661", "work.daily"),
    ("V0662", "work.desloc"),
    ("V6920", "work.occ"),
];

/// Where a destination lies, as the raw fixed-width codes.
///
/// Ordering is by country, FU, then municipality, which matches ordering
/// the concatenated key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DestinationKey {
    pub country: String,
    pub fu: String,
    pub municipality: String,
    /// Work spread over several municipalities.
    pub several: bool,
}

/// School location (V0636).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchoolLocation {
    SameMunicipality,
    OtherMunicipality,
    OtherCountry,
}

impl SchoolLocation {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::SameMunicipality),
            "2" => Some(Self::OtherMunicipality),
            "3" => Some(Self::OtherCountry),
            _ => None,
        }
    }

    /// Column label in the school tabulations.
    pub fn column(&self) -> SchoolColumn {
        match self {
            Self::SameMunicipality => SchoolColumn::SameMunicipality,
            Self::OtherMunicipality => SchoolColumn::OtherMunicipality,
            Self::OtherCountry => SchoolColumn::OtherCountry,
        }
    }
}

/// Work location (V0660).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkLocation {
    /// Codes 1 (at home) and 2 (elsewhere in the municipality).
    SameMunicipality,
    OtherMunicipality,
    OtherCountry,
    SeveralMunicipalities,
}

impl WorkLocation {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" | "2" => Some(Self::SameMunicipality),
            "3" => Some(Self::OtherMunicipality),
            "4" => Some(Self::OtherCountry),
            "5" => Some(Self::SeveralMunicipalities),
            _ => None,
        }
    }
}

/// Columns of the school-attendance tabulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchoolColumn {
    Total,
    Attending,
    SameMunicipality,
    OtherMunicipality,
    OtherCountry,
    NotAttending,
}

impl SchoolColumn {
    pub const ALL: [SchoolColumn; 6] = [
        SchoolColumn::Total,
        SchoolColumn::Attending,
        SchoolColumn::SameMunicipality,
        SchoolColumn::OtherMunicipality,
        SchoolColumn::OtherCountry,
        SchoolColumn::NotAttending,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn header(&self) -> &'static str {
        match self {
            SchoolColumn::Total => "Total",
            SchoolColumn::Attending => "School attendance",
            SchoolColumn::SameMunicipality => "School at same municipality",
            SchoolColumn::OtherMunicipality => "School at another municipality",
            SchoolColumn::OtherCountry => "School at another country",
            SchoolColumn::NotAttending => "Not attending school",
        }
    }
}

/// Resolved layout fields, looked up once before the pass.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    res_fu: Field,
    res_mun: Field,
    weight: Field,
    age: Field,
    school: Field,
    school_loc: Field,
    school_fu: Field,
    school_mun: Field,
    school_cntry: Field,
    work_loc: Field,
    work_fu: Field,
    work_mun: Field,
    work_cntry: Field,
    work_occ: Field,
}

impl RecordLayout {
    /// Load the dictionary and resolve every variable.
    pub fn from_path(path: &Path) -> Result<Self, LayoutError> {
        let wanted: Vec<&str> = VARIABLES.iter().map(|(var, _)| *var).collect();
        let layout = Layout::from_path(path, &wanted)?;
        Self::from_layout(&layout, path)
    }

    pub fn from_layout(layout: &Layout, path: &Path) -> Result<Self, LayoutError> {
        let get = |var: &str| {
            layout
                .get(var)
                .cloned()
                .ok_or_else(|| LayoutError::MissingVariable {
                    path: path.to_path_buf(),
                    var: var.to_string(),
                })
        };
        Ok(Self {
            res_fu: get("V0001")?,
            res_mun: get("V0002")?,
            weight: get("V0010")?,
            age: get("V6036")?,
            school: get("V0628")?,
            school_loc: get("V0636")?,
            school_fu: get("V6362")?,
            school_mun: get("V6364")?,
            school_cntry: get("V6366")?,
            work_loc: get("V0660")?,
            work_fu: get("V6602")?,
            work_mun: get("V6604")?,
            work_cntry: get("V6606")?,
            work_occ: get("V6920")?,
        })
    }

    /// Decode one line.
    pub fn decode(&self, line: &[u8], line_no: u64) -> Result<PersonRecord, RecordError> {
        let residence = format!(
            "{}{}",
            self.res_fu.integer(line, line_no)?,
            self.res_mun.integer(line, line_no)?
        );

        let weight_text = format!(
            "{}.{}",
            self.weight.integer(line, line_no)?.trim(),
            self.weight.decimal(line, line_no)?.trim()
        );
        let weight = weight_text
            .trim_end_matches('.')
            .parse::<f64>()
            .map_err(|_| RecordError::NotNumeric {
                line: line_no,
                field: self.weight.var.clone(),
                value: weight_text.clone(),
            })?;

        let age = parse_number(&self.age, line, line_no)?;
        let attends_school = parse_number(&self.school, line, line_no)? < 3;

        let school_code = self.school_loc.integer(line, line_no)?.trim();
        let school_location = if school_code.is_empty() {
            None
        } else {
            Some(SchoolLocation::from_code(school_code).ok_or_else(|| {
                RecordError::UnknownCode {
                    line: line_no,
                    field: self.school_loc.var.clone(),
                    value: school_code.to_string(),
                }
            })?)
        };
        let school_destination = match school_location {
            Some(SchoolLocation::OtherMunicipality) | Some(SchoolLocation::OtherCountry) => {
                Some(DestinationKey {
                    country: self.school_cntry.integer(line, line_no)?.to_string(),
                    fu: self.school_fu.integer(line, line_no)?.to_string(),
                    municipality: self.school_mun.integer(line, line_no)?.to_string(),
                    several: false,
                })
            }
            _ => None,
        };

        let worker = self.work_occ.integer(line, line_no)? == "1";

        let work_code = self.work_loc.integer(line, line_no)?.trim();
        let work_location = if work_code.is_empty() {
            None
        } else {
            Some(WorkLocation::from_code(work_code).ok_or_else(|| {
                RecordError::UnknownCode {
                    line: line_no,
                    field: self.work_loc.var.clone(),
                    value: work_code.to_string(),
                }
            })?)
        };
        let work_destination = match work_location {
            Some(WorkLocation::SameMunicipality) | None => None,
            Some(location) => Some(DestinationKey {
                country: self.work_cntry.integer(line, line_no)?.to_string(),
                fu: self.work_fu.integer(line, line_no)?.to_string(),
                municipality: self.work_mun.integer(line, line_no)?.to_string(),
                several: location == WorkLocation::SeveralMunicipalities,
            }),
        };

        Ok(PersonRecord {
            residence,
            weight,
            age,
            attends_school,
            school_location,
            school_destination,
            worker,
            work_location,
            work_destination,
        })
    }
}

fn parse_number(field: &Field, line: &[u8], line_no: u64) -> Result<u32, RecordError> {
    let text = field.integer(line, line_no)?.trim();
    text.parse::<u32>().map_err(|_| RecordError::NotNumeric {
        line: line_no,
        field: field.var.clone(),
        value: text.to_string(),
    })
}

/// One person, as far as the mobility tabulation is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRecord {
    /// Residence geocode (FU code + municipality code).
    pub residence: String,
    /// Sample weight.
    pub weight: f64,
    /// Age in years.
    pub age: u32,
    pub attends_school: bool,
    pub school_location: Option<SchoolLocation>,
    /// Set when studying outside the residence municipality.
    pub school_destination: Option<DestinationKey>,
    pub worker: bool,
    pub work_location: Option<WorkLocation>,
    /// Set when working outside the residence municipality.
    pub work_destination: Option<DestinationKey>,
}

impl PersonRecord {
    /// Destination of the daily commute, if any. Work takes precedence.
    pub fn commute_destination(&self) -> Option<&DestinationKey> {
        self.work_destination
            .as_ref()
            .or(self.school_destination.as_ref())
    }
}
