//! Extraction pass: weighted tabulation of the person microdata.
//!
//! Every counter is a sum of sample weights. A single streaming pass fills,
//! per residence municipality, the population split (fixed / mobile), the
//! school-attendance tables by employment status (10 years or older) and by
//! age group (under 10), and the sparse origin-destination map.

use crate::census::record::{SchoolColumn, WorkLocation};
use crate::census::{DestinationKey, Microdata, PersonRecord, RecordLayout};
use crate::error::{RecordError, SourceError};
use crate::progress;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Rows of the employment-status table, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkStatus {
    Total,
    Worker,
    SameMunicipality,
    OtherMunicipality,
    OtherCountry,
    SeveralMunicipalities,
    NonWorker,
}

impl WorkStatus {
    pub const ALL: [WorkStatus; 7] = [
        WorkStatus::Total,
        WorkStatus::Worker,
        WorkStatus::SameMunicipality,
        WorkStatus::OtherMunicipality,
        WorkStatus::OtherCountry,
        WorkStatus::SeveralMunicipalities,
        WorkStatus::NonWorker,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            WorkStatus::Total => "Total",
            WorkStatus::Worker => "Worker",
            WorkStatus::SameMunicipality => "Work at same municipality",
            WorkStatus::OtherMunicipality => "Work at other municipality",
            WorkStatus::OtherCountry => "Work at other country",
            WorkStatus::SeveralMunicipalities => "Work at several municipalities",
            WorkStatus::NonWorker => "Non-worker",
        }
    }

    fn from_location(location: WorkLocation) -> Self {
        match location {
            WorkLocation::SameMunicipality => WorkStatus::SameMunicipality,
            WorkLocation::OtherMunicipality => WorkStatus::OtherMunicipality,
            WorkLocation::OtherCountry => WorkStatus::OtherCountry,
            WorkLocation::SeveralMunicipalities => WorkStatus::SeveralMunicipalities,
        }
    }
}

/// Rows of the under-10 table. Output order is `0-4`, `5-9`, `Total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AgeGroup {
    UpToFour,
    FiveToNine,
    Total,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 3] = [AgeGroup::UpToFour, AgeGroup::FiveToNine, AgeGroup::Total];

    pub fn label(&self) -> &'static str {
        match self {
            AgeGroup::UpToFour => "0-4",
            AgeGroup::FiveToNine => "5-9",
            AgeGroup::Total => "Total",
        }
    }
}

/// One row of a school-attendance table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SchoolCounts([f64; 6]);

impl SchoolCounts {
    pub fn add(&mut self, column: SchoolColumn, weight: f64) {
        self.0[column.index()] += weight;
    }

    pub fn get(&self, column: SchoolColumn) -> f64 {
        self.0[column.index()]
    }
}

/// Weighted population of a residence municipality.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Population {
    pub total: f64,
    /// Works and studies in the residence municipality.
    pub fixed: f64,
    /// Works or studies elsewhere.
    pub mobile: f64,
}

/// Every accumulator for one residence municipality.
#[derive(Debug, Clone, Default)]
pub struct MunicipalityTables {
    pub population: Population,
    tab3605: [SchoolCounts; 7],
    tab3599: [SchoolCounts; 3],
    /// Weighted flow per destination.
    pub flows: BTreeMap<DestinationKey, f64>,
}

impl MunicipalityTables {
    pub fn employment(&self, status: WorkStatus) -> &SchoolCounts {
        &self.tab3605[status as usize]
    }

    pub fn age_group(&self, group: AgeGroup) -> &SchoolCounts {
        &self.tab3599[group as usize]
    }

    fn employment_mut(&mut self, status: WorkStatus) -> &mut SchoolCounts {
        &mut self.tab3605[status as usize]
    }

    fn age_group_mut(&mut self, group: AgeGroup) -> &mut SchoolCounts {
        &mut self.tab3599[group as usize]
    }

    /// Sum of the weighted flows to every destination.
    pub fn flow_total(&self) -> f64 {
        self.flows.values().sum()
    }

    fn add(&mut self, rec: &PersonRecord) {
        let w = rec.weight;
        self.population.total += w;

        match rec.commute_destination() {
            None => self.population.fixed += w,
            Some(dest) => {
                self.population.mobile += w;
                *self.flows.entry(dest.clone()).or_insert(0.0) += w;
            }
        }

        // School-location bucket, only meaningful while attending.
        let school_column = if rec.attends_school {
            rec.school_location.map(|loc| loc.column())
        } else {
            None
        };

        if rec.age < 10 {
            let group = if rec.age < 5 {
                AgeGroup::UpToFour
            } else {
                AgeGroup::FiveToNine
            };
            for row in [AgeGroup::Total, group] {
                let counts = self.age_group_mut(row);
                counts.add(SchoolColumn::Total, w);
                if rec.attends_school {
                    counts.add(SchoolColumn::Attending, w);
                    if let Some(col) = school_column {
                        counts.add(col, w);
                    }
                } else {
                    counts.add(SchoolColumn::NotAttending, w);
                }
            }
            return;
        }

        let total = self.employment_mut(WorkStatus::Total);
        total.add(SchoolColumn::Total, w);
        if rec.attends_school {
            total.add(SchoolColumn::Attending, w);
            if let Some(col) = school_column {
                total.add(col, w);
            }
        } else {
            total.add(SchoolColumn::NotAttending, w);
        }

        let mut rows = Vec::with_capacity(2);
        if rec.worker {
            rows.push(WorkStatus::Worker);
            if let Some(location) = rec.work_location {
                rows.push(WorkStatus::from_location(location));
            }
        } else {
            rows.push(WorkStatus::NonWorker);
        }

        for row in rows {
            let counts = self.employment_mut(row);
            counts.add(SchoolColumn::Total, w);
            if rec.attends_school {
                counts.add(SchoolColumn::Attending, w);
                if let Some(col) = school_column {
                    counts.add(col, w);
                }
            } else {
                counts.add(SchoolColumn::NotAttending, w);
            }
        }
    }
}

/// Result of one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Output file prefix.
    pub prefix: String,
    /// Accumulators keyed by residence geocode.
    pub municipalities: BTreeMap<String, MunicipalityTables>,
    /// Records processed.
    pub records: u64,
}

impl Extraction {
    /// Empty accumulators for every in-scope municipality.
    pub fn new<I>(prefix: &str, geocodes: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            prefix: prefix.to_string(),
            municipalities: geocodes
                .into_iter()
                .map(|g| (g, MunicipalityTables::default()))
                .collect(),
            records: 0,
        }
    }

    /// Add one record. Records residing outside the scope are an error.
    pub fn add(&mut self, rec: &PersonRecord, line_no: u64) -> Result<(), RecordError> {
        let tables = self
            .municipalities
            .get_mut(&rec.residence)
            .ok_or_else(|| RecordError::OutOfScope {
                line: line_no,
                geocode: rec.residence.clone(),
            })?;
        tables.add(rec);
        self.records += 1;
        Ok(())
    }

    /// Total weighted population over all municipalities.
    pub fn population_total(&self) -> f64 {
        self.municipalities
            .values()
            .map(|t| t.population.total)
            .sum()
    }

    /// Number of distinct origin-destination pairs.
    pub fn pair_count(&self) -> usize {
        self.municipalities.values().map(|t| t.flows.len()).sum()
    }
}

/// Stream a microdata input through the extraction accumulators.
pub fn run_extraction(
    source: &Microdata,
    layout: &RecordLayout,
    geocodes: Vec<String>,
    show_progress: bool,
) -> Result<Extraction, SourceError> {
    info!(
        "Extracting {} ({} municipalities in scope)",
        source.prefix,
        geocodes.len()
    );
    let mut extraction = Extraction::new(&source.prefix, geocodes);
    let pb = progress::spinner(show_progress, "records");

    let result = source.for_each_line(|line_no, line| {
        let rec = layout.decode(line, line_no)?;
        extraction.add(&rec, line_no)?;
        pb.inc(1);
        Ok(())
    });
    pb.finish_and_clear();
    result?;

    debug!(
        "{}: {} records, weighted population {:.0}, {} destination pairs",
        extraction.prefix,
        extraction.records,
        extraction.population_total(),
        extraction.pair_count()
    );
    Ok(extraction)
}
