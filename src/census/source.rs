//! Microdata inputs: plain fixed-width text files or the zipped IBGE releases.

use crate::error::{RecordError, SourceError};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

const PERSON_FILE_PREFIX: &str = "Amostra_Pessoas_";

/// Where the person records are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Storage {
    Plain,
    /// Index of the person entry inside the archive.
    Zip { index: usize, entry: String },
}

/// One microdata input, with the prefix used to name its outputs.
#[derive(Debug, Clone)]
pub struct Microdata {
    pub path: PathBuf,
    /// `33`, `RJ`, `SP2-RM`...
    pub prefix: String,
    storage: Storage,
}

impl Microdata {
    /// Open a `.txt` or `.zip` microdata input.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SourceError::NoPrefix {
                path: path.to_path_buf(),
            })?;

        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);

        if !is_zip {
            let prefix = stem.strip_prefix(PERSON_FILE_PREFIX).unwrap_or(stem);
            if prefix.is_empty() {
                return Err(SourceError::NoPrefix {
                    path: path.to_path_buf(),
                });
            }
            return Ok(Self {
                path: path.to_path_buf(),
                prefix: prefix.to_string(),
                storage: Storage::Plain,
            });
        }

        let pattern = format!("{}/Pessoas/{}", stem, PERSON_FILE_PREFIX);
        let mut archive = ZipArchive::new(File::open(path)?)?;
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            if entry.is_file() && entry.name().contains(&pattern) {
                debug!("Using archive entry {}", entry.name());
                return Ok(Self {
                    path: path.to_path_buf(),
                    prefix: stem.to_string(),
                    storage: Storage::Zip {
                        index,
                        entry: entry.name().to_string(),
                    },
                });
            }
        }

        Err(SourceError::MissingEntry {
            archive: path.to_path_buf(),
            pattern,
        })
    }

    /// Human-readable description of what is being read.
    pub fn describe(&self) -> String {
        match &self.storage {
            Storage::Plain => self.path.display().to_string(),
            Storage::Zip { entry, .. } => format!("{}:{}", self.path.display(), entry),
        }
    }

    /// Stream every non-empty line to `visit` as raw bytes, with its 1-based
    /// line number. Returns the number of lines visited.
    pub fn for_each_line<F>(&self, visit: F) -> Result<u64, SourceError>
    where
        F: FnMut(u64, &[u8]) -> Result<(), RecordError>,
    {
        info!("Reading microdata from {}", self.describe());
        match &self.storage {
            Storage::Plain => {
                let file = File::open(&self.path)?;
                stream_lines(BufReader::new(file), visit)
            }
            Storage::Zip { index, .. } => {
                let mut archive = ZipArchive::new(File::open(&self.path)?)?;
                let entry = archive.by_index(*index)?;
                stream_lines(BufReader::new(entry), visit)
            }
        }
    }
}

fn stream_lines<R, F>(mut reader: BufReader<R>, mut visit: F) -> Result<u64, SourceError>
where
    R: Read,
    F: FnMut(u64, &[u8]) -> Result<(), RecordError>,
{
    let mut buf = Vec::with_capacity(512);
    let mut line_no = 0u64;
    let mut visited = 0u64;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        let mut line = buf.as_slice();
        while let [rest @ .., b'\n' | b'\r'] = line {
            line = rest;
        }
        if line.is_empty() {
            continue;
        }

        visit(line_no, line)?;
        visited += 1;
    }

    Ok(visited)
}
