//! Input discovery under the data directory.
//!
//! Finds per-FU mobility matrices for the redistribution step and the
//! microdata inputs for `extract --all`.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

const MATRIX_SUFFIX: &str = "-mobility-matrix-microdata.csv";
const PERSON_FILE_PREFIX: &str = "Amostra_Pessoas_";

/// Configuration for scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Directory names never descended into.
    pub excludes: Vec<String>,
    /// Maximum directory depth below the root.
    pub max_depth: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            excludes: vec!["target", "output", "__pycache__"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_depth: 4,
        }
    }
}

/// Scanner rooted at the data directory.
pub struct InputScanner {
    config: ScanConfig,
    root: PathBuf,
}

impl InputScanner {
    pub fn new(root: PathBuf, config: ScanConfig) -> Self {
        Self { config, root }
    }

    /// Every file below the root, skipping hidden and excluded directories.
    fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .max_depth(self.config.max_depth)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded(e))
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    debug!("Skipping unreadable entry: {}", err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(DirEntry::into_path)
            .collect();
        files.sort();
        files
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return true;
        }
        entry.file_type().is_dir() && self.config.excludes.iter().any(|p| name == p.as_str())
    }

    /// `{FU}-mobility-matrix-microdata.csv` for each requested extraction
    /// prefix, in request order. Fails when any is missing.
    pub fn matrices(&self, prefixes: &[String]) -> Result<Vec<PathBuf>> {
        let files = self.files();
        let mut found = Vec::with_capacity(prefixes.len());
        let mut missing = Vec::new();

        for prefix in prefixes {
            let name = format!("{}{}", prefix, MATRIX_SUFFIX);
            let hits: Vec<&PathBuf> = files.iter().filter(|p| file_name(p) == name).collect();
            match hits.as_slice() {
                [] => missing.push(name),
                [only] => found.push((*only).clone()),
                [first, ..] => {
                    warn!(
                        "{} copies of {} found; using {}",
                        hits.len(),
                        name,
                        first.display()
                    );
                    found.push((*first).clone());
                }
            }
        }

        if !missing.is_empty() {
            bail!(
                "mobility matrices not found under {}: {}",
                self.root.display(),
                missing.join(", ")
            );
        }
        Ok(found)
    }

    /// Microdata inputs: `Amostra_Pessoas_*.txt` files and `.zip` releases.
    pub fn microdata(&self) -> Vec<PathBuf> {
        self.files()
            .into_iter()
            .filter(|p| is_microdata(p))
            .collect()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn is_microdata(path: &Path) -> bool {
    let name = file_name(path);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "zip" => true,
        "txt" => name.starts_with(PERSON_FILE_PREFIX),
        _ => false,
    }
}
