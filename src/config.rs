//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.pendular.toml` files.

use crate::spatial::fit::Grid;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = ".pendular.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    /// Lookup table file names, relative to the data directory.
    #[serde(default)]
    pub lookups: LookupConfig,

    #[serde(default)]
    pub gravity: GravityConfig,

    #[serde(default)]
    pub radiation: RadiationConfig,

    #[serde(default)]
    pub threshold: ThresholdConfig,

    #[serde(default)]
    pub histogram: HistogramConfig,

    #[serde(default)]
    pub capitals: CapitalsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory holding inputs and receiving outputs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Worker threads for parallel passes. 0 lets rayon decide.
    #[serde(default)]
    pub threads: usize,

    /// Show progress bars.
    #[serde(default = "default_true")]
    pub progress: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            verbose: false,
            threads: 0,
            progress: true,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    #[serde(default = "default_layout")]
    pub layout: String,
    #[serde(default = "default_movement_municipalities")]
    pub movement_municipalities: String,
    #[serde(default = "default_federation_units")]
    pub federation_units: String,
    #[serde(default = "default_countries")]
    pub countries: String,
    #[serde(default = "default_municipalities")]
    pub municipalities: String,
    #[serde(default = "default_fractions")]
    pub fractions: String,
    /// Output of `distance` on the centroid table.
    #[serde(default = "default_distances")]
    pub distances: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            layout: default_layout(),
            movement_municipalities: default_movement_municipalities(),
            federation_units: default_federation_units(),
            countries: default_countries(),
            municipalities: default_municipalities(),
            fractions: default_fractions(),
            distances: default_distances(),
        }
    }
}

fn default_layout() -> String {
    "Layout_microdados_Amostra-pessoa.csv".to_string()
}

fn default_movement_municipalities() -> String {
    "migration_and_movement_municipalities-2010.csv".to_string()
}

fn default_federation_units() -> String {
    "migration_and_movement_federation_units-2010.csv".to_string()
}

fn default_countries() -> String {
    "migration_and_movement_foreign_countries-2010.csv".to_string()
}

fn default_municipalities() -> String {
    "Brazil-municipalities-2010.csv".to_string()
}

fn default_fractions() -> String {
    "Fractions.csv".to_string()
}

fn default_distances() -> String {
    "Brazil-municipalities-2010-centroids-distancias.csv".to_string()
}

/// Gravity grid bounds, endpoints included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GravityConfig {
    #[serde(default = "default_beta_min")]
    pub beta_min: f64,
    #[serde(default = "default_beta_max")]
    pub beta_max: f64,
    #[serde(default = "default_beta_steps")]
    pub beta_steps: usize,
    #[serde(default = "default_gamma_min")]
    pub gamma_min: f64,
    #[serde(default = "default_gamma_max")]
    pub gamma_max: f64,
    #[serde(default = "default_gamma_steps")]
    pub gamma_steps: usize,
}

impl Default for GravityConfig {
    fn default() -> Self {
        Self {
            beta_min: default_beta_min(),
            beta_max: default_beta_max(),
            beta_steps: default_beta_steps(),
            gamma_min: default_gamma_min(),
            gamma_max: default_gamma_max(),
            gamma_steps: default_gamma_steps(),
        }
    }
}

fn default_beta_min() -> f64 {
    0.5
}

fn default_beta_max() -> f64 {
    1.5
}

fn default_beta_steps() -> usize {
    101
}

fn default_gamma_min() -> f64 {
    0.01
}

fn default_gamma_max() -> f64 {
    1.5
}

fn default_gamma_steps() -> usize {
    150
}

impl GravityConfig {
    pub fn grid(&self) -> Grid {
        Grid::new(
            (self.beta_min, self.beta_max, self.beta_steps),
            (self.gamma_min, self.gamma_max, self.gamma_steps),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiationConfig {
    /// Rescale each source's estimates to its observed total.
    #[serde(default = "default_true")]
    pub normalize: bool,
}

impl Default for RadiationConfig {
    fn default() -> Self {
        Self { normalize: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Cumulative flow share defining the threshold distance.
    #[serde(default = "default_level")]
    pub level: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> f64 {
    0.9
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramConfig {
    /// Number of log-spaced bin edges.
    #[serde(default = "default_bins")]
    pub bins: usize,

    #[serde(default = "default_top")]
    pub top: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            bins: default_bins(),
            top: default_top(),
        }
    }
}

fn default_bins() -> usize {
    500
}

fn default_top() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalsConfig {
    /// Capital geocodes to report on.
    #[serde(default = "default_targets")]
    pub targets: Vec<u32>,

    /// Prefix of the output file names.
    #[serde(default = "default_label")]
    pub label: String,
}

impl Default for CapitalsConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            label: default_label(),
        }
    }
}

fn default_targets() -> Vec<u32> {
    crate::analysis::capitals::DEFAULT_TARGETS.to_vec()
}

fn default_label() -> String {
    "capitals".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.data_dir {
            self.general.data_dir = dir.clone();
        }
        if let Some(threads) = args.threads {
            self.general.threads = threads;
        }
        if args.verbose {
            self.general.verbose = true;
        }
        if args.no_progress || args.quiet {
            self.general.progress = false;
        }
    }

    /// Resolve a file name against the data directory. Absolute paths pass
    /// through.
    pub fn data_path(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.general.data_dir.join(path)
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.data_dir, PathBuf::from("data"));
        assert_eq!(config.gravity.beta_steps, 101);
        assert_eq!(config.gravity.gamma_steps, 150);
        assert!(config.radiation.normalize);
        assert_eq!(config.threshold.level, 0.9);
        assert_eq!(config.histogram.bins, 500);
        assert_eq!(config.capitals.targets, vec![2408102, 2611606, 3106200, 5002704]);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
data_dir = "/srv/censo"
verbose = true
threads = 8

[gravity]
beta_steps = 11
gamma_min = 0.5

[radiation]
normalize = false

[capitals]
targets = [3304557]
label = "rio"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.data_dir, PathBuf::from("/srv/censo"));
        assert!(config.general.verbose);
        assert_eq!(config.general.threads, 8);
        assert!(config.general.progress);
        assert_eq!(config.gravity.beta_steps, 11);
        assert_eq!(config.gravity.beta_min, 0.5);
        assert_eq!(config.gravity.gamma_min, 0.5);
        assert!(!config.radiation.normalize);
        assert_eq!(config.capitals.targets, vec![3304557]);
        assert_eq!(config.capitals.label, "rio");
        assert_eq!(config.lookups.fractions, "Fractions.csv");
    }

    #[test]
    fn test_data_path() {
        let config = Config::default();
        assert_eq!(
            config.data_path("Fractions.csv"),
            PathBuf::from("data/Fractions.csv")
        );
        assert_eq!(config.data_path("/tmp/x.csv"), PathBuf::from("/tmp/x.csv"));
    }

    #[test]
    fn test_grid_from_config() {
        let grid = GravityConfig::default().grid();
        assert_eq!(grid.beta.len(), 101);
        assert_eq!(grid.gamma.len(), 150);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[lookups]"));
        assert!(toml_str.contains("[gravity]"));
        assert!(toml_str.contains("[capitals]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gravity.gamma_steps, 150);
    }
}
