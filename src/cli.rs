//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pendular - commuting matrices from Brazilian Census 2010 microdata
///
/// Extracts work/study commuting flows from the person sample, spreads
/// unknown destinations over known ones and compares the observed flows
/// with gravity and radiation models.
///
/// Examples:
///   pendular extract data/RJ.zip
///   pendular extract --all
///   pendular redistribute RJ SP
///   pendular distance data/Brazil-municipalities-2010-centroids.csv
///   pendular compare --srcfu RJ --tgtfu RJ
///   pendular filter --valsrc PE --valtgt PE
///   pendular init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .pendular.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding inputs and receiving outputs
    #[arg(long, value_name = "DIR", env = "PENDULAR_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Worker threads for parallel passes (0 = all cores)
    #[arg(long, value_name = "NUM", global = true)]
    pub threads: Option<usize>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Hide progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Write a run report to this file
    #[arg(long, value_name = "FILE", global = true)]
    pub report: Option<PathBuf>,

    /// Run report format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT", global = true)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Tabulate microdata into tab3605, tab3599 and the mobility matrix
    Extract {
        /// Person sample files (.txt) or zipped releases (.zip)
        #[arg(value_name = "MICRODATA")]
        microdata: Vec<PathBuf>,

        /// Process every microdata input found under the data directory
        #[arg(long, conflicts_with = "microdata")]
        all: bool,
    },

    /// Spread unknown destinations over known ones
    Redistribute {
        /// FU acronyms, or `all`
        #[arg(value_name = "FU", default_value = "all")]
        fus: Vec<String>,
    },

    /// Geodesic distance between every pair of municipality centroids
    Distance {
        /// Centroid table (CD_GEOCODM, NM_MUNICIP, X, Y)
        #[arg(value_name = "CENTROIDS")]
        centroids: PathBuf,
    },

    /// Fit the gravity model and compare with the radiation model
    Compare {
        /// Source FUs, or `all`
        #[arg(long, value_name = "FU", num_args = 1.., default_value = "all")]
        srcfu: Vec<String>,

        /// Target FUs (default: same as source)
        #[arg(long, value_name = "FU", num_args = 1..)]
        tgtfu: Vec<String>,

        /// Redistributed mobility matrix
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,

        /// Pairwise distance table
        #[arg(long, value_name = "FILE")]
        distances: Option<PathBuf>,
    },

    /// Filter a matrix by origin/destination and total in/out flows
    Filter {
        /// Source column to filter on
        #[arg(long, default_value = "Origin FU")]
        colsrc: String,

        /// Accepted source values
        #[arg(long, value_name = "VALUE", num_args = 1..)]
        valsrc: Vec<String>,

        /// Target column to filter on
        #[arg(long, default_value = "Destination FU")]
        coltgt: String,

        /// Accepted target values
        #[arg(long, value_name = "VALUE", num_args = 1..)]
        valtgt: Vec<String>,

        /// Matrix to filter
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,

        /// Column separator
        #[arg(long, default_value = ",")]
        sep: String,
    },

    /// Flow density and interstate flow of state capitals
    Capitals {
        /// In/out totals from `filter`
        #[arg(long, value_name = "FILE")]
        totals: Option<PathBuf>,

        /// Flow matrix from `filter`
        #[arg(long, value_name = "FILE")]
        flows: Option<PathBuf>,

        /// Output file prefix
        #[arg(long)]
        label: Option<String>,

        /// Capital geocodes to report on
        #[arg(long, value_name = "GEOCODE", num_args = 1..)]
        targets: Vec<u32>,
    },

    /// Distance reaching a share of each FU's flow
    Threshold {
        /// Extended mobility matrix
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,

        /// Cumulative share (0, 1]
        #[arg(long)]
        level: Option<f64>,
    },

    /// Flow distributions, network density and top municipalities
    Stats {
        /// Extended or model matrices
        #[arg(value_name = "MATRIX", required = true)]
        matrices: Vec<PathBuf>,

        /// Entries per ranking
        #[arg(long, value_name = "N")]
        top: Option<usize>,
    },

    /// Generate a default .pendular.toml configuration file
    InitConfig,
}

/// Output format for the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref dir) = self.data_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(format!("Data path is not a directory: {}", dir.display()));
            }
        }

        match &self.command {
            Command::Extract { microdata, all } => {
                if microdata.is_empty() && !all {
                    return Err("Give microdata files or --all".to_string());
                }
                for path in microdata {
                    if !path.is_file() {
                        return Err(format!("Microdata file does not exist: {}", path.display()));
                    }
                }
            }
            Command::Distance { centroids } => {
                if !centroids.is_file() {
                    return Err(format!(
                        "Centroid file does not exist: {}",
                        centroids.display()
                    ));
                }
            }
            Command::Filter { sep, .. } => {
                if sep.len() != 1 {
                    return Err("Separator must be a single byte".to_string());
                }
            }
            Command::Threshold {
                level: Some(level), ..
            } => {
                if !(*level > 0.0 && *level <= 1.0) {
                    return Err("Threshold level must be in (0, 1]".to_string());
                }
            }
            Command::Stats { top: Some(0), .. } => {
                return Err("Top count must be at least 1".to_string());
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

impl Command {
    /// Subcommand name as typed.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Extract { .. } => "extract",
            Command::Redistribute { .. } => "redistribute",
            Command::Distance { .. } => "distance",
            Command::Compare { .. } => "compare",
            Command::Filter { .. } => "filter",
            Command::Capitals { .. } => "capitals",
            Command::Threshold { .. } => "threshold",
            Command::Stats { .. } => "stats",
            Command::InitConfig => "init-config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args(command: Command) -> Args {
        Args {
            command,
            config: None,
            data_dir: None,
            threads: None,
            verbose: false,
            quiet: false,
            no_progress: false,
            report: None,
            format: OutputFormat::Markdown,
        }
    }

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from(["pendular", "redistribute", "RJ", "SP"]).unwrap();
        assert_eq!(
            args.command,
            Command::Redistribute {
                fus: vec!["RJ".to_string(), "SP".to_string()]
            }
        );

        let args = Args::try_parse_from(["pendular", "redistribute"]).unwrap();
        assert_eq!(
            args.command,
            Command::Redistribute {
                fus: vec!["all".to_string()]
            }
        );

        let args = Args::try_parse_from([
            "pendular", "compare", "--srcfu", "RJ", "SP", "--tgtfu", "RJ", "-v",
        ])
        .unwrap();
        assert!(args.verbose);
        match args.command {
            Command::Compare { srcfu, tgtfu, .. } => {
                assert_eq!(srcfu, vec!["RJ", "SP"]);
                assert_eq!(tgtfu, vec!["RJ"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_filter_defaults() {
        let args = Args::try_parse_from(["pendular", "filter", "--valsrc", "PE"]).unwrap();
        match args.command {
            Command::Filter {
                colsrc,
                valsrc,
                coltgt,
                valtgt,
                sep,
                ..
            } => {
                assert_eq!(colsrc, "Origin FU");
                assert_eq!(valsrc, vec!["PE"]);
                assert_eq!(coltgt, "Destination FU");
                assert!(valtgt.is_empty());
                assert_eq!(sep, ",");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_extract_needs_inputs() {
        let args = make_args(Command::Extract {
            microdata: vec![],
            all: false,
        });
        assert!(args.validate().is_err());

        let args = make_args(Command::Extract {
            microdata: vec![],
            all: true,
        });
        assert!(args.validate().is_ok());

        assert!(Args::try_parse_from(["pendular", "extract", "--all", "x.zip"]).is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args(Command::InitConfig);
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_values() {
        let args = make_args(Command::Filter {
            colsrc: "Origin FU".to_string(),
            valsrc: vec![],
            coltgt: "Destination FU".to_string(),
            valtgt: vec![],
            path: None,
            sep: ";;".to_string(),
        });
        assert!(args.validate().is_err());

        let args = make_args(Command::Threshold {
            path: None,
            level: Some(1.5),
        });
        assert!(args.validate().is_err());

        let args = make_args(Command::Stats {
            matrices: vec![PathBuf::from("m.csv")],
            top: Some(0),
        });
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args(Command::InitConfig);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::InitConfig.name(), "init-config");
        assert_eq!(
            Command::Stats {
                matrices: vec![],
                top: None
            }
            .name(),
            "stats"
        );
    }
}
