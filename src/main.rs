//! Pendular - commuting flows from Brazilian Census 2010 microdata
//!
//! A CLI tool that tabulates work/study commuting from the census person
//! sample, redistributes unknown destinations and compares the observed
//! flows with gravity and radiation models.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (missing input, malformed table, etc.)

mod analysis;
mod census;
mod cli;
mod config;
mod error;
mod models;
mod progress;
mod report;
mod scanner;
mod spatial;
mod tabular;

use analysis::filter::{FilterRequest, Matrix};
use analysis::{capitals, histogram, redistribution, threshold};
use anyhow::{bail, Context, Result};
use census::lookups::read_municipalities;
use census::{LookupPaths, Lookups, Microdata, RecordLayout};
use chrono::Utc;
use cli::{Args, Command};
use config::{Config, DEFAULT_CONFIG_FILE};
use models::{expand_fu_request, RunMetadata, RunReport, StepOutcome};
use scanner::{InputScanner, ScanConfig};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if args.command == Command::InitConfig {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Pendular v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(&args) {
        error!("{} failed: {:#}", args.command.name(), e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// Handle init-config: generate a default .pendular.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the data directory, lookup tables and model grids.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run one subcommand and write the optional run report.
fn run(args: &Args) -> Result<()> {
    let start_time = Instant::now();
    let started = Utc::now();

    // Load configuration
    let mut config = load_config(args)?;
    config.merge_with_args(args);

    if config.general.threads > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(config.general.threads)
            .build_global()
        {
            warn!("Could not size the thread pool: {}", e);
        }
    }

    let steps = match &args.command {
        Command::Extract { microdata, all } => run_extract(&config, microdata, *all)?,
        Command::Redistribute { fus } => vec![run_redistribute(&config, fus)?],
        Command::Distance { centroids } => vec![run_distance(&config, centroids)?],
        Command::Compare {
            srcfu,
            tgtfu,
            path,
            distances,
        } => vec![run_compare(
            &config,
            srcfu,
            tgtfu,
            path.as_deref(),
            distances.as_deref(),
        )?],
        Command::Filter {
            colsrc,
            valsrc,
            coltgt,
            valtgt,
            path,
            sep,
        } => {
            let request = FilterRequest {
                colsrc: colsrc.clone(),
                valsrc: valsrc.clone(),
                coltgt: coltgt.clone(),
                valtgt: valtgt.clone(),
            };
            vec![run_filter(&config, &request, path.as_deref(), sep)?]
        }
        Command::Capitals {
            totals,
            flows,
            label,
            targets,
        } => vec![run_capitals(
            &config,
            totals.as_deref(),
            flows.as_deref(),
            label.as_deref(),
            targets,
        )?],
        Command::Threshold { path, level } => {
            vec![run_threshold(&config, path.as_deref(), *level)?]
        }
        Command::Stats { matrices, top } => run_stats(&config, matrices, *top)?,
        Command::InitConfig => Vec::new(),
    };

    let duration = start_time.elapsed().as_secs_f64();
    println!(
        "\n✅ {} complete in {:.1}s",
        args.command.name(),
        duration
    );

    if let Some(ref path) = args.report {
        let report = RunReport {
            metadata: RunMetadata {
                command: std::env::args().skip(1).collect::<Vec<_>>().join(" "),
                started,
                duration_seconds: duration,
                data_dir: config.general.data_dir.display().to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            steps,
        };
        report::write_report(&report, path, args.format)?;
        println!("   Report saved to: {}", path.display());
    }

    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

fn load_lookups(config: &Config) -> Result<Lookups> {
    let movement = config.data_path(&config.lookups.movement_municipalities);
    let municipalities = config.data_path(&config.lookups.municipalities);
    let fractions = config.data_path(&config.lookups.fractions);
    let federation_units = config.data_path(&config.lookups.federation_units);
    let countries = config.data_path(&config.lookups.countries);

    let lookups = Lookups::load(&LookupPaths {
        movement_municipalities: &movement,
        municipalities: &municipalities,
        fractions: &fractions,
        federation_units: &federation_units,
        countries: &countries,
    })
    .context("Failed to load lookup tables")?;
    debug!(
        "Loaded {} municipalities, {} movement codes, {} FUs, {} countries",
        lookups.municipalities.len(),
        lookups.movement_municipalities.len(),
        lookups.federation_units.len(),
        lookups.countries.len()
    );
    Ok(lookups)
}

/// Tabulate each microdata input into its three extraction tables.
fn run_extract(config: &Config, microdata: &[PathBuf], all: bool) -> Result<Vec<StepOutcome>> {
    let data_dir = &config.general.data_dir;
    let inputs = if all {
        let scanner = InputScanner::new(data_dir.clone(), ScanConfig::default());
        let found = scanner.microdata();
        if found.is_empty() {
            bail!("no microdata found under {}", data_dir.display());
        }
        found
    } else {
        microdata.to_vec()
    };

    let layout_path = config.data_path(&config.lookups.layout);
    let layout = RecordLayout::from_path(&layout_path)
        .with_context(|| format!("Failed to read layout {}", layout_path.display()))?;
    let lookups = load_lookups(config)?;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    println!("📥 Extracting {} microdata input(s)", inputs.len());
    let mut steps = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let source = Microdata::open(input)
            .with_context(|| format!("Failed to open {}", input.display()))?;
        let geocodes: Vec<String> = lookups
            .in_scope(&source.prefix)
            .iter()
            .map(|m| m.geocode.clone())
            .collect();
        if geocodes.is_empty() {
            bail!("no municipality matches prefix '{}'", source.prefix);
        }

        let extraction =
            analysis::run_extraction(&source, &layout, geocodes, config.general.progress)
                .with_context(|| format!("Extraction of {} failed", source.describe()))?;
        let outputs = report::tables::write_extraction(data_dir, &extraction, &lookups)?;

        println!(
            "   {}: {} records, {} pairs",
            extraction.prefix,
            extraction.records,
            extraction.pair_count()
        );
        steps.push(
            StepOutcome::new(format!("extract {}", extraction.prefix))
                .input(source.describe())
                .output(outputs.tab3605.display())
                .output(outputs.tab3599.display())
                .output(outputs.matrix.display())
                .metric("records", extraction.records as f64)
                .metric("municipalities", extraction.municipalities.len() as f64)
                .metric("population", extraction.population_total())
                .metric("pairs", extraction.pair_count() as f64),
        );
    }
    Ok(steps)
}

/// Concatenate the requested matrices and spread unknown destinations.
fn run_redistribute(config: &Config, fus: &[String]) -> Result<StepOutcome> {
    let prefixes = expand_fu_request(fus);
    let data_dir = &config.general.data_dir;
    let scanner = InputScanner::new(data_dir.clone(), ScanConfig::default());
    let paths = scanner.matrices(&prefixes)?;

    let mut step = StepOutcome::new("redistribute");
    let mut rows = Vec::new();
    for path in &paths {
        let matrix = redistribution::read_mobility_matrix(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        rows.extend(matrix);
        step = step.input(path.display());
    }
    info!("Read {} rows from {} matrices", rows.len(), paths.len());

    let mut rows = redistribution::prepare(rows);
    let summary = redistribution::redistribute(&mut rows);

    let out = data_dir.join(redistribution::output_name(fus, &prefixes));
    tabular::write_rows(&out, &rows)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!(
        "🔀 {} unknown destinations redistributed over {} origins",
        summary.redistributed, summary.origins
    );
    println!("   Saved to: {}", out.display());

    if summary.unresolved > 0 {
        step = step.note(format!(
            "{} unknown rows left in place: no known destination to receive them",
            summary.unresolved
        ));
    }
    Ok(step
        .output(out.display())
        .metric("rows", rows.len() as f64)
        .metric("origins", summary.origins as f64)
        .metric("redistributed", summary.redistributed as f64)
        .metric("unresolved", summary.unresolved as f64)
        .metric("moved", summary.moved))
}

fn run_distance(config: &Config, centroids_path: &Path) -> Result<StepOutcome> {
    let centroids = spatial::read_centroids(centroids_path)
        .with_context(|| format!("Failed to read {}", centroids_path.display()))?;
    let out = spatial::distance::output_path(centroids_path);

    println!("📏 Distances between {} centroids", centroids.len());
    let pairs = spatial::write_distance_matrix(&centroids, &out, config.general.progress)?;
    println!("   Saved {} pairs to: {}", pairs, out.display());

    Ok(StepOutcome::new("distance")
        .input(centroids_path.display())
        .output(out.display())
        .metric("centroids", centroids.len() as f64)
        .metric("pairs", pairs as f64))
}

/// Build the extended matrix and compare the gravity and radiation models.
fn run_compare(
    config: &Config,
    srcfu: &[String],
    tgtfu: &[String],
    path: Option<&Path>,
    distances: Option<&Path>,
) -> Result<StepOutcome> {
    let data_dir = &config.general.data_dir;
    let tgtfu = if tgtfu.is_empty() { srcfu } else { tgtfu };
    let flows_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join(redistribution::output_name(&[], &[])));
    let distances_path = distances
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.data_path(&config.lookups.distances));
    let municipalities_path = config.data_path(&config.lookups.municipalities);
    let municipalities = read_municipalities(&municipalities_path)
        .with_context(|| format!("Failed to read {}", municipalities_path.display()))?;

    let (extended, pairs) = spatial::build_extended_matrix(
        &distances_path,
        &flows_path,
        &municipalities,
        srcfu,
        tgtfu,
        data_dir,
    )
    .context("Failed to build the extended matrix")?;

    let grid = config.gravity.grid();
    println!(
        "🔬 Fitting gravity model on {} pairs ({} parameter combinations)",
        pairs.len(),
        grid.len()
    );
    let comparison = spatial::compare_models(
        &pairs,
        &grid,
        config.radiation.normalize,
        data_dir,
        srcfu,
        tgtfu,
        config.general.progress,
    )?;

    println!(
        "   Best fit: beta={:.4} gamma={:.4} AIC={:.2}",
        comparison.best.beta, comparison.best.gamma, comparison.best.aic
    );
    let mut step = StepOutcome::new("compare")
        .input(flows_path.display())
        .input(distances_path.display())
        .output(extended.display())
        .output(comparison.results_path.display())
        .output(comparison.matrix_path.display())
        .metric("pairs", comparison.pairs as f64)
        .metric("combinations", comparison.evaluated as f64)
        .metric("beta", comparison.best.beta)
        .metric("gamma", comparison.best.gamma)
        .metric("AIC", comparison.best.aic)
        .metric("rss/n", comparison.best.rss_per_n);

    for (model, correlation) in [
        ("gravity", comparison.gravity_correlation),
        ("radiation", comparison.radiation_correlation),
    ] {
        match correlation {
            Some(r) => {
                println!("   Pearson r (flow ~ {}): {:.4}", model, r);
                step = step.metric(&format!("pearson {}", model), r);
            }
            None => {
                step = step.note(format!("{} correlation undefined (constant column)", model));
            }
        }
    }
    Ok(step)
}

fn run_filter(
    config: &Config,
    request: &FilterRequest,
    path: Option<&Path>,
    sep: &str,
) -> Result<StepOutcome> {
    let data_dir = &config.general.data_dir;
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join(redistribution::output_name(&[], &[])));
    let sep = sep.bytes().next().unwrap_or(b',');

    let matrix = Matrix::read(&path, sep)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let outcome = analysis::filter::apply(&matrix, request)?;
    let outputs = analysis::filter::write_outputs(data_dir, &matrix, &outcome)?;

    println!(
        "🔎 {} of {} rows kept, {} municipalities with totals",
        outcome.flows.len(),
        matrix.rows.len(),
        outcome.totals.len()
    );

    Ok(StepOutcome::new("filter")
        .input(path.display())
        .output(outputs.flow_matrix.display())
        .output(outputs.totals.display())
        .metric("rows", matrix.rows.len() as f64)
        .metric("kept", outcome.flows.len() as f64)
        .metric("municipalities", outcome.totals.len() as f64))
}

fn run_capitals(
    config: &Config,
    totals: Option<&Path>,
    flows: Option<&Path>,
    label: Option<&str>,
    targets: &[u32],
) -> Result<StepOutcome> {
    let data_dir = &config.general.data_dir;
    let totals = totals
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join(analysis::filter::TOTALS_FILE));
    let flows = flows
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join(analysis::filter::FLOW_MATRIX_FILE));
    let label = label.unwrap_or(config.capitals.label.as_str());
    let targets = if targets.is_empty() {
        config.capitals.targets.as_slice()
    } else {
        targets
    };

    let municipalities_path = config.data_path(&config.lookups.municipalities);
    let municipalities = read_municipalities(&municipalities_path)
        .with_context(|| format!("Failed to read {}", municipalities_path.display()))?;

    let (report, summary_path, interstate_path) =
        capitals::run(&totals, &flows, &municipalities, targets, data_dir, label)?;

    println!(
        "🏛️  {} capitals summarized, {} interstate connections",
        report.summary.len(),
        report.interstate.len()
    );

    Ok(StepOutcome::new("capitals")
        .input(totals.display())
        .input(flows.display())
        .output(summary_path.display())
        .output(interstate_path.display())
        .metric("capitals", report.summary.len() as f64)
        .metric("interstate rows", report.interstate.len() as f64))
}

fn run_threshold(config: &Config, path: Option<&Path>, level: Option<f64>) -> Result<StepOutcome> {
    let data_dir = &config.general.data_dir;
    let all = vec!["all".to_string()];
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join(spatial::pairs::extended_name(&all, &all)));
    let level = level.unwrap_or(config.threshold.level);

    let pairs = spatial::read_extended_matrix(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let (rows_path, summary_path, summary) = threshold::run(&pairs, level, data_dir)?;

    println!("📐 Distance reaching {:.0}% of each FU's flow:", level * 100.0);
    let mut step = StepOutcome::new("threshold")
        .input(path.display())
        .output(rows_path.display())
        .output(summary_path.display())
        .metric("level", level);
    for s in &summary {
        match s.distance {
            Some(d) => {
                println!("   {}: {:.1} km", s.fu, d);
                step = step.metric(&format!("{} km", s.fu), d);
            }
            None => step = step.note(format!("{} has no flow", s.fu)),
        }
    }
    Ok(step)
}

fn run_stats(config: &Config, matrices: &[PathBuf], top: Option<usize>) -> Result<Vec<StepOutcome>> {
    let top = top.unwrap_or(config.histogram.top);
    let mut steps = Vec::with_capacity(matrices.len());

    for path in matrices {
        let pairs = spatial::read_extended_matrix(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let stats = histogram::compute(&pairs, config.histogram.bins, top);
        let outputs = histogram::write_stats(path, &stats)?;

        println!(
            "📊 {}: {} nodes, {} edges, density {:.4}",
            path.display(),
            stats.network.nodes,
            stats.network.edges,
            stats.network.density
        );

        let mut step = StepOutcome::new(format!("stats {}", path.display()))
            .input(path.display())
            .metric("nodes", stats.network.nodes as f64)
            .metric("edges", stats.network.edges as f64)
            .metric("density", stats.network.density)
            .metric("total flow", stats.network.total_flow);
        for output in &outputs {
            step = step.output(output.display());
        }
        steps.push(step);
    }
    Ok(steps)
}
