//! Flux CLI - Command-line interface for Competency Flux
//!
//! Commands:
//! - aggregate: Compute comparative competency records from respondent tables
//! - coverage: Rank topics by how many questions probe them
//! - validate: Report defects in the mapping documents

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use competency_flux::config::RunConfig;
use competency_flux::coverage::CoverageAnalyzer;
use competency_flux::mapping::TableDefects;
use competency_flux::pipeline::{AggregationRun, CsvFileSource, Partition, YearReport, YearSummary};
use competency_flux::types::RunProvenance;
use competency_flux::{ComputeError, CourseDirectory, MappingStore, FLUX_VERSION};

/// Flux - Aggregation engine for exam competency performance
#[derive(Parser)]
#[command(name = "flux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Aggregate exam microdata into competency statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute comparative records for one or more exam years
    Aggregate {
        /// TOML run configuration
        #[arg(short, long, env = "FLUX_CONFIG")]
        config: Option<PathBuf>,

        /// Subject mapping collection (JSON)
        #[arg(long)]
        mappings: PathBuf,

        /// General mapping document (JSON)
        #[arg(long)]
        general_mappings: PathBuf,

        /// Course directory (delimited text)
        #[arg(long)]
        directory: PathBuf,

        /// Input root laid out as <partition>/<year>/*.csv
        #[arg(short, long)]
        input: PathBuf,

        /// Output root
        #[arg(short, long)]
        output: PathBuf,

        /// Exam years to process (repeatable); defaults to config, then input layout
        #[arg(long = "year")]
        years: Vec<String>,

        /// Rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Partitions processed in parallel
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Rank topics by question coverage
    Coverage {
        /// Subject mapping collection (JSON)
        #[arg(long)]
        mappings: PathBuf,

        /// General mapping document (JSON)
        #[arg(long)]
        general_mappings: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Check mapping documents for defects
    Validate {
        /// TOML run configuration, for per-year layouts
        #[arg(short, long, env = "FLUX_CONFIG")]
        config: Option<PathBuf>,

        /// Subject mapping collection (JSON)
        #[arg(long)]
        mappings: PathBuf,

        /// General mapping document (JSON)
        #[arg(long)]
        general_mappings: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    // Logs go to stderr so stdout stays machine-readable
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init();
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Aggregate {
            config,
            mappings,
            general_mappings,
            directory,
            input,
            output,
            years,
            batch_size,
            workers,
        } => {
            let mut config = RunConfig::load(config.as_deref())?;
            if !years.is_empty() {
                config.years = years;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            config.validate()?;

            cmd_aggregate(config, &mappings, &general_mappings, &directory, &input, &output)
        }
        Commands::Coverage {
            mappings,
            general_mappings,
            output,
        } => cmd_coverage(&mappings, &general_mappings, &output),
        Commands::Validate {
            config,
            mappings,
            general_mappings,
            json,
        } => cmd_validate(config.as_deref(), &mappings, &general_mappings, json),
    }
}

fn cmd_aggregate(
    mut config: RunConfig,
    mappings: &Path,
    general_mappings: &Path,
    directory: &Path,
    input: &Path,
    output: &Path,
) -> Result<(), FluxCliError> {
    let store = MappingStore::load(mappings, general_mappings)?;
    let directory = CourseDirectory::load_csv(directory, config.table.delimiter_byte()?)?;

    if config.years.is_empty() {
        config.years = discover_years(input)?;
    }
    if config.years.is_empty() {
        return Err(FluxCliError::NoYears);
    }

    let years = config.years.clone();
    let run = AggregationRun::new(config, store, directory);
    tracing::info!(run_id = run.run_id(), years = ?years, "starting aggregation run");

    let mut summaries = Vec::new();
    let mut skipped_years = Vec::new();
    for year in &years {
        let partitions = discover_partitions(input, year)?;
        let outcome = run.run_year(year, &partitions);
        match run.build_report(&outcome) {
            Some(report) => {
                write_year(output, year, &report)?;
                summaries.push(report.summary);
            }
            None => skipped_years.push(year.clone()),
        }
    }

    let summary = RunSummary {
        provenance: run.provenance(),
        years: summaries,
        skipped_years,
    };
    write_json(&output.join("run_summary.json"), &summary)?;

    if summary.years.is_empty() {
        return Err(FluxCliError::NoData);
    }
    Ok(())
}

fn write_year(output: &Path, year: &str, report: &YearReport) -> Result<(), FluxCliError> {
    let year_dir = output.join(year);

    let comparative_dir = year_dir.join(format!("competencias_{year}"));
    for document in report.comparative.municipality_documents() {
        let file = format!("{}.json", file_name(document.municipality));
        write_json(&comparative_dir.join(file), &document)?;
    }

    let scopes_dir = year_dir.join("scopes");
    for document in &report.scopes {
        write_json(&scopes_dir.join(format!("{}.json", document.file_stem())), document)?;
    }

    tracing::info!(
        year,
        municipalities = report.comparative.municipalities.len(),
        courses = report.comparative.course_count(),
        "year documents written"
    );
    Ok(())
}

/// Years present under any `<input>/<partition>/` directory
fn discover_years(input: &Path) -> Result<Vec<String>, FluxCliError> {
    let mut years = std::collections::BTreeSet::new();
    for partition in sorted_dirs(input)? {
        for year in sorted_dirs(&partition)? {
            if let Some(name) = year.file_name().and_then(|n| n.to_str()) {
                years.insert(name.to_string());
            }
        }
    }
    Ok(years.into_iter().collect())
}

/// One partition per `<input>/<partition>/<year>/` directory holding CSV tables
fn discover_partitions(input: &Path, year: &str) -> Result<Vec<Partition>, FluxCliError> {
    let mut partitions = Vec::new();
    for partition_dir in sorted_dirs(input)? {
        let year_dir = partition_dir.join(year);
        if !year_dir.is_dir() {
            continue;
        }
        let name = partition_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut tables: Vec<PathBuf> = fs::read_dir(&year_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("txt"))
            })
            .collect();
        tables.sort();

        if tables.is_empty() {
            tracing::warn!(partition = %name, year, "partition directory has no tables");
            continue;
        }
        let mut partition = Partition::new(name);
        for table in tables {
            partition = partition.with_source(CsvFileSource::new(table));
        }
        partitions.push(partition);
    }
    Ok(partitions)
}

fn sorted_dirs(path: &Path) -> Result<Vec<PathBuf>, FluxCliError> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn file_name(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

fn cmd_coverage(mappings: &Path, general_mappings: &Path, output: &Path) -> Result<(), FluxCliError> {
    let store = MappingStore::load(mappings, general_mappings)?;
    let report = CoverageAnalyzer::coverage_report(&store);

    if output.to_string_lossy() == "-" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        write_json(output, &report)?;
    }
    Ok(())
}

fn cmd_validate(
    config: Option<&Path>,
    mappings: &Path,
    general_mappings: &Path,
    json: bool,
) -> Result<(), FluxCliError> {
    let config = RunConfig::load(config)?;
    let store = MappingStore::load(mappings, general_mappings)?;
    let tables = store.validate(|year| config.layout_for(year));

    let report = ValidationReport {
        subject_groups: store.subject_groups().count(),
        general_years: store.general_years().count(),
        defective_tables: tables.len(),
        defects: tables.iter().map(|t| t.defects.len()).sum(),
        tables,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Mapping Validation Report");
        println!("=========================");
        println!("Subject groups:   {}", report.subject_groups);
        println!("General years:    {}", report.general_years);
        println!("Defective tables: {}", report.defective_tables);
        println!("Defects:          {}", report.defects);

        for table in &report.tables {
            println!("\n{} / {}:", table.scope, table.year);
            for defect in &table.defects {
                println!("  - {} [{}]: {}", defect.question, defect.kind.as_str(), defect.detail);
            }
        }
    }

    if report.defects > 0 {
        return Err(FluxCliError::ValidationFailed(report.defects));
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FluxCliError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

// Error types

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoYears,
    NoData,
    ValidationFailed(usize),
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<ComputeError> for FluxCliError {
    fn from(e: ComputeError) -> Self {
        FluxCliError::Compute(e)
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Compute(e) => {
                let hint = match &e {
                    ComputeError::Config(_) | ComputeError::Toml(_) => "Check the run configuration",
                    ComputeError::MissingColumn(_) => "Check [table] column names against the input header",
                    ComputeError::JsonError(_) => "Check the mapping documents",
                    _ => "Check input files",
                };
                CliError {
                    code: "COMPUTE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FluxCliError::NoYears => CliError {
                code: "NO_YEARS".to_string(),
                message: "No exam years to process".to_string(),
                hint: Some("Pass --year or lay input out as <partition>/<year>/".to_string()),
            },
            FluxCliError::NoData => CliError {
                code: "NO_DATA".to_string(),
                message: "No year produced any documents".to_string(),
                hint: Some("See run_summary.json for failed partitions".to_string()),
            },
            FluxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} mapping defects found", count),
                hint: Some("Fix the listed mapping entries and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct RunSummary {
    provenance: RunProvenance,
    years: Vec<YearSummary>,
    skipped_years: Vec<String>,
}

#[derive(Serialize)]
struct ValidationReport {
    subject_groups: usize,
    general_years: usize,
    defective_tables: usize,
    defects: usize,
    tables: Vec<TableDefects>,
}
